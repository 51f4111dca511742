//! Cache Keys and Pattern Discovery
//!
//! Keys follow `namespace:hostname:METHOD:path[:queryHash]`. The hostname segment
//! keeps tenants apart; the query hash keeps distinct queries of one path apart.
//!
//! [`PatternIndex`] turns a glob pattern into the set of *primary* keys it covers:
//! it scans exhaustively, then drops keys of another tenant (a glob such as
//! `ns:host*` also matches `ns:hostile:...`) and derived metadata keys (keys
//! whose last segment is a fixed-length hex digest).

use sha2::{Digest, Sha256};

use crate::glob::{escape_glob, has_wildcards};
use crate::store::Store;

/// Hex characters kept from the query digest
const QUERY_HASH_LEN: usize = 16;

/// Builds keys and scoped patterns for one namespace and tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    namespace: String,
    hostname: String,
}

/// `:` separates key segments, so it cannot appear inside one
fn segment(raw: &str) -> String {
    raw.replace(':', "_")
}

impl KeyBuilder {
    /// Create a builder for `namespace` and tenant `hostname`
    ///
    /// Colons (e.g. a port in `host:8080`) are replaced by `_`.
    #[must_use]
    pub fn new(namespace: &str, hostname: &str) -> Self {
        Self {
            namespace: segment(namespace),
            hostname: segment(hostname),
        }
    }

    /// Tenant segment used by this builder
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Digest of a query string as it appears in keys
    #[must_use]
    pub fn query_hash(query: &str) -> String {
        let digest = hex::encode(Sha256::digest(query.as_bytes()));
        digest.chars().take(QUERY_HASH_LEN).collect()
    }

    /// Primary key of a request
    ///
    /// An empty or absent query produces no hash segment.
    #[must_use]
    pub fn key(&self, method: &str, path: &str, query: Option<&str>) -> String {
        let base = format!(
            "{}:{}:{}:{}",
            self.namespace,
            self.hostname,
            method.to_ascii_uppercase(),
            path
        );
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => format!("{base}:{}", Self::query_hash(q)),
            None => base,
        }
    }

    /// Every GET representation of one entity: `ns:host:GET:/Set('id')*`
    #[must_use]
    pub fn entity_pattern(&self, entity_set: &str, id: &str) -> String {
        format!(
            "{}:{}:GET:{}*",
            escape_glob(&self.namespace),
            escape_glob(&self.hostname),
            escape_glob(&format!("/{}('{}')", entity_set.trim_start_matches('/'), id))
        )
    }

    /// Every key whose path starts with `path_prefix` for `method`
    #[must_use]
    pub fn path_pattern(&self, method: &str, path_prefix: &str) -> String {
        format!(
            "{}:{}:{}:{}*",
            escape_glob(&self.namespace),
            escape_glob(&self.hostname),
            method.to_ascii_uppercase(),
            escape_glob(path_prefix)
        )
    }

    /// Every key of this tenant
    #[must_use]
    pub fn tenant_pattern(&self) -> String {
        format!("{}:{}:*", escape_glob(&self.namespace), escape_glob(&self.hostname))
    }
}

fn unescape_glob(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Pattern-based discovery of primary cache keys
#[derive(Debug, Clone)]
pub struct PatternIndex {
    metadata_suffix_len: usize,
}

impl PatternIndex {
    /// Treat keys ending in `:<metadata_suffix_len hex chars>` as derived metadata
    #[must_use]
    pub fn new(metadata_suffix_len: usize) -> Self {
        Self { metadata_suffix_len }
    }

    /// Whether `key` is a derived metadata key rather than a primary entry
    #[must_use]
    pub fn is_metadata_key(&self, key: &str) -> bool {
        key.rsplit_once(':').is_some_and(|(_, suffix)| {
            suffix.len() == self.metadata_suffix_len && suffix.chars().all(|c| c.is_ascii_hexdigit())
        })
    }

    /// Tenant (hostname) segment of a key
    #[must_use]
    pub fn tenant_of(key: &str) -> Option<&str> {
        key.split(':').nth(1)
    }

    /// Drop keys that the glob matched but that belong to another tenant or are metadata
    #[must_use]
    pub fn filter(&self, pattern: &str, keys: Vec<String>) -> Vec<String> {
        let tenant = Self::tenant_of(pattern)
            .filter(|segment| !has_wildcards(segment))
            .map(unescape_glob);

        keys.into_iter()
            .filter(|key| match &tenant {
                Some(tenant) => Self::tenant_of(key) == Some(tenant.as_str()),
                None => true,
            })
            .filter(|key| !self.is_metadata_key(key))
            .collect()
    }

    /// Every primary key matching `pattern`
    pub async fn keys_for(&self, store: &Store, pattern: &str) -> Vec<String> {
        self.filter(pattern, store.scan(pattern).await)
    }
}
