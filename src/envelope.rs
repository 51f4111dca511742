//! Envelope Reconciler - Shape-Aware Item Updates
//!
//! Upstream OData services wrap collections in several structurally different
//! envelopes. Shapes are recognized once, in a fixed precedence order, into the
//! tagged [`EnvelopeShape`] so call sites never sniff JSON structure themselves:
//!
//! | Precedence | Shape | Structure |
//! |---|---|---|
//! | 1 | `DirectArray` | `[ item, ... ]` |
//! | 2 | `ODataV2` | `{ "d": { "results": [ item, ... ] } }` |
//! | 3 | `ODataV4` | `{ "value": [ item, ... ] }` |
//! | 4 | `NamedCollection` | `{ "<field>": [ item, ... ] }` |
//! | 5 | `SingleEntity` | `{ "Id": ... }` or `{ "d": { "Id": ... } }` |
//! | - | `Unrecognized` | anything else |
//!
//! Items are identified by their `Id`/`id` member (key matched case-insensitively,
//! value matched exactly). Every operation returns a new payload or `None` for
//! "not applicable here"; `None` is never an error.

use serde_json::{Map, Value};

use crate::path::FieldPath;

/// Recognized envelope of a cached payload
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeShape<'a> {
    /// The payload itself is the item array
    DirectArray(&'a [Value]),
    /// OData V2 `d.results`
    ODataV2(&'a [Value]),
    /// OData V4 `value`
    ODataV4(&'a [Value]),
    /// A top-level array member with the given name
    NamedCollection(String, &'a [Value]),
    /// A single entity (bare or inside OData V2 `d`)
    SingleEntity(&'a Value),
    /// None of the above
    Unrecognized,
}

impl<'a> EnvelopeShape<'a> {
    /// Items of a collection shape
    #[must_use]
    pub fn items(&self) -> Option<&'a [Value]> {
        match self {
            Self::DirectArray(items)
            | Self::ODataV2(items)
            | Self::ODataV4(items)
            | Self::NamedCollection(_, items) => Some(*items),
            Self::SingleEntity(_) | Self::Unrecognized => None,
        }
    }

    /// Whether this is one of the collection shapes
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.items().is_some()
    }

    /// Short name (for logging)
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectArray(_) => "DirectArray",
            Self::ODataV2(_) => "ODataV2",
            Self::ODataV4(_) => "ODataV4",
            Self::NamedCollection(..) => "NamedCollection",
            Self::SingleEntity(_) => "SingleEntity",
            Self::Unrecognized => "Unrecognized",
        }
    }

    fn location(&self) -> Option<Location> {
        match self {
            Self::DirectArray(_) => Some(Location::Root),
            Self::ODataV2(_) => Some(Location::V2Results),
            Self::ODataV4(_) => Some(Location::V4Value),
            Self::NamedCollection(name, _) => Some(Location::Named(name.clone())),
            Self::SingleEntity(_) | Self::Unrecognized => None,
        }
    }
}

/// Where the item array of a collection shape lives
#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    Root,
    V2Results,
    V4Value,
    Named(String),
}

impl Location {
    fn array_mut<'a>(&self, data: &'a mut Value) -> Option<&'a mut Vec<Value>> {
        let target = match self {
            Self::Root => data,
            Self::V2Results => data.get_mut("d")?.get_mut("results")?,
            Self::V4Value => data.get_mut("value")?,
            Self::Named(name) => data.get_mut(name.as_str())?,
        };
        target.as_array_mut()
    }
}

/// Identifier of an item: `Id`, then `id`, then any case variant of "id"
#[must_use]
pub fn item_id(item: &Value) -> Option<&Value> {
    let map = item.as_object()?;
    map.get("Id")
        .or_else(|| map.get("id"))
        .or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("id"))
                .map(|(_, v)| v)
        })
}

fn position_of(items: &[Value], id: &Value) -> Option<usize> {
    items.iter().position(|item| item_id(item) == Some(id))
}

fn shallow_merge(target: &mut Value, patch: &Map<String, Value>) -> bool {
    let Some(fields) = target.as_object_mut() else {
        return false;
    };
    for (k, v) in patch {
        fields.insert(k.clone(), v.clone());
    }
    true
}

/// Options for [`EnvelopeReconciler::insert`]
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    /// Explicit location of the target array (overrides shape detection)
    pub array_path: Option<String>,
    /// Refuse to insert when an item with the same id already exists
    pub prevent_duplicates: bool,
}

/// Options for [`EnvelopeReconciler::remove`]
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Explicit location of the target array (overrides shape detection)
    pub array_path: Option<String>,
}

/// Outcome of merging a fresh collection into a cached one
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Merged payload
    pub data: Value,
    /// Items already present and overwritten field-by-field
    pub updated: usize,
    /// Items appended because they were not cached yet
    pub inserted: usize,
}

/// Applies id-based item changes to any recognized envelope
#[derive(Debug, Clone)]
pub struct EnvelopeReconciler {
    collection_fields: Vec<String>,
}

impl Default for EnvelopeReconciler {
    fn default() -> Self {
        Self::new(crate::config::CacheConfig::default().collection_fields)
    }
}

impl EnvelopeReconciler {
    /// Create a reconciler probing `collection_fields` (in order) for named collections
    #[must_use]
    pub fn new(collection_fields: Vec<String>) -> Self {
        Self { collection_fields }
    }

    /// Recognize the envelope of `data`
    #[must_use]
    pub fn detect<'a>(&self, data: &'a Value) -> EnvelopeShape<'a> {
        if let Some(items) = data.as_array() {
            return EnvelopeShape::DirectArray(items);
        }
        let Some(map) = data.as_object() else {
            return EnvelopeShape::Unrecognized;
        };

        if let Some(items) = map
            .get("d")
            .and_then(|d| d.get("results"))
            .and_then(Value::as_array)
        {
            return EnvelopeShape::ODataV2(items);
        }
        if let Some(items) = map.get("value").and_then(Value::as_array) {
            return EnvelopeShape::ODataV4(items);
        }
        for field in &self.collection_fields {
            if let Some(items) = map.get(field).and_then(Value::as_array) {
                return EnvelopeShape::NamedCollection(field.clone(), items);
            }
        }

        let has_id = item_id(data).is_some();
        if !has_id {
            // Unlisted field holding a list of entities
            let unlisted = map.iter().find_map(|(name, v)| {
                v.as_array()
                    .filter(|items| !items.is_empty() && items.iter().all(|i| item_id(i).is_some()))
                    .map(|items| (name, items))
            });
            if let Some((name, items)) = unlisted {
                return EnvelopeShape::NamedCollection(name.clone(), items);
            }
        }

        if has_id {
            return EnvelopeShape::SingleEntity(data);
        }
        match map.get("d") {
            Some(inner) if item_id(inner).is_some() => EnvelopeShape::SingleEntity(inner),
            _ => EnvelopeShape::Unrecognized,
        }
    }

    /// Shallow-merge `patch` into the item identified by `id`
    ///
    /// Sibling items are left untouched. Returns `None` if the envelope is
    /// unrecognized, no item carries `id`, or `patch` is not an object.
    #[must_use]
    pub fn find_and_update(&self, data: &Value, id: &Value, patch: &Value) -> Option<Value> {
        let patch = patch.as_object()?;
        let shape = self.detect(data);

        if let Some(location) = shape.location() {
            let index = position_of(shape.items()?, id)?;
            let mut updated = data.clone();
            let item = location.array_mut(&mut updated)?.get_mut(index)?;
            return shallow_merge(item, patch).then_some(updated);
        }

        if let EnvelopeShape::SingleEntity(entity) = shape {
            if item_id(entity) != Some(id) {
                return None;
            }
            let wrapped = !std::ptr::eq(entity, data);
            let mut updated = data.clone();
            let target = if wrapped { updated.get_mut("d")? } else { &mut updated };
            return shallow_merge(target, patch).then_some(updated);
        }

        None
    }

    /// Append `item` to the collection
    ///
    /// Uses `options.array_path` when given, otherwise the detected collection shape.
    /// Returns `None` for non-collections, an unresolvable path, or a prevented duplicate.
    #[must_use]
    pub fn insert(&self, data: &Value, item: Value, options: &InsertOptions) -> Option<Value> {
        let mut updated = data.clone();
        let items = self.target_array(&mut updated, data, options.array_path.as_deref())?;

        if options.prevent_duplicates {
            if let Some(id) = item_id(&item) {
                if position_of(items, id).is_some() {
                    return None;
                }
            }
        }

        items.push(item);
        Some(updated)
    }

    /// Remove the item identified by `id`
    ///
    /// Returns `None` if the collection cannot be located or the id is absent.
    #[must_use]
    pub fn remove(&self, data: &Value, id: &Value, options: &RemoveOptions) -> Option<Value> {
        let mut updated = data.clone();
        let items = self.target_array(&mut updated, data, options.array_path.as_deref())?;
        let index = position_of(items, id)?;
        items.remove(index);
        Some(updated)
    }

    /// Merge the items of `fresh` into the items of `existing`
    ///
    /// Present items are overwritten field-by-field and missing ones are appended.
    /// Cached items absent from `fresh` are kept. Everything outside the item array
    /// (`__count`, `@odata.count`, `__next`, ...) comes from `fresh`. Returns `None`
    /// when either side is not a collection, the two envelopes differ, or a fresh
    /// item has no identifier, meaning the caller should replace the payload wholesale.
    #[must_use]
    pub fn merge_collection(&self, existing: &Value, fresh: &Value) -> Option<MergeOutcome> {
        let fresh_shape = self.detect(fresh);
        let existing_shape = self.detect(existing);
        let location = existing_shape.location()?;
        if fresh_shape.location()? != location {
            return None;
        }
        let fresh_items = fresh_shape.items()?;
        if fresh_items.iter().any(|item| item_id(item).is_none()) {
            return None;
        }

        let mut items = existing_shape.items()?.to_vec();
        let (mut updated, mut inserted) = (0, 0);

        for fresh_item in fresh_items {
            let Some(id) = item_id(fresh_item) else {
                continue;
            };
            match position_of(&items, id) {
                Some(index) => {
                    if let (Some(slot), Some(fields)) = (items.get_mut(index), fresh_item.as_object())
                        && shallow_merge(slot, fields)
                    {
                        updated += 1;
                    }
                }
                None => {
                    items.push(fresh_item.clone());
                    inserted += 1;
                }
            }
        }

        let mut data = fresh.clone();
        *location.array_mut(&mut data)? = items;

        Some(MergeOutcome {
            data,
            updated,
            inserted,
        })
    }

    fn target_array<'a>(
        &self,
        updated: &'a mut Value,
        original: &Value,
        array_path: Option<&str>,
    ) -> Option<&'a mut Vec<Value>> {
        match array_path {
            Some(path) => FieldPath::parse(path)
                .ok()?
                .get_mut(updated)?
                .as_array_mut(),
            None => self.detect(original).location()?.array_mut(updated),
        }
    }
}
