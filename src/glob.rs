//! Redis-style glob patterns
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\x` escapes, matching the
//! semantics of `SCAN ... MATCH`.

use regex::Regex;

/// Characters with special meaning in a glob pattern
const GLOB_SPECIAL: &[char] = &['*', '?', '[', ']', '\\'];

/// Escape a literal (e.g. an entity id) so it can be embedded in a glob pattern
#[must_use]
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Whether the string contains an unescaped glob metacharacter
#[must_use]
pub fn has_wildcards(segment: &str) -> bool {
    let mut escaped = false;
    for c in segment.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Compile a glob into an anchored regex
///
/// # Errors
///
/// Returns an error only if the generated expression is rejected by `regex`,
/// which cannot happen for escaped input.
pub fn compile_glob(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() * 2 + 6);
    re.push_str("(?s)^");

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => match chars.next() {
                Some(next) => push_literal(&mut re, next),
                None => re.push_str(r"\\"),
            },
            '[' => {
                let mut class = String::new();
                let mut raw = String::from("[");
                let mut closed = false;
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                    raw.push('^');
                }
                while let Some(n) = chars.next() {
                    raw.push(n);
                    match n {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(e) = chars.next() {
                                raw.push(e);
                                class.push_str(&regex::escape(e.encode_utf8(&mut [0; 4])));
                            }
                        }
                        '-' => class.push('-'),
                        other => class.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
                    }
                }
                if closed && !class.is_empty() && class != "^" {
                    re.push('[');
                    re.push_str(&class);
                    re.push(']');
                } else {
                    for r in raw.chars() {
                        push_literal(&mut re, r);
                    }
                }
            }
            other => push_literal(&mut re, other),
        }
    }

    re.push('$');
    Regex::new(&re)
}

fn push_literal(re: &mut String, c: char) {
    re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, key: &str) -> bool {
        compile_glob(pattern).map(|re| re.is_match(key)).unwrap_or(false)
    }

    #[test]
    fn test_star_and_question_mark() {
        assert!(matches("odata:host:*", "odata:host:GET:/Items"));
        assert!(!matches("odata:host:*", "odata:other:GET:/Items"));
        assert!(matches("user:?", "user:1"));
        assert!(!matches("user:?", "user:12"));
    }

    #[test]
    fn test_odata_parentheses_are_literal() {
        let pattern = "ns:h:GET:/Entities('42')*";
        assert!(matches(pattern, "ns:h:GET:/Entities('42')"));
        assert!(matches(pattern, "ns:h:GET:/Entities('42')/Children"));
        assert!(!matches(pattern, "ns:h:GET:/Entities('420')"));
    }

    #[test]
    fn test_character_classes() {
        assert!(matches("k[ab]", "ka"));
        assert!(!matches("k[ab]", "kc"));
        assert!(matches("k[^ab]", "kc"));
        assert!(matches("k[0-9]", "k7"));
        assert!(!matches("k[0-9]", "kx"));
    }

    #[test]
    fn test_escaped_literals_round_trip_through_escape_glob() {
        let id = "we*ird?[id]";
        let pattern = format!("e:{}*", escape_glob(id));
        assert!(matches(&pattern, "e:we*ird?[id]"));
        assert!(matches(&pattern, "e:we*ird?[id]:extra"));
        assert!(!matches(&pattern, "e:weXird?[id]"));
        assert!(!has_wildcards(&escape_glob(id)));
        assert!(has_wildcards("host*"));
    }
}
