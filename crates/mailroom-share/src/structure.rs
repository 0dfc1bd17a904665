//! Recursive scrubbing of attachment metadata.
//!
//! Attachment lists are arbitrary JSON. Every string leaf goes through
//! [`scan_for_secrets`]; mapping entries whose key names a credential-bearing
//! field are dropped outright.

use serde_json::{Map, Value};

use crate::secrets::scan_for_secrets;

/// Attachment fields that carry credentials or fetchable locations. Stored in
/// matching form: lowercase, no whitespace.
pub const ATTACHMENT_REDACT_KEYS: &[&str] = &[
    "download_url",
    "headers",
    "authorization",
    "signed_url",
    "bearer_token",
];

/// Whether a mapping key names a credential field. Case, whitespace and NUL
/// characters in `key` are ignored.
fn names_credential_field(key: &str) -> bool {
    let folded: String = key
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '\0')
        .flat_map(char::to_lowercase)
        .collect();
    ATTACHMENT_REDACT_KEYS.contains(&folded.as_str())
}

/// Sanitized copy of a value plus what was done to it.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureScrub {
    pub value: Value,
    /// Secret matches replaced in string leaves.
    pub replacements: i64,
    /// Sensitive keys dropped while holding a non-empty value.
    pub keys_removed: i64,
}

impl StructureScrub {
    fn leaf(value: Value, replacements: i64) -> Self {
        Self {
            value,
            replacements,
            keys_removed: 0,
        }
    }
}

/// Recursively scrub secrets in a JSON structure, depth-first.
#[must_use]
pub fn scrub_structure(value: &Value) -> StructureScrub {
    match value {
        Value::String(s) => {
            let scan = scan_for_secrets(s);
            StructureScrub::leaf(Value::String(scan.text), scan.replacements)
        }
        Value::Array(items) => {
            let mut replacements = 0;
            let mut keys_removed = 0;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let child = scrub_structure(item);
                replacements += child.replacements;
                keys_removed += child.keys_removed;
                out.push(child.value);
            }
            StructureScrub {
                value: Value::Array(out),
                replacements,
                keys_removed,
            }
        }
        Value::Object(entries) => {
            let mut replacements = 0;
            let mut keys_removed = 0;
            let mut out = Map::new();
            for (key, val) in entries {
                if names_credential_field(key) {
                    // Dropped either way; only counted when something was there.
                    if carries_value(val) {
                        keys_removed += 1;
                    }
                    continue;
                }
                let child = scrub_structure(val);
                replacements += child.replacements;
                keys_removed += child.keys_removed;
                out.insert(key.clone(), child.value);
            }
            StructureScrub {
                value: Value::Object(out),
                replacements,
                keys_removed,
            }
        }
        scalar => StructureScrub::leaf(scalar.clone(), 0),
    }
}

/// False for `null` and for zero-length strings, lists and mappings.
fn carries_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        Value::Object(entries) => {
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&entries[key.as_str()]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Compact JSON with mapping keys sorted at every depth.
///
/// Identical input always yields identical bytes, regardless of the order the
/// keys were stored in.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sorted(value)).unwrap_or_else(|_| "[]".to_string())
}
