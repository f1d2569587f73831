// SPDX-License-Identifier: Apache-2.0
//! Schema-defaulting merge: backfill a possibly-partial loaded document
//! against a complete defaults template.

use serde_json::{map::Entry, Value};

/// Merge `loaded` under `defaults`, producing a complete document.
///
/// Field-by-field, recursively: a field absent from `loaded` takes the
/// default; when both sides are objects the merge recurses; any loaded
/// scalar, array, or explicit null wins outright (arrays are replaced
/// wholesale, never element-merged). `defaults` is never narrowed against
/// the loaded shape and is never mutated — repeated merges against the same
/// template are safe.
pub fn merge_defaults(loaded: Value, defaults: &Value) -> Value {
    match (loaded, defaults) {
        (Value::Object(mut merged), Value::Object(template)) => {
            for (key, default_value) in template {
                match merged.entry(key.as_str()) {
                    Entry::Vacant(slot) => {
                        slot.insert(default_value.clone());
                    }
                    Entry::Occupied(mut slot) => {
                        if slot.get().is_object() && default_value.is_object() {
                            let nested = slot.get_mut().take();
                            *slot.get_mut() = merge_defaults(nested, default_value);
                        }
                        // Scalar, array, or explicit null: the loaded value wins.
                    }
                }
            }
            Value::Object(merged)
        }
        // Non-object on either side: no fields to backfill, loaded wins.
        (other, _) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_takes_all_defaults() {
        let defaults = json!({ "a": { "b": 1, "c": 2 } });
        let merged = merge_defaults(json!({}), &defaults);
        assert_eq!(merged, defaults);
    }

    #[test]
    fn partial_nested_record_is_backfilled() {
        let defaults = json!({ "a": { "b": 1, "c": 2 } });
        let merged = merge_defaults(json!({ "a": { "b": 5 } }), &defaults);
        assert_eq!(merged, json!({ "a": { "b": 5, "c": 2 } }));
    }

    #[test]
    fn arrays_replace_wholesale() {
        let defaults = json!({ "a": { "b": 1 } });
        let merged = merge_defaults(json!({ "a": [1, 2] }), &defaults);
        assert_eq!(merged, json!({ "a": [1, 2] }));
    }

    #[test]
    fn loaded_scalar_beats_default_record() {
        let defaults = json!({ "a": { "b": 1 } });
        let merged = merge_defaults(json!({ "a": 7 }), &defaults);
        assert_eq!(merged, json!({ "a": 7 }));
    }

    #[test]
    fn explicit_null_counts_as_present() {
        let defaults = json!({ "a": 1, "b": 2 });
        let merged = merge_defaults(json!({ "a": null }), &defaults);
        assert_eq!(merged, json!({ "a": null, "b": 2 }));
    }

    #[test]
    fn unknown_loaded_keys_survive() {
        let defaults = json!({ "a": 1 });
        let merged = merge_defaults(json!({ "z": true }), &defaults);
        assert_eq!(merged, json!({ "a": 1, "z": true }));
    }

    #[test]
    fn defaults_are_not_corrupted_by_repeated_merges() {
        let defaults = json!({ "a": { "b": 1, "c": 2 } });
        let before = defaults.clone();
        let _first = merge_defaults(json!({ "a": { "b": 9 } }), &defaults);
        let second = merge_defaults(json!({}), &defaults);
        assert_eq!(defaults, before);
        assert_eq!(second, before);
    }
}
