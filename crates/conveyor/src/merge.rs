//! Recursive merge over JSON trees.
//!
//! Used wherever desired state is layered onto existing state: Helm
//! parameter synthesis and the merge-patch semantics of the in-memory
//! cluster.

use serde_json::Value;

/// Merge `src` onto `dst`, pointwise:
///
/// - object ⊕ object: union of keys; overlapping keys recurse.
/// - array ⊕ array: elementwise merge at matching indices; extra elements
///   are preserved from the longer side.
/// - mismatched composite shapes, scalars, and null: `src` wins wholesale
///   (null overwrites an object, an object overwrites null).
pub fn recursive_merge(src: Value, dst: Value) -> Value {
    match (src, dst) {
        (Value::Object(src), Value::Object(mut dst)) => {
            for (key, value) in src {
                let merged = match dst.remove(&key) {
                    Some(existing) => recursive_merge(value, existing),
                    None => value,
                };
                dst.insert(key, merged);
            }
            Value::Object(dst)
        }
        (Value::Array(src), Value::Array(mut dst)) => {
            let mut merged = Vec::with_capacity(src.len().max(dst.len()));
            let mut rest = dst.drain(..);
            for value in src {
                merged.push(match rest.next() {
                    Some(existing) => recursive_merge(value, existing),
                    None => value,
                });
            }
            merged.extend(rest);
            Value::Array(merged)
        }
        (src, _) => src,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn merges_maps_recursively() {
        let src = json!({
            "key1": "value1",
            "key2": {"subkey1": "subvalue1", "subkey2": true},
        });
        let dst = json!({
            "key1": "old_value1",
            "key2": {"subkey2": false, "subkey3": "subvalue3"},
        });
        assert_eq!(
            recursive_merge(src, dst),
            json!({
                "key1": "value1",
                "key2": {"subkey1": "subvalue1", "subkey2": true, "subkey3": "subvalue3"},
            })
        );
    }

    #[test]
    fn merges_arrays_elementwise() {
        let src = json!(["value1", {"key1": "subvalue1"}, true]);
        let dst = json!(["old_value1", {"key1": "old_subvalue1", "key2": "subvalue2"}, false]);
        assert_eq!(
            recursive_merge(src, dst),
            json!(["value1", {"key1": "subvalue1", "key2": "subvalue2"}, true])
        );
    }

    #[test]
    fn longer_side_survives_array_merges() {
        assert_eq!(
            recursive_merge(json!([1, 2, 3]), json!([9])),
            json!([1, 2, 3])
        );
        assert_eq!(
            recursive_merge(json!([1]), json!([9, 8, 7])),
            json!([1, 8, 7])
        );
    }

    #[test]
    fn src_wins_on_mismatched_composites() {
        assert_eq!(
            recursive_merge(json!({"key1": "value1"}), json!(["old_value1"])),
            json!({"key1": "value1"})
        );
        assert_eq!(
            recursive_merge(json!(["value1"]), json!({"key1": "old_value1"})),
            json!(["value1"])
        );
    }

    #[test]
    fn scalars_replace_wholesale() {
        assert_eq!(recursive_merge(json!("value1"), json!(42)), json!("value1"));
        assert_eq!(recursive_merge(json!(true), json!("old_value1")), json!(true));
    }

    #[test]
    fn null_overwrites_and_is_overwritten() {
        assert_eq!(
            recursive_merge(Value::Null, json!({"key1": "old_value1"})),
            Value::Null
        );
        assert_eq!(
            recursive_merge(json!({"key1": "value1"}), Value::Null),
            json!({"key1": "value1"})
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,4}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,3}", inner, 0..4).prop_map(|m| {
                    Value::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_on_equal_trees(value in arb_json()) {
            prop_assert_eq!(recursive_merge(value.clone(), value.clone()), value);
        }

        #[test]
        fn merge_with_null_dst_yields_src(value in arb_json()) {
            prop_assert_eq!(recursive_merge(value.clone(), Value::Null), value);
        }
    }
}
