//! Records and batches.

/// An ordered mapping from field name to value.
///
/// Field order is insertion order. Records in the same batch may carry
/// different field sets.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// An ordered group of records moving together between steps.
pub type Batch = Vec<Record>;

/// Combines `base` with the fields of `update`.
///
/// Fields already present in `base` keep their position; colliding values
/// are replaced by the ones in `update`. New fields are appended.
pub fn merge_records(base: &mut Record, update: Record) {
    for (key, value) in update {
        base.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_overrides_on_collision() {
        let mut base = record(json!({"id": 1, "text": "a"}));
        merge_records(&mut base, record(json!({"text": "b", "x": true})));

        assert_eq!(base, record(json!({"id": 1, "text": "b", "x": true})));
    }

    #[test]
    fn test_merge_keeps_field_order() {
        let mut base = record(json!({"b": 1, "a": 2}));
        merge_records(&mut base, record(json!({"c": 3, "b": 4})));

        let keys: Vec<&str> = base.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
