//! Persistent, merge-append results log
//!
//! The log is one JSON document keyed by run label (`trained_model`,
//! `eval_model`) and then by epoch label. Each update deep-merges into
//! existing keys rather than overwriting, so repeated evaluations of the
//! same run accumulate.

use std::path::Path;

use serde_json::Value;

use crate::error::Result;

/// Merge `entry` into the log under `label`, creating the file if needed
pub fn update_results_log(path: &Path, label: &str, entry: &Value) -> Result<()> {
    let mut root = match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or(Value::Object(Default::default())),
        Err(_) => Value::Object(Default::default()),
    };
    if !root.is_object() {
        root = Value::Object(Default::default());
    }
    let slot = root
        .as_object_mut()
        .expect("results log root is an object")
        .entry(label.to_string())
        .or_insert(Value::Object(Default::default()));
    deep_merge(slot, entry);

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&root)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the log back, if present and well formed
pub fn read_results_log(path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn deep_merge(dst: &mut Value, src: &Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                match dst_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        dst_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_creates_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_log.csv");

        update_results_log(&path, "trained_model", &json!({"epoch1": {"loss": 0.5}})).unwrap();
        update_results_log(&path, "trained_model", &json!({"epoch2": {"loss": 0.4}})).unwrap();
        update_results_log(&path, "eval_model", &json!({"eval": {"loss": 0.45}})).unwrap();

        let log = read_results_log(&path).unwrap();
        assert_eq!(log["trained_model"]["epoch1"]["loss"], json!(0.5));
        assert_eq!(log["trained_model"]["epoch2"]["loss"], json!(0.4));
        assert_eq!(log["eval_model"]["eval"]["loss"], json!(0.45));
    }

    #[test]
    fn test_merge_into_existing_epoch_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_log.csv");

        update_results_log(&path, "trained_model", &json!({"epoch1": {"loss": 0.5}})).unwrap();
        update_results_log(&path, "trained_model", &json!({"epoch1": {"accuracy": 0.9}})).unwrap();

        let log = read_results_log(&path).unwrap();
        // Both keys survive: merge, not overwrite
        assert_eq!(log["trained_model"]["epoch1"]["loss"], json!(0.5));
        assert_eq!(log["trained_model"]["epoch1"]["accuracy"], json!(0.9));
    }

    #[test]
    fn test_scalar_conflict_takes_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results_log.csv");
        update_results_log(&path, "eval_model", &json!({"eval": {"loss": 1.0}})).unwrap();
        update_results_log(&path, "eval_model", &json!({"eval": {"loss": 0.2}})).unwrap();
        let log = read_results_log(&path).unwrap();
        assert_eq!(log["eval_model"]["eval"]["loss"], json!(0.2));
    }
}
