//! Accumulated output of a single remote job.
//!
//! A job delivers its structured results only through its log stream, in
//! fragments. [`LauncherResult`] collects those fragments with a union
//! merge: fields are added or overwritten one by one, never replaced as a
//! whole, and a recorded `error` is only ever replaced by a newer error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonMap, Timestamp};

/// Field carrying the last error detected in the job's logs.
pub const ERROR_FIELD: &str = "error";

/// Merge-only accumulator for the fields extracted from a job's logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherResult {
    /// Fields extracted so far.
    pub result: JsonMap,
    /// Set once the job reached a terminal state.
    pub end_time: Option<Timestamp>,
}

impl LauncherResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly extracted fields. See [`merge_fields`] for the rules.
    pub fn merge(&mut self, fields: JsonMap) {
        merge_fields(&mut self.result, fields);
    }

    /// Record an error found by log inspection.
    ///
    /// `None` or a blank message leaves the current error untouched.
    pub fn record_error(&mut self, detected: Option<String>) {
        if let Some(message) = detected.filter(|m| !m.trim().is_empty()) {
            self.result
                .insert(ERROR_FIELD.to_string(), Value::String(message));
        }
    }

    /// The recorded error, if any, rendered as text.
    pub fn error(&self) -> Option<String> {
        match self.result.get(ERROR_FIELD)? {
            value if is_blank(value) => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.result.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.result.contains_key(key)
    }

    /// Stamp the end time.
    pub fn finish(&mut self) {
        self.end_time = Some(chrono::Utc::now());
    }
}

/// Shallow union of `incoming` into `target`.
///
/// Every incoming field overwrites the field of the same name (last write
/// wins). The one exception is [`ERROR_FIELD`]: a null or blank incoming
/// error never erases an error already present.
pub fn merge_fields(target: &mut JsonMap, incoming: JsonMap) {
    for (key, value) in incoming {
        if key == ERROR_FIELD
            && is_blank(&value)
            && target.get(ERROR_FIELD).is_some_and(|v| !is_blank(v))
        {
            continue;
        }
        target.insert(key, value);
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> JsonMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected a JSON object"),
        }
    }

    #[test]
    fn disjoint_fields_are_unioned_in_any_order() {
        let mut ab = LauncherResult::new();
        ab.merge(map(json!({"a": 1})));
        ab.merge(map(json!({"b": 2})));

        let mut ba = LauncherResult::new();
        ba.merge(map(json!({"b": 2})));
        ba.merge(map(json!({"a": 1})));

        assert_eq!(ab.result, map(json!({"a": 1, "b": 2})));
        assert_eq!(ab, ba);
    }

    #[test]
    fn later_value_wins_for_same_field() {
        let mut r = LauncherResult::new();
        r.merge(map(json!({"url": "/out/a.mp3"})));
        r.merge(map(json!({"url": "/out/b.mp3"})));
        assert_eq!(r.get("url"), Some(&json!("/out/b.mp3")));
    }

    #[test]
    fn null_error_never_erases_recorded_error() {
        let mut r = LauncherResult::new();
        r.merge(map(json!({"error": "X"})));
        r.merge(map(json!({"error": null})));
        r.merge(map(json!({"error": "  "})));
        assert_eq!(r.error().as_deref(), Some("X"));
    }

    #[test]
    fn newer_error_replaces_older_one() {
        let mut r = LauncherResult::new();
        r.merge(map(json!({"error": "X"})));
        r.merge(map(json!({"error": "Y"})));
        assert_eq!(r.error().as_deref(), Some("Y"));
    }

    #[test]
    fn null_error_is_stored_when_nothing_recorded() {
        let mut r = LauncherResult::new();
        r.merge(map(json!({"error": null})));
        assert!(r.contains(ERROR_FIELD));
        assert!(r.error().is_none());
    }

    #[test]
    fn record_error_ignores_missing_detection() {
        let mut r = LauncherResult::new();
        r.record_error(Some("CUDA out of memory".into()));
        r.record_error(None);
        r.record_error(Some(String::new()));
        assert_eq!(r.error().as_deref(), Some("CUDA out of memory"));

        r.record_error(Some("RuntimeError: boom".into()));
        assert_eq!(r.error().as_deref(), Some("RuntimeError: boom"));
    }

    #[test]
    fn non_string_error_is_rendered_as_json() {
        let mut r = LauncherResult::new();
        r.merge(map(json!({"error": {"code": 3}})));
        assert_eq!(r.error().as_deref(), Some(r#"{"code":3}"#));
    }

    #[test]
    fn finish_sets_end_time() {
        let mut r = LauncherResult::new();
        assert!(r.end_time.is_none());
        r.finish();
        assert!(r.end_time.is_some());
    }
}
