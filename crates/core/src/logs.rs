//! Structured result extraction and error detection over job logs.
//!
//! The remote protocol has no typed result schema: a job reports its
//! outputs by printing markers into its log stream. Two marker forms are
//! recognised:
//!
//! - `AigcPanelRunResult[<job id>][<base64 JSON object>]`: a whole result
//!   object, addressed to one job.
//! - `result_<field>=<value>`: a single field on its own line. Values that
//!   parse as JSON keep their type; anything else is taken as a string.
//!
//! Inspection never fails. Malformed markers are logged and skipped.

use std::sync::LazyLock;

use base64::Engine as _;
use regex::Regex;
use serde_json::Value;

use crate::types::JsonMap;

static RESULT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"AigcPanelRunResult\[([^\]]*)\]\[([A-Za-z0-9+/=_-]*)\]").expect("valid regex")
});

static FIELD_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*result_([A-Za-z0-9_]+)=(.*?)\s*$").expect("valid regex")
});

static ERROR_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?m)^\s*(?:[A-Za-z_][\w.]*)?(?:Error|Exception)\s*:\s*\S.*$",
        r"(?mi)^.*\bCUDA out of memory\b.*$",
        r"(?m)^.*\bSegmentation fault\b.*$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

/// Inspects decoded log text for structured results and error signatures.
pub trait LogInspector: Send + Sync {
    /// Fields reported for `job_id` in this log chunk, if any.
    fn extract_result(&self, job_id: &str, logs: &str) -> Option<JsonMap>;

    /// The last error signature found in this log chunk, if any.
    fn detect_error(&self, logs: &str) -> Option<String>;
}

/// Default [`LogInspector`] recognising the markers described in the
/// module docs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerLogInspector;

impl LogInspector for MarkerLogInspector {
    fn extract_result(&self, job_id: &str, logs: &str) -> Option<JsonMap> {
        let mut fields = JsonMap::new();

        for caps in RESULT_MARKER_RE.captures_iter(logs) {
            if &caps[1] != job_id {
                continue;
            }
            match decode_result_object(&caps[2]) {
                Some(object) => fields.extend(object),
                None => tracing::warn!(job_id, "Ignoring malformed result marker"),
            }
        }

        for caps in FIELD_LINE_RE.captures_iter(logs) {
            fields.insert(caps[1].to_string(), parse_field_value(&caps[2]));
        }

        (!fields.is_empty()).then_some(fields)
    }

    fn detect_error(&self, logs: &str) -> Option<String> {
        ERROR_SIGNATURES
            .iter()
            .filter_map(|re| re.find_iter(logs).last())
            .max_by_key(|m| m.start())
            .map(|m| m.as_str().trim().to_string())
    }
}

fn decode_result_object(encoded: &str) -> Option<JsonMap> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(encoded))
        .ok()?;
    match serde_json::from_slice::<Value>(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn parse_field_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Object(_) | Value::Array(_) | Value::Number(_) | Value::Bool(_))) => {
            value
        }
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn marker(job_id: &str, value: Value) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value.to_string());
        format!("AigcPanelRunResult[{job_id}][{encoded}]")
    }

    #[test]
    fn field_line_yields_string_value() {
        let fields = MarkerLogInspector
            .extract_result("job", "result_url=/out/a.mp3")
            .expect("should extract");
        assert_eq!(fields.get("url"), Some(&json!("/out/a.mp3")));
    }

    #[test]
    fn field_line_keeps_json_types() {
        let logs = "result_records=[{\"text\":\"hi\"}]\nresult_duration=3.5\n";
        let fields = MarkerLogInspector.extract_result("job", logs).unwrap();
        assert_eq!(fields["records"], json!([{"text": "hi"}]));
        assert_eq!(fields["duration"], json!(3.5));
    }

    #[test]
    fn result_marker_for_this_job_is_decoded() {
        let logs = format!(
            "loading model\n{}\n",
            marker("VideoGen_7", json!({"url": "out/v.mp4", "seconds": 4}))
        );
        let fields = MarkerLogInspector.extract_result("VideoGen_7", &logs).unwrap();
        assert_eq!(fields["url"], json!("out/v.mp4"));
        assert_eq!(fields["seconds"], json!(4));
    }

    #[test]
    fn result_marker_for_other_job_is_ignored() {
        let logs = marker("VideoGen_8", json!({"url": "out/v.mp4"}));
        assert!(MarkerLogInspector.extract_result("VideoGen_7", &logs).is_none());
    }

    #[test]
    fn malformed_marker_is_skipped() {
        let logs = "AigcPanelRunResult[job][bm90LWpzb24=]";
        assert!(MarkerLogInspector.extract_result("job", logs).is_none());
    }

    #[test]
    fn plain_progress_has_no_result() {
        assert!(MarkerLogInspector
            .extract_result("job", "progress 10%")
            .is_none());
    }

    #[test]
    fn detects_last_exception_line() {
        let logs = "Traceback (most recent call last):\n  File \"run.py\", line 3\nValueError: bad sample rate\n";
        assert_eq!(
            MarkerLogInspector.detect_error(logs).as_deref(),
            Some("ValueError: bad sample rate")
        );
    }

    #[test]
    fn detects_cuda_oom() {
        let logs = "step 1\ntorch.OutOfMemoryError raised: CUDA out of memory. Tried to allocate 2 GiB\n";
        let detected = MarkerLogInspector.detect_error(logs).unwrap();
        assert!(detected.contains("CUDA out of memory"));
    }

    #[test]
    fn clean_logs_have_no_error() {
        assert!(MarkerLogInspector.detect_error("progress 10%\nprogress 20%").is_none());
        assert!(MarkerLogInspector.detect_error("result_url=/out/a.mp3").is_none());
    }
}
