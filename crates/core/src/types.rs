/// Business ids of task records.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A free-form JSON object.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
