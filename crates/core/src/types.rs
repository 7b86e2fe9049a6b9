/// Job identifiers are opaque strings issued by the Analysis Service.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
