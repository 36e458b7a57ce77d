/// Search jobs are identified by an opaque string assigned at intake.
pub type SearchId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
