/// All database primary keys except job ids are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// Jobs are identified by UUID so the id can double as the broker message id.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Credit amounts and job costs, in ledger units.
pub type Credits = i64;
