//! Shared domain types for the extraction pipeline

pub mod cursor;
pub mod record;
pub mod retry;

pub use cursor::Cursor;
pub use record::{Batch, CanonicalRecord, DataPoint, DataPointValue, RawRecord, RowRecord};
pub use retry::RetryConfig;
