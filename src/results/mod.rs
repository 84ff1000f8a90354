//! Report files
//!
//! A finished run can be written to disk as JSON, CSV or TAP.

mod storage;

pub use storage::StoredRun;
