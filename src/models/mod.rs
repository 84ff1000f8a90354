//! Data models shared by runners, reporters and output
//!
//! This module contains the result records produced by a run.

mod test_result;

pub use test_result::{CaseOutcome, LogEntry, LogKind, ResultError, TestResult};
