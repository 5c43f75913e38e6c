//! Process exit codes

/// Any error written to stderr.
pub const FAILURE: i32 = 1;
