//! Stable exit codes for `coder` commands.

/// Command succeeded; for `run`, the workflow finished on a passing verdict.
pub const OK: i32 = 0;
/// Invalid config or requirements, a generation failure, or an internal error.
pub const INVALID: i32 = 1;
/// `run` was stopped by the iteration cap, the run deadline, or an unrecognized decision.
pub const CAPPED: i32 = 2;
/// `run` finished normally but on a spec accepted after exhausting replans.
pub const DEGRADED: i32 = 3;
