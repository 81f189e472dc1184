//! Loop bounds and the shared wall-clock budget for one workflow run.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Internal replans the spec compiler may request before it force-accepts.
pub const MAX_REPLANS: u32 = 3;
/// Reflector passes allowed before the run is forcibly finished.
pub const GLOBAL_LIMIT: u32 = 20;

/// The two loop bounds guarding against non-termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_replans: u32,
    pub global_iteration_limit: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_replans: MAX_REPLANS,
            global_iteration_limit: GLOBAL_LIMIT,
        }
    }
}

/// Raised when the run-level deadline has elapsed.
///
/// The orchestrator downcasts this to stop the run with a capped outcome
/// instead of reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

impl fmt::Display for DeadlineExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("run deadline exceeded")
    }
}

impl std::error::Error for DeadlineExceeded {}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(DeadlineExceeded.into());
    }
    Ok(remaining)
}

/// Clamp a per-call timeout to what is left of the run budget.
pub fn clamp_to_budget(timeout: Duration, deadline: Instant) -> Result<Duration> {
    Ok(timeout.min(remaining_budget(deadline)?))
}
