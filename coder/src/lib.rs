//! Test-driven multi-role code generation workflow.
//!
//! A fixed graph of roles (planning, test authoring, implementation,
//! execution, reflection, mutation auditing) cooperates through one shared
//! state record until the tests pass and survive a mutation probe, or a loop
//! bound stops the run. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state, patches, invariants,
//!   transition table, loop bounds). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, child processes, the
//!   generation backend, the sandbox). Isolated behind traits so tests can
//!   script them.
//!
//! [`nodes`] implements each role against those traits, [`workflow`] drives
//! them through the transition table, and [`run_log`] records each step.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod nodes;
pub mod run_log;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
