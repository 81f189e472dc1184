//! I/O helpers: configuration, child processes, generation, prompts, sandbox.

pub mod config;
pub mod generator;
pub mod init;
pub mod process;
pub mod prompt;
pub mod sandbox;
