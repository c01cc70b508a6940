//! Execution of shell commands that passed the permission gate.

mod executor;

pub use executor::{
    DEFAULT_TIMEOUT, ExecuteOptions, ExecuteResult, KILL_GRACE, MAX_OUTPUT_CHARS, MAX_TIMEOUT,
    execute_command,
};
