use crate::executor::{ExecutionStatus, ProcessOutput};
use crate::input::Input;

/// A failing execution, as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport<I: Input> {
    /// Sequential number of the execution within the whole run, starting at 1.
    pub attempt: u64,
    /// The specific input that triggered this failure.
    pub input: I,
    /// Exit code of the target; signals are folded in as `128 + signal`.
    /// `None` for timeouts.
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr of the target.
    pub output: String,
    pub description: String,
    /// MD5 hex digest of the input, for referring to a finding in notes or logs.
    pub input_hash: String,
}

/// An `Oracle` examines the outcome of a target's execution to determine if it failed.
pub trait Oracle<I: Input> {
    /// Returns `Some(FailureReport)` if the execution counts as a failure.
    fn examine(&self, attempt: u64, input: &I, output: &ProcessOutput) -> Option<FailureReport<I>>;
}

/// Reports every execution that did not exit with status 0, including
/// signals and timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitCodeOracle;

impl ExitCodeOracle {
    pub fn new() -> Self {
        ExitCodeOracle
    }
}

impl<I> Oracle<I> for ExitCodeOracle
where
    I: Input + Clone,
{
    fn examine(&self, attempt: u64, input: &I, output: &ProcessOutput) -> Option<FailureReport<I>> {
        let description = match output.status() {
            ExecutionStatus::Ok => return None,
            ExecutionStatus::Timeout => "Timed out".to_string(),
            ExecutionStatus::Crash(description) => description,
        };

        let input_digest = md5::compute(input.as_bytes());
        Some(FailureReport {
            attempt,
            input: input.clone(),
            exit_code: output.reported_exit_code(),
            output: output.output.clone(),
            description,
            input_hash: format!("{input_digest:x}"),
        })
    }
}
