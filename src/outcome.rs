//! Normalized invocation outcome

use serde::{Deserialize, Serialize};

/// How the child process reached completion.
///
/// `Exited` and `Closed` record which termination notification arrived
/// first; `Signaled` carries the signal description when the process was
/// killed rather than exiting with a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessEnd {
    /// Process status became available first
    Exited,

    /// All stdio streams drained first
    Closed,

    /// Terminated by a signal
    Signaled(String),
}

/// Normalized outcome of one tool invocation.
///
/// Built exactly once per invocation, only after both capture streams are
/// fully drained; never mutated afterwards. Serializes with the historical
/// wire names (`processOutput`, `processError`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    /// Captured standard output
    pub process_output: String,

    /// Captured standard error
    pub process_error: String,

    /// Exit code; absent when the process was killed by a signal
    pub process_exit_code: Option<i32>,

    /// Completion reason
    pub process_end: ProcessEnd,

    /// True iff the exit code is a defined, non-zero integer
    pub has_error: bool,
}

impl RunOutcome {
    /// Build the public outcome from fully drained capture buffers
    pub fn from_captured(
        stdout: &[u8],
        stderr: &[u8],
        exit_code: Option<i32>,
        end: ProcessEnd,
        beautify: bool,
    ) -> Self {
        let mut process_output = String::from_utf8_lossy(stdout).into_owned();
        let mut process_error = String::from_utf8_lossy(stderr).into_owned();

        if beautify {
            process_output = strip_first_crlf(&process_output);
            process_error = strip_first_crlf(&process_error);
        }

        Self {
            process_output,
            process_error,
            has_error: matches!(exit_code, Some(code) if code != 0),
            process_exit_code: exit_code,
            process_end: end,
        }
    }
}

/// Remove the first CRLF occurrence only; deliberately not a full trim
fn strip_first_crlf(s: &str) -> String {
    s.replacen("\r\n", "", 1)
}
