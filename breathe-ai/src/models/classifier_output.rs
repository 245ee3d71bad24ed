//! Raw output of one classifier invocation

use std::time::Duration;

/// Unparsed classifier result
///
/// `exit_code` is `None` when the process was terminated by a signal.
#[derive(Debug, Clone)]
pub struct RawClassifierOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

impl RawClassifierOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Lossy, trimmed stderr for diagnostics
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}
