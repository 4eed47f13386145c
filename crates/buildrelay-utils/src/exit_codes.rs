//! Process exit codes for the `buildrelay` binary.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | internal or unclassified failure |
//! | 2 | configuration or CLI argument error |
//! | 3 | admission rejected (in progress, round not ready, invalid request) |
//! | 4 | task not found |
//! | 5 | task reached `Failed` (only with `submit --wait`) |

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Configuration or CLI arguments error
    pub const CONFIG: ExitCode = ExitCode(2);

    /// The request was refused at admission
    pub const ADMISSION_REJECTED: ExitCode = ExitCode(3);

    /// No record exists for the requested task-round
    pub const NOT_FOUND: ExitCode = ExitCode(4);

    /// The task ran to completion and ended in `Failed`
    pub const TASK_FAILED: ExitCode = ExitCode(5);

    /// Get the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}
