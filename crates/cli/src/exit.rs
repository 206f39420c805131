//! Process exit-code conventions shared by every binary in this workspace.

/// A process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Ran to completion with no error.
    Success = 0,
    /// A runtime failure: I/O, protocol, or transport error.
    Failure = 1,
    /// The command line itself was invalid.
    Usage = 2,
}

impl ExitCode {
    /// The raw status passed to [`std::process::exit`].
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_unix_convention() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Failure.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
    }
}
