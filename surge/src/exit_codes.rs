#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// The run was aborted and one or more thresholds failed.
    AbortedThresholdsFailed = 13,

    /// Invalid CLI flags or plan file (bad durations, unknown workloads, invalid thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, executor task failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_verdict(passed: bool, aborted: bool) -> Self {
        match (passed, aborted) {
            (true, _) => Self::Success,
            (false, false) => Self::ThresholdsFailed,
            (false, true) => Self::AbortedThresholdsFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_maps_to_exit_codes() {
        assert_eq!(ExitCode::from_verdict(true, false).as_i32(), 0);
        assert_eq!(ExitCode::from_verdict(true, true).as_i32(), 0);
        assert_eq!(ExitCode::from_verdict(false, false).as_i32(), 11);
        assert_eq!(ExitCode::from_verdict(false, true).as_i32(), 13);
    }
}
