use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }
}

impl From<surge_core::Error> for RunError {
    fn from(err: surge_core::Error) -> Self {
        if err.is_configuration() {
            Self::InvalidInput(err.into())
        } else {
            Self::RuntimeError(err.into())
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_are_classified() {
        let invalid = RunError::from(surge_core::Error::NoScenarios);
        assert_eq!(invalid.exit_code(), ExitCode::InvalidInput);
        assert_eq!(invalid.to_string(), "a run needs at least one scenario");

        let ser = serde_json::from_str::<u8>("x")
            .err()
            .unwrap_or_else(|| panic!("expected a parse error"));
        let runtime = RunError::from(surge_core::Error::Serialize(ser));
        assert_eq!(runtime.exit_code(), ExitCode::RuntimeError);
    }
}
