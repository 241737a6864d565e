//! Error types for the PAGI auto-play engine

use thiserror::Error;

/// Result type alias for auto-play operations
pub type AutoplayResult<T> = Result<T, AutoplayError>;

/// Errors that can occur while configuring or narrating a simulation.
///
/// Run aborts (generation failure, reply timeout, cancellation) are not errors;
/// they are reported as [`crate::orchestrator::RunOutcome`] values.
#[derive(Error, Debug)]
pub enum AutoplayError {
    #[error("Speech output error: {0}")]
    Speech(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

impl AutoplayError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AutoplayError::InvalidSetting {
            name,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_setting_names_the_field() {
        let err = AutoplayError::invalid("reading_speed", "must be at least 1 wpm");
        assert_eq!(err.to_string(), "Invalid setting `reading_speed`: must be at least 1 wpm");
    }

    #[test]
    fn config_errors_convert() {
        let err: AutoplayError = config::ConfigError::NotFound("playback_mode".into()).into();
        assert!(matches!(err, AutoplayError::ConfigLoad(_)));
    }
}
