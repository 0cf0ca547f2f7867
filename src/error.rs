use thiserror::Error;

/// Main error type for the fleet orchestrator
#[derive(Error, Debug)]
pub enum FleetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration did not contain any bots with the collector role")]
    NoCollectors,

    #[error("Unknown role classification: {0:?} (expected \"collector\" or \"giver\")")]
    UnknownRole(String),

    // Session runtime errors
    #[error("Session error: {0}")]
    Session(String),

    #[error("Agent {index} has no live session")]
    NotRunning { index: usize },

    // Orchestrator plumbing
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Fatal errors abort startup; everything else is logged and survived.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::Config(_)
                | FleetError::InvalidConfig(_)
                | FleetError::NoCollectors
                | FleetError::UnknownRole(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_names_classification() {
        let err = FleetError::UnknownRole("ItemSellingUserHandler".into());
        assert!(err.to_string().contains("ItemSellingUserHandler"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_session_errors_are_not_fatal() {
        assert!(!FleetError::Session("timeout".into()).is_fatal());
        assert!(!FleetError::NotRunning { index: 3 }.is_fatal());
    }
}
