use thiserror::Error;

/// A value that breaks a domain rule, such as an unknown payment status.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Why a turn could not produce a regular answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("turn aborted: {0}")]
    TurnAborted(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Apology text appended to the conversation when a turn fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => {
                "Sorry, our banking services are temporarily unavailable. Please try again shortly."
            }
            Self::Internal { .. } => {
                "Sorry, something went wrong while handling your request. Please try again."
            }
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Integration(message) => InterfaceError::ServiceUnavailable { message, correlation_id },
            Self::TurnAborted(message) => InterfaceError::Internal { message, correlation_id },
        }
    }
}
