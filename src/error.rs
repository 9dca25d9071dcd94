use thiserror::Error;

use crate::enrollee::{EnrolleeEvent, EnrolleeState, SessionId};

/// Errors surfaced by the mediator to its callers.
#[derive(Debug, Error)]
pub enum EasySetupError {
    #[error("No enrollee session with id {id}")]
    SessionNotFound { id: SessionId },

    #[error("Session {id} is in state {state}, cannot {operation}")]
    InvalidState {
        id: SessionId,
        state: EnrolleeState,
        operation: &'static str,
    },

    #[error("Invalid transition from {from} with event {event:?}")]
    InvalidTransition {
        from: EnrolleeState,
        event: EnrolleeEvent,
    },

    #[error("Session limit of {limit} reached")]
    ResourceExhausted { limit: usize },

    #[error("Transport reported failure status {status_code}")]
    TransportFailure { status_code: i32 },

    #[error("Device {id} already has an active session")]
    DuplicateSession { id: SessionId },

    #[error("Invalid network credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unknown connectivity type: {0}")]
    InvalidConnectivity(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Synchronous failures reported by a transport when a command is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport rejected command (status {status_code}): {reason}")]
    Rejected { status_code: i32, reason: String },
    #[error("Transport is disconnected")]
    Disconnected,
}

impl TransportError {
    /// Status code reported to the listener when a command never made it out.
    pub fn status_code(&self) -> i32 {
        match self {
            TransportError::Rejected { status_code, .. } => *status_code,
            TransportError::Disconnected => crate::provisioning::STATUS_DISCONNECTED,
        }
    }
}

pub type Result<T, E = EasySetupError> = std::result::Result<T, E>;
