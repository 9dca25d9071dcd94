// Enrollee module - a device undergoing easy setup and its lifecycle state machine

pub mod session;
pub mod state_machine;
pub mod types;

pub use session::{EnrolleeSession, SessionSnapshot};
pub use state_machine::{EnrolleeEvent, EnrolleeStateMachine};
pub use types::{
    ConnectivityType, EnrolleeState, NetworkCredentials, OperationTag, PendingOperation,
    SessionHandle, SessionId,
};
