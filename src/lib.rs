// Easy Setup Mediator Library - Enrollee on-boarding and network provisioning
// This exposes the core components for embedding and integration testing

pub mod config;
pub mod enrollee;
pub mod error;
pub mod mediator;
pub mod observability;
pub mod provisioning;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{EasySetupConfig, ObservabilityConfig, ProvisioningConfig, RegistryConfig};
pub use enrollee::{
    ConnectivityType, EnrolleeEvent, EnrolleeSession, EnrolleeState, EnrolleeStateMachine,
    NetworkCredentials, OperationTag, PendingOperation, SessionHandle, SessionId, SessionSnapshot,
};
pub use error::{EasySetupError, Result, TransportError};
pub use mediator::{current_instance, finish, get_instance, MediatorRegistry};
pub use observability::{ProvisioningMetrics, ProvisioningStats};
pub use provisioning::{
    ChannelListener, ProvisioningCoordinator, ProvisioningListener, ProvisioningReport,
    ProvisioningRequest, ProvisioningTransport, SimulatedTransport, StatusEvent, StatusSender,
    STATUS_DISCONNECTED, STATUS_OK,
};
pub use telemetry::{create_provisioning_span, generate_correlation_id, init_telemetry};
