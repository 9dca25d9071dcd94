// Provisioning module - coordinator, transport boundary and application callbacks

pub mod coordinator;
pub mod listener;
pub mod simulated;
pub mod transport;

pub use coordinator::ProvisioningCoordinator;
pub use listener::{ChannelListener, ProvisioningListener, ProvisioningReport};
pub use simulated::SimulatedTransport;
pub use transport::{
    ProvisioningRequest, ProvisioningTransport, StatusEvent, StatusSender, STATUS_DISCONNECTED,
    STATUS_OK,
};
