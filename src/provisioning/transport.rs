// Transport boundary - the engine that actually talks to the enrollee

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

use crate::enrollee::{ConnectivityType, NetworkCredentials, OperationTag, SessionId};
use crate::error::TransportError;

/// Status code for a successful on-boarding or provisioning step.
pub const STATUS_OK: i32 = 0;
/// Status code reported when the transport could not be reached at all.
pub const STATUS_DISCONNECTED: i32 = -1;

/// Asynchronous status posted by the transport for one issued command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub session_id: SessionId,
    /// Tag of the command this status answers
    pub tag: OperationTag,
    pub status_code: i32,
}

/// Handle a transport uses to post status events back to the coordinator.
///
/// Posting never blocks; the coordinator applies events on its own dispatch task.
#[derive(Debug, Clone)]
pub struct StatusSender {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusSender {
    pub fn new(tx: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the coordinator has gone away.
    pub fn post(&self, session_id: SessionId, tag: OperationTag, status_code: i32) -> bool {
        self.tx
            .send(StatusEvent {
                session_id,
                tag,
                status_code,
            })
            .is_ok()
    }
}

/// Everything the transport needs to hand credentials to an enrollee
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub session_id: SessionId,
    pub tag: OperationTag,
    pub ip_address: IpAddr,
    pub credentials: NetworkCredentials,
    pub connectivity_type: ConnectivityType,
}

/// Provisioning engine interface
///
/// Commands only submit work: the outcome of every command arrives later as a
/// [`StatusEvent`] on the sender handed over in [`ProvisioningTransport::attach`].
/// Delivery is at-least-once and may be late or duplicated; each status echoes
/// the [`OperationTag`] of the command it answers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProvisioningTransport: Send + Sync {
    /// Receive the channel used for status callbacks
    fn attach(&self, status: StatusSender);

    /// Begin establishing connectivity with the enrollee
    async fn start_on_boarding(
        &self,
        session_id: &SessionId,
        tag: OperationTag,
        connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError>;

    /// Transfer target network credentials to the enrollee
    async fn provision(&self, request: ProvisioningRequest) -> Result<(), TransportError>;

    /// Best-effort cancellation of an in-flight command
    async fn stop_provisioning(
        &self,
        session_id: &SessionId,
        connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError>;

    /// Release every resource held by the engine
    async fn terminate(&self) -> Result<(), TransportError>;
}
