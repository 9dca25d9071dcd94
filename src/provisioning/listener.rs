use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::enrollee::{EnrolleeState, SessionId};
use crate::error::EasySetupError;

/// Terminal outcome of one enrollee session, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub session_id: SessionId,
    pub state: EnrolleeState,
    /// Code from the transport; `None` when the session ended locally.
    pub status_code: Option<i32>,
    pub cancelled: bool,
}

impl ProvisioningReport {
    pub fn is_success(&self) -> bool {
        self.state == EnrolleeState::ProvisioningSuccess
    }

    /// The transport failure carried by a failed report, if any.
    pub fn error(&self) -> Option<EasySetupError> {
        match (self.state, self.status_code) {
            (EnrolleeState::ProvisioningFailed, Some(status_code)) => {
                Some(EasySetupError::TransportFailure { status_code })
            }
            _ => None,
        }
    }
}

/// Application callback for finished provisioning
pub trait ProvisioningListener: Send + Sync {
    fn on_finish_provisioning(&self, report: ProvisioningReport);
}

/// Listener that forwards every report onto a tokio channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ProvisioningReport>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProvisioningReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProvisioningListener for ChannelListener {
    fn on_finish_provisioning(&self, report: ProvisioningReport) {
        if self.tx.send(report).is_err() {
            tracing::debug!("Provisioning report dropped, receiver closed");
        }
    }
}
