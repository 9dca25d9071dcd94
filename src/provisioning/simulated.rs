// In-process transport that answers every command after a delay
//
// Stands in for the native provisioning engine in the CLI and in tests.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use super::transport::{ProvisioningRequest, ProvisioningTransport, StatusSender};
use crate::config::ProvisioningConfig;
use crate::enrollee::{ConnectivityType, OperationTag, SessionId};
use crate::error::TransportError;

#[derive(Debug)]
pub struct SimulatedTransport {
    status: Mutex<Option<StatusSender>>,
    delay: Duration,
    on_boarding_status: i32,
    provisioning_status: i32,
    repeat_callbacks: u32,
}

impl SimulatedTransport {
    pub fn new(delay: Duration, on_boarding_status: i32, provisioning_status: i32) -> Self {
        Self {
            status: Mutex::new(None),
            delay,
            on_boarding_status,
            provisioning_status,
            repeat_callbacks: 1,
        }
    }

    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self::new(
            Duration::from_millis(config.simulated_delay_ms),
            config.simulated_on_boarding_status,
            config.simulated_provisioning_status,
        )
    }

    /// Deliver each status this many times, like an at-least-once engine
    pub fn with_repeated_callbacks(mut self, times: u32) -> Self {
        self.repeat_callbacks = times.max(1);
        self
    }

    fn sender(&self) -> Result<StatusSender, TransportError> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Disconnected)
    }

    fn answer_later(
        &self,
        session_id: SessionId,
        tag: OperationTag,
        status_code: i32,
    ) -> Result<(), TransportError> {
        let sender = self.sender()?;
        let delay = self.delay;
        let repeat = self.repeat_callbacks;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for _ in 0..repeat {
                if !sender.post(session_id.clone(), tag, status_code) {
                    debug!(session_id = %session_id, "Coordinator gone, status dropped");
                    break;
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl ProvisioningTransport for SimulatedTransport {
    fn attach(&self, status: StatusSender) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    async fn start_on_boarding(
        &self,
        session_id: &SessionId,
        tag: OperationTag,
        connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError> {
        debug!(session_id = %session_id, connectivity = %connectivity_type, "Simulating on-boarding");
        self.answer_later(session_id.clone(), tag, self.on_boarding_status)
    }

    async fn provision(&self, request: ProvisioningRequest) -> Result<(), TransportError> {
        debug!(
            session_id = %request.session_id,
            ip_address = %request.ip_address,
            ssid = %request.credentials.ssid,
            "Simulating provisioning"
        );
        self.answer_later(request.session_id, request.tag, self.provisioning_status)
    }

    async fn stop_provisioning(
        &self,
        session_id: &SessionId,
        _connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError> {
        // Answers already scheduled still arrive; cancellation is best-effort.
        debug!(session_id = %session_id, "Simulated stop requested");
        Ok(())
    }

    async fn terminate(&self) -> Result<(), TransportError> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Simulated transport terminated");
        Ok(())
    }
}
