// Provisioning coordinator - drives enrollee sessions through on-boarding and provisioning
//
// Commands go out to the transport; outcomes come back as status events on a
// channel and are applied under the session lock by a dispatch task.

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use super::listener::{ProvisioningListener, ProvisioningReport};
use super::transport::{ProvisioningRequest, ProvisioningTransport, StatusEvent, StatusSender, STATUS_OK};
use crate::enrollee::{
    ConnectivityType, EnrolleeEvent, EnrolleeSession, EnrolleeState, NetworkCredentials,
    OperationTag, PendingOperation, SessionHandle, SessionId, SessionSnapshot,
};
use crate::error::{EasySetupError, Result};
use crate::mediator::MediatorRegistry;
use crate::observability::ProvisioningMetrics;
use crate::telemetry::{create_provisioning_span, generate_correlation_id};

pub struct ProvisioningCoordinator {
    registry: Arc<MediatorRegistry>,
    transport: Arc<dyn ProvisioningTransport>,
    status: StatusSender,
    metrics: ProvisioningMetrics,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProvisioningCoordinator {
    /// Wire a transport to a registry and start the status dispatch task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: Arc<MediatorRegistry>,
        transport: Arc<dyn ProvisioningTransport>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = StatusSender::new(tx);

        transport.attach(status.clone());
        registry.attach_transport(transport.clone());

        let coordinator = Arc::new(Self {
            registry,
            transport,
            status,
            metrics: ProvisioningMetrics::new(),
            dispatcher: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(Self::dispatch_status_events(
            Arc::downgrade(&coordinator),
            rx,
        ));
        *coordinator
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        coordinator
    }

    async fn dispatch_status_events(
        coordinator: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<StatusEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            if let Err(e) = coordinator
                .on_status_callback(&event.session_id, event.tag, event.status_code)
                .await
            {
                warn!(
                    session_id = %event.session_id,
                    tag = %event.tag,
                    status_code = event.status_code,
                    error = %e,
                    "Dropped transport status event"
                );
            }
        }
        debug!("Status dispatcher stopped");
    }

    pub fn registry(&self) -> &Arc<MediatorRegistry> {
        &self.registry
    }

    /// Sender a transport can use to post status events
    pub fn status_sender(&self) -> StatusSender {
        self.status.clone()
    }

    pub fn metrics(&self) -> &ProvisioningMetrics {
        &self.metrics
    }

    pub async fn register_provisioning_listener(&self, listener: Arc<dyn ProvisioningListener>) {
        self.registry.register_provisioning_listener(listener).await;
    }

    /// Allocate a new session in INIT under a generated id
    pub async fn create_session(&self, connectivity_type: ConnectivityType) -> Result<SessionHandle> {
        self.create_session_for_device(SessionId::generate(), connectivity_type)
            .await
    }

    /// Allocate a new session in INIT keyed by a device identifier (e.g. MAC)
    pub async fn create_session_for_device(
        &self,
        device_id: SessionId,
        connectivity_type: ConnectivityType,
    ) -> Result<SessionHandle> {
        let session = EnrolleeSession::new(device_id.clone(), connectivity_type);
        self.registry.insert(session).await?;
        self.metrics.record_session_created();

        info!(
            session_id = %device_id,
            connectivity = %connectivity_type,
            "Enrollee session created"
        );
        Ok(device_id)
    }

    /// Start on-boarding: INIT -> ON_BOARDING, result arrives as a status callback
    /// carrying the returned tag
    pub async fn start_on_boarding(&self, handle: &SessionHandle) -> Result<OperationTag> {
        let correlation_id = generate_correlation_id();
        let span = create_provisioning_span("start_on_boarding", handle, &correlation_id);
        self.run_start_on_boarding(handle).instrument(span).await
    }

    async fn run_start_on_boarding(&self, handle: &SessionHandle) -> Result<OperationTag> {
        let shared = self.registry.get(handle).await?;
        let mut session = shared.lock().await;

        if session.state() != EnrolleeState::Init || session.pending().is_some() {
            return Err(EasySetupError::InvalidState {
                id: handle.clone(),
                state: session.state(),
                operation: "start on-boarding",
            });
        }

        self.apply(&mut session, EnrolleeEvent::OnBoardStart)?;
        let tag = session.begin(PendingOperation::OnBoarding);

        let connectivity_type = session.connectivity_type();
        if let Err(err) = self
            .transport
            .start_on_boarding(handle, tag, connectivity_type)
            .await
        {
            warn!(error = %err, "Transport rejected on-boarding");
            session.take_pending();
            session.record_status(err.status_code());
            let report = self.conclude(&mut session, EnrolleeEvent::OnBoardFailure)?;
            drop(session);
            self.deliver(report).await;
            return Err(err.into());
        }

        info!(connectivity = %connectivity_type, tag = %tag, "On-boarding started");
        Ok(tag)
    }

    /// Hand network credentials to the enrollee.
    ///
    /// Allowed from INIT (on-boarding is assumed done since the caller knows the
    /// device address) or once on-boarding completed, with nothing outstanding.
    /// The session moves to PROVISIONING immediately; success or failure arrives
    /// through the listener. Only a status carrying the returned tag settles it.
    pub async fn provision(
        &self,
        handle: &SessionHandle,
        ip_address: IpAddr,
        ssid: &str,
        password: &str,
        connectivity_type: ConnectivityType,
    ) -> Result<OperationTag> {
        let correlation_id = generate_correlation_id();
        let span = create_provisioning_span("provision", handle, &correlation_id);
        self.run_provision(handle, ip_address, ssid, password, connectivity_type)
            .instrument(span)
            .await
    }

    async fn run_provision(
        &self,
        handle: &SessionHandle,
        ip_address: IpAddr,
        ssid: &str,
        password: &str,
        connectivity_type: ConnectivityType,
    ) -> Result<OperationTag> {
        let shared = self.registry.get(handle).await?;
        let credentials = NetworkCredentials::new(ssid, password)?;
        let mut session = shared.lock().await;

        let state = session.state();
        let provisionable = matches!(
            state,
            EnrolleeState::Init | EnrolleeState::OnBoarding | EnrolleeState::Provisioning
        );
        if !provisionable || session.pending().is_some() {
            return Err(EasySetupError::InvalidState {
                id: handle.clone(),
                state,
                operation: "provision",
            });
        }

        if session.state() == EnrolleeState::Init {
            self.apply(&mut session, EnrolleeEvent::OnBoardStart)?;
        }
        if session.state() == EnrolleeState::OnBoarding {
            self.apply(&mut session, EnrolleeEvent::OnBoardSuccess)?;
        }

        session.set_provisioning_target(ip_address, credentials.clone(), connectivity_type);
        let tag = session.begin(PendingOperation::Provisioning);
        self.metrics.record_provisioning_started();

        let request = ProvisioningRequest {
            session_id: handle.clone(),
            tag,
            ip_address,
            credentials,
            connectivity_type,
        };

        if let Err(err) = self.transport.provision(request).await {
            warn!(error = %err, "Transport rejected provisioning");
            session.take_pending();
            session.record_status(err.status_code());
            let report = self.conclude(&mut session, EnrolleeEvent::ProvisionFailure)?;
            drop(session);
            self.deliver(report).await;
            return Err(err.into());
        }

        info!(
            ip_address = %ip_address,
            connectivity = %connectivity_type,
            tag = %tag,
            "Provisioning requested"
        );
        Ok(tag)
    }

    /// Cancel the outstanding operation of a session.
    ///
    /// Cancellation is authoritative: the session ends in PROVISIONING_FAILED and
    /// any callback that races in afterwards is ignored. No-op when the session is
    /// terminal or nothing is in flight.
    pub async fn stop_provisioning(
        &self,
        handle: &SessionHandle,
        connectivity_type: ConnectivityType,
    ) -> Result<()> {
        let correlation_id = generate_correlation_id();
        let span = create_provisioning_span("stop_provisioning", handle, &correlation_id);
        self.run_stop_provisioning(handle, connectivity_type)
            .instrument(span)
            .await
    }

    async fn run_stop_provisioning(
        &self,
        handle: &SessionHandle,
        connectivity_type: ConnectivityType,
    ) -> Result<()> {
        let shared = self.registry.get(handle).await?;
        let mut session = shared.lock().await;

        if session.is_terminal() {
            debug!(state = %session.state(), "Stop requested for finished session");
            return Ok(());
        }

        let Some(operation) = session.take_pending() else {
            debug!(state = %session.state(), "Stop requested with nothing in flight");
            return Ok(());
        };

        if connectivity_type != session.connectivity_type() {
            warn!(
                requested = %connectivity_type,
                session = %session.connectivity_type(),
                "Stop requested over a different connectivity type"
            );
        }

        self.cancel_in_transport(handle, connectivity_type).await;
        session.mark_cancelled();

        let event = match operation {
            PendingOperation::OnBoarding => EnrolleeEvent::OnBoardFailure,
            PendingOperation::Provisioning => EnrolleeEvent::ProvisionFailure,
        };
        let report = self.conclude(&mut session, event)?;
        drop(session);

        info!(operation = ?operation, "Provisioning cancelled");
        self.deliver(report).await;
        Ok(())
    }

    /// Apply a status code posted by the transport for the command tagged `tag`.
    ///
    /// Late or duplicate callbacks for a finished session are ignored, as are
    /// callbacks whose tag is not the outstanding one. Returns the resulting state.
    pub async fn on_status_callback(
        &self,
        handle: &SessionHandle,
        tag: OperationTag,
        status_code: i32,
    ) -> Result<EnrolleeState> {
        let correlation_id = generate_correlation_id();
        let span = create_provisioning_span("status_callback", handle, &correlation_id);
        self.apply_status(handle, tag, status_code)
            .instrument(span)
            .await
    }

    async fn apply_status(
        &self,
        handle: &SessionHandle,
        tag: OperationTag,
        status_code: i32,
    ) -> Result<EnrolleeState> {
        let shared = self.registry.get(handle).await?;
        let mut session = shared.lock().await;

        if session.is_terminal() {
            self.metrics.record_duplicate_callback();
            debug!(
                state = %session.state(),
                status_code,
                "Ignoring status callback for finished session"
            );
            return Ok(session.state());
        }

        if !session.settle(tag) {
            self.metrics.record_unsolicited_callback();
            warn!(
                state = %session.state(),
                tag = %tag,
                outstanding = ?session.pending_tag(),
                status_code,
                "Ignoring status callback for an operation that is not outstanding"
            );
            return Ok(session.state());
        }

        let succeeded = status_code == STATUS_OK;
        let event = match (tag.operation, succeeded) {
            (PendingOperation::OnBoarding, true) => EnrolleeEvent::OnBoardSuccess,
            (PendingOperation::OnBoarding, false) => EnrolleeEvent::OnBoardFailure,
            (PendingOperation::Provisioning, true) => EnrolleeEvent::ProvisionSuccess,
            (PendingOperation::Provisioning, false) => EnrolleeEvent::ProvisionFailure,
        };

        session.record_status(status_code);
        let report = self.conclude(&mut session, event)?;
        let state = session.state();
        drop(session);

        info!(status_code, state = %state, "Applied transport status");
        self.deliver(report).await;
        Ok(state)
    }

    /// Hand the enrollee over to another owner; abandons any outstanding operation
    pub async fn request_ownership_transfer(&self, handle: &SessionHandle) -> Result<EnrolleeState> {
        let shared = self.registry.get(handle).await?;
        let mut session = shared.lock().await;

        let state = self.apply(&mut session, EnrolleeEvent::OwnershipTransferRequested)?;
        if session.take_pending().is_some() {
            self.cancel_in_transport(handle, session.connectivity_type()).await;
        }

        info!(session_id = %handle, "Ownership transfer requested");
        Ok(state)
    }

    /// Factory reset the enrollee; terminal, so the listener is notified
    pub async fn factory_reset(&self, handle: &SessionHandle) -> Result<EnrolleeState> {
        let shared = self.registry.get(handle).await?;
        let mut session = shared.lock().await;

        let report = self.conclude(&mut session, EnrolleeEvent::FactoryResetRequested)?;
        if session.take_pending().is_some() {
            self.cancel_in_transport(handle, session.connectivity_type()).await;
        }
        let state = session.state();
        drop(session);

        info!(session_id = %handle, "Enrollee factory reset");
        self.deliver(report).await;
        Ok(state)
    }

    /// Evict a finished session once the application has seen its outcome
    pub async fn acknowledge(&self, handle: &SessionHandle) -> Result<SessionSnapshot> {
        let shared = self.registry.get(handle).await?;
        let snapshot = {
            let session = shared.lock().await;
            if !session.is_terminal() {
                return Err(EasySetupError::InvalidState {
                    id: handle.clone(),
                    state: session.state(),
                    operation: "acknowledge",
                });
            }
            session.snapshot()
        };

        self.registry.remove(handle).await;
        Ok(snapshot)
    }

    pub async fn snapshot(&self, handle: &SessionHandle) -> Result<SessionSnapshot> {
        let shared = self.registry.get(handle).await?;
        let snapshot = shared.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.snapshots().await
    }

    fn apply(&self, session: &mut EnrolleeSession, event: EnrolleeEvent) -> Result<EnrolleeState> {
        session.apply(event).inspect_err(|_| {
            self.metrics.record_invalid_transition();
        })
    }

    /// Apply an event and, if it finished the session, build its one report
    fn conclude(
        &self,
        session: &mut EnrolleeSession,
        event: EnrolleeEvent,
    ) -> Result<Option<ProvisioningReport>> {
        self.apply(session, event)?;

        if !session.claim_terminal_notification() {
            return Ok(None);
        }

        match session.state() {
            EnrolleeState::ProvisioningSuccess => self.metrics.record_success(),
            EnrolleeState::ProvisioningFailed if session.is_cancelled() => {
                self.metrics.record_cancelled()
            }
            EnrolleeState::ProvisioningFailed => self.metrics.record_failure(),
            EnrolleeState::FactoryReset => self.metrics.record_factory_reset(),
            _ => {}
        }

        Ok(Some(ProvisioningReport {
            session_id: session.id().clone(),
            state: session.state(),
            status_code: if session.is_cancelled() {
                None
            } else {
                session.last_status()
            },
            cancelled: session.is_cancelled(),
        }))
    }

    async fn deliver(&self, report: Option<ProvisioningReport>) {
        if let Some(report) = report {
            self.registry.notify(report).await;
        }
    }

    async fn cancel_in_transport(&self, handle: &SessionHandle, connectivity_type: ConnectivityType) {
        if let Err(e) = self
            .transport
            .stop_provisioning(handle, connectivity_type)
            .await
        {
            warn!(session_id = %handle, error = %e, "Transport failed to stop, continuing");
        }
    }
}

impl Drop for ProvisioningCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
