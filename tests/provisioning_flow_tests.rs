//! End-to-end provisioning flows through the coordinator, registry and a transport.
//! Testing library/framework: Rust built-in test framework with Tokio async runtime (#[tokio::test]).

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use easy_setup_mediator::{
    ChannelListener, ConnectivityType, EasySetupConfig, EasySetupError, EnrolleeState,
    MediatorRegistry, OperationTag, ProvisioningCoordinator, ProvisioningReport,
    ProvisioningRequest, ProvisioningTransport, SessionId, SimulatedTransport, StatusSender,
    TransportError, STATUS_OK,
};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    OnBoard(SessionId),
    Provision { session: SessionId, ssid: String },
    Stop(SessionId),
    Terminate,
}

/// Transport that records commands and only answers when the test says so
#[derive(Default)]
struct RecordingTransport {
    status: Mutex<Option<StatusSender>>,
    commands: Mutex<Vec<Command>>,
    provision_delay: Duration,
}

impl RecordingTransport {
    fn with_provision_delay(delay: Duration) -> Self {
        Self {
            provision_delay: delay,
            ..Self::default()
        }
    }

    fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn answer(&self, session: &SessionId, tag: OperationTag, status_code: i32) -> bool {
        let sender = self.status.lock().unwrap().clone();
        sender.is_some_and(|s| s.post(session.clone(), tag, status_code))
    }
}

#[async_trait]
impl ProvisioningTransport for RecordingTransport {
    fn attach(&self, status: StatusSender) {
        *self.status.lock().unwrap() = Some(status);
    }

    async fn start_on_boarding(
        &self,
        session_id: &SessionId,
        _tag: OperationTag,
        _connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push(Command::OnBoard(session_id.clone()));
        Ok(())
    }

    async fn provision(&self, request: ProvisioningRequest) -> Result<(), TransportError> {
        self.commands.lock().unwrap().push(Command::Provision {
            session: request.session_id,
            ssid: request.credentials.ssid,
        });
        if !self.provision_delay.is_zero() {
            tokio::time::sleep(self.provision_delay).await;
        }
        Ok(())
    }

    async fn stop_provisioning(
        &self,
        session_id: &SessionId,
        _connectivity_type: ConnectivityType,
    ) -> Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push(Command::Stop(session_id.clone()));
        Ok(())
    }

    async fn terminate(&self) -> Result<(), TransportError> {
        self.commands.lock().unwrap().push(Command::Terminate);
        Ok(())
    }
}

fn enrollee_ip() -> IpAddr {
    "192.168.4.1".parse().unwrap()
}

async fn wire(
    config: EasySetupConfig,
    transport: Arc<dyn ProvisioningTransport>,
) -> (Arc<ProvisioningCoordinator>, UnboundedReceiver<ProvisioningReport>) {
    let registry = Arc::new(MediatorRegistry::new(config));
    let coordinator = ProvisioningCoordinator::new(registry, transport);
    let (listener, reports) = ChannelListener::new();
    coordinator
        .register_provisioning_listener(Arc::new(listener))
        .await;
    (coordinator, reports)
}

async fn next_report(reports: &mut UnboundedReceiver<ProvisioningReport>) -> ProvisioningReport {
    tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("report within deadline")
        .expect("listener channel open")
}

#[tokio::test]
async fn simulated_provisioning_succeeds_with_one_report() {
    let transport = Arc::new(SimulatedTransport::new(Duration::from_millis(10), STATUS_OK, STATUS_OK));
    let (coordinator, mut reports) = wire(EasySetupConfig::default(), transport).await;

    let handle = coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();
    coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
        .await
        .unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.session_id, handle);
    assert_eq!(report.state, EnrolleeState::ProvisioningSuccess);
    assert!(report.is_success());

    let snapshot = coordinator.snapshot(&handle).await.unwrap();
    assert_eq!(snapshot.state, EnrolleeState::ProvisioningSuccess);
    assert_eq!(snapshot.ssid.as_deref(), Some("home-wifi"));
    assert_eq!(snapshot.ip_address, Some(enrollee_ip()));
}

#[tokio::test]
async fn simulated_failure_code_reaches_the_listener() {
    let transport = Arc::new(SimulatedTransport::new(Duration::ZERO, STATUS_OK, 17));
    let (coordinator, mut reports) = wire(EasySetupConfig::default(), transport).await;

    let handle = coordinator.create_session(ConnectivityType::Ble).await.unwrap();
    coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "", ConnectivityType::Ble)
        .await
        .unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.state, EnrolleeState::ProvisioningFailed);
    assert_eq!(report.status_code, Some(17));
    assert!(!report.cancelled);
    assert!(matches!(
        report.error(),
        Some(EasySetupError::TransportFailure { status_code: 17 })
    ));
}

#[tokio::test]
async fn repeated_transport_callbacks_notify_once() {
    let transport = Arc::new(
        SimulatedTransport::new(Duration::ZERO, STATUS_OK, STATUS_OK).with_repeated_callbacks(3),
    );
    let (coordinator, mut reports) = wire(EasySetupConfig::default(), transport).await;

    let handle = coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();
    coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
        .await
        .unwrap();

    assert!(next_report(&mut reports).await.is_success());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(reports.try_recv().is_err());
    assert_eq!(coordinator.metrics().get_stats().duplicate_callbacks, 2);
}

#[tokio::test]
async fn stop_wins_over_a_racing_success() {
    let transport = Arc::new(RecordingTransport::default());
    let (coordinator, mut reports) =
        wire(EasySetupConfig::default(), transport.clone()).await;

    let handle = coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();
    let tag = coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
        .await
        .unwrap();
    coordinator
        .stop_provisioning(&handle, ConnectivityType::SoftAp)
        .await
        .unwrap();

    // The engine still delivers its success after the stop
    assert!(transport.answer(&handle, tag, STATUS_OK));

    let report = next_report(&mut reports).await;
    assert_eq!(report.state, EnrolleeState::ProvisioningFailed);
    assert!(report.cancelled);
    assert_eq!(report.status_code, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(reports.try_recv().is_err());
    assert_eq!(
        coordinator.snapshot(&handle).await.unwrap().state,
        EnrolleeState::ProvisioningFailed
    );
    assert_eq!(
        transport.commands(),
        vec![
            Command::Provision {
                session: handle.clone(),
                ssid: "home-wifi".to_string(),
            },
            Command::Stop(handle.clone()),
        ]
    );
}

#[tokio::test]
async fn on_boarding_failure_ends_the_session() {
    let transport = Arc::new(RecordingTransport::default());
    let (coordinator, mut reports) =
        wire(EasySetupConfig::default(), transport.clone()).await;

    let handle = coordinator
        .create_session_for_device(SessionId::new("aa:bb:cc:dd:ee:ff"), ConnectivityType::SoftAp)
        .await
        .unwrap();
    let tag = coordinator.start_on_boarding(&handle).await.unwrap();
    assert!(transport.answer(&handle, tag, 5));

    let report = next_report(&mut reports).await;
    assert_eq!(report.session_id.as_str(), "aa:bb:cc:dd:ee:ff");
    assert_eq!(report.state, EnrolleeState::ProvisioningFailed);
    assert_eq!(report.status_code, Some(5));

    let result = coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
        .await;
    assert!(matches!(result, Err(EasySetupError::InvalidState { .. })));
    assert_eq!(transport.commands(), vec![Command::OnBoard(handle.clone())]);
}

#[tokio::test]
async fn finished_device_can_be_set_up_again_after_acknowledge() {
    let transport = Arc::new(RecordingTransport::default());
    let (coordinator, mut reports) =
        wire(EasySetupConfig::default(), transport.clone()).await;
    let device = SessionId::new("device-7");

    let handle = coordinator
        .create_session_for_device(device.clone(), ConnectivityType::Ip)
        .await
        .unwrap();
    let busy = coordinator
        .create_session_for_device(device.clone(), ConnectivityType::Ip)
        .await;
    assert!(matches!(busy, Err(EasySetupError::DuplicateSession { .. })));

    let tag = coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::Ip)
        .await
        .unwrap();
    assert!(transport.answer(&handle, tag, STATUS_OK));
    assert!(next_report(&mut reports).await.is_success());

    let snapshot = coordinator.acknowledge(&handle).await.unwrap();
    assert_eq!(snapshot.state, EnrolleeState::ProvisioningSuccess);

    let again = coordinator
        .create_session_for_device(device, ConnectivityType::Ip)
        .await
        .unwrap();
    assert_eq!(
        coordinator.snapshot(&again).await.unwrap().state,
        EnrolleeState::Init
    );
}

#[tokio::test]
async fn session_limit_is_enforced() {
    let mut config = EasySetupConfig::default();
    config.registry.max_sessions = Some(1);
    let (coordinator, _reports) = wire(config, Arc::new(RecordingTransport::default())).await;

    coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();
    let second = coordinator.create_session(ConnectivityType::SoftAp).await;
    assert!(matches!(
        second,
        Err(EasySetupError::ResourceExhausted { limit: 1 })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_each_get_one_report() {
    let transport = Arc::new(SimulatedTransport::new(Duration::from_millis(5), STATUS_OK, STATUS_OK));
    let (coordinator, mut reports) = wire(EasySetupConfig::default(), transport).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let handle = coordinator.create_session(ConnectivityType::SoftAp).await?;
            coordinator
                .provision(
                    &handle,
                    enrollee_ip(),
                    &format!("network-{i}"),
                    "hunter22",
                    ConnectivityType::SoftAp,
                )
                .await?;
            Ok::<_, EasySetupError>(handle)
        }));
    }

    let mut handles = HashSet::new();
    for task in tasks {
        handles.insert(task.await.unwrap().unwrap());
    }
    assert_eq!(handles.len(), 16);

    let mut reported = HashSet::new();
    for _ in 0..16 {
        let report = next_report(&mut reports).await;
        assert!(report.is_success());
        assert!(reported.insert(report.session_id));
    }
    assert_eq!(reported, handles);
    assert_eq!(coordinator.metrics().get_stats().succeeded, 16);
}

#[tokio::test]
async fn finish_terminates_the_transport() {
    let transport = Arc::new(RecordingTransport::default());
    let (coordinator, _reports) = wire(EasySetupConfig::default(), transport.clone()).await;
    coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();

    assert_eq!(coordinator.registry().finish().await, 1);
    assert!(coordinator.sessions().await.is_empty());
    assert_eq!(transport.commands(), vec![Command::Terminate]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn busy_device_does_not_stall_other_sessions() {
    let transport = Arc::new(RecordingTransport::with_provision_delay(Duration::from_millis(800)));
    let (coordinator, _reports) = wire(EasySetupConfig::default(), transport).await;

    let busy = coordinator
        .create_session_for_device(SessionId::new("x"), ConnectivityType::SoftAp)
        .await
        .unwrap();
    let other = coordinator
        .create_session_for_device(SessionId::new("y"), ConnectivityType::SoftAp)
        .await
        .unwrap();

    // Holds the session lock of "x" for the length of the transport call
    let provisioning = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .provision(&busy, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reregister = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .create_session_for_device(SessionId::new("x"), ConnectivityType::SoftAp)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let snapshot = coordinator.snapshot(&other).await.unwrap();
    assert_eq!(snapshot.state, EnrolleeState::Init);
    assert!(started.elapsed() < Duration::from_millis(200));

    assert!(provisioning.await.unwrap().is_ok());
    assert!(matches!(
        reregister.await.unwrap(),
        Err(EasySetupError::DuplicateSession { .. })
    ));
}

#[tokio::test]
async fn late_on_boarding_status_cannot_finish_provisioning() {
    let transport = Arc::new(RecordingTransport::default());
    let (coordinator, mut reports) =
        wire(EasySetupConfig::default(), transport.clone()).await;

    let handle = coordinator.create_session(ConnectivityType::SoftAp).await.unwrap();
    let on_boarding = coordinator.start_on_boarding(&handle).await.unwrap();
    assert!(transport.answer(&handle, on_boarding, STATUS_OK));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let provisioning = coordinator
        .provision(&handle, enrollee_ip(), "home-wifi", "hunter22", ConnectivityType::SoftAp)
        .await
        .unwrap();

    // At-least-once delivery repeats the on-boarding answer
    assert!(transport.answer(&handle, on_boarding, STATUS_OK));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        coordinator.snapshot(&handle).await.unwrap().state,
        EnrolleeState::Provisioning
    );
    assert!(reports.try_recv().is_err());

    assert!(transport.answer(&handle, provisioning, 4));
    let report = next_report(&mut reports).await;
    assert_eq!(report.state, EnrolleeState::ProvisioningFailed);
    assert_eq!(report.status_code, Some(4));
}
