use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use easy_setup_mediator::{
    get_instance, init_telemetry, mediator, ChannelListener, ConnectivityType, EasySetupConfig,
    EasySetupError, ProvisioningCoordinator, SessionId, SimulatedTransport, STATUS_OK,
};

#[derive(Parser)]
#[command(name = "easy-setup")]
#[command(about = "Mediator for on-boarding and provisioning enrollee devices")]
#[command(long_about = "Drives an enrollee through on-boarding and network provisioning, \
                       reporting the terminal outcome as JSON. Commands run against the \
                       built-in simulated transport.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision one enrollee with network credentials and print the outcome
    Provision {
        /// Address of the enrollee on the on-boarding network
        #[arg(long, help = "Enrollee IP address, e.g. 192.168.4.1")]
        ip: IpAddr,
        /// Target network name
        #[arg(long)]
        ssid: String,
        /// Target network passphrase
        #[arg(long, default_value = "")]
        password: String,
        /// Transport used to reach the enrollee
        #[arg(long, default_value = "softap", help = "Connectivity type: softap, ble, ip")]
        connectivity: ConnectivityType,
        /// Identify the session by device (e.g. MAC) instead of a generated id
        #[arg(long)]
        device_id: Option<String>,
        /// Run on-boarding as its own step before provisioning
        #[arg(long)]
        on_board: bool,
        /// Status code the simulated enrollee answers provisioning with
        #[arg(long, help = "Override the simulated provisioning status (0 = success)")]
        status: Option<i32>,
        /// Delay before the simulated enrollee answers
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Give up waiting for the outcome after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    EasySetupConfig::load_env_file()?;
    let mut config = EasySetupConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Provision {
            ip,
            ssid,
            password,
            connectivity,
            device_id,
            on_board,
            status,
            delay_ms,
            timeout,
        } => {
            if let Some(status) = status {
                config.provisioning.simulated_provisioning_status = status;
            }
            if let Some(delay_ms) = delay_ms {
                config.provisioning.simulated_delay_ms = delay_ms;
            }
            init_telemetry(&config.observability)?;

            let request = ProvisionCommand {
                ip,
                ssid,
                password,
                connectivity,
                device_id: device_id.map(SessionId::new),
                on_board,
                timeout: Duration::from_secs(timeout),
            };
            tokio::runtime::Runtime::new()?.block_on(async {
                provision_command(config, request).await
            })
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

struct ProvisionCommand {
    ip: IpAddr,
    ssid: String,
    password: String,
    connectivity: ConnectivityType,
    device_id: Option<SessionId>,
    on_board: bool,
    timeout: Duration,
}

async fn provision_command(config: EasySetupConfig, request: ProvisionCommand) -> Result<()> {
    let metrics_enabled = config.observability.metrics_enabled;
    let transport = Arc::new(SimulatedTransport::from_config(&config.provisioning));
    let registry = get_instance(config);
    let coordinator = ProvisioningCoordinator::new(registry, transport);

    let (listener, mut reports) = ChannelListener::new();
    coordinator
        .register_provisioning_listener(Arc::new(listener))
        .await;

    let handle = match request.device_id {
        Some(device_id) => {
            coordinator
                .create_session_for_device(device_id, request.connectivity)
                .await?
        }
        None => coordinator.create_session(request.connectivity).await?,
    };

    if request.on_board {
        coordinator.start_on_boarding(&handle).await?;
        wait_for_on_boarding(&coordinator, &handle, request.timeout).await?;
    }

    // A synchronous rejection has already produced a report; print it below.
    if let Err(e) = coordinator
        .provision(
            &handle,
            request.ip,
            &request.ssid,
            &request.password,
            request.connectivity,
        )
        .await
    {
        if !matches!(e, EasySetupError::Transport(_)) {
            return Err(e.into());
        }
    }

    let report = match tokio::time::timeout(request.timeout, reports.recv()).await {
        Ok(Some(report)) => report,
        Ok(None) => return Err(anyhow!("Listener closed before provisioning finished")),
        Err(_) => {
            coordinator
                .stop_provisioning(&handle, request.connectivity)
                .await?;
            reports
                .recv()
                .await
                .ok_or_else(|| anyhow!("No report after cancelling provisioning"))?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if metrics_enabled {
        coordinator.metrics().log_stats();
    }
    drop(coordinator);
    let released = mediator::finish().await;
    info!(released, "Mediator finished");

    match report.error() {
        Some(e) => Err(e.into()),
        None if report.is_success() => Ok(()),
        None => Err(anyhow!("Provisioning ended in {}", report.state)),
    }
}

/// Poll until on-boarding has left ON_BOARDING or the deadline passes
async fn wait_for_on_boarding(
    coordinator: &ProvisioningCoordinator,
    handle: &SessionId,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = coordinator.snapshot(handle).await?;
        if snapshot.pending.is_none() {
            if snapshot.state.is_terminal() {
                let code = snapshot.last_status.unwrap_or(STATUS_OK);
                return Err(anyhow!("On-boarding failed with status {code}"));
            }
            info!(state = %snapshot.state, "On-boarding complete");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("Timed out waiting for on-boarding"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
