use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for the easy setup mediator
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EasySetupConfig {
    /// Session registry settings
    pub registry: RegistryConfig,
    /// Provisioning flow settings
    pub provisioning: ProvisioningConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum number of registered sessions (unlimited when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
    /// Upper bound for releasing transport resources on finish
    pub finish_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Delay before the simulated transport answers a command
    pub simulated_delay_ms: u64,
    /// Status code the simulated transport answers on-boarding with
    pub simulated_on_boarding_status: i32,
    /// Status code the simulated transport answers provisioning with
    pub simulated_provisioning_status: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Log provisioning counters on shutdown
    pub metrics_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: None,
            finish_timeout_seconds: 5,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            simulated_delay_ms: 250,
            simulated_on_boarding_status: 0,
            simulated_provisioning_status: 0,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl EasySetupConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (easy-setup.toml, .easy-setup-rc)
    /// 3. Environment variables (EASY_SETUP_<SECTION>__<KEY>)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`EasySetupConfig::load`] with config files looked up in `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        let toml_path = dir.join("easy-setup.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".easy-setup-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("EASY_SETUP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EasySetupConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
