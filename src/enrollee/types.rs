// Core types for the enrollee provisioning lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EasySetupError;

/// Opaque identifier of an enrollee, unique per device (MAC or UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Callers hold on to the session id to address a session.
pub type SessionHandle = SessionId;

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Enrollee states in the provisioning lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrolleeState {
    /// Default state of the device
    Init,
    /// Mediator is establishing initial connectivity with the device
    OnBoarding,
    /// On-boarding is done, network credentials are being transferred
    Provisioning,
    /// Easy setup finished, the device joined the target network
    ProvisioningSuccess,
    /// The device could not be enrolled in the network
    ProvisioningFailed,
    /// Ownership of the device is being handed to another mediator
    OwnershipTransfer,
    /// The device was factory reset
    FactoryReset,
}

impl EnrolleeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrolleeState::ProvisioningSuccess
                | EnrolleeState::ProvisioningFailed
                | EnrolleeState::FactoryReset
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrolleeState::Init => "INIT",
            EnrolleeState::OnBoarding => "ON_BOARDING",
            EnrolleeState::Provisioning => "PROVISIONING",
            EnrolleeState::ProvisioningSuccess => "PROVISIONING_SUCCESS",
            EnrolleeState::ProvisioningFailed => "PROVISIONING_FAILED",
            EnrolleeState::OwnershipTransfer => "OWNERSHIP_TRANSFER",
            EnrolleeState::FactoryReset => "FACTORY_RESET",
        }
    }
}

impl fmt::Display for EnrolleeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport used to reach the enrollee during setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityType {
    /// Device-hosted soft access point
    SoftAp,
    /// Bluetooth Low Energy
    Ble,
    /// Plain IP on an already shared network
    Ip,
}

impl fmt::Display for ConnectivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityType::SoftAp => "softap",
            ConnectivityType::Ble => "ble",
            ConnectivityType::Ip => "ip",
        };
        f.write_str(name)
    }
}

impl FromStr for ConnectivityType {
    type Err = EasySetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "softap" | "soft-ap" | "soft_ap" => Ok(ConnectivityType::SoftAp),
            "ble" | "bluetooth" => Ok(ConnectivityType::Ble),
            "ip" | "wifi" => Ok(ConnectivityType::Ip),
            other => Err(EasySetupError::InvalidConnectivity(other.to_string())),
        }
    }
}

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Target network credentials handed to the enrollee
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
}

impl NetworkCredentials {
    /// Validate SSID and passphrase lengths (802.11 limits).
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, EasySetupError> {
        let ssid = ssid.into();
        let password = password.into();

        if ssid.is_empty() {
            return Err(EasySetupError::InvalidCredentials(
                "SSID must not be empty".to_string(),
            ));
        }
        if ssid.len() > MAX_SSID_LEN {
            return Err(EasySetupError::InvalidCredentials(format!(
                "SSID is {} bytes, limit is {MAX_SSID_LEN}",
                ssid.len()
            )));
        }
        if password.len() > MAX_PASSPHRASE_LEN {
            return Err(EasySetupError::InvalidCredentials(format!(
                "password is {} bytes, limit is {MAX_PASSPHRASE_LEN}",
                password.len()
            )));
        }

        Ok(Self { ssid, password })
    }
}

// Keep passwords out of logs.
impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Transport operation currently outstanding for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOperation {
    OnBoarding,
    Provisioning,
}

/// Identifies one issued transport command; its status must echo the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationTag {
    pub operation: PendingOperation,
    /// Per-session counter, starting at 1
    pub sequence: u64,
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.operation, self.sequence)
    }
}
