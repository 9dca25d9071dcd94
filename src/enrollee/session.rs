use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::state_machine::{EnrolleeEvent, EnrolleeStateMachine};
use super::types::{
    ConnectivityType, EnrolleeState, NetworkCredentials, OperationTag, PendingOperation, SessionId,
};
use crate::error::EasySetupError;

/// One device undergoing easy setup.
///
/// The state is only reachable through [`EnrolleeSession::apply`], which routes
/// every change through the state machine.
pub struct EnrolleeSession {
    id: SessionId,
    connectivity_type: ConnectivityType,
    machine: EnrolleeStateMachine,
    credentials: Option<NetworkCredentials>,
    ip_address: Option<IpAddr>,
    pending: Option<OperationTag>,
    issued: u64,
    last_status: Option<i32>,
    cancelled: bool,
    terminal_notified: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EnrolleeSession {
    pub fn new(id: SessionId, connectivity_type: ConnectivityType) -> Self {
        let now = Utc::now();
        Self {
            machine: EnrolleeStateMachine::new(id.clone()),
            id,
            connectivity_type,
            credentials: None,
            ip_address: None,
            pending: None,
            issued: 0,
            last_status: None,
            cancelled: false,
            terminal_notified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> EnrolleeState {
        self.machine.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn connectivity_type(&self) -> ConnectivityType {
        self.connectivity_type
    }

    pub fn credentials(&self) -> Option<&NetworkCredentials> {
        self.credentials.as_ref()
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }

    pub fn pending(&self) -> Option<PendingOperation> {
        self.pending.map(|tag| tag.operation)
    }

    pub fn pending_tag(&self) -> Option<OperationTag> {
        self.pending
    }

    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn apply(&mut self, event: EnrolleeEvent) -> Result<EnrolleeState, EasySetupError> {
        let state = self.machine.transition(event)?;
        self.updated_at = Utc::now();
        Ok(state)
    }

    /// Record the target network and address; only legal on the way into PROVISIONING.
    pub(crate) fn set_provisioning_target(
        &mut self,
        ip_address: IpAddr,
        credentials: NetworkCredentials,
        connectivity_type: ConnectivityType,
    ) {
        self.ip_address = Some(ip_address);
        self.credentials = Some(credentials);
        self.connectivity_type = connectivity_type;
    }

    /// Mark an operation outstanding and issue the tag its status must carry.
    pub(crate) fn begin(&mut self, operation: PendingOperation) -> OperationTag {
        self.issued += 1;
        let tag = OperationTag {
            operation,
            sequence: self.issued,
        };
        self.pending = Some(tag);
        tag
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingOperation> {
        self.pending.take().map(|tag| tag.operation)
    }

    /// Settle the outstanding operation only if `tag` is the one it was issued.
    pub(crate) fn settle(&mut self, tag: OperationTag) -> bool {
        if self.pending != Some(tag) {
            return false;
        }
        self.pending = None;
        true
    }

    pub(crate) fn record_status(&mut self, status_code: i32) {
        self.last_status = Some(status_code);
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Returns true the first time it is called on a terminal session.
    pub(crate) fn claim_terminal_notification(&mut self) -> bool {
        if !self.is_terminal() || self.terminal_notified {
            return false;
        }
        self.terminal_notified = true;
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            state: self.state(),
            connectivity_type: self.connectivity_type,
            ip_address: self.ip_address,
            ssid: self.credentials.as_ref().map(|c| c.ssid.clone()),
            pending: self.pending(),
            last_status: self.last_status,
            cancelled: self.cancelled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of a session, safe to log or print (no password).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: EnrolleeState,
    pub connectivity_type: ConnectivityType,
    pub ip_address: Option<IpAddr>,
    pub ssid: Option<String>,
    pub pending: Option<PendingOperation>,
    pub last_status: Option<i32>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
