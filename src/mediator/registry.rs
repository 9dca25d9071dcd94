// Mediator registry - every enrollee session known to this mediator

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EasySetupConfig;
use crate::enrollee::{EnrolleeSession, SessionId, SessionSnapshot};
use crate::error::{EasySetupError, Result};
use crate::provisioning::{ProvisioningListener, ProvisioningReport, ProvisioningTransport};

pub type SharedSession = Arc<Mutex<EnrolleeSession>>;

/// Tracks enrollee sessions and dispatches terminal reports to the application.
///
/// The session map and each session have separate locks: the map lock is only
/// held for lookups and insert/remove, never while a session lock is awaited by
/// someone else holding it.
pub struct MediatorRegistry {
    instance_id: Uuid,
    config: EasySetupConfig,
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
    listener: RwLock<Option<Arc<dyn ProvisioningListener>>>,
    transports: std::sync::Mutex<Vec<Arc<dyn ProvisioningTransport>>>,
}

impl MediatorRegistry {
    pub fn new(config: EasySetupConfig) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            config,
            sessions: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            transports: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Identity of this registry, distinct for every construction
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &EasySetupConfig {
        &self.config
    }

    /// Register a session.
    ///
    /// An existing session under the same id is replaced only if it already
    /// reached a terminal state; otherwise the device is busy.
    pub async fn insert(&self, session: EnrolleeSession) -> Result<SharedSession> {
        let id = session.id().clone();

        // The existing session may be held across a transport call; wait for it
        // without holding the map lock.
        let seen = self.sessions.read().await.get(&id).cloned();
        if let Some(existing) = &seen {
            let existing = existing.lock().await;
            if !existing.is_terminal() {
                warn!(session_id = %id, state = %existing.state(), "Device already has an active session");
                return Err(EasySetupError::DuplicateSession { id });
            }
        }

        let mut sessions = self.sessions.write().await;

        let replacing = match (sessions.get(&id), &seen) {
            (None, _) => false,
            (Some(current), Some(seen)) if Arc::ptr_eq(current, seen) => true,
            // Registered concurrently since the check above
            (Some(_), _) => {
                warn!(session_id = %id, "Device registered concurrently");
                return Err(EasySetupError::DuplicateSession { id });
            }
        };

        if let Some(limit) = self.config.registry.max_sessions {
            let occupied = sessions.len() - usize::from(replacing);
            if occupied >= limit {
                warn!(session_id = %id, limit, "Session limit reached");
                return Err(EasySetupError::ResourceExhausted { limit });
            }
        }

        if replacing {
            info!(session_id = %id, "Replacing finished session for device");
        }

        let shared = Arc::new(Mutex::new(session));
        sessions.insert(id, shared.clone());
        Ok(shared)
    }

    pub async fn get(&self, id: &SessionId) -> Result<SharedSession> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EasySetupError::SessionNotFound { id: id.clone() })
    }

    pub async fn remove(&self, id: &SessionId) -> Option<SharedSession> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "Session evicted");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshots of every session, oldest first
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let shared: Vec<SharedSession> = self.sessions.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(shared.len());
        for session in shared {
            snapshots.push(session.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn register_provisioning_listener(&self, listener: Arc<dyn ProvisioningListener>) {
        *self.listener.write().await = Some(listener);
        debug!("Provisioning listener registered");
    }

    /// Forward a terminal report to the application listener
    pub async fn notify(&self, report: ProvisioningReport) {
        let listener = self.listener.read().await.clone();
        match listener {
            Some(listener) => {
                info!(
                    session_id = %report.session_id,
                    state = %report.state,
                    status_code = ?report.status_code,
                    cancelled = report.cancelled,
                    "Delivering provisioning report"
                );
                listener.on_finish_provisioning(report);
            }
            None => warn!(
                session_id = %report.session_id,
                state = %report.state,
                "No provisioning listener registered, report dropped"
            ),
        }
    }

    /// Keep a transport so `finish` can release it
    pub fn attach_transport(&self, transport: Arc<dyn ProvisioningTransport>) {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    /// Release every session and terminate attached transports.
    ///
    /// Returns the number of sessions released.
    pub async fn finish(&self) -> usize {
        let released = {
            let mut sessions = self.sessions.write().await;
            let count = sessions.len();
            sessions.clear();
            count
        };

        *self.listener.write().await = None;

        let transports: Vec<_> = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let limit = Duration::from_secs(self.config.registry.finish_timeout_seconds);
        for transport in transports {
            match timeout(limit, transport.terminate()).await {
                Ok(Ok(())) => debug!("Transport terminated"),
                Ok(Err(e)) => warn!(error = %e, "Transport failed to terminate cleanly"),
                Err(_) => warn!(timeout_secs = limit.as_secs(), "Timed out terminating transport"),
            }
        }

        info!(
            instance_id = %self.instance_id,
            released_sessions = released,
            "Mediator registry finished"
        );
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollee::{ConnectivityType, EnrolleeEvent};
    use crate::provisioning::transport::MockProvisioningTransport;

    fn registry_with_limit(limit: Option<usize>) -> MediatorRegistry {
        let mut config = EasySetupConfig::default();
        config.registry.max_sessions = limit;
        MediatorRegistry::new(config)
    }

    fn session(id: &str) -> EnrolleeSession {
        EnrolleeSession::new(SessionId::new(id), ConnectivityType::SoftAp)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let registry = registry_with_limit(None);
        registry.insert(session("device-1")).await.unwrap();

        let found = registry.get(&SessionId::new("device-1")).await.unwrap();
        assert_eq!(found.lock().await.id().as_str(), "device-1");
        assert_eq!(registry.len().await, 1);

        let missing = registry.get(&SessionId::new("device-2")).await;
        assert!(matches!(missing, Err(EasySetupError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_active_device_cannot_be_registered_twice() {
        let registry = registry_with_limit(None);
        registry.insert(session("aa:bb")).await.unwrap();

        let second = registry.insert(session("aa:bb")).await;
        assert!(matches!(second, Err(EasySetupError::DuplicateSession { .. })));
    }

    #[tokio::test]
    async fn test_terminal_session_is_replaced() {
        let registry = registry_with_limit(Some(1));
        let first = registry.insert(session("aa:bb")).await.unwrap();
        first.lock().await.apply(EnrolleeEvent::FactoryResetRequested).unwrap();

        let replacement = registry.insert(session("aa:bb")).await.unwrap();
        assert!(!replacement.lock().await.is_terminal());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let registry = registry_with_limit(Some(2));
        registry.insert(session("a")).await.unwrap();
        registry.insert(session("b")).await.unwrap();

        let third = registry.insert(session("c")).await;
        assert!(matches!(third, Err(EasySetupError::ResourceExhausted { limit: 2 })));

        registry.remove(&SessionId::new("a")).await;
        assert!(registry.insert(session("c")).await.is_ok());
    }

    #[tokio::test]
    async fn test_finish_releases_sessions_and_terminates_transports() {
        let registry = registry_with_limit(None);
        registry.insert(session("a")).await.unwrap();
        registry.insert(session("b")).await.unwrap();

        let mut transport = MockProvisioningTransport::new();
        transport.expect_terminate().times(1).returning(|| Ok(()));
        registry.attach_transport(Arc::new(transport));

        assert_eq!(registry.finish().await, 2);
        assert!(registry.is_empty().await);

        // Transports are released once
        assert_eq!(registry.finish().await, 0);
    }

    #[test]
    fn test_snapshots_are_ordered_by_creation() {
        tokio_test::block_on(async {
            let registry = registry_with_limit(None);
            registry.insert(session("charlie")).await.unwrap();
            registry.insert(session("alpha")).await.unwrap();
            registry.insert(session("bravo")).await.unwrap();

            let snapshots = registry.snapshots().await;
            assert_eq!(snapshots.len(), 3);
            assert!(snapshots
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at));
        });
    }

    #[tokio::test]
    async fn test_busy_session_does_not_block_other_lookups() {
        let registry = Arc::new(registry_with_limit(None));
        let busy = registry.insert(session("x")).await.unwrap();
        registry.insert(session("y")).await.unwrap();

        // Stands in for a command in flight on "x"
        let guard = busy.lock().await;

        let contender = registry.clone();
        let reinsert = tokio::spawn(async move { contender.insert(session("x")).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reinsert.is_finished());

        let lookup = timeout(Duration::from_millis(200), registry.get(&SessionId::new("y"))).await;
        assert!(matches!(lookup, Ok(Ok(_))));
        let count = timeout(Duration::from_millis(200), registry.len()).await;
        assert_eq!(count.unwrap(), 2);

        drop(guard);
        let result = reinsert.await.unwrap();
        assert!(matches!(result, Err(EasySetupError::DuplicateSession { .. })));
    }
}
