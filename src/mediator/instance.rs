// Process-wide registry accessors
//
// Applications that own their registry should construct `MediatorRegistry`
// directly; these accessors keep the lazily created shared instance.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::registry::MediatorRegistry;
use crate::config::EasySetupConfig;

static INSTANCE: Mutex<Option<Arc<MediatorRegistry>>> = Mutex::new(None);

/// Get the shared registry, constructing it on first use.
///
/// First writer wins: once constructed, later calls get the same registry even
/// when they pass a different configuration.
pub fn get_instance(config: EasySetupConfig) -> Arc<MediatorRegistry> {
    let mut slot = INSTANCE.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(registry) = slot.as_ref() {
        if registry.config() != &config {
            warn!(
                instance_id = %registry.instance_id(),
                "Registry already initialized, ignoring differing configuration"
            );
        }
        return registry.clone();
    }

    let registry = Arc::new(MediatorRegistry::new(config));
    info!(instance_id = %registry.instance_id(), "Mediator registry initialized");
    *slot = Some(registry.clone());
    registry
}

/// The shared registry, if one is currently initialized
pub fn current_instance() -> Option<Arc<MediatorRegistry>> {
    INSTANCE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Tear down the shared registry.
///
/// Returns the number of sessions released; the next `get_instance` builds a
/// fresh registry.
pub async fn finish() -> usize {
    let registry = INSTANCE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    match registry {
        Some(registry) => registry.finish().await,
        None => 0,
    }
}
