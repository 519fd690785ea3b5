//! Registry of started components.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{error, info, warn};
use waiter_core::{Identified, Identity};

use super::component::{Component, ComponentHandle};

/// Errors surfaced by the lifecycle layer.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("component '{identifier}' is already registered")]
    Duplicate { identifier: String },
    #[error("component '{identifier}' setup failed: {source}")]
    SetupFailed {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("component '{identifier}' failed to start: {source}")]
    StartFailed {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Registry of the application's started components, keyed by identifier.
///
/// Created once by the application and passed around explicitly. Safe for
/// concurrent use; no lock is held across a component's `start()` or
/// `stop()`.
#[derive(Default)]
pub struct Context {
    components: DashMap<Identity, Arc<dyn Component>>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            components: DashMap::new(),
        }
    }

    /// Registers `component`, then starts it.
    ///
    /// A component that fails to start stays registered so the stop path
    /// can still release whatever it acquired.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::Duplicate` if the identifier is already registered.
    /// - `LifecycleError::StartFailed` if `start()` fails. Callers treat this
    ///   as fatal.
    pub async fn add_then_start(
        &self,
        component: Arc<dyn Component>,
    ) -> Result<ComponentHandle, LifecycleError> {
        let identity = component.identity().clone();
        match self.components.entry(identity.clone()) {
            Entry::Occupied(_) => {
                return Err(LifecycleError::Duplicate {
                    identifier: identity.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&component));
            }
        }

        match component.start().await {
            Ok(handle) => {
                info!(component = %identity, ?handle, "component started");
                Ok(handle)
            }
            Err(source) => {
                error!(component = %identity, error = %source, "component failed to start");
                Err(LifecycleError::StartFailed {
                    identifier: identity.to_string(),
                    source,
                })
            }
        }
    }

    /// Removes and stops the component with the given identifier.
    ///
    /// Unknown identifiers are logged and ignored. Stop failures are logged
    /// and not propagated.
    pub async fn stop_by_identifier(&self, identifier: &str) {
        let Some((identity, component)) = self.components.remove(identifier) else {
            warn!(component = identifier, "no such component to stop");
            return;
        };

        match component.stop().await {
            Ok(()) => info!(component = %identity, "component stopped"),
            Err(e) => error!(component = %identity, error = %e, "component failed to stop"),
        }
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Component>> {
        self.components
            .get(identifier)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.components.contains_key(identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
