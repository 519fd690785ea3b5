//! The component contract and its lifecycle state.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use waiter_core::Identified;

use crate::config::Properties;

/// Lifecycle state of a component.
///
/// State machine: Unconfigured -> Configured -> Started -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
}

/// What a component hands back once it has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHandle {
    /// Started, nothing to report.
    Ready,
    /// Started and listening on the given address.
    Bound(SocketAddr),
}

/// A lifecycle-managed unit of the application.
///
/// Components are set up with the application properties, then started and
/// later stopped by a [`Context`](super::Context). `stop()` must succeed
/// even if `start()` failed halfway.
#[async_trait]
pub trait Component: Identified + Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Reads the settings this component needs.
    fn setup(&self, properties: &Properties) -> anyhow::Result<()>;

    /// Starts the component.
    async fn start(&self) -> anyhow::Result<ComponentHandle>;

    /// Stops the component and releases its resources.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Shared lifecycle state cell for component implementations.
#[derive(Debug)]
pub struct StateCell {
    state: Arc<ArcSwap<LifecycleState>>,
}

impl StateCell {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Unconfigured)),
        }
    }

    #[must_use]
    pub fn get(&self) -> LifecycleState {
        **self.state.load()
    }

    pub fn set(&self, state: LifecycleState) {
        self.state.store(Arc::new(state));
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
