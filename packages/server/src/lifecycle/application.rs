//! Composition root: declared components, their start and stop order, and
//! the run loop around a shutdown future.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{error, info};
use waiter_core::Identified;

use super::component::Component;
use super::context::{Context, LifecycleError};
use crate::config::Properties;

// ---------------------------------------------------------------------------
// Declaration
// ---------------------------------------------------------------------------

/// A component declared on the application, with its optional start and
/// stop priorities.
///
/// Lower priorities go first. Components without a priority go after all
/// prioritized ones, ordered by identifier.
#[derive(Clone)]
pub struct Declaration {
    component: Arc<dyn Component>,
    start_priority: Option<i32>,
    stop_priority: Option<i32>,
}

impl Declaration {
    #[must_use]
    pub fn new(component: Arc<dyn Component>) -> Self {
        Self {
            component,
            start_priority: None,
            stop_priority: None,
        }
    }

    #[must_use]
    pub fn start_priority(mut self, priority: i32) -> Self {
        self.start_priority = Some(priority);
        self
    }

    #[must_use]
    pub fn stop_priority(mut self, priority: i32) -> Self {
        self.stop_priority = Some(priority);
        self
    }

    #[must_use]
    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }
}

fn by_priority(
    a: &Declaration,
    b: &Declaration,
    priority: fn(&Declaration) -> Option<i32>,
) -> Ordering {
    match (priority(a), priority(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.component.identifier().cmp(b.component.identifier()))
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Builder for [`Application`].
#[derive(Default)]
pub struct ApplicationBuilder {
    properties: Properties,
    declarations: Vec<Declaration>,
}

impl ApplicationBuilder {
    #[must_use]
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn component(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    #[must_use]
    pub fn build(self) -> Application {
        Application {
            properties: self.properties,
            declarations: self.declarations,
            context: Arc::new(Context::new()),
            stopped: AtomicBool::new(false),
        }
    }
}

/// Composition root: owns the properties, the declared components and the
/// [`Context`] they are started into.
pub struct Application {
    properties: Properties,
    declarations: Vec<Declaration>,
    context: Arc<Context>,
    stopped: AtomicBool,
}

impl Application {
    #[must_use]
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Declared components in start order.
    #[must_use]
    pub fn start_order(&self) -> Vec<Arc<dyn Component>> {
        self.ordered(|d| d.start_priority)
    }

    /// Declared components in stop order.
    #[must_use]
    pub fn stop_order(&self) -> Vec<Arc<dyn Component>> {
        self.ordered(|d| d.stop_priority)
    }

    fn ordered(&self, priority: fn(&Declaration) -> Option<i32>) -> Vec<Arc<dyn Component>> {
        let mut declarations: Vec<&Declaration> = self.declarations.iter().collect();
        declarations.sort_by(|a, b| by_priority(a, b, priority));
        declarations
            .into_iter()
            .map(|d| Arc::clone(&d.component))
            .collect()
    }

    /// Sets up and starts every declared component in start order.
    ///
    /// # Errors
    ///
    /// Stops at the first component whose setup or start fails and returns
    /// that failure. Components started before it stay running until
    /// [`Application::stop`] is called.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        info!("starting application components");
        for component in self.start_order() {
            component
                .setup(&self.properties)
                .map_err(|source| LifecycleError::SetupFailed {
                    identifier: component.identifier().to_string(),
                    source,
                })?;
            self.context.add_then_start(component).await?;
        }
        info!("application components started");
        Ok(())
    }

    /// Stops every declared component in stop order.
    ///
    /// Runs at most once; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        info!("stopping application components");
        for component in self.stop_order() {
            self.context.stop_by_identifier(component.identifier()).await;
        }
        info!("application components stopped");
    }

    /// Starts the application, waits for `shutdown`, then stops it.
    ///
    /// A failed start runs the stop path before returning.
    ///
    /// # Errors
    ///
    /// Returns the start failure, if any.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), LifecycleError> {
        if let Err(e) = self.start().await {
            error!(error = %e, "application start failed");
            self.stop().await;
            return Err(e);
        }
        shutdown.await;
        self.stop().await;
        Ok(())
    }
}

/// Resolves on Ctrl-C, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::testing::{Journal, Recording};
    use crate::lifecycle::LifecycleState;

    fn declare(identifier: &str, journal: &Journal) -> Declaration {
        Declaration::new(Arc::new(Recording::new(identifier, journal)))
    }

    fn identifiers(components: &[Arc<dyn Component>]) -> Vec<String> {
        components
            .iter()
            .map(|c| c.identifier().to_string())
            .collect()
    }

    #[test]
    fn prioritized_components_go_first() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("zeta", &journal))
            .component(declare("server", &journal).start_priority(2).stop_priority(1))
            .component(declare("database", &journal).start_priority(1).stop_priority(2))
            .component(declare("alpha", &journal))
            .build();

        assert_eq!(
            identifiers(&app.start_order()),
            vec!["database", "server", "alpha", "zeta"]
        );
        assert_eq!(
            identifiers(&app.stop_order()),
            vec!["server", "database", "alpha", "zeta"]
        );
    }

    #[test]
    fn equal_priorities_fall_back_to_identifier() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("b", &journal).start_priority(0))
            .component(declare("a", &journal).start_priority(0))
            .build();

        assert_eq!(identifiers(&app.start_order()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn start_sets_up_and_starts_in_order() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("server", &journal).start_priority(2))
            .component(declare("database", &journal).start_priority(1))
            .build();

        app.start().await.unwrap();

        assert_eq!(
            journal.entries(),
            vec!["setup:database", "start:database", "setup:server", "start:server"]
        );
        assert_eq!(app.context().len(), 2);
    }

    #[tokio::test]
    async fn start_halts_at_first_failure() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("database", &journal).start_priority(1))
            .component(
                Declaration::new(Arc::new(Recording::new("server", &journal).failing_start()))
                    .start_priority(2),
            )
            .component(declare("cache", &journal).start_priority(3))
            .build();

        let err = app.start().await.unwrap_err();

        assert!(matches!(
            err,
            LifecycleError::StartFailed { ref identifier, .. } if identifier == "server"
        ));
        assert!(!journal.entries().contains(&"start:cache".to_string()));
    }

    #[tokio::test]
    async fn stop_runs_exactly_once() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("server", &journal))
            .build();
        app.start().await.unwrap();

        app.stop().await;
        app.stop().await;

        let stops = journal
            .entries()
            .iter()
            .filter(|e| e.starts_with("stop:"))
            .count();
        assert_eq!(stops, 1);
        assert!(app.context().is_empty());
    }

    #[tokio::test]
    async fn failed_stop_does_not_block_later_stops() {
        let journal = Journal::default();
        let a = Arc::new(Recording::new("a", &journal).failing_stop());
        let b = Arc::new(Recording::new("b", &journal));
        let app = Application::builder()
            .component(Declaration::new(a.clone()).start_priority(1).stop_priority(1))
            .component(Declaration::new(b.clone()).start_priority(2).stop_priority(2))
            .build();
        app.start().await.unwrap();

        app.stop().await;

        assert_eq!(
            journal.entries(),
            vec!["setup:a", "start:a", "setup:b", "start:b", "stop:a", "stop:b"]
        );
        assert_eq!(b.state(), LifecycleState::Stopped);
        assert!(app.context().is_empty());
    }

    #[tokio::test]
    async fn run_stops_after_shutdown_future() {
        let journal = Journal::default();
        let database = Arc::new(Recording::new("database", &journal));
        let app = Application::builder()
            .component(Declaration::new(database.clone()))
            .build();

        app.run(async {}).await.unwrap();

        assert_eq!(database.state(), LifecycleState::Stopped);
        assert_eq!(
            journal.entries(),
            vec!["setup:database", "start:database", "stop:database"]
        );
    }

    #[tokio::test]
    async fn run_stops_started_components_after_failed_start() {
        let journal = Journal::default();
        let app = Application::builder()
            .component(declare("database", &journal).start_priority(1).stop_priority(2))
            .component(
                Declaration::new(Arc::new(Recording::new("server", &journal).failing_start()))
                    .start_priority(2)
                    .stop_priority(1),
            )
            .build();

        let result = app.run(std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(
            journal.entries(),
            vec![
                "setup:database",
                "start:database",
                "setup:server",
                "start:server",
                "stop:server",
                "stop:database",
            ]
        );
        assert!(app.context().is_empty());
    }
}
