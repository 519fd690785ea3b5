//! The socket server as a lifecycle component.
//!
//! `setup()` reads the server settings and sizes the worker pool, `start()`
//! binds the listener and spawns the accept loop, `stop()` stops accepting,
//! signals every open connection and waits for them to drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waiter_core::{CoreError, Identified, Identity, WorkerPool};

use super::backend::IoBackend;
use super::connection::{run_tcp_connection, stopped, ConnectionContext};
use super::shutdown::{HealthState, ShutdownController};
use crate::config::{Properties, ServerConfig};
use crate::lifecycle::{Component, ComponentHandle, LifecycleState, StateCell};
use crate::traits::Dispatch;

/// Identifier the server registers under in the application context.
pub const SERVER_IDENTIFIER: &str = "server";

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts TCP connections and serves each one with the framed request
/// loop, dispatching decoded messages to a [`Dispatch`] implementation.
pub struct Server {
    identity: Identity,
    dispatcher: Arc<dyn Dispatch>,
    state: StateCell,
    config: RwLock<Option<Arc<ServerConfig>>>,
    pool: RwLock<Option<WorkerPool>>,
    shutdown: Arc<ShutdownController>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl Server {
    /// Creates an unconfigured server that routes through `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is rejected.
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(SERVER_IDENTIFIER)?,
            dispatcher,
            state: StateCell::new(),
            config: RwLock::new(None),
            pool: RwLock::new(None),
            shutdown: Arc::new(ShutdownController::new()),
            accept_task: Mutex::new(None),
            local_addr: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.shutdown.health_state()
    }

    /// Address the listener is bound to, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    #[must_use]
    pub fn config(&self) -> Option<Arc<ServerConfig>> {
        self.config.read().clone()
    }
}

impl Identified for Server {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl Component for Server {
    fn state(&self) -> LifecycleState {
        self.state.get()
    }

    fn setup(&self, properties: &Properties) -> anyhow::Result<()> {
        match self.state.get() {
            LifecycleState::Started => anyhow::bail!("server is already running"),
            // The shutdown controller is one-shot.
            LifecycleState::Stopped => {
                anyhow::bail!("server was stopped and cannot be reconfigured")
            }
            LifecycleState::Unconfigured | LifecycleState::Configured => {}
        }
        let config = ServerConfig::from_properties(properties)?;
        debug!(
            address = %config.bind_address(),
            max_frame_bytes = config.max_frame_bytes(),
            max_read_chunk_bytes = config.max_read_chunk_bytes(),
            worker_threads = config.worker_threads,
            "server configured"
        );
        *self.pool.write() = Some(WorkerPool::new(config.worker_threads));
        *self.config.write() = Some(Arc::new(config));
        self.state.set(LifecycleState::Configured);
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<ComponentHandle> {
        let config = self.config().context("server started before setup")?;
        let pool = self
            .pool
            .read()
            .clone()
            .context("server started before setup")?;

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        let local = listener.local_addr()?;
        info!(address = %local, backend = %IoBackend::detect(), "server listening");

        let context = ConnectionContext {
            dispatcher: Arc::clone(&self.dispatcher),
            pool,
            max_frame_bytes: config.max_frame_bytes(),
            max_read_chunk_bytes: config.max_read_chunk_bytes(),
        };
        // Subscribe before spawning so a stop issued right after start is seen.
        let stop = self.shutdown.stop_receiver();
        let task = tokio::spawn(accept_loop(
            listener,
            context,
            Arc::clone(&self.shutdown),
            stop,
        ));

        *self.accept_task.lock() = Some(task);
        *self.local_addr.write() = Some(local);
        self.shutdown.set_ready();
        self.state.set(LifecycleState::Started);
        Ok(ComponentHandle::Bound(local))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if self.state.get() != LifecycleState::Started {
            self.state.set(LifecycleState::Stopped);
            return Ok(());
        }

        info!("server stopping");
        self.shutdown.trigger_shutdown();

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }

        let timeout = self
            .config()
            .map_or_else(|| ServerConfig::default().drain_timeout, |c| c.drain_timeout);
        if self.shutdown.wait_for_drain(timeout).await {
            info!("all connections drained");
        } else {
            warn!(
                open = self.shutdown.open_connections(),
                "drain timeout expired with connections still open"
            );
        }

        if let Some(pool) = self.pool.read().as_ref() {
            pool.close();
        }
        self.state.set(LifecycleState::Stopped);
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: ConnectionContext,
    shutdown: Arc<ShutdownController>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = stopped(&mut stop) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                let guard = shutdown.connection_guard();
                tokio::spawn(run_tcp_connection(
                    stream,
                    peer,
                    context.clone(),
                    shutdown.stop_receiver(),
                    guard,
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                if pause_after_accept_error(&mut stop).await {
                    break;
                }
            }
        }
    }
    debug!("accept loop stopped");
}

/// Waits out the accept backoff. Returns `true` if a stop arrived meanwhile.
async fn pause_after_accept_error(stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        () = stopped(stop) => true,
        () = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => false,
    }
}
