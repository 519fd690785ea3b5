//! waiter - RPC server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use waiter_core::Node;
use waiter_server::config::{HOST_KEY, PORT_KEY};
use waiter_server::lifecycle::shutdown_signal;
use waiter_server::{procedures, Application, Declaration, Properties, Server, TreeRouter};

/// Identifier of the root of the procedure tree.
const ROOT_NODE: &str = "waiter";

#[derive(Debug, Parser)]
#[command(name = "waiter", version, about = "Framed MessagePack RPC server")]
struct Cli {
    /// Properties file with `server.*` settings.
    #[arg(long, env = "WAITER_PROPERTIES")]
    properties: Option<PathBuf>,

    /// Overrides `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let properties = load_properties(&cli)?;

    let root = Node::root(ROOT_NODE)?;
    procedures::mount(&root)?;
    let router = Arc::new(TreeRouter::new(root));
    let server = Arc::new(Server::new(router)?);

    let app = Application::builder()
        .properties(properties)
        .component(Declaration::new(server).start_priority(0).stop_priority(0))
        .build();

    info!(version = env!("CARGO_PKG_VERSION"), "starting waiter");
    app.run(shutdown_signal()).await?;
    info!("waiter stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn load_properties(cli: &Cli) -> Result<Properties> {
    let mut properties = Properties::new();
    if let Some(path) = &cli.properties {
        let loaded = Properties::load(path)
            .with_context(|| format!("failed to load properties from {}", path.display()))?;
        properties.merge(loaded);
    }
    if let Some(host) = &cli.host {
        properties.set(HOST_KEY, host.clone());
    }
    if let Some(port) = cli.port {
        properties.set(PORT_KEY, port.to_string());
    }
    Ok(properties)
}
