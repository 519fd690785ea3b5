//! Waiter server: configuration, the component lifecycle, the socket
//! transport and the tree router with its built-in procedures.

pub mod config;
pub mod lifecycle;
pub mod network;
pub mod procedures;
pub mod router;
pub mod traits;

pub use config::{ConfigError, Properties, ServerConfig};
pub use lifecycle::{Application, Component, ComponentHandle, Context, Declaration, LifecycleState};
pub use network::Server;
pub use router::{Request, TreeRouter};
pub use traits::Dispatch;
