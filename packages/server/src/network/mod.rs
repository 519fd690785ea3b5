//! Socket transport: delimiter framing, the per-connection request loop,
//! graceful shutdown and the server component.

pub mod backend;
pub mod chunked;
pub mod codec;
pub mod connection;
pub mod pipeline;
pub mod server;
pub mod shutdown;

pub use backend::IoBackend;
pub use chunked::ChunkedReader;
pub use codec::{FrameCodec, FrameError};
pub use connection::{run_tcp_connection, serve_connection, CloseReason, ConnectionContext};
pub use pipeline::{handle_fault, process_frame, Fault};
pub use server::{Server, SERVER_IDENTIFIER};
pub use shutdown::{ConnectionGuard, HealthState, ShutdownController};
