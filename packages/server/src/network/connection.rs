//! Per-connection request loop.
//!
//! One task per accepted socket. Frames are handled strictly in arrival
//! order: the next frame is not read until the previous response has been
//! flushed. A success keeps the connection open; any fault is answered with
//! an error envelope and then the connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};
use waiter_core::{Envelope, WorkerPool};

use super::chunked::ChunkedReader;
use super::codec::{FrameCodec, FrameError};
use super::pipeline::{handle_fault, process_frame, Fault};
use super::shutdown::ConnectionGuard;
use crate::traits::Dispatch;

/// Everything a connection task needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub dispatcher: Arc<dyn Dispatch>,
    pub pool: WorkerPool,
    pub max_frame_bytes: usize,
    pub max_read_chunk_bytes: usize,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    PeerClosed,
    /// A fault was answered with an error envelope.
    Fault,
    /// The server is stopping.
    Shutdown,
}

/// Serves one connection until the peer leaves, a fault occurs, or the
/// server stops.
///
/// # Errors
///
/// Returns a `FrameError` if writing a response fails.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: W,
    context: ConnectionContext,
    mut stop: watch::Receiver<bool>,
) -> Result<CloseReason, FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut frames = FramedRead::new(
        ChunkedReader::new(reader, context.max_read_chunk_bytes),
        FrameCodec::new(context.max_frame_bytes),
    );
    let mut responses = FramedWrite::new(writer, FrameCodec::new(context.max_frame_bytes));

    loop {
        let next = tokio::select! {
            biased;
            () = stopped(&mut stop) => return Ok(CloseReason::Shutdown),
            next = frames.next() => next,
        };

        let fault = match next {
            None => return Ok(CloseReason::PeerClosed),
            Some(Err(e)) => Fault::from(e),
            Some(Ok(frame)) => {
                match process_frame(&frame, context.dispatcher.as_ref(), &context.pool).await {
                    Ok(data) => {
                        responses.send(Envelope::success(data)).await?;
                        continue;
                    }
                    Err(fault) => fault,
                }
            }
        };

        responses.send(handle_fault(fault)).await?;
        return Ok(CloseReason::Fault);
    }
}

pub(super) async fn stopped(stop: &mut watch::Receiver<bool>) {
    // A dropped sender means the server is gone; treat it as a stop.
    let _ = stop.wait_for(|stopping| *stopping).await;
}

/// Runs [`serve_connection`] on a TCP stream and logs the outcome. The
/// guard is held until the socket is closed.
pub async fn run_tcp_connection(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    context: ConnectionContext,
    stop: watch::Receiver<bool>,
    guard: ConnectionGuard,
) {
    debug!(%peer, "connection accepted");
    let (reader, writer) = stream.into_split();
    match serve_connection(reader, writer, context, stop).await {
        Ok(reason) => debug!(%peer, ?reason, "connection closed"),
        Err(e) => info!(%peer, error = %e, "connection closed on write failure"),
    }
    drop(guard);
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rmpv::Value;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use waiter_core::{map_get, ProcedureError, Reason, FRAME_DELIMITER};

    use super::*;

    /// Echoes the "args" entry back, or fails for "proc" = "missing".
    struct EchoArgs;

    #[async_trait]
    impl Dispatch for EchoArgs {
        async fn dispatch(
            &self,
            _pool: &WorkerPool,
            message: Value,
        ) -> Result<Option<Value>, ProcedureError> {
            if map_get(&message, "proc").and_then(Value::as_str) == Some("missing") {
                return Err(ProcedureError::Logic(Reason::ResourceNotFound.error()));
            }
            Ok(map_get(&message, "args").cloned())
        }
    }

    fn context(max_frame_bytes: usize) -> ConnectionContext {
        ConnectionContext {
            dispatcher: Arc::new(EchoArgs),
            pool: WorkerPool::new(1),
            max_frame_bytes,
            max_read_chunk_bytes: 16,
        }
    }

    fn request(procedure: &str, args: Value) -> Vec<u8> {
        let message = Value::Map(vec![
            (Value::from("proc"), Value::from(procedure)),
            (Value::from("args"), args),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &message).unwrap();
        bytes.extend_from_slice(&FRAME_DELIMITER);
        bytes
    }

    fn split_envelopes(mut bytes: &[u8]) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(at) = bytes
            .windows(FRAME_DELIMITER.len())
            .position(|w| w == FRAME_DELIMITER)
        {
            envelopes.push(Envelope::decode(&bytes[..at]).unwrap());
            bytes = &bytes[at + FRAME_DELIMITER.len()..];
        }
        envelopes
    }

    async fn exchange(input: Vec<u8>, context: ConnectionContext) -> (CloseReason, Vec<Envelope>) {
        let (mut client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (_stop_tx, stop_rx) = watch::channel(false);

        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();

        let reason = serve_connection(server_read, server_write, context, stop_rx)
            .await
            .unwrap();

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        (reason, split_envelopes(&output))
    }

    #[tokio::test]
    async fn successes_keep_connection_open_in_order() {
        let mut input = request("echo", Value::from(1));
        input.extend(request("echo", Value::from(2)));

        let (reason, envelopes) = exchange(input, context(1024)).await;

        assert_eq!(reason, CloseReason::PeerClosed);
        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].data, Some(Value::from(1)));
        assert_eq!(envelopes[1].data, Some(Value::from(2)));
        assert!(envelopes.iter().all(|e| e.success));
    }

    #[tokio::test]
    async fn logic_error_is_answered_then_closed() {
        let mut input = request("missing", Value::Nil);
        input.extend(request("echo", Value::from(1)));

        let (reason, envelopes) = exchange(input, context(1024)).await;

        assert_eq!(reason, CloseReason::Fault);
        assert_eq!(envelopes.len(), 1);
        assert!(!envelopes[0].success);
        assert_eq!(envelopes[0].errors[0].code, "resource.not.found");
    }

    #[tokio::test]
    async fn non_map_frame_is_invalid_format() {
        let mut input = Vec::new();
        rmpv::encode::write_value(&mut input, &Value::from(42)).unwrap();
        input.extend_from_slice(&FRAME_DELIMITER);

        let (reason, envelopes) = exchange(input, context(1024)).await;

        assert_eq!(reason, CloseReason::Fault);
        assert_eq!(envelopes[0].errors[0].code, "invalid.message.format");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_decoding() {
        let input = request("echo", Value::Binary(vec![0; 256]));

        let (reason, envelopes) = exchange(input, context(64)).await;

        assert_eq!(reason, CloseReason::Fault);
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].errors[0].code, "invalid.message.format");
    }

    #[tokio::test]
    async fn stop_signal_ends_idle_connection() {
        let (_client, server) = duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(serve_connection(
            server_read,
            server_write,
            context(1024),
            stop_rx,
        ));
        stop_tx.send_replace(true);

        assert_eq!(task.await.unwrap().unwrap(), CloseReason::Shutdown);
    }
}
