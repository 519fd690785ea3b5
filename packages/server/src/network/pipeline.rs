//! Per-frame processing and the two-stage fault handling.
//!
//! Every stage returns a [`Fault`] instead of unwinding. Structured faults
//! are answered with their own error envelope; everything else falls
//! through to the terminal handler.

use rmpv::Value;
use tracing::{debug, error};
use waiter_core::{decode_message, Envelope, Error, ProcedureError, Reason, WorkerPool};

use super::codec::FrameError;
use crate::traits::Dispatch;

/// A failure somewhere in the pipeline.
#[derive(Debug)]
pub enum Fault {
    /// A structured error with a stable code.
    Logic(&'static Error),
    /// Anything else.
    Unexpected(anyhow::Error),
}

impl From<ProcedureError> for Fault {
    fn from(e: ProcedureError) -> Self {
        match e {
            ProcedureError::Logic(error) => Fault::Logic(error),
            ProcedureError::Unexpected(e) => Fault::Unexpected(e),
        }
    }
}

impl From<FrameError> for Fault {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::TooLarge { .. } => Fault::Logic(Reason::InvalidMessageFormat.error()),
            other => Fault::Unexpected(other.into()),
        }
    }
}

/// Decodes one frame and dispatches it.
///
/// # Errors
///
/// `Fault::Logic` for malformed frames and routing or procedure errors,
/// `Fault::Unexpected` for anything else the dispatcher reports.
pub async fn process_frame(
    frame: &[u8],
    dispatcher: &dyn Dispatch,
    pool: &WorkerPool,
) -> Result<Option<Value>, Fault> {
    let message = decode_message(frame).map_err(Fault::Logic)?;
    Ok(dispatcher.dispatch(pool, message).await?)
}

/// Builds the envelope sent before the connection is closed.
#[must_use]
pub fn handle_fault(fault: Fault) -> Envelope {
    match fault {
        Fault::Logic(error) => {
            debug!(code = error.code(), "request rejected");
            Envelope::failure(error)
        }
        Fault::Unexpected(e) => terminal(&e),
    }
}

fn terminal(e: &anyhow::Error) -> Envelope {
    error!(error = %e, "unexpected failure while handling request");
    Envelope::failure(Reason::InternalServerError.error())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    enum Fixed {
        Returns(Option<Value>),
        NotFound,
        Broken,
    }

    #[async_trait]
    impl Dispatch for Fixed {
        async fn dispatch(
            &self,
            _pool: &WorkerPool,
            _message: Value,
        ) -> Result<Option<Value>, ProcedureError> {
            match self {
                Fixed::Returns(value) => Ok(value.clone()),
                Fixed::NotFound => Err(ProcedureError::Logic(Reason::ResourceNotFound.error())),
                Fixed::Broken => Err(ProcedureError::Unexpected(anyhow::anyhow!("boom"))),
            }
        }
    }

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    fn empty_map() -> Vec<u8> {
        encode(&Value::Map(Vec::new()))
    }

    #[tokio::test]
    async fn valid_frame_reaches_dispatcher() {
        let pool = WorkerPool::new(1);
        let dispatcher = Fixed::Returns(Some(Value::from(1)));
        let result = process_frame(&empty_map(), &dispatcher, &pool).await.unwrap();
        assert_eq!(result, Some(Value::from(1)));
    }

    #[tokio::test]
    async fn non_map_frame_is_invalid_format() {
        let pool = WorkerPool::new(1);
        let dispatcher = Fixed::Returns(None);
        let fault = process_frame(&encode(&Value::from("hi")), &dispatcher, &pool)
            .await
            .unwrap_err();
        assert!(matches!(fault, Fault::Logic(e) if e.code() == "invalid.message.format"));
    }

    #[tokio::test]
    async fn dispatcher_errors_keep_their_class() {
        let pool = WorkerPool::new(1);

        let fault = process_frame(&empty_map(), &Fixed::NotFound, &pool).await.unwrap_err();
        assert!(matches!(fault, Fault::Logic(e) if e.code() == "resource.not.found"));

        let fault = process_frame(&empty_map(), &Fixed::Broken, &pool).await.unwrap_err();
        assert!(matches!(fault, Fault::Unexpected(_)));
    }

    #[test]
    fn logic_fault_is_reported_as_is() {
        let envelope = handle_fault(Fault::Logic(Reason::ResourceNotFound.error()));
        assert!(!envelope.success);
        assert_eq!(envelope.errors[0].code, "resource.not.found");
    }

    #[test]
    fn unexpected_fault_is_internal_server_error() {
        let envelope = handle_fault(Fault::Unexpected(anyhow::anyhow!("database on fire")));
        assert_eq!(envelope.errors[0].code, "internal.server.error");
        assert_eq!(envelope.errors[0].message, "Internal server error.");
    }

    #[test]
    fn oversized_frame_is_invalid_format() {
        let fault = Fault::from(FrameError::TooLarge { len: 10, max: 1 });
        assert!(matches!(fault, Fault::Logic(e) if e.code() == "invalid.message.format"));

        let fault = Fault::from(FrameError::Io(std::io::ErrorKind::BrokenPipe.into()));
        assert!(matches!(fault, Fault::Unexpected(_)));
    }
}
