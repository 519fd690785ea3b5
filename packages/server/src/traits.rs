use async_trait::async_trait;
use rmpv::Value;
use waiter_core::{ProcedureError, WorkerPool};

/// Turns one decoded request map into a procedure result.
///
/// The connection pipeline calls this once per frame, in arrival order.
/// Implementations return `ProcedureError::Logic` for anything the peer
/// should hear about, which ends the connection after the error envelope
/// is written.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        pool: &WorkerPool,
        message: Value,
    ) -> Result<Option<Value>, ProcedureError>;
}
