//! Procedures: named, invocable units of server-side logic.
//!
//! A procedure is either synchronous ([`Procedure`]) or bound to a worker
//! pool ([`AsyncProcedure`]). Both take and return self-describing
//! `rmpv::Value`s so a router can feed them decoded request payloads
//! directly. [`ProcedureRef`] erases the difference for the node registry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rmpv::Value;

use crate::error::{CoreError, Error};
use crate::identity::{Identified, Identity};
use crate::worker::WorkerPool;

// ---------------------------------------------------------------------------
// ProcedureError
// ---------------------------------------------------------------------------

/// Failure of a procedure invocation.
#[derive(Debug, thiserror::Error)]
pub enum ProcedureError {
    /// A domain error with a stable code, reported to the peer as-is.
    #[error("{0}")]
    Logic(&'static Error),
    /// Anything else. Reported to the peer as an internal server error.
    #[error("unexpected procedure failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Procedure traits
// ---------------------------------------------------------------------------

/// A synchronous procedure.
///
/// The default invocation returns an empty result and never fails, so an
/// implementation that only provides an identity is a safe placeholder.
pub trait Procedure: Identified + Send + Sync {
    /// Invokes the procedure on the calling thread.
    ///
    /// # Errors
    ///
    /// Implementations return `ProcedureError::Logic` for domain errors.
    fn apply(&self, _input: Value) -> Result<Option<Value>, ProcedureError> {
        Ok(None)
    }
}

/// A procedure whose body runs on an explicit worker pool.
///
/// The default invocation resolves to an empty result. An implementation
/// fails only if the work it submits fails.
#[async_trait]
pub trait AsyncProcedure: Identified + Send + Sync {
    /// Invokes the procedure, running its body on `pool`.
    ///
    /// # Errors
    ///
    /// Implementations return `ProcedureError::Logic` for domain errors and
    /// `ProcedureError::Unexpected` when the submitted work fails.
    async fn apply(
        &self,
        _pool: &WorkerPool,
        _input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Placeholder
// ---------------------------------------------------------------------------

/// A procedure that only has an identity.
///
/// Implements both traits with the default, empty-result behavior.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    identity: Identity,
}

impl Placeholder {
    /// Creates a placeholder procedure.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is empty.
    pub fn new(identifier: impl AsRef<str>) -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(identifier)?,
        })
    }
}

impl Identified for Placeholder {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

impl Procedure for Placeholder {}

#[async_trait]
impl AsyncProcedure for Placeholder {}

// ---------------------------------------------------------------------------
// ProcedureRef
// ---------------------------------------------------------------------------

/// A registered procedure of either kind.
///
/// Equality and hashing delegate to the identity.
#[derive(Clone)]
pub enum ProcedureRef {
    Sync(Arc<dyn Procedure>),
    Async(Arc<dyn AsyncProcedure>),
}

impl ProcedureRef {
    /// Wraps a synchronous procedure.
    pub fn sync(procedure: impl Procedure + 'static) -> Self {
        Self::Sync(Arc::new(procedure))
    }

    /// Wraps a pool-bound procedure.
    pub fn asynchronous(procedure: impl AsyncProcedure + 'static) -> Self {
        Self::Async(Arc::new(procedure))
    }

    /// Returns `true` if the procedure runs on the worker pool.
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Invokes the procedure.
    ///
    /// Synchronous procedures run inline; asynchronous ones are given `pool`.
    ///
    /// # Errors
    ///
    /// Propagates the procedure's own error.
    pub async fn invoke(
        &self,
        pool: &WorkerPool,
        input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        match self {
            Self::Sync(procedure) => procedure.apply(input),
            Self::Async(procedure) => procedure.apply(pool, input).await,
        }
    }
}

impl Identified for ProcedureRef {
    fn identity(&self) -> &Identity {
        match self {
            Self::Sync(procedure) => procedure.identity(),
            Self::Async(procedure) => procedure.identity(),
        }
    }
}

impl PartialEq for ProcedureRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ProcedureRef {}

impl std::hash::Hash for ProcedureRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ProcedureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_async() { "async" } else { "sync" };
        f.debug_struct("ProcedureRef")
            .field("identity", self.identity())
            .field("kind", &kind)
            .finish()
    }
}
