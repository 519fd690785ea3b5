//! Waiter core: identities, the procedure dispatch tree, the worker pool,
//! and wire envelopes.

pub mod error;
pub mod identity;
pub mod node;
pub mod procedure;
pub mod wire;
pub mod worker;

pub use error::{CoreError, Error, Reason};
pub use identity::{Identified, Identity};
pub use node::{Node, NodeArena, NodeId};
pub use procedure::{AsyncProcedure, Placeholder, Procedure, ProcedureError, ProcedureRef};
pub use wire::{decode_message, map_get, Envelope, EnvelopeError, ErrorEntry, FRAME_DELIMITER};
pub use worker::WorkerPool;
