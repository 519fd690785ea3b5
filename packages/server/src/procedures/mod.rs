//! Built-in procedures: hashing, secure random values and key agreement.
//!
//! All of them run their bodies on the worker pool.

pub mod hash;
pub mod key_exchange;
pub mod random;

pub use hash::Sha256Hash;
pub use key_exchange::ExchangeKey;
pub use random::{SecretKey, SecureRandomNumber};

use waiter_core::{CoreError, Node, ProcedureRef};

/// Identifier of the node the built-in procedures are mounted under.
pub const SECURITY_NODE: &str = "security";

/// Every built-in procedure.
///
/// # Errors
///
/// Propagates a rejected procedure identifier.
pub fn builtin() -> Result<Vec<ProcedureRef>, CoreError> {
    Ok(vec![
        ProcedureRef::asynchronous(Sha256Hash::new()?),
        ProcedureRef::asynchronous(SecureRandomNumber::new()?),
        ProcedureRef::asynchronous(SecretKey::new()?),
        ProcedureRef::asynchronous(ExchangeKey::new()?),
    ])
}

/// Creates the `security` node holding every built-in procedure and
/// attaches it, active, under `parent`.
///
/// # Errors
///
/// Propagates the attach failure, e.g. when an ancestor is already named
/// `security`.
pub fn mount(parent: &Node) -> Result<Node, CoreError> {
    let security = parent.arena().create_node(SECURITY_NODE)?;
    for procedure in builtin()? {
        security.add_active_procedure(procedure);
    }
    parent.add_active_node(&security)?;
    Ok(security)
}
