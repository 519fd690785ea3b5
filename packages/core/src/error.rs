//! Error types shared by the dispatch tree and the wire protocol.
//!
//! Two families live here:
//!
//! - [`CoreError`]: contract and structural violations raised by the
//!   identity and node APIs. These never reach the wire.
//! - [`Error`] / [`Reason`]: the closed set of structured errors that are
//!   serialized into the error envelope and sent to the peer.

use std::fmt;

// ---------------------------------------------------------------------------
// CoreError
// ---------------------------------------------------------------------------

/// Errors raised by the registry APIs.
///
/// Every variant is raised before any state is mutated, so a failed call
/// leaves the tree exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A caller passed an argument that breaks the API contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Inserting the node would repeat an identifier along a path.
    #[error("node '{identifier}' violates path uniqueness on nodes network")]
    PathUniqueness { identifier: String },
    /// The node is already a child of another node.
    #[error("node '{identifier}' is already attached to a parent")]
    AlreadyAttached { identifier: String },
    /// The node handle belongs to a different arena.
    #[error("node '{identifier}' belongs to a different arena")]
    ForeignNode { identifier: String },
}

// ---------------------------------------------------------------------------
// Error + Reason
// ---------------------------------------------------------------------------

/// A structured error that is sent back to the peer.
///
/// Instances are only obtained through [`Reason::error`], which hands out
/// the single static instance for each reason.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Error {
    code: &'static str,
    message: &'static str,
}

impl Error {
    const fn new(code: &'static str, message: &'static str) -> Self {
        Self { code, message }
    }

    /// Stable machine-readable code, e.g. `"resource.not.found"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Looks up the error whose code matches, if it belongs to the closed set.
    #[must_use]
    pub fn from_code(code: &str) -> Option<&'static Error> {
        Reason::ALL
            .iter()
            .map(|reason| reason.error())
            .find(|error| error.code == code)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for Error {}

static INTERNAL_SERVER_ERROR: Error =
    Error::new("internal.server.error", "Internal server error.");
static RESOURCE_NOT_FOUND: Error =
    Error::new("resource.not.found", "The requested resource not found.");
static INVALID_MESSAGE_FORMAT: Error =
    Error::new("invalid.message.format", "Invalid message format.");
static INVALID_ARGUMENTS: Error =
    Error::new("invalid.arguments", "Invalid procedure arguments.");

/// The closed set of reasons a request can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    InternalServerError,
    ResourceNotFound,
    InvalidMessageFormat,
    InvalidArguments,
}

impl Reason {
    /// Every reason, in declaration order.
    pub const ALL: [Reason; 4] = [
        Reason::InternalServerError,
        Reason::ResourceNotFound,
        Reason::InvalidMessageFormat,
        Reason::InvalidArguments,
    ];

    /// Returns the shared error instance for this reason.
    #[must_use]
    pub fn error(self) -> &'static Error {
        match self {
            Reason::InternalServerError => &INTERNAL_SERVER_ERROR,
            Reason::ResourceNotFound => &RESOURCE_NOT_FOUND,
            Reason::InvalidMessageFormat => &INVALID_MESSAGE_FORMAT,
            Reason::InvalidArguments => &INVALID_ARGUMENTS,
        }
    }
}
