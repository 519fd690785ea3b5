//! Request routing over the node tree.
//!
//! A request is a map of the form
//! `{"node": [<segment>, ...], "proc": <identifier>, "args": <value>}`.
//! `node` is the path of active child nodes below the root (absent or empty
//! means the root itself); `proc` names an active procedure on the final
//! node; `args` is passed to the procedure unchanged (nil when absent).

use async_trait::async_trait;
use rmpv::Value;
use tracing::debug;
use waiter_core::{Node, ProcedureError, ProcedureRef, Reason, WorkerPool};

use crate::traits::Dispatch;

/// A parsed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub path: Vec<String>,
    pub procedure: String,
    pub args: Value,
}

impl Request {
    /// Extracts a request from a decoded message map.
    ///
    /// # Errors
    ///
    /// `ProcedureError::Logic` with `invalid.message.format` if `proc` is
    /// missing or not a string, or `node` is not an array of strings.
    pub fn from_message(message: Value) -> Result<Self, ProcedureError> {
        let invalid = || ProcedureError::Logic(Reason::InvalidMessageFormat.error());
        let Value::Map(entries) = message else {
            return Err(invalid());
        };

        let mut path = Vec::new();
        let mut procedure = None;
        let mut args = Value::Nil;
        for (key, value) in entries {
            match key.as_str() {
                Some("node") => {
                    let Value::Array(segments) = value else {
                        return Err(invalid());
                    };
                    path = segments
                        .into_iter()
                        .map(|segment| segment.as_str().map(str::to_string).ok_or_else(invalid))
                        .collect::<Result<_, _>>()?;
                }
                Some("proc") => {
                    procedure = Some(value.as_str().ok_or_else(invalid)?.to_string());
                }
                Some("args") => args = value,
                _ => {}
            }
        }

        Ok(Self {
            path,
            procedure: procedure.ok_or_else(invalid)?,
            args,
        })
    }
}

/// Dispatches requests by walking active nodes from a root.
#[derive(Debug, Clone)]
pub struct TreeRouter {
    root: Node,
}

impl TreeRouter {
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Finds the active procedure at `path`, if every segment and the
    /// procedure are registered as active.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, path: &[S], procedure: &str) -> Option<ProcedureRef> {
        let mut node = self.root.clone();
        for segment in path {
            node = node.get_node(segment.as_ref(), true)?;
        }
        node.get_procedure(procedure, true)
    }
}

#[async_trait]
impl Dispatch for TreeRouter {
    async fn dispatch(
        &self,
        pool: &WorkerPool,
        message: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        let request = Request::from_message(message)?;
        let Some(procedure) = self.resolve(&request.path, &request.procedure) else {
            debug!(path = ?request.path, procedure = %request.procedure, "no such procedure");
            return Err(ProcedureError::Logic(Reason::ResourceNotFound.error()));
        };
        procedure.invoke(pool, request.args).await
    }
}
