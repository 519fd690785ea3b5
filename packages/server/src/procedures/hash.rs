use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rmpv::Value;
use sha2::{Digest, Sha256};
use waiter_core::{
    AsyncProcedure, CoreError, Identified, Identity, ProcedureError, Reason, WorkerPool,
};

pub const SHA256_HASH: &str = "generate_SHA256_hash";

/// Hashes the input bytes with SHA-256 and returns the digest as base64
/// text. Strings are hashed as their UTF-8 bytes.
#[derive(Debug, Clone)]
pub struct Sha256Hash {
    identity: Identity,
}

impl Sha256Hash {
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is rejected.
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(SHA256_HASH)?,
        })
    }
}

impl Identified for Sha256Hash {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl AsyncProcedure for Sha256Hash {
    async fn apply(
        &self,
        pool: &WorkerPool,
        input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        let bytes = match input {
            Value::Binary(bytes) => bytes,
            Value::String(text) => text.into_bytes(),
            _ => return Err(ProcedureError::Logic(Reason::InvalidArguments.error())),
        };
        pool.run(move || {
            let digest = Sha256::digest(&bytes);
            Ok(Some(Value::from(BASE64_STANDARD.encode(digest))))
        })
        .await
    }
}
