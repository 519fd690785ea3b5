use std::ops::RangeInclusive;

use async_trait::async_trait;
use rand::{Rng, RngCore};
use rmpv::Value;
use waiter_core::{
    map_get, AsyncProcedure, CoreError, Identified, Identity, ProcedureError, Reason, WorkerPool,
};

pub const SECURE_RANDOM_NUMBER: &str = "generate_secure_random_number";
pub const SECRET_KEY: &str = "generate_secret_key";

/// Six-digit range of generated numbers.
pub const RANDOM_NUMBER_RANGE: RangeInclusive<u32> = 111_111..=999_999;

/// Returns a uniformly distributed six-digit number from a CSPRNG. The
/// input is ignored.
#[derive(Debug, Clone)]
pub struct SecureRandomNumber {
    identity: Identity,
}

impl SecureRandomNumber {
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is rejected.
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(SECURE_RANDOM_NUMBER)?,
        })
    }
}

impl Identified for SecureRandomNumber {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl AsyncProcedure for SecureRandomNumber {
    async fn apply(
        &self,
        pool: &WorkerPool,
        _input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        pool.run(|| {
            let n = rand::rng().random_range(RANDOM_NUMBER_RANGE);
            Ok(Some(Value::from(n)))
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// SecretKey
// ---------------------------------------------------------------------------

/// Generates a random symmetric key.
///
/// Input is nil or a map with an optional `key_size` in bits: 128, 192 or
/// 256 (default). The key is returned as binary.
#[derive(Debug, Clone)]
pub struct SecretKey {
    identity: Identity,
}

impl SecretKey {
    pub const DEFAULT_BITS: u64 = 256;

    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is rejected.
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(SECRET_KEY)?,
        })
    }

    fn key_len(input: &Value) -> Result<usize, ProcedureError> {
        let invalid = || ProcedureError::Logic(Reason::InvalidArguments.error());
        let bits = match input {
            Value::Nil => Self::DEFAULT_BITS,
            Value::Map(_) => match map_get(input, "key_size") {
                None | Some(Value::Nil) => Self::DEFAULT_BITS,
                Some(size) => size.as_u64().ok_or_else(invalid)?,
            },
            _ => return Err(invalid()),
        };
        match bits {
            128 => Ok(16),
            192 => Ok(24),
            256 => Ok(32),
            _ => Err(invalid()),
        }
    }
}

impl Identified for SecretKey {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

#[async_trait]
impl AsyncProcedure for SecretKey {
    async fn apply(
        &self,
        pool: &WorkerPool,
        input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        let len = Self::key_len(&input)?;
        pool.run(move || {
            let mut key = vec![0u8; len];
            rand::rng().fill_bytes(&mut key);
            Ok(Some(Value::Binary(key)))
        })
        .await
    }
}
