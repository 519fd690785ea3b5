//! Key agreement with the peer.
//!
//! The peer sends its public key; the server generates its own key pair,
//! derives the shared secret and returns both halves of its pair together
//! with the secret. The peer derives the same secret from the returned
//! public key.
//!
//! X25519 fixes the key size at 256 bits. A request may state `key_size`,
//! but any value other than 256 is rejected rather than ignored.

use async_trait::async_trait;
use rand::RngCore;
use rmpv::Value;
use serde::{Deserialize, Serialize};
use waiter_core::{
    AsyncProcedure, CoreError, Identified, Identity, ProcedureError, Reason, WorkerPool,
};
use x25519_dalek::{PublicKey, StaticSecret};

pub const EXCHANGE_KEY: &str = "exchange_key";
pub const X25519: &str = "X25519";

/// Key size of the only supported curve, in bits.
pub const X25519_KEY_BITS: u32 = 256;

const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(default)]
    pub key_size: Option<u32>,
}

fn default_algorithm() -> String {
    X25519.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    #[serde(with = "serde_bytes")]
    pub private_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub secret_key: Vec<u8>,
}

/// Agrees on a shared secret with the peer over X25519.
///
/// The key size is fixed by the curve; see [`X25519_KEY_BITS`].
#[derive(Debug, Clone)]
pub struct ExchangeKey {
    identity: Identity,
}

impl ExchangeKey {
    /// # Errors
    ///
    /// Returns `CoreError::InvalidArgument` if the identifier is rejected.
    pub fn new() -> Result<Self, CoreError> {
        Ok(Self {
            identity: Identity::new(EXCHANGE_KEY)?,
        })
    }
}

impl Identified for ExchangeKey {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

fn invalid_arguments() -> ProcedureError {
    ProcedureError::Logic(Reason::InvalidArguments.error())
}

fn exchange(request: &KeyExchangeRequest) -> Result<KeyExchangeResponse, ProcedureError> {
    let peer: [u8; KEY_LEN] = request
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| invalid_arguments())?;

    let mut seed = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut seed);
    let secret = StaticSecret::from(seed);
    let public = PublicKey::from(&secret);

    let shared = secret.diffie_hellman(&PublicKey::from(peer));
    if !shared.was_contributory() {
        return Err(invalid_arguments());
    }

    Ok(KeyExchangeResponse {
        private_key: secret.to_bytes().to_vec(),
        public_key: public.as_bytes().to_vec(),
        secret_key: shared.as_bytes().to_vec(),
    })
}

#[async_trait]
impl AsyncProcedure for ExchangeKey {
    async fn apply(
        &self,
        pool: &WorkerPool,
        input: Value,
    ) -> Result<Option<Value>, ProcedureError> {
        let request: KeyExchangeRequest =
            rmpv::ext::from_value(input).map_err(|_| invalid_arguments())?;
        if request.algorithm != X25519 {
            return Err(invalid_arguments());
        }
        if request.key_size.is_some_and(|bits| bits != X25519_KEY_BITS) {
            return Err(invalid_arguments());
        }

        let response = pool.run(move || exchange(&request)).await?;
        let value = rmpv::ext::to_value(response).map_err(anyhow::Error::from)?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_value(algorithm: Option<&str>, public_key: &[u8]) -> Value {
        let mut entries = vec![(Value::from("public_key"), Value::Binary(public_key.to_vec()))];
        if let Some(algorithm) = algorithm {
            entries.push((Value::from("algorithm"), Value::from(algorithm)));
        }
        Value::Map(entries)
    }

    #[tokio::test]
    async fn both_parties_derive_the_same_secret() {
        // Alice generates her pair and sends the public half.
        let mut seed = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut seed);
        let alice_secret = StaticSecret::from(seed);
        let alice_public = PublicKey::from(&alice_secret);

        // The server answers as Bob.
        let pool = WorkerPool::new(1);
        let value = ExchangeKey::new()
            .unwrap()
            .apply(&pool, request_value(Some("X25519"), alice_public.as_bytes()))
            .await
            .unwrap()
            .unwrap();
        let bob: KeyExchangeResponse = rmpv::ext::from_value(value).unwrap();

        // Alice finishes the agreement with Bob's public key.
        let bob_public: [u8; KEY_LEN] = bob.public_key.as_slice().try_into().unwrap();
        let alice_shared = alice_secret.diffie_hellman(&PublicKey::from(bob_public));

        assert_eq!(alice_shared.as_bytes().as_slice(), bob.secret_key.as_slice());

        // Bob's private half matches his public half.
        let bob_private: [u8; KEY_LEN] = bob.private_key.as_slice().try_into().unwrap();
        let derived = PublicKey::from(&StaticSecret::from(bob_private));
        assert_eq!(derived.as_bytes().as_slice(), bob.public_key.as_slice());
    }

    #[tokio::test]
    async fn algorithm_defaults_to_x25519() {
        let peer = PublicKey::from(&StaticSecret::from([7u8; KEY_LEN]));
        let pool = WorkerPool::new(1);
        let result = ExchangeKey::new()
            .unwrap()
            .apply(&pool, request_value(None, peer.as_bytes()))
            .await
            .unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn key_size_must_match_the_curve() {
        let peer = PublicKey::from(&StaticSecret::from([7u8; KEY_LEN]));
        let pool = WorkerPool::new(1);
        let procedure = ExchangeKey::new().unwrap();
        let with_size = |bits: u32| {
            Value::Map(vec![
                (Value::from("public_key"), Value::Binary(peer.as_bytes().to_vec())),
                (Value::from("key_size"), Value::from(bits)),
            ])
        };

        let accepted = procedure.apply(&pool, with_size(256)).await.unwrap();
        assert!(accepted.is_some());

        let err = procedure.apply(&pool, with_size(128)).await.unwrap_err();
        assert!(matches!(err, ProcedureError::Logic(e) if e.code() == "invalid.arguments"));
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let peer = PublicKey::from(&StaticSecret::from([7u8; KEY_LEN]));
        let pool = WorkerPool::new(1);
        let procedure = ExchangeKey::new().unwrap();
        for input in [
            request_value(Some("DiffieHellman"), peer.as_bytes()),
            request_value(Some("X25519"), &[1, 2, 3]),
            // The identity point yields an all-zero secret.
            request_value(Some("X25519"), &[0u8; KEY_LEN]),
            Value::from("not a map"),
            Value::Map(Vec::new()),
        ] {
            let err = procedure.apply(&pool, input).await.unwrap_err();
            assert!(matches!(err, ProcedureError::Logic(e) if e.code() == "invalid.arguments"));
        }
    }
}
