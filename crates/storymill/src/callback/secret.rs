//! Per-job callback secrets.
//!
//! The plaintext secret exists only in memory (wrapped in `SecretString`)
//! and on the wire to the extraction worker; the job store persists only
//! its one-way hash. Rotating on requeue makes any callback from a
//! superseded attempt verifiably stale.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CallbackError;

/// Number of random bytes in a freshly generated secret.
const SECRET_BYTES: usize = 32;

/// A per-job bearer secret for authenticating extraction callbacks.
#[derive(Debug)]
pub struct CallbackSecret {
    plaintext: SecretString,
}

impl CallbackSecret {
    /// Generates a new random secret.
    pub fn generate() -> Result<Self, CallbackError> {
        let mut bytes = [0u8; SECRET_BYTES];
        getrandom::fill(&mut bytes)
            .map_err(|e| CallbackError::SecretGeneration(e.to_string()))?;
        Ok(Self {
            plaintext: SecretString::from(hex::encode(bytes)),
        })
    }

    /// Wraps an already-known plaintext (e.g. from an inbound delivery).
    pub fn from_plaintext(token: &str) -> Self {
        Self {
            plaintext: SecretString::from(token.to_string()),
        }
    }

    /// One-way hash for persistence and comparison.
    pub fn hash(&self) -> String {
        hash_token(self.plaintext.expose_secret())
    }

    /// Plaintext for the outbound dispatch form. Callers must not persist
    /// this value.
    pub fn expose(&self) -> &str {
        self.plaintext.expose_secret()
    }
}

/// Hashes a token with the same one-way function used at generation time.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_unique_secrets() {
        let a = CallbackSecret::generate().unwrap();
        let b = CallbackSecret::generate().unwrap();
        assert_ne!(a.expose(), b.expose());
        assert_eq!(a.expose().len(), SECRET_BYTES * 2);
    }

    #[test]
    fn test_hash_matches_hash_token() {
        let secret = CallbackSecret::generate().unwrap();
        assert_eq!(secret.hash(), hash_token(secret.expose()));
    }

    #[test]
    fn test_hash_differs_for_different_tokens() {
        assert_ne!(hash_token("alpha"), hash_token("beta"));
    }

    #[test]
    fn test_from_plaintext_roundtrip() {
        let secret = CallbackSecret::from_plaintext("my-token");
        assert_eq!(secret.expose(), "my-token");
        assert_eq!(secret.hash(), hash_token("my-token"));
    }
}
