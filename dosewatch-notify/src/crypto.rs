//! Payload protection seam.
//!
//! Key management and the cipher itself belong to the host application;
//! the pipeline only requires the capability. The crate ships the signing
//! half as [`HmacSha256Signer`] for implementors to reuse.

use crate::error::{NotifyError, NotifyResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Encrypts channel content and signs dispatch envelopes.
pub trait PayloadCrypto: Send + Sync {
    /// Encrypt serialized channel content.
    fn encrypt(&self, plaintext: &[u8]) -> NotifyResult<Vec<u8>>;

    /// Sign a serialized dispatch envelope. Returns the signature encoded
    /// for transport (hex).
    fn sign(&self, payload: &[u8]) -> NotifyResult<String>;
}

/// HMAC-SHA256 signer over a shared secret, hex-encoded output.
#[derive(Clone)]
pub struct HmacSha256Signer {
    secret: Vec<u8>,
}

impl HmacSha256Signer {
    /// Create a signer from a shared secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign a payload.
    pub fn sign(&self, payload: &[u8]) -> NotifyResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| NotifyError::Crypto(e.to_string()))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify a hex signature against a payload.
    pub fn verify(&self, payload: &[u8], signature: &str) -> NotifyResult<bool> {
        let expected = self.sign(payload)?;
        Ok(expected == signature)
    }
}

impl std::fmt::Debug for HmacSha256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256Signer").finish_non_exhaustive()
    }
}
