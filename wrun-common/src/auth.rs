//! Shared-secret message envelope.
//!
//! When a secret is configured, each exchange is bound to a fresh nonce
//! chosen by the client:
//!
//! ```text
//! request:  hex(HMAC(secret, nonce "\n" payload)) "\n" nonce "\n" payload
//! response: hex(HMAC(secret, nonce "\n" payload)) "\n" payload
//! ```
//!
//! The response signature covers the request's nonce, so a recorded
//! response cannot be played back to a later request. The server keeps no
//! record of nonces it has seen: a captured request can be replayed and the
//! executable runs again. Use TLS where that matters.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorCode;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEX_LEN: usize = 64;
const NONCE_HEX_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("message is not signed")]
    MissingSignature,

    #[error("message signature does not match")]
    BadSignature,

    #[error("shared secret must not be empty")]
    InvalidSecret,
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingSignature => ErrorCode::SecurityMissingSignature,
            Self::BadSignature => ErrorCode::SecurityBadSignature,
            Self::InvalidSecret => ErrorCode::SecurityInvalidSecret,
        }
    }
}

/// Per-exchange value tying a response to its request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn parse(raw: &[u8]) -> Result<Self, AuthError> {
        if raw.len() != NONCE_HEX_LEN || !raw.iter().all(u8::is_ascii_hexdigit) {
            return Err(AuthError::MissingSignature);
        }
        let text = std::str::from_utf8(raw).map_err(|_| AuthError::MissingSignature)?;
        Ok(Self(text.to_string()))
    }
}

/// Split `message` at its first newline.
fn split_line(message: &[u8]) -> Result<(&[u8], &[u8]), AuthError> {
    let newline = message
        .iter()
        .position(|b| *b == b'\n')
        .ok_or(AuthError::MissingSignature)?;
    Ok((&message[..newline], &message[newline + 1..]))
}

/// Keyed signer/verifier for the message envelope.
#[derive(Clone)]
pub struct SharedSecret {
    mac: HmacSha256,
}

impl SharedSecret {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidSecret)?;
        Ok(Self { mac })
    }

    fn keyed(&self, nonce: &Nonce, payload: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(nonce.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(payload);
        mac
    }

    fn signature(&self, nonce: &Nonce, payload: &[u8]) -> String {
        hex::encode(self.keyed(nonce, payload).finalize().into_bytes())
    }

    /// Constant-time check of `signature_hex` over `nonce` and `payload`.
    fn verify(
        &self,
        signature_hex: &[u8],
        nonce: &Nonce,
        payload: &[u8],
    ) -> Result<(), AuthError> {
        if signature_hex.len() != SIGNATURE_HEX_LEN {
            return Err(AuthError::MissingSignature);
        }
        let signature = hex::decode(signature_hex).map_err(|_| AuthError::MissingSignature)?;
        self.keyed(nonce, payload)
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)
    }

    /// Sign a request under a fresh nonce; keep the nonce to open the response.
    pub fn seal_request(&self, payload: &[u8]) -> (Vec<u8>, Nonce) {
        let nonce = Nonce::generate();
        let signature = self.signature(&nonce, payload);

        let mut message =
            Vec::with_capacity(signature.len() + nonce.0.len() + 2 + payload.len());
        message.extend_from_slice(signature.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(nonce.as_str().as_bytes());
        message.push(b'\n');
        message.extend_from_slice(payload);
        (message, nonce)
    }

    /// Verify a request and return its nonce and inner payload.
    pub fn open_request(&self, message: &[u8]) -> Result<(Nonce, Vec<u8>), AuthError> {
        let (signature_hex, rest) = split_line(message)?;
        let (nonce, payload) = split_line(rest)?;
        let nonce = Nonce::parse(nonce)?;
        self.verify(signature_hex, &nonce, payload)?;
        Ok((nonce, payload.to_vec()))
    }

    /// Sign a response to the request that carried `nonce`.
    pub fn seal_response(&self, nonce: &Nonce, payload: &[u8]) -> Vec<u8> {
        let signature = self.signature(nonce, payload);

        let mut message = Vec::with_capacity(signature.len() + 1 + payload.len());
        message.extend_from_slice(signature.as_bytes());
        message.push(b'\n');
        message.extend_from_slice(payload);
        message
    }

    /// Verify a response against the nonce of our request.
    pub fn open_response(&self, nonce: &Nonce, message: &[u8]) -> Result<Vec<u8>, AuthError> {
        let (signature_hex, payload) = split_line(message)?;
        self.verify(signature_hex, nonce, payload)?;
        Ok(payload.to_vec())
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}
