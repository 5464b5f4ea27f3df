//! Collaborator seams: field-level cipher and JSON codec helpers
//!
//! Encryption and JSON (de)serialization are external concerns; the engine
//! only moves bytes through these seams. Ciphertext travels base64-encoded.

use base64::Engine;

use crate::errors::{MosaicError, Result};

/// Field-level encryption collaborator
pub trait Cipher: Send + Sync {
    /// Encrypt plaintext bytes
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt ciphertext bytes
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through cipher for deployments without field-level encryption
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCipher;

impl Cipher for NoopCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// Encode ciphertext for column transport
pub fn encode_transport(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a stored encrypted column back to ciphertext bytes
///
/// A value that cannot be base64-decoded is a data error, not a
/// recoverable default.
pub fn decode_transport(column: &str, encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| MosaicError::InvalidBase64 {
            column: column.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize a JSON document for column transport
pub fn marshal(field: &str, value: &serde_json::Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| MosaicError::JsonEncode {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a stored JSON column
pub fn unmarshal(column: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| MosaicError::JsonDecode {
        column: column.to_string(),
        reason: e.to_string(),
    })
}
