//! Error handling for mosaic-store
//!
//! Wraps the mosaic-core taxonomy with store-specific helpers

use mosaic_core::errors::MosaicError;

pub use mosaic_core::errors::Result;

/// Create a storage error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> MosaicError {
    MosaicError::Storage {
        op: "sqlite".to_string(),
        reason: err.to_string(),
    }
}

/// Create a storage error with operation context
pub fn storage_error(op: &str, reason: impl Into<String>) -> MosaicError {
    MosaicError::Storage {
        op: op.to_string(),
        reason: reason.into(),
    }
}
