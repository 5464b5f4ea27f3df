//! Error taxonomy for the mosaic persistence core
//!
//! Five stable classes distinguish schema, input, resolution, data, and
//! storage failures; validation failures surface through the batch-abort path.

use thiserror::Error;

/// Result type alias using MosaicError
pub type Result<T> = std::result::Result<T, MosaicError>;

/// Stable classification of every error the engine can surface
///
/// Each class maps to a stable code usable for programmatic error handling,
/// testing, and external API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Misdeclared or missing table metadata, surfaced before any query runs
    Schema,
    /// A malformed per-call argument (filter, association, field subset)
    Input,
    /// A required relation that could not be matched to an existing row
    Resolution,
    /// A stored value that cannot be decoded or converted
    Data,
    /// Cross-field validation rejected an entity before insert
    Validation,
    /// A statement failure reported by the driver
    Storage,
}

impl ErrorClass {
    /// Get the stable error code for this class
    pub fn code(&self) -> &'static str {
        match self {
            ErrorClass::Schema => "ERR_SCHEMA",
            ErrorClass::Input => "ERR_INPUT",
            ErrorClass::Resolution => "ERR_RESOLUTION",
            ErrorClass::Data => "ERR_DATA",
            ErrorClass::Validation => "ERR_VALIDATION",
            ErrorClass::Storage => "ERR_STORAGE",
        }
    }
}

/// Comprehensive error taxonomy for mosaic operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MosaicError {
    // ===== Schema Errors =====
    /// No table metadata registered for the requested type
    #[error("No table registered for type: {type_name}")]
    UnknownType { type_name: String },

    /// Registered metadata carries an empty table name
    #[error("Type {type_name} has an empty table name")]
    MissingTableName { type_name: String },

    /// More than one field is flagged as the primary key
    #[error("Type {type_name} declares more than one primary key field")]
    MultiplePrimaryKeys { type_name: String },

    /// More than one field is flagged as the multitenancy key
    #[error("Type {type_name} declares more than one multitenancy key field")]
    MultipleTenantKeys { type_name: String },

    /// An operation demanded a primary key the type does not declare
    #[error("Type {type_name} has no primary key field ({context})")]
    MissingPrimaryKey { type_name: String, context: String },

    /// A type was registered twice
    #[error("Type {type_name} is already registered")]
    DuplicateType { type_name: String },

    /// A join-key path segment names no declared relation
    #[error("No foreign key declared for relation '{segment}' on type {type_name}")]
    UnknownRelation { type_name: String, segment: String },

    // ===== Input Errors =====
    /// A field name does not exist on the type
    #[error("Unknown field '{field}' on type {type_name}")]
    UnknownField { type_name: String, field: String },

    /// An association name matches no relation or child collection
    #[error("Unknown association '{name}' on type {type_name}")]
    UnknownAssociation { type_name: String, name: String },

    /// Encrypted values cannot be compared directly in storage
    #[error("Cannot filter on encrypted field '{field}' of type {type_name}")]
    EncryptedFilter { type_name: String, field: String },

    // ===== Resolution Errors =====
    /// A required relation matched no stored row
    #[error("Required relation '{field}' on {type_name} could not be resolved (key: {key})")]
    UnresolvedRelation {
        type_name: String,
        field: String,
        key: String,
    },

    // ===== Data Errors =====
    /// Stored ciphertext is not valid base64
    #[error("Invalid base64 in encrypted column {column}: {reason}")]
    InvalidBase64 { column: String, reason: String },

    /// A JSON column failed to decode
    #[error("JSON decode failed for column {column}: {reason}")]
    JsonDecode { column: String, reason: String },

    /// A JSON value failed to serialize
    #[error("JSON encode failed for field {field}: {reason}")]
    JsonEncode { field: String, reason: String },

    /// The cipher collaborator rejected a value
    #[error("Cipher failed for column {column}: {reason}")]
    Cipher { column: String, reason: String },

    /// A scanned value does not fit the field's declared kind
    #[error("Value for field '{field}' is not convertible to {expected}: {reason}")]
    Conversion {
        field: String,
        expected: String,
        reason: String,
    },

    // ===== Validation =====
    /// Cross-field validation rejected an entity; the whole batch aborts
    #[error("Validation failed for {type_name}: {reason}")]
    Validation { type_name: String, reason: String },

    // ===== Storage Errors =====
    /// Any statement failure; rolls back the enclosing transaction
    #[error("Storage error in {op}: {reason}")]
    Storage { op: String, reason: String },
}

impl MosaicError {
    /// Get the stable class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            MosaicError::UnknownType { .. }
            | MosaicError::MissingTableName { .. }
            | MosaicError::MultiplePrimaryKeys { .. }
            | MosaicError::MultipleTenantKeys { .. }
            | MosaicError::MissingPrimaryKey { .. }
            | MosaicError::DuplicateType { .. }
            | MosaicError::UnknownRelation { .. } => ErrorClass::Schema,

            MosaicError::UnknownField { .. }
            | MosaicError::UnknownAssociation { .. }
            | MosaicError::EncryptedFilter { .. } => ErrorClass::Input,

            MosaicError::UnresolvedRelation { .. } => ErrorClass::Resolution,

            MosaicError::InvalidBase64 { .. }
            | MosaicError::JsonDecode { .. }
            | MosaicError::JsonEncode { .. }
            | MosaicError::Cipher { .. }
            | MosaicError::Conversion { .. } => ErrorClass::Data,

            MosaicError::Validation { .. } => ErrorClass::Validation,

            MosaicError::Storage { .. } => ErrorClass::Storage,
        }
    }

    /// Get the stable error code for this error's class
    pub fn code(&self) -> &'static str {
        self.class().code()
    }
}
