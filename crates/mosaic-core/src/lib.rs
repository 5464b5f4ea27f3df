//! Mosaic Core - Schema model and dynamic record machinery
//!
//! This crate provides the storage-agnostic half of the mosaic persistence
//! core, including:
//! - Declarative table/field/relation/lookup metadata and an explicit
//!   schema registry with construction-time invariant checks
//! - A dynamic value and record model with dotted-path access through
//!   nested relations
//! - The `Model` trait bridging statically-typed entities to records
//! - The error taxonomy with stable class codes
//! - Collaborator seams for field-level encryption and JSON columns

pub mod codec;
pub mod errors;
pub mod record;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use codec::{Cipher, NoopCipher};
pub use errors::{ErrorClass, MosaicError, Result};
pub use record::{ChildEntry, Model, Record};
pub use schema::{
    AuditRole, Child, ChildKind, FieldMetadata, ForeignKey, Lookup, SchemaRegistry, TableMetadata,
};
pub use value::{Value, ValueKind};
