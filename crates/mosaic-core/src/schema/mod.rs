//! Schema model: declarative table, field, relation, and lookup metadata

pub mod registry;
pub mod table;

pub use registry::SchemaRegistry;
pub use table::{
    AuditRole, Child, ChildKind, FieldMetadata, ForeignKey, Lookup, TableMetadata, ValidateFn,
};
