//! Mosaic Store - SQL-facing persistence engine
//!
//! Provides:
//! - Metadata-driven query building with aliased join trees
//! - Row hydration into nested records with child-collection merging
//! - Composite lookup-key composition and storage resolution
//! - Lookup-based batch reconciliation (deploy) cascading into children
//! - Connection management over SQLite

pub mod builder;
pub mod db;
pub mod deploy;
pub mod errors;
pub mod hydrate;
pub mod lookup;
pub mod sql;
pub mod store;

// Re-export key types
pub use builder::{
    Associations, BuiltQuery, DescriptorMap, FieldDescriptor, FilterOptions, Table,
};
pub use deploy::{Change, ChangeKind, ChangeSet, DeployPass, DeployReport};
pub use errors::Result;
pub use lookup::{compose_key, effective_lookups, LookupResolver, DEFAULT_SEPARATOR};
pub use store::Store;
