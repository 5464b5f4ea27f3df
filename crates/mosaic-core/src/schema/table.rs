//! Declarative table descriptions
//!
//! One `TableMetadata` per entity type drives query building, hydration,
//! and reconciliation. All of it is plain data built once, ahead of time.

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::value::{Value, ValueKind};

/// Audit role of a column, stamped automatically by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditRole {
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
}

/// One field of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Field name on the record
    pub field: String,

    /// Column name in storage
    pub column: String,

    /// Declared semantic value type
    pub kind: ValueKind,

    /// This field is the table's primary key (at most one per table)
    pub primary_key: bool,

    /// This field scopes every read/write to one tenant (at most one per table)
    pub tenant_key: bool,

    /// Values are encrypted at rest and base64-encoded in transport
    pub encrypted: bool,

    /// Values are serialized JSON documents
    pub json: bool,

    /// This field holds a foreign-key value; details live in the owning
    /// table's foreign-key list
    pub foreign_key: bool,

    /// Related type name, for foreign-key fields
    pub related_type: Option<String>,

    /// Audit role, if the engine should stamp this column
    pub audit: Option<AuditRole>,
}

impl FieldMetadata {
    /// Create a new field description
    pub fn new(field: impl Into<String>, column: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            field: field.into(),
            column: column.into(),
            kind,
            primary_key: false,
            tenant_key: false,
            encrypted: false,
            json: false,
            foreign_key: false,
            related_type: None,
            audit: None,
        }
    }

    /// Mark this field as the primary key
    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this field as the multitenancy key
    pub fn with_tenant_key(mut self) -> Self {
        self.tenant_key = true;
        self
    }

    /// Mark this field as encrypted at rest
    pub fn with_encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Mark this field as a serialized JSON document
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Mark this field as a foreign-key value for the given related type
    pub fn with_foreign_key(mut self, related_type: impl Into<String>) -> Self {
        self.foreign_key = true;
        self.related_type = Some(related_type.into());
        self
    }

    /// Assign an audit role
    pub fn with_audit(mut self, role: AuditRole) -> Self {
        self.audit = Some(role);
        self
    }
}

/// A declared relation to another entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Field holding the key value on the owning record
    pub field: String,

    /// Key column in the owning table
    pub column: String,

    /// Related type name, resolved through the registry
    pub related_type: String,

    /// Field holding the nested related record
    pub related_field: String,

    /// Query and deploy must fail when this relation cannot be resolved
    pub required: bool,

    /// The key value must be resolved via business-key matching rather
    /// than being already known
    pub needs_lookup: bool,
}

impl ForeignKey {
    /// Create a new relation declaration
    pub fn new(
        field: impl Into<String>,
        column: impl Into<String>,
        related_type: impl Into<String>,
        related_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            column: column.into(),
            related_type: related_type.into(),
            related_field: related_field.into(),
            required: false,
            needs_lookup: false,
        }
    }

    /// Mark this relation as required
    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark this relation's key as resolved via business-key matching
    pub fn with_needs_lookup(mut self) -> Self {
        self.needs_lookup = true;
        self
    }
}

/// Container kind of a child collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildKind {
    Sequence,
    KeyedMap,
}

/// A declared child collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    /// Field holding the collection on the parent record
    pub field: String,

    /// Container kind
    pub kind: ChildKind,

    /// Element type name, resolved through the registry
    pub element_type: String,

    /// Field on the child stamped with the parent's primary key
    pub parent_key_field: String,

    /// Map key is written into this child field (keyed maps only)
    pub key_mapping: Option<String>,

    /// Parent field values copied onto each child (parent field, child field)
    pub value_mappings: Vec<(String, String)>,

    /// Previously-persisted children absent from an incoming update are deleted
    pub delete_orphans: bool,
}

impl Child {
    /// Create a new sequence child declaration
    pub fn new(
        field: impl Into<String>,
        element_type: impl Into<String>,
        parent_key_field: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind: ChildKind::Sequence,
            element_type: element_type.into(),
            parent_key_field: parent_key_field.into(),
            key_mapping: None,
            value_mappings: Vec::new(),
            delete_orphans: false,
        }
    }

    /// Turn this collection into a keyed map, writing the map key into the
    /// given child field
    pub fn keyed_by(mut self, key_field: impl Into<String>) -> Self {
        self.kind = ChildKind::KeyedMap;
        self.key_mapping = Some(key_field.into());
        self
    }

    /// Copy a parent field onto each child during cascade
    pub fn with_value_mapping(
        mut self,
        parent_field: impl Into<String>,
        child_field: impl Into<String>,
    ) -> Self {
        self.value_mappings
            .push((parent_field.into(), child_field.into()));
        self
    }

    /// Enable orphan deletion on update
    pub fn with_delete_orphans(mut self) -> Self {
        self.delete_orphans = true;
        self
    }
}

/// A business-key column/field pair usable for existence matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    /// Match column in storage
    pub column: String,

    /// Match property on the record, as a dot-path through nested
    /// related records
    pub property: String,

    /// Owning table name; when it differs from a query's base table the
    /// resolver joins through `join_key`
    pub table: String,

    /// Dot-path of relation fields leading to the owning table
    /// (empty for the base table)
    pub join_key: String,

    /// Static literal matched instead of a record property
    pub literal: Option<Value>,

    /// Nested sub-lookups, flattened after this one in key order
    pub sub_lookups: Vec<Lookup>,
}

impl Lookup {
    /// Create a new base-table lookup
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            property: property.into(),
            table: table.into(),
            join_key: String::new(),
            literal: None,
            sub_lookups: Vec::new(),
        }
    }

    /// Reach the owning table through the given relation path
    pub fn via(mut self, join_key: impl Into<String>) -> Self {
        self.join_key = join_key.into();
        self
    }

    /// Match a static literal instead of a record property
    pub fn with_literal(mut self, value: impl Into<Value>) -> Self {
        self.literal = Some(value.into());
        self
    }

    /// Append a nested sub-lookup
    pub fn with_sub_lookup(mut self, lookup: Lookup) -> Self {
        self.sub_lookups.push(lookup);
        self
    }
}

/// Cross-field validation hook, run before an entity is inserted
pub type ValidateFn = fn(&Record) -> std::result::Result<(), String>;

/// Declarative description of one entity type
///
/// Field declaration order is preserved; it governs default column order
/// and composite-key ordering.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// Type name used to register and resolve this table
    pub type_name: String,

    /// Table name in storage
    pub table: String,

    /// Ordered field list
    pub fields: Vec<FieldMetadata>,

    /// Business-key lookups, in key-composition order
    pub lookups: Vec<Lookup>,

    /// Declared relations
    pub foreign_keys: Vec<ForeignKey>,

    /// Declared child collections
    pub children: Vec<Child>,

    /// Optional cross-field validation hook
    pub validate: Option<ValidateFn>,
}

impl TableMetadata {
    /// Create a new table description
    pub fn new(type_name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            table: table.into(),
            fields: Vec::new(),
            lookups: Vec::new(),
            foreign_keys: Vec::new(),
            children: Vec::new(),
            validate: None,
        }
    }

    /// Append a field
    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a lookup
    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookups.push(lookup);
        self
    }

    /// Append a relation
    pub fn with_foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Append a child collection
    pub fn with_child(mut self, child: Child) -> Self {
        self.children.push(child);
        self
    }

    /// Install the cross-field validation hook
    pub fn with_validator(mut self, validate: ValidateFn) -> Self {
        self.validate = Some(validate);
        self
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Find a field by column name
    pub fn field_by_column(&self, column: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// The primary-key field, if declared
    pub fn primary_key_field(&self) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// The multitenancy-key field, if declared
    pub fn tenant_field(&self) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.tenant_key)
    }

    /// Find a relation by its key field name
    pub fn foreign_key(&self, field: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.field == field)
    }

    /// Find a relation by the field holding the nested record
    pub fn foreign_key_for_relation(&self, related_field: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.related_field == related_field)
    }

    /// Column name for a field, if the field exists
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.field(field).map(|f| f.column.as_str())
    }
}
