//! Schema data model, read-only view, and programmatic builder.

pub mod builder;
pub mod types;
pub mod view;

pub use builder::{computed, intersection, tuple_to_userset, union, SchemaBuilder};
pub use types::{
    EntityDefinition, PermissionDefinition, PermissionNode, ReferenceKind, RelationDefinition,
    RelationReference, RewriteOp, SchemaDefinition,
};
pub use view::{LinkedEdge, LinkedEdgeKind, SchemaView};
