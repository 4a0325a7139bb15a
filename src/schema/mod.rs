//! Schema catalog
//!
//! Model types for entity, relation and attribute types, the textual schema
//! parser, and the synchronizer that keeps the catalog in step with the
//! active database.

pub mod model;
pub mod parser;
pub mod sync;

// Re-exports
pub use model::{AttributeType, EntityType, RelationType, SchemaCatalog};
pub use parser::parse_schema;
pub use sync::SchemaSynchronizer;
