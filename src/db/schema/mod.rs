//! Schema definitions, the resolved schema map, and table creation.
//!
//! # Overview
//!
//! The schema system consists of three main components:
//!
//! 1. **Definitions** (`definition.rs`):
//!    - `DataType`, `Cardinality`, `PropertyDef`
//!    - `EntityDef`, `RelationDef`, `FilteredEntityDef`, `FilteredRelationDef`,
//!      `MergedEntityDef`
//!    - `SchemaDefinition` - builder collecting all of the above
//!
//! 2. **Schema Map** (`map.rs`):
//!    - `SchemaMap` - arena of resolved record types, addressed by `RecordId`
//!    - attribute lookup, path resolution, symmetric duals, physical tables
//!
//! 3. **Migrations** (`migrations.rs`):
//!    - `create_schema` - idempotent DDL for every table of a schema map
//!
//! # Type Mapping
//!
//! | DataType | SQLite | PostgreSQL |
//! |----------|--------|------------|
//! | String | TEXT | TEXT |
//! | Int | INTEGER | BIGINT |
//! | Float | REAL | DOUBLE PRECISION |
//! | Bool | INTEGER | BOOLEAN |
//! | Json | TEXT | JSONB |

mod definition;
mod map;
pub mod migrations;

pub use definition::{
    Cardinality, DataType, EntityDef, FilteredEntityDef, FilteredRelationDef, MergedEntityDef,
    PropertyDef, RelationDef, SchemaDefinition,
};
pub use map::{
    AttributeInfo, AttributeKind, ColumnInfo, LinkInfo, LinkSide, PathEnd, RecordId, RecordInfo,
    RecordKind, RelationAttribute, ResolvedPath, SchemaMap, TableInfo, ValueAttribute, DICTIONARY,
    INPUT_TYPE_ATTR, ROW_ID,
};
pub use migrations::create_schema;
