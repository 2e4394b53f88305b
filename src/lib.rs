//! Generational type graph: an immutable graph of type nodes with
//! attributes, plus the rewrite, remap, garbage-collection and fixed-point
//! passes that derive new generations from it.
pub mod error;
pub mod type_ref;
pub mod types;
pub mod attributes;
pub mod attribute_store;
pub mod builder;
pub mod reach;
pub mod type_graph;
pub mod rewrite;
pub mod ingest;

pub use attribute_store::{AttributeStore, AttributeStoreView};
pub use attributes::{AttributeKind, TypeAttributes};
pub use builder::{GraphOptions, TypeBuilder, TypeLookup};
pub use error::{GraphError, Result};
pub use rewrite::{GraphRewriteBuilder, Replacer};
pub use type_graph::{GraphDump, SeparatedNamedTypes, TypeGraph};
pub use type_ref::TypeRef;
pub use types::{ClassProperty, PrimitiveKind, StringTypeMapping, Type, TypeKind};
