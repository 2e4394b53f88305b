//! The node model stored in a type graph.
//!
//! Nodes never own each other; every link is a [`TypeRef`] into the arena
//! of the same generation, which is what lets the graph be cyclic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::type_ref::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrimitiveKind {
    None,
    Any,
    Null,
    Bool,
    Integer,
    Double,
    String,
    // strings with a recognized format
    Date,
    Time,
    DateTime,
    Uuid,
    Uri,
    IntegerString,
    BoolString,
}

impl PrimitiveKind {
    pub const TRANSFORMED_STRINGS: [PrimitiveKind; 7] = [
        PrimitiveKind::Date,
        PrimitiveKind::Time,
        PrimitiveKind::DateTime,
        PrimitiveKind::Uuid,
        PrimitiveKind::Uri,
        PrimitiveKind::IntegerString,
        PrimitiveKind::BoolString,
    ];

    pub fn is_transformed_string(self) -> bool {
        Self::TRANSFORMED_STRINGS.contains(&self)
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::None => "none",
            PrimitiveKind::Any => "any",
            PrimitiveKind::Null => "null",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Double => "double",
            PrimitiveKind::String => "string",
            PrimitiveKind::Date => "date",
            PrimitiveKind::Time => "time",
            PrimitiveKind::DateTime => "date-time",
            PrimitiveKind::Uuid => "uuid",
            PrimitiveKind::Uri => "uri",
            PrimitiveKind::IntegerString => "integer-string",
            PrimitiveKind::BoolString => "bool-string",
        }
    }
}

/// Which primitive each transformed string kind becomes in the target.
///
/// Kinds missing from the mapping fall back to plain `string`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTypeMapping {
    targets: BTreeMap<PrimitiveKind, PrimitiveKind>,
}

impl StringTypeMapping {
    /// Every transformed string kind becomes `string`.
    pub fn all_strings() -> Self {
        Self::default()
    }

    /// Every transformed string kind is kept as is.
    pub fn preserving() -> Self {
        let targets = PrimitiveKind::TRANSFORMED_STRINGS
            .iter()
            .map(|k| (*k, *k))
            .collect();
        Self { targets }
    }

    pub fn with(mut self, kind: PrimitiveKind, target: PrimitiveKind) -> Self {
        self.targets.insert(kind, target);
        self
    }

    pub fn map(&self, kind: PrimitiveKind) -> PrimitiveKind {
        if !kind.is_transformed_string() {
            return kind;
        }
        self.targets.get(&kind).copied().unwrap_or(PrimitiveKind::String)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassProperty {
    pub name: String,
    pub ty: TypeRef,
    pub optional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Array,
    Map,
    Class,
    Enum,
    Union,
    Intersection,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Primitive(p) => f.write_str(p.name()),
            TypeKind::Array => f.write_str("array"),
            TypeKind::Map => f.write_str("map"),
            TypeKind::Class => f.write_str("class"),
            TypeKind::Enum => f.write_str("enum"),
            TypeKind::Union => f.write_str("union"),
            TypeKind::Intersection => f.write_str("intersection"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Type {
    Primitive { primitive: PrimitiveKind },
    Array { items: TypeRef },
    Map { values: TypeRef },
    Class { properties: Vec<ClassProperty> },
    Enum { cases: Vec<String> },
    Union { members: BTreeSet<TypeRef> },
    Intersection { members: BTreeSet<TypeRef> },
}

impl Type {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Type::Primitive { primitive: kind }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Primitive { primitive } => TypeKind::Primitive(*primitive),
            Type::Array { .. } => TypeKind::Array,
            Type::Map { .. } => TypeKind::Map,
            Type::Class { .. } => TypeKind::Class,
            Type::Enum { .. } => TypeKind::Enum,
            Type::Union { .. } => TypeKind::Union,
            Type::Intersection { .. } => TypeKind::Intersection,
        }
    }

    /// Classes, enums and unions get names in generated code.
    pub fn is_named(&self) -> bool {
        matches!(self, Type::Class { .. } | Type::Enum { .. } | Type::Union { .. })
    }

    /// Child references in enumeration order.
    pub fn children(&self) -> Vec<TypeRef> {
        match self {
            Type::Primitive { .. } | Type::Enum { .. } => Vec::new(),
            Type::Array { items } => vec![*items],
            Type::Map { values } => vec![*values],
            Type::Class { properties } => properties.iter().map(|p| p.ty).collect(),
            Type::Union { members } | Type::Intersection { members } => {
                members.iter().copied().collect()
            }
        }
    }

    /// Rebuild this node with every child passed through `f`.
    pub fn map_children(&self, mut f: impl FnMut(TypeRef) -> TypeRef) -> Type {
        match self {
            Type::Primitive { .. } | Type::Enum { .. } => self.clone(),
            Type::Array { items } => Type::Array { items: f(*items) },
            Type::Map { values } => Type::Map { values: f(*values) },
            Type::Class { properties } => Type::Class {
                properties: properties
                    .iter()
                    .map(|p| ClassProperty {
                        name: p.name.clone(),
                        ty: f(p.ty),
                        optional: p.optional,
                    })
                    .collect(),
            },
            Type::Union { members } => Type::Union {
                members: members.iter().map(|m| f(*m)).collect(),
            },
            Type::Intersection { members } => Type::Intersection {
                members: members.iter().map(|m| f(*m)).collect(),
            },
        }
    }

    /// A single-member intersection only forwards to its member.
    pub fn indirection_target(&self) -> Option<TypeRef> {
        match self {
            Type::Intersection { members } if members.len() == 1 => members.first().copied(),
            _ => None,
        }
    }
}
