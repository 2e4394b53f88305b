//! JSON samples → initial type graph.
//!
//! Samples are folded into a per-path [`Shape`] first (which kinds of value
//! were seen where, how often each field was present), then lowered into a
//! [`TypeBuilder`]. Folding is order-independent, so the graph only depends
//! on the set of samples.
pub mod str;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::attributes::{DESCRIPTION, NAMES, TypeAttributes, TypeNames};
use crate::builder::{GraphOptions, TypeBuilder};
use crate::type_graph::TypeGraph;
use crate::type_ref::TypeRef;
use crate::types::{ClassProperty, PrimitiveKind};

pub use str::StringShape;

// ------------------------------ State ------------------------------------ //

#[derive(Clone, Debug, Default)]
pub struct Shape {
    pub nullable: bool,
    pub has_bool: bool,
    pub has_integer: bool,
    pub has_double: bool,
    pub strings: Option<StringShape>,
    pub array: Option<ArrayShape>,
    pub object: Option<ObjectShape>,
}

#[derive(Clone, Debug, Default)]
pub struct ArrayShape {
    pub items: Box<Shape>,
    pub samples: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ObjectShape {
    pub fields: IndexMap<String, FieldShape>,
    pub seen_objects: u64,
}

#[derive(Clone, Debug, Default)]
pub struct FieldShape {
    pub shape: Shape,
    pub present_in: u64,
}

impl Shape {
    pub fn is_bottom(&self) -> bool {
        !self.nullable
            && !self.has_bool
            && !self.has_integer
            && !self.has_double
            && self.strings.is_none()
            && self.array.is_none()
            && self.object.is_none()
    }

    // ------------------------------ Observe ------------------------------ //

    pub fn observe(&mut self, value: &Value) {
        match value {
            Value::Null => self.nullable = true,
            Value::Bool(_) => self.has_bool = true,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    self.has_integer = true;
                } else {
                    self.has_double = true;
                }
            }
            Value::String(s) => self.strings.get_or_insert_with(StringShape::default).observe(s),
            Value::Array(items) => {
                let array = self.array.get_or_insert_with(ArrayShape::default);
                array.samples += 1;
                for item in items {
                    array.items.observe(item);
                }
            }
            Value::Object(map) => {
                let object = self.object.get_or_insert_with(ObjectShape::default);
                object.seen_objects += 1;
                for (key, value) in map {
                    let field = object.fields.entry(key.clone()).or_default();
                    field.present_in += 1;
                    field.shape.observe(value);
                }
            }
        }
    }
}

// ------------------------------ Ingest ----------------------------------- //

/// Accumulates samples per top-level name and builds the first generation.
#[derive(Debug, Default)]
pub struct Ingest {
    top_levels: IndexMap<String, Shape>,
    samples: u64,
}

impl Ingest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_value(&mut self, top_level: &str, value: &Value) {
        self.samples += 1;
        self.top_levels.entry(top_level.to_string()).or_default().observe(value);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Lower everything observed so far into a frozen generation 0.
    pub fn build(&self, options: GraphOptions) -> TypeGraph {
        let mut builder = TypeBuilder::new(options);
        for (name, shape) in &self.top_levels {
            let root = lower(&mut builder, shape, name);
            builder.add_top_level(name, root);
            builder.add_top_level_attributes(name, names(name));
        }
        debug!(
            samples = self.samples,
            top_levels = self.top_levels.len(),
            types = builder.type_count(),
            "ingested samples"
        );
        builder.finish()
    }
}

// ------------------------------ Lower ------------------------------------ //

fn names(name: &str) -> TypeAttributes {
    TypeAttributes::singleton(&NAMES, TypeNames::new([name]))
}

fn primitive(builder: &mut TypeBuilder, kind: PrimitiveKind) -> TypeRef {
    builder.get_primitive_type(kind, TypeAttributes::empty())
}

fn lower(builder: &mut TypeBuilder, shape: &Shape, name: &str) -> TypeRef {
    let mut members = BTreeSet::new();
    if shape.is_bottom() {
        return primitive(builder, PrimitiveKind::Any);
    }
    if shape.nullable {
        members.insert(primitive(builder, PrimitiveKind::Null));
    }
    if shape.has_bool {
        members.insert(primitive(builder, PrimitiveKind::Bool));
    }
    // integers widen into doubles
    if shape.has_double {
        members.insert(primitive(builder, PrimitiveKind::Double));
    } else if shape.has_integer {
        members.insert(primitive(builder, PrimitiveKind::Integer));
    }
    if let Some(strings) = &shape.strings {
        let member = match strings.enum_cases() {
            Some(cases) => builder.get_enum_type(cases.iter().cloned(), names(name)),
            None => primitive(builder, strings.primitive()),
        };
        members.insert(member);
    }
    if let Some(array) = &shape.array {
        let items = lower(builder, &array.items, &format!("{name}Element"));
        members.insert(builder.get_array_type(items, TypeAttributes::empty()));
    }
    if let Some(object) = &shape.object {
        members.insert(lower_object(builder, object, name));
    }

    if members.len() == 1 {
        if let Some(&only) = members.first() {
            return only;
        }
    }
    builder.get_union_type(members, names(name))
}

fn lower_object(builder: &mut TypeBuilder, object: &ObjectShape, name: &str) -> TypeRef {
    let properties = object
        .fields
        .iter()
        .map(|(key, field)| ClassProperty {
            name: key.clone(),
            ty: lower(builder, &field.shape, &pascal_case(key)),
            optional: field.present_in < object.seen_objects,
        })
        .collect();
    let mut attributes = names(name);
    if object.seen_objects > 1 {
        let note = format!("observed in {} objects", object.seen_objects);
        attributes = attributes.with(&DESCRIPTION, BTreeSet::from([note]));
    }
    builder.get_class_type(properties, attributes)
}

/// `user_id` / `user-id` / `userId` → `UserId`.
fn pascal_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.chars() {
        if c.is_ascii_alphanumeric() {
            if upper {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            upper = false;
        } else {
            upper = true;
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'T');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ingest(values: &[Value]) -> TypeGraph {
        let mut ingest = Ingest::new();
        for value in values {
            ingest.observe_value("Root", value);
        }
        ingest.build(GraphOptions::default())
    }

    fn property<'g>(graph: &'g TypeGraph, class: TypeRef, name: &str) -> &'g ClassProperty {
        let Type::Class { properties } = graph.get(class) else {
            panic!("{class:?} is not a class");
        };
        properties
            .iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| panic!("no property `{name}`"))
    }

    #[test]
    fn objects_become_classes_named_after_their_path() {
        let graph = ingest(&[json!({"id": 1, "home_address": {"city": "Oslo"}})]);
        let root = graph.top_levels()["Root"];
        assert_eq!(graph.combined_name(root), Some("Root"));
        let address = property(&graph, root, "home_address").ty;
        assert_eq!(graph.combined_name(address), Some("HomeAddress"));
        let id = property(&graph, root, "id");
        assert_eq!(graph.get(id.ty), &Type::primitive(PrimitiveKind::Integer));
        assert!(!id.optional);
    }

    #[test]
    fn fields_missing_from_some_samples_are_optional() {
        let graph = ingest(&[json!({"a": 1, "b": true}), json!({"a": 2.5})]);
        let root = graph.top_levels()["Root"];
        let a = property(&graph, root, "a");
        assert_eq!(graph.get(a.ty), &Type::primitive(PrimitiveKind::Double));
        assert!(!a.optional);
        assert!(property(&graph, root, "b").optional);
    }

    #[test]
    fn mixed_observations_become_a_named_union() {
        let graph = ingest(&[json!({"v": 1}), json!({"v": "x"}), json!({"v": null})]);
        let root = graph.top_levels()["Root"];
        let v = property(&graph, root, "v").ty;
        let Type::Union { members } = graph.get(v) else {
            panic!("expected a union");
        };
        assert_eq!(members.len(), 3);
        assert_eq!(graph.combined_name(v), Some("V"));
    }

    #[test]
    fn arrays_union_their_element_types() {
        let graph = ingest(&[json!({"tags": ["a", 3]}), json!({"tags": []})]);
        let root = graph.top_levels()["Root"];
        let tags = property(&graph, root, "tags").ty;
        let Type::Array { items } = graph.get(tags) else {
            panic!("expected an array");
        };
        assert!(matches!(graph.get(*items), Type::Union { members } if members.len() == 2));
        assert_eq!(graph.combined_name(*items), Some("TagsElement"));
    }

    #[test]
    fn identical_object_shapes_share_a_class() {
        let graph = ingest(&[json!({
            "billing": {"street": "x", "zip": "y"},
            "shipping": {"street": "z", "zip": "w"},
        })]);
        let root = graph.top_levels()["Root"];
        let billing = property(&graph, root, "billing").ty;
        let shipping = property(&graph, root, "shipping").ty;
        assert_eq!(billing, shipping);
        assert_eq!(graph.attribute_view(&NAMES).get(billing).names().len(), 2);
        assert_eq!(graph.combined_name(billing), Some("Billing"));
    }

    #[test]
    fn transformed_strings_and_enums_are_detected() {
        let graph = ingest(&[
            json!({"at": "2024-01-01T10:00:00Z", "state": "open"}),
            json!({"at": "2024-03-01T11:00:00Z", "state": "open"}),
        ]);
        let root = graph.top_levels()["Root"];
        let at = property(&graph, root, "at").ty;
        assert_eq!(graph.get(at), &Type::primitive(PrimitiveKind::DateTime));
        let state = property(&graph, root, "state").ty;
        assert_eq!(graph.get(state), &Type::Enum { cases: vec!["open".to_string()] });
    }

    #[test]
    fn ingested_graph_survives_fixed_point_and_collection() {
        let mut ingest = Ingest::new();
        ingest.observe_value("Root", &json!({"items": [{"n": 1}, {"n": 2, "extra": [true]}]}));
        let graph = ingest.build(GraphOptions { track_provenance: true });
        let settled = graph.rewrite_fixed_point(false, false).unwrap();
        let collected = settled.garbage_collect(true, false).unwrap();
        assert_eq!(collected.type_count(), collected.all_types_unordered().len());
        assert_eq!(collected.all_named_types_separated().objects.len(), 2);
    }

    #[test]
    fn pascal_case_handles_separators_and_digits() {
        assert_eq!(pascal_case("user_id"), "UserId");
        assert_eq!(pascal_case("user-id"), "UserId");
        assert_eq!(pascal_case("userId"), "UserId");
        assert_eq!(pascal_case("2fa"), "T2fa");
        assert_eq!(pascal_case("__"), "T");
    }
}
