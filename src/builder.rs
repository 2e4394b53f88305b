//! The open (under construction) state of a type graph.
//!
//! A [`TypeBuilder`] owns the node arena and attribute store of one
//! generation until [`TypeBuilder::finish`] consumes it and freezes the
//! result into a [`TypeGraph`]. Slots can be reserved before their node is
//! known, which is how recursive types get built.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use crate::attribute_store::AttributeStore;
use crate::attributes::{PROVENANCE, TypeAttributes};
use crate::type_graph::TypeGraph;
use crate::type_ref::TypeRef;
use crate::types::{ClassProperty, PrimitiveKind, StringTypeMapping, Type};
use crate::{assert_internal, internal_error};

/// Construction-time switches, inherited by every derived generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphOptions {
    /// Stamp every node of the initial graph with a provenance marker and
    /// verify after each rewrite that no marker was dropped.
    pub track_provenance: bool,
}

/// Node lookup shared by the open and the frozen state.
pub trait TypeLookup {
    fn serial(&self) -> u32;

    /// `None` while the slot is reserved but not yet filled.
    fn type_at_index(&self, index: usize) -> Option<&Type>;

    fn attributes_at_index(&self, index: usize) -> TypeAttributes;

    fn at_index(&self, index: usize) -> Option<(&Type, TypeAttributes)> {
        let ty = self.type_at_index(index)?;
        Some((ty, self.attributes_at_index(index)))
    }

    fn lookup(&self, ty: TypeRef) -> Option<&Type> {
        ty.assert_serial(self.serial());
        self.type_at_index(ty.index())
    }
}

type Identity = (Type, Vec<(&'static str, String)>);

pub struct TypeBuilder {
    serial: u32,
    options: GraphOptions,
    string_type_mapping: StringTypeMapping,
    alphabetize_properties: bool,
    types: Vec<Option<Type>>,
    attribute_store: AttributeStore,
    top_levels: IndexMap<String, TypeRef>,
    identities: HashMap<Identity, TypeRef>,
    add_provenance: bool,
    did_add_forwarding_intersection: bool,
}

impl TypeBuilder {
    /// Builder for the first generation of a graph.
    ///
    /// Transformed string kinds are kept as given; with provenance tracking
    /// on, every node created here gets its own marker.
    pub fn new(options: GraphOptions) -> Self {
        let mut builder = Self::for_generation(0, options, StringTypeMapping::preserving(), false);
        builder.add_provenance = options.track_provenance;
        builder
    }

    pub(crate) fn for_generation(
        serial: u32,
        options: GraphOptions,
        string_type_mapping: StringTypeMapping,
        alphabetize_properties: bool,
    ) -> Self {
        Self {
            serial,
            options,
            string_type_mapping,
            alphabetize_properties,
            types: Vec::new(),
            attribute_store: AttributeStore::new(serial),
            top_levels: IndexMap::new(),
            identities: HashMap::new(),
            add_provenance: false,
            did_add_forwarding_intersection: false,
        }
    }

    pub fn with_string_type_mapping(mut self, mapping: StringTypeMapping) -> Self {
        self.string_type_mapping = mapping;
        self
    }

    pub fn with_alphabetized_properties(mut self, alphabetize: bool) -> Self {
        self.alphabetize_properties = alphabetize;
        self
    }

    pub fn options(&self) -> GraphOptions {
        self.options
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn attribute_store(&self) -> &AttributeStore {
        &self.attribute_store
    }

    pub fn attribute_store_mut(&mut self) -> &mut AttributeStore {
        &mut self.attribute_store
    }

    pub fn did_add_forwarding_intersection(&self) -> bool {
        self.did_add_forwarding_intersection
    }

    /// Reserve a slot for a node that will be supplied later through
    /// [`TypeBuilder::get_type`] with this reference as forwarding ref.
    pub fn reserve_type_ref(&mut self) -> TypeRef {
        let tref = TypeRef::new(self.serial, self.types.len());
        self.types.push(None);
        tref
    }

    /// Find or create the node `ty` carrying `attributes`.
    ///
    /// Structurally identical nodes are shared: if one already exists, the
    /// attributes are merged into it. When `forwarding` is given the node
    /// ends up behind that reference; if an existing node was reused the
    /// forwarding slot becomes an indirection to it.
    pub fn get_type(
        &mut self,
        ty: Type,
        attributes: TypeAttributes,
        forwarding: Option<TypeRef>,
    ) -> TypeRef {
        let ty = self.canonicalize(ty);
        let identity = (ty.clone(), attributes.identity_key());
        if let Some(&existing) = self.identities.get(&identity) {
            self.add_attributes(existing, attributes);
            return match forwarding {
                Some(forwarding) => {
                    self.add_forwarding_intersection(forwarding, existing);
                    forwarding
                }
                None => existing,
            };
        }

        let tref = forwarding.unwrap_or_else(|| self.reserve_type_ref());
        self.commit(tref, ty);
        self.identities.insert(identity, tref);
        self.add_attributes(tref, attributes);
        if self.add_provenance {
            let marker = tref.index() as u32;
            self.attribute_store.set(&PROVENANCE, tref, BTreeSet::from([marker]));
        }
        tref
    }

    /// Fill the reserved slot `tref` with `ty` as is, even when an identical
    /// node already exists. The slot still becomes the canonical node for
    /// `ty` if there is none yet.
    pub(crate) fn define_type(&mut self, tref: TypeRef, ty: Type, attributes: TypeAttributes) {
        let ty = self.canonicalize(ty);
        self.identities
            .entry((ty.clone(), attributes.identity_key()))
            .or_insert(tref);
        self.commit(tref, ty);
        self.add_attributes(tref, attributes);
    }

    pub fn get_primitive_type(&mut self, kind: PrimitiveKind, attributes: TypeAttributes) -> TypeRef {
        self.get_type(Type::primitive(kind), attributes, None)
    }

    pub fn get_array_type(&mut self, items: TypeRef, attributes: TypeAttributes) -> TypeRef {
        self.get_type(Type::Array { items }, attributes, None)
    }

    pub fn get_map_type(&mut self, values: TypeRef, attributes: TypeAttributes) -> TypeRef {
        self.get_type(Type::Map { values }, attributes, None)
    }

    pub fn get_class_type(
        &mut self,
        properties: Vec<ClassProperty>,
        attributes: TypeAttributes,
    ) -> TypeRef {
        self.get_type(Type::Class { properties }, attributes, None)
    }

    pub fn get_enum_type<I, S>(&mut self, cases: I, attributes: TypeAttributes) -> TypeRef
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cases = cases.into_iter().map(Into::into).collect();
        self.get_type(Type::Enum { cases }, attributes, None)
    }

    pub fn get_union_type(
        &mut self,
        members: BTreeSet<TypeRef>,
        attributes: TypeAttributes,
    ) -> TypeRef {
        self.get_type(Type::Union { members }, attributes, None)
    }

    pub fn get_intersection_type(
        &mut self,
        members: BTreeSet<TypeRef>,
        attributes: TypeAttributes,
    ) -> TypeRef {
        self.get_type(Type::Intersection { members }, attributes, None)
    }

    pub fn add_attributes(&mut self, tref: TypeRef, attributes: TypeAttributes) {
        self.attribute_store.add_attributes(tref, attributes);
    }

    pub fn add_top_level(&mut self, name: &str, tref: TypeRef) {
        tref.assert_serial(self.serial);
        if let Some(existing) = self.top_levels.get(name) {
            assert_internal!(
                *existing == tref,
                "top-level `{name}` already bound to {existing:?}"
            );
            return;
        }
        self.top_levels.insert(name.to_string(), tref);
    }

    pub fn add_top_level_attributes(&mut self, name: &str, attributes: TypeAttributes) {
        self.attribute_store.add_attributes_for_top_level(name, attributes);
    }

    pub fn top_levels(&self) -> &IndexMap<String, TypeRef> {
        &self.top_levels
    }

    pub(crate) fn add_forwarding_intersection(&mut self, forwarding: TypeRef, target: TypeRef) {
        self.commit(forwarding, Type::Intersection { members: BTreeSet::from([target]) });
        self.did_add_forwarding_intersection = true;
    }

    fn commit(&mut self, tref: TypeRef, ty: Type) {
        tref.assert_serial(self.serial);
        let Some(slot) = self.types.get_mut(tref.index()) else {
            internal_error!("type {tref:?} was never reserved");
        };
        if slot.is_some() {
            internal_error!("type {tref:?} defined twice");
        }
        *slot = Some(ty);
    }

    fn canonicalize(&self, ty: Type) -> Type {
        for child in ty.children() {
            child.assert_serial(self.serial);
            assert_internal!(
                child.index() < self.types.len(),
                "child {child:?} points past the end of the graph"
            );
        }
        match ty {
            Type::Primitive { primitive } => Type::primitive(self.string_type_mapping.map(primitive)),
            Type::Class { mut properties } => {
                if self.alphabetize_properties {
                    properties.sort_by(|a, b| a.name.cmp(&b.name));
                }
                Type::Class { properties }
            }
            Type::Enum { cases } => {
                let mut seen = BTreeSet::new();
                let cases = cases.into_iter().filter(|c| seen.insert(c.clone())).collect();
                Type::Enum { cases }
            }
            other => other,
        }
    }

    /// Freeze into an immutable generation.
    ///
    /// Every reserved slot must have been filled by now.
    pub fn finish(self) -> TypeGraph {
        let serial = self.serial;
        let types: Vec<Type> = self
            .types
            .into_iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                Some(ty) => ty,
                None => internal_error!("forwarding reference #{index}@{serial} never resolved"),
            })
            .collect();
        TypeGraph::freeze(
            serial,
            self.options,
            types,
            self.attribute_store,
            self.top_levels,
        )
    }
}

impl TypeLookup for TypeBuilder {
    fn serial(&self) -> u32 {
        self.serial
    }

    fn type_at_index(&self, index: usize) -> Option<&Type> {
        self.types.get(index)?.as_ref()
    }

    fn attributes_at_index(&self, index: usize) -> TypeAttributes {
        self.attribute_store
            .attributes_for_type(TypeRef::new(self.serial, index))
    }
}
