//! The frozen, queryable type graph and the transformations that derive a
//! new generation from it.
//!
//! A [`TypeGraph`] never changes once frozen. `rewrite`, `remap`,
//! `garbage_collect` and friends build a fresh generation (serial + 1)
//! through a [`GraphRewriteBuilder`], leaving the old one intact for anyone
//! still holding it.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use once_cell::unsync::OnceCell;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::attribute_store::{AttributeStore, AttributeStoreView};
use crate::attributes::{AttributeKind, NAMES, PROVENANCE, ProvenanceSet, TypeAttributes};
use crate::builder::{GraphOptions, TypeLookup};
use crate::error::{GraphError, Result};
use crate::reach::DependencyGraph;
use crate::rewrite::{GraphRewriteBuilder, Replacer};
use crate::type_ref::TypeRef;
use crate::types::{StringTypeMapping, Type};
use crate::{assert_internal, internal_error};

/// Reachable named types, split by what a renderer emits for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeparatedNamedTypes {
    pub objects: IndexSet<TypeRef>,
    pub enums: IndexSet<TypeRef>,
    pub unions: IndexSet<TypeRef>,
}

struct Frozen {
    serial: u32,
    options: GraphOptions,
    types: Vec<Type>,
    attribute_store: AttributeStore,
    top_levels: IndexMap<String, TypeRef>,
    reachable: OnceCell<IndexSet<TypeRef>>,
    parents: OnceCell<Vec<BTreeSet<TypeRef>>>,
    print_on_rewrite: Cell<bool>,
}

/// One frozen generation of the type graph.
///
/// Cloning is cheap and yields a handle to the same generation.
#[derive(Clone)]
pub struct TypeGraph {
    inner: Rc<Frozen>,
}

impl TypeGraph {
    pub(crate) fn freeze(
        serial: u32,
        options: GraphOptions,
        types: Vec<Type>,
        attribute_store: AttributeStore,
        top_levels: IndexMap<String, TypeRef>,
    ) -> Self {
        for (index, ty) in types.iter().enumerate() {
            for child in ty.children() {
                child.assert_serial(serial);
                assert_internal!(
                    child.index() < types.len(),
                    "type #{index} has dangling child {child:?}"
                );
            }
        }
        for root in top_levels.values() {
            root.assert_serial(serial);
            assert_internal!(root.index() < types.len(), "dangling top-level {root:?}");
        }
        Self {
            inner: Rc::new(Frozen {
                serial,
                options,
                types,
                attribute_store,
                top_levels,
                reachable: OnceCell::new(),
                parents: OnceCell::new(),
                print_on_rewrite: Cell::new(false),
            }),
        }
    }

    /// Whether both handles refer to the very same generation.
    pub fn ptr_eq(a: &TypeGraph, b: &TypeGraph) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn serial(&self) -> u32 {
        self.inner.serial
    }

    pub fn options(&self) -> GraphOptions {
        self.inner.options
    }

    /// Number of stored nodes, reachable or not.
    pub fn type_count(&self) -> usize {
        self.inner.types.len()
    }

    pub fn type_at_index(&self, index: usize) -> &Type {
        match self.inner.types.get(index) {
            Some(ty) => ty,
            None => internal_error!("no type #{index} in generation {}", self.serial()),
        }
    }

    pub fn at_index(&self, index: usize) -> (&Type, TypeAttributes) {
        (self.type_at_index(index), self.attributes_at_index(index))
    }

    pub fn type_ref_at_index(&self, index: usize) -> TypeRef {
        self.type_at_index(index);
        TypeRef::new(self.serial(), index)
    }

    pub fn get(&self, tref: TypeRef) -> &Type {
        tref.assert_serial(self.serial());
        self.type_at_index(tref.index())
    }

    pub fn attributes(&self, tref: TypeRef) -> TypeAttributes {
        self.inner.attribute_store.attributes_for_type(tref)
    }

    pub fn attribute_store(&self) -> &AttributeStore {
        &self.inner.attribute_store
    }

    pub fn attribute_view<T: 'static>(
        &self,
        kind: &'static AttributeKind<T>,
    ) -> AttributeStoreView<&AttributeStore, T> {
        AttributeStoreView::new(&self.inner.attribute_store, kind)
    }

    /// The name a renderer would use for `tref`, if it has any.
    pub fn combined_name(&self, tref: TypeRef) -> Option<&str> {
        self.inner
            .attribute_store
            .try_get(&NAMES, tref)
            .and_then(|names| names.combined_name())
    }

    pub fn top_levels(&self) -> &IndexMap<String, TypeRef> {
        &self.inner.top_levels
    }

    /// Depth-first from every root in root order, children in enumeration
    /// order; each node is visited once even on cycles.
    fn visit_reachable(&self, mut visit: impl FnMut(TypeRef, &Type)) {
        let mut visited = vec![false; self.type_count()];
        let mut stack: Vec<TypeRef> = self.top_levels().values().rev().copied().collect();
        while let Some(tref) = stack.pop() {
            if std::mem::replace(&mut visited[tref.index()], true) {
                continue;
            }
            let ty = self.get(tref);
            visit(tref, ty);
            stack.extend(ty.children().into_iter().rev());
        }
    }

    /// Reachable nodes satisfying `predicate`, deduplicated, in traversal
    /// order.
    pub fn all_types_matching(&self, mut predicate: impl FnMut(&Type) -> bool) -> IndexSet<TypeRef> {
        let mut out = IndexSet::new();
        self.visit_reachable(|tref, ty| {
            if predicate(ty) {
                out.insert(tref);
            }
        });
        out
    }

    pub fn all_named_types(&self) -> IndexSet<TypeRef> {
        self.all_types_matching(Type::is_named)
    }

    pub fn all_named_types_separated(&self) -> SeparatedNamedTypes {
        let mut separated = SeparatedNamedTypes::default();
        for tref in self.all_named_types() {
            match self.get(tref) {
                Type::Class { .. } => separated.objects.insert(tref),
                Type::Enum { .. } => separated.enums.insert(tref),
                Type::Union { .. } => separated.unions.insert(tref),
                other => internal_error!("{} is not a named kind", other.kind()),
            };
        }
        separated
    }

    /// Every node reachable from a top-level.
    pub fn all_types_unordered(&self) -> &IndexSet<TypeRef> {
        self.inner.reachable.get_or_init(|| self.all_types_matching(|_| true))
    }

    /// Nodes that have `tref` as a child.
    pub fn parents_of_type(&self, tref: TypeRef) -> &BTreeSet<TypeRef> {
        tref.assert_serial(self.serial());
        let parents = self.inner.parents.get_or_init(|| {
            let mut parents = vec![BTreeSet::new(); self.type_count()];
            for (index, ty) in self.inner.types.iter().enumerate() {
                let parent = TypeRef::new(self.serial(), index);
                for child in ty.children() {
                    parents[child.index()].insert(parent);
                }
            }
            parents
        });
        &parents[tref.index()]
    }

    /// Reachable nodes with an edge from each node to its children.
    pub fn dependency_graph(&self) -> DependencyGraph<TypeRef> {
        DependencyGraph::new(
            self.all_types_unordered().iter().copied(),
            false,
            |tref| self.get(tref).children(),
        )
    }

    /// Named types grouped so that each group only depends on earlier
    /// groups; a group with several members is a cycle that needs forward
    /// declarations.
    pub fn declaration_order(&self) -> Vec<Vec<TypeRef>> {
        self.dependency_graph()
            .strongly_connected_components()
            .into_iter()
            .map(|component| {
                component
                    .into_iter()
                    .filter(|tref| self.get(*tref).is_named())
                    .collect::<Vec<_>>()
            })
            .filter(|component| !component.is_empty())
            .collect()
    }

    // ---------------------------------------------------------------------
    // transformations
    // ---------------------------------------------------------------------

    /// Collapse each replacement group into one node built by `replacer`.
    ///
    /// `replacer` runs once per group with the group's old nodes, the
    /// builder of the new generation and a forwarding reference that other
    /// new nodes may already point at. With no groups and `force` unset the
    /// graph itself is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn rewrite<'g>(
        &'g self,
        title: &str,
        string_type_mapping: &StringTypeMapping,
        alphabetize_properties: bool,
        replacement_groups: &[Vec<TypeRef>],
        debug_print: bool,
        replacer: &'g Replacer<'g>,
        force: bool,
    ) -> Result<TypeGraph> {
        if replacement_groups.is_empty() && !force {
            return Ok(self.clone());
        }
        let print = self.begin_transformation(title, debug_print);
        let mut builder = GraphRewriteBuilder::for_rewrite(
            self,
            string_type_mapping.clone(),
            alphabetize_properties,
            replacement_groups,
            replacer,
        );
        builder.process();
        let lost_type_attributes = builder.lost_type_attributes();
        let needs_indirection_removal = builder.did_add_forwarding_intersection();
        let graph = builder.finish();
        self.end_transformation(title, &graph, print);

        if !lost_type_attributes {
            self.check_lost_type_attributes(title, &graph)?;
        }
        if needs_indirection_removal {
            return graph.remove_indirection_intersections(alphabetize_properties, debug_print);
        }
        Ok(graph)
    }

    /// Substitute nodes directly: every occurrence of a key of `map` is
    /// replaced by its value, whose attributes absorb the key's.
    pub fn remap(
        &self,
        title: &str,
        string_type_mapping: &StringTypeMapping,
        alphabetize_properties: bool,
        map: &IndexMap<TypeRef, TypeRef>,
        debug_print: bool,
        force: bool,
    ) -> Result<TypeGraph> {
        if map.is_empty() && !force {
            return Ok(self.clone());
        }
        let print = self.begin_transformation(title, debug_print);
        let mut builder = GraphRewriteBuilder::for_remap(
            self,
            string_type_mapping.clone(),
            alphabetize_properties,
            map,
        );
        builder.process();
        assert_internal!(
            !builder.did_add_forwarding_intersection(),
            "remap `{title}` needed a forwarding intersection"
        );
        let lost_type_attributes = builder.lost_type_attributes();
        let graph = builder.finish();
        self.end_transformation(title, &graph, print);

        if !lost_type_attributes {
            self.check_lost_type_attributes(title, &graph)?;
        }
        Ok(graph)
    }

    /// Rebuild from the roots only, dropping every unreachable node.
    pub fn garbage_collect(&self, alphabetize_properties: bool, debug_print: bool) -> Result<TypeGraph> {
        self.remap(
            "garbage collect",
            &StringTypeMapping::preserving(),
            alphabetize_properties,
            &IndexMap::new(),
            debug_print,
            true,
        )
    }

    /// Rebuild until the reachable node count stops shrinking.
    pub fn rewrite_fixed_point(&self, alphabetize_properties: bool, debug_print: bool) -> Result<TypeGraph> {
        let mut graph = self.clone();
        let mut count = graph.all_types_unordered().len();
        let mut iteration = 0;
        loop {
            iteration += 1;
            let next = graph.rewrite(
                "fixed point",
                &StringTypeMapping::preserving(),
                alphabetize_properties,
                &[],
                debug_print,
                &|_, _, _| internal_error!("fixed-point rewrite has no groups to replace"),
                true,
            )?;
            let next_count = next.all_types_unordered().len();
            trace!(iteration, before = count, after = next_count, "fixed-point iteration");
            if next_count == count {
                return Ok(next);
            }
            graph = next;
            count = next_count;
        }
    }

    /// Replace every single-member intersection by the node it forwards to.
    pub fn remove_indirection_intersections(
        &self,
        alphabetize_properties: bool,
        debug_print: bool,
    ) -> Result<TypeGraph> {
        let indirections: IndexMap<TypeRef, TypeRef> = self
            .all_types_unordered()
            .iter()
            .filter_map(|&tref| self.get(tref).indirection_target().map(|target| (tref, target)))
            .collect();
        if indirections.is_empty() {
            return Ok(self.clone());
        }

        let chains = DependencyGraph::new(indirections.keys().copied(), false, |tref| {
            indirections
                .get(&tref)
                .filter(|target| indirections.contains_key(*target))
                .map(|target| vec![*target])
                .unwrap_or_default()
        });
        assert_internal!(!chains.is_cyclic(), "cycle of indirection intersections");

        let map: IndexMap<TypeRef, TypeRef> = indirections
            .keys()
            .map(|&tref| {
                let mut target = indirections[&tref];
                while let Some(next) = indirections.get(&target) {
                    target = *next;
                }
                (tref, target)
            })
            .collect();
        self.remap(
            "remove indirection intersections",
            &StringTypeMapping::preserving(),
            alphabetize_properties,
            &map,
            debug_print,
            false,
        )
    }

    fn begin_transformation(&self, title: &str, debug_print: bool) -> bool {
        let print = debug_print || self.inner.print_on_rewrite.get();
        if print {
            eprintln!("\n# {title}: before (generation {})", self.serial());
            self.print_graph();
        }
        print
    }

    fn end_transformation(&self, title: &str, graph: &TypeGraph, print: bool) {
        graph.inner.print_on_rewrite.set(self.inner.print_on_rewrite.get());
        debug!(
            title,
            from = self.serial(),
            to = graph.serial(),
            before = self.type_count(),
            after = graph.type_count(),
            "derived graph generation"
        );
        if print {
            eprintln!("\n# {title}: after (generation {})", graph.serial());
            graph.print_graph();
        }
    }

    fn all_provenance(&self) -> ProvenanceSet {
        let view = self.attribute_view(&PROVENANCE);
        self.all_types_unordered()
            .iter()
            .filter_map(|&tref| view.try_get(tref))
            .flatten()
            .copied()
            .collect()
    }

    fn check_lost_type_attributes(&self, title: &str, new_graph: &TypeGraph) -> Result<()> {
        if !self.options().track_provenance {
            return Ok(());
        }
        let new_provenance = new_graph.all_provenance();
        let missing: Vec<u32> = self
            .all_provenance()
            .difference(&new_provenance)
            .copied()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        warn!(title, count = missing.len(), ?missing, "type attributes not propagated");
        Err(GraphError::AttributesNotPropagated {
            title: title.to_string(),
            count: missing.len(),
            missing,
        })
    }

    // ---------------------------------------------------------------------
    // debugging
    // ---------------------------------------------------------------------

    /// Print rewrites and remaps derived from this graph (and from the
    /// generations derived from those) before and after they run.
    pub fn set_print_on_rewrite(&self) {
        self.inner.print_on_rewrite.set(true);
    }

    /// One line per node: index, kind, name, children, attributes.
    pub fn render_graph(&self) -> String {
        let mut out = String::new();
        for (name, root) in self.top_levels() {
            out.push_str(&format!("top-level {name}: {}\n", root.index()));
        }
        for (index, ty) in self.inner.types.iter().enumerate() {
            let tref = TypeRef::new(self.serial(), index);
            out.push_str(&format!("{index}: {}", ty.kind()));
            if let Some(name) = self.combined_name(tref) {
                out.push_str(&format!(" {name}"));
            }
            let children = ty.children();
            if !children.is_empty() {
                let indices: Vec<String> = children.iter().map(|c| c.index().to_string()).collect();
                out.push_str(&format!(" -> {}", indices.join(" ")));
            }
            for (kind, value) in self.attributes(tref).stringified() {
                out.push_str(&format!(" | {kind}: {value}"));
            }
            out.push('\n');
        }
        out
    }

    pub fn print_graph(&self) {
        eprint!("{}", self.render_graph());
    }

    /// Serializable snapshot of the whole generation.
    pub fn dump(&self) -> GraphDump {
        GraphDump {
            serial: self.serial(),
            top_levels: self
                .top_levels()
                .iter()
                .map(|(name, root)| (name.clone(), root.index()))
                .collect(),
            types: self
                .inner
                .types
                .iter()
                .enumerate()
                .map(|(index, ty)| {
                    let tref = TypeRef::new(self.serial(), index);
                    TypeDump {
                        index,
                        name: self.combined_name(tref).map(str::to_string),
                        ty: ty.clone(),
                        attributes: self
                            .attributes(tref)
                            .stringified()
                            .into_iter()
                            .map(|(kind, value)| (kind.to_string(), value))
                            .collect(),
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Debug for TypeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeGraph")
            .field("serial", &self.serial())
            .field("top_levels", self.top_levels())
            .field("types", &self.inner.types)
            .finish()
    }
}

impl TypeLookup for TypeGraph {
    fn serial(&self) -> u32 {
        self.inner.serial
    }

    fn type_at_index(&self, index: usize) -> Option<&Type> {
        self.inner.types.get(index)
    }

    fn attributes_at_index(&self, index: usize) -> TypeAttributes {
        self.attributes(TypeRef::new(self.serial(), index))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphDump {
    pub serial: u32,
    pub top_levels: IndexMap<String, usize>,
    pub types: Vec<TypeDump>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeDump {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub ty: Type,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::TypeNames;
    use crate::builder::TypeBuilder;
    use crate::types::{ClassProperty, PrimitiveKind};
    use pretty_assertions::assert_eq;

    fn names(name: &str) -> TypeAttributes {
        TypeAttributes::singleton(&NAMES, TypeNames::new([name]))
    }

    fn prop(name: &str, ty: TypeRef) -> ClassProperty {
        ClassProperty { name: name.to_string(), ty, optional: false }
    }

    fn class(b: &mut TypeBuilder, name: &str, props: &[(&str, TypeRef)]) -> TypeRef {
        let properties = props.iter().map(|(n, t)| prop(n, *t)).collect();
        b.get_class_type(properties, names(name))
    }

    fn no_replacement(_: &[TypeRef], _: &mut GraphRewriteBuilder<'_>, _: TypeRef) -> TypeRef {
        unreachable!("no groups were given")
    }

    struct TwoClasses {
        graph: TypeGraph,
        string: TypeRef,
        a: TypeRef,
        b: TypeRef,
        parent: TypeRef,
    }

    /// `Root -> Parent { a: A, b: B }`, with `A { x: string }` and
    /// `B { y: string }`.
    fn two_classes(options: GraphOptions) -> TwoClasses {
        let mut b = TypeBuilder::new(options);
        let string = b.get_primitive_type(PrimitiveKind::String, TypeAttributes::empty());
        let a = class(&mut b, "A", &[("x", string)]);
        let bb = class(&mut b, "B", &[("y", string)]);
        let parent = class(&mut b, "Parent", &[("a", a), ("b", bb)]);
        b.add_top_level("Root", parent);
        TwoClasses { graph: b.finish(), string, a, b: bb, parent }
    }

    #[test]
    fn rewrite_without_groups_returns_the_same_graph() {
        let g = two_classes(GraphOptions::default()).graph;
        let same = g
            .rewrite("noop", &StringTypeMapping::preserving(), false, &[], false, &no_replacement, false)
            .unwrap();
        assert!(TypeGraph::ptr_eq(&g, &same));

        let remapped = g
            .remap("noop", &StringTypeMapping::preserving(), false, &IndexMap::new(), false, false)
            .unwrap();
        assert!(TypeGraph::ptr_eq(&g, &remapped));
    }

    #[test]
    fn named_types_follow_traversal_order() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let c = b.get_primitive_type(PrimitiveKind::String, TypeAttributes::empty());
        let bb = class(&mut b, "B", &[("c", c)]);
        let a = class(&mut b, "A", &[("b", bb)]);
        b.add_top_level("R", a);
        let g = b.finish();

        let named: Vec<TypeRef> = g.all_named_types().into_iter().collect();
        assert_eq!(named, vec![a, bb]);
        let separated = g.all_named_types_separated();
        assert_eq!(separated.objects.len(), 2);
        assert!(separated.enums.is_empty() && separated.unions.is_empty());

        // repoint the root at B; A becomes unreachable and disappears
        let repointed = g
            .remap(
                "repoint",
                &StringTypeMapping::preserving(),
                false,
                &IndexMap::from([(a, bb)]),
                false,
                false,
            )
            .unwrap();
        let collected = repointed.garbage_collect(false, false).unwrap();
        assert_eq!(collected.type_count(), 2);
        let root = collected.top_levels()["R"];
        assert!(matches!(collected.get(root), Type::Class { properties } if properties[0].name == "c"));
        // A's attributes were merged into B
        assert_eq!(collected.attribute_view(&NAMES).get(root).names().len(), 2);
        assert_eq!(collected.serial(), 2);
    }

    #[test]
    fn garbage_collect_drops_unreachable_nodes() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let int = b.get_primitive_type(PrimitiveKind::Integer, TypeAttributes::empty());
        b.get_primitive_type(PrimitiveKind::Bool, TypeAttributes::empty());
        let root = class(&mut b, "Root", &[("n", int)]);
        b.add_top_level("Root", root);
        let g = b.finish();
        assert_eq!(g.type_count(), 3);
        assert_eq!(g.all_types_unordered().len(), 2);

        let collected = g.garbage_collect(false, false).unwrap();
        assert!(!TypeGraph::ptr_eq(&g, &collected));
        assert_eq!(collected.type_count(), 2);
        assert_eq!(collected.all_types_unordered().len(), 2);
        assert_eq!(collected.serial(), g.serial() + 1);
        // the old generation is untouched
        assert_eq!(g.type_count(), 3);
    }

    #[test]
    fn cycles_are_traversed_and_preserved() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let fa = b.reserve_type_ref();
        let fb = b.reserve_type_ref();
        b.get_type(Type::Class { properties: vec![prop("a", fa)] }, names("B"), Some(fb));
        b.get_type(Type::Class { properties: vec![prop("b", fb)] }, names("A"), Some(fa));
        let root = class(&mut b, "R", &[("first", fa)]);
        b.add_top_level("R", root);
        let g = b.finish();

        let named: Vec<TypeRef> = g.all_named_types().into_iter().collect();
        assert_eq!(named, vec![root, fa, fb]);
        assert_eq!(g.declaration_order(), vec![vec![fa, fb], vec![root]]);
        assert_eq!(g.parents_of_type(fa), &BTreeSet::from([fb, root]));
        assert!(g.dependency_graph().is_cyclic());

        let collected = g.garbage_collect(false, false).unwrap();
        assert_eq!(collected.type_count(), 3);
        let new_root = collected.top_levels()["R"];
        let Type::Class { properties } = collected.get(new_root) else {
            panic!("root is not a class");
        };
        let a = properties[0].ty;
        let b_ref = collected.get(a).children()[0];
        assert_eq!(collected.get(b_ref).children(), vec![a]);
        assert_eq!(collected.combined_name(a), Some("A"));
        assert_eq!(collected.combined_name(b_ref), Some("B"));
    }

    #[test]
    fn group_is_replaced_and_parents_repointed() {
        let TwoClasses { graph, string, a, b, .. } = two_classes(GraphOptions { track_provenance: true });
        let replacer = |group: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| {
            let z = rb.reconstitute(string);
            let attributes = rb.combined_attributes(group);
            rb.builder()
                .get_type(Type::Class { properties: vec![prop("z", z)] }, attributes, Some(fwd))
        };
        let new = graph
            .rewrite("merge", &StringTypeMapping::preserving(), false, &[vec![a, b]], false, &replacer, false)
            .unwrap();

        assert_eq!(new.serial(), 1);
        assert_eq!(new.type_count(), 3);
        let parent = new.top_levels()["Root"];
        let children = new.get(parent).children();
        assert_eq!(children[0], children[1]);
        let d = children[0];
        assert!(matches!(new.get(d), Type::Class { properties } if properties[0].name == "z"));
        assert_eq!(new.parents_of_type(d), &BTreeSet::from([parent]));
        let view = new.attribute_view(&NAMES);
        let merged: Vec<&str> = view.get(d).names().iter().map(String::as_str).collect();
        assert_eq!(merged, vec!["A", "B"]);
        assert_eq!(graph.all_types_unordered().len(), 4);
    }

    #[test]
    fn replacement_by_existing_node_leaves_no_indirections() {
        let TwoClasses { graph, string, a, b, .. } = two_classes(GraphOptions::default());
        let replacer =
            |_: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, _: TypeRef| rb.reconstitute(string);
        let new = graph
            .rewrite("to string", &StringTypeMapping::preserving(), false, &[vec![a, b]], false, &replacer, false)
            .unwrap();

        // rewrite, then the indirection-removing remap
        assert_eq!(new.serial(), 2);
        assert!(new
            .all_types_matching(|ty| matches!(ty, Type::Intersection { .. }))
            .is_empty());
        let parent = new.top_levels()["Root"];
        for child in new.get(parent).children() {
            assert_eq!(new.get(child), &Type::primitive(PrimitiveKind::String));
        }
        assert_eq!(new.type_count(), 2);
    }

    #[test]
    fn dropped_provenance_is_reported() {
        let TwoClasses { graph, string, a, b, .. } = two_classes(GraphOptions { track_provenance: true });
        // keeps the string node reachable but drops what A and B carried
        let replacer = |_: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| {
            let z = rb.reconstitute(string);
            rb.builder()
                .get_type(Type::Class { properties: vec![prop("z", z)] }, TypeAttributes::empty(), Some(fwd))
        };
        let err = graph
            .rewrite("forgetful", &StringTypeMapping::preserving(), false, &[vec![a, b]], false, &replacer, false)
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::AttributesNotPropagated {
                title: "forgetful".to_string(),
                count: 2,
                missing: vec![1, 2],
            }
        );
    }

    #[test]
    fn markers_of_nodes_no_longer_reachable_are_reported_too() {
        let TwoClasses { graph, a, b, .. } = two_classes(GraphOptions { track_provenance: true });
        let replacer = |_: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| {
            rb.builder().get_type(Type::Enum { cases: vec!["x".into()] }, TypeAttributes::empty(), Some(fwd))
        };
        let err = graph
            .rewrite("forgetful", &StringTypeMapping::preserving(), false, &[vec![a, b]], false, &replacer, false)
            .unwrap_err();
        // the string node only hung off A and B
        assert_eq!(
            err,
            GraphError::AttributesNotPropagated {
                title: "forgetful".to_string(),
                count: 3,
                missing: vec![0, 1, 2],
            }
        );
    }

    #[test]
    fn declared_attribute_loss_is_not_reported() {
        let TwoClasses { graph, a, b, .. } = two_classes(GraphOptions { track_provenance: true });
        let replacer = |_: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| {
            rb.set_lost_type_attributes();
            rb.builder().get_type(Type::Enum { cases: vec!["x".into()] }, TypeAttributes::empty(), Some(fwd))
        };
        let new = graph
            .rewrite("forgetful", &StringTypeMapping::preserving(), false, &[vec![a, b]], false, &replacer, false)
            .unwrap();
        assert_eq!(new.all_named_types_separated().enums.len(), 1);
    }

    #[test]
    fn unreachable_group_still_gets_replaced() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let int = b.get_primitive_type(PrimitiveKind::Integer, TypeAttributes::empty());
        let orphan = class(&mut b, "Orphan", &[("n", int)]);
        b.add_top_level("Root", int);
        let g = b.finish();

        let calls = Cell::new(0);
        let replacer = |_: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, _: TypeRef| {
            calls.set(calls.get() + 1);
            rb.reconstitute(int)
        };
        g.rewrite("orphan", &StringTypeMapping::preserving(), false, &[vec![orphan]], false, &replacer, false)
            .unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn string_mapping_collapses_identical_classes() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let string = b.get_primitive_type(PrimitiveKind::String, TypeAttributes::empty());
        let date = b.get_primitive_type(PrimitiveKind::Date, TypeAttributes::empty());
        let c1 = class(&mut b, "C1", &[("x", string)]);
        let c2 = class(&mut b, "C2", &[("x", date)]);
        let root = class(&mut b, "Root", &[("a", c1), ("b", c2)]);
        b.add_top_level("Root", root);
        let g = b.finish();
        assert_eq!(g.all_types_unordered().len(), 5);

        let strings = g
            .rewrite("strings", &StringTypeMapping::all_strings(), false, &[], false, &no_replacement, true)
            .unwrap();
        assert_eq!(strings.type_count(), 3);
        let root = strings.top_levels()["Root"];
        let children = strings.get(root).children();
        assert_eq!(children[0], children[1]);
        assert_eq!(strings.combined_name(children[0]), Some("C1"));
    }

    #[test]
    fn fixed_point_settles_on_reachable_nodes() {
        let mut b = TypeBuilder::new(GraphOptions { track_provenance: true });
        let int = b.get_primitive_type(PrimitiveKind::Integer, TypeAttributes::empty());
        let items = b.get_array_type(int, TypeAttributes::empty());
        b.get_map_type(int, TypeAttributes::empty());
        let root = class(&mut b, "Root", &[("items", items)]);
        b.add_top_level("Root", root);
        let g = b.finish();

        let settled = g.rewrite_fixed_point(false, false).unwrap();
        assert_eq!(settled.type_count(), 3);
        assert_eq!(settled.all_types_unordered().len(), 3);
        let again = settled.rewrite_fixed_point(false, false).unwrap();
        assert_eq!(again.all_types_unordered().len(), 3);
        assert!(again.serial() > settled.serial());
    }

    /// `X { a: Y, b: N }` and `W { b: N, a: Y }` with `Y = X | W`, rooted
    /// at X. The two classes only become identical once properties are
    /// sorted, and both sit on a cycle through Y.
    fn twin_classes_on_a_cycle() -> TypeGraph {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let null = b.get_primitive_type(PrimitiveKind::Null, TypeAttributes::empty());
        let fx = b.reserve_type_ref();
        let fw = b.reserve_type_ref();
        let y = b.get_union_type(BTreeSet::from([fx, fw]), names("Y"));
        b.get_type(Type::Class { properties: vec![prop("a", y), prop("b", null)] }, names("X"), Some(fx));
        b.get_type(Type::Class { properties: vec![prop("b", null), prop("a", y)] }, names("W"), Some(fw));
        b.add_top_level("Root", fx);
        b.finish()
    }

    fn intersections(graph: &TypeGraph) -> usize {
        graph
            .all_types_matching(|ty| matches!(ty, Type::Intersection { .. }))
            .len()
    }

    #[test]
    fn collecting_with_sorted_properties_keeps_cyclic_twins_apart() {
        let g = twin_classes_on_a_cycle();
        let collected = g.garbage_collect(true, false).unwrap();
        assert_eq!(collected.type_count(), 4);
        assert_eq!(intersections(&collected), 0);
        let root = collected.top_levels()["Root"];
        let Type::Class { properties } = collected.get(root) else {
            panic!("root is not a class");
        };
        let order: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(collected.combined_name(root), Some("X"));
    }

    #[test]
    fn remap_onto_a_node_on_a_cycle() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let null = b.get_primitive_type(PrimitiveKind::Null, TypeAttributes::empty());
        let fx = b.reserve_type_ref();
        let fw = b.reserve_type_ref();
        let y = b.get_union_type(BTreeSet::from([fx, fw]), names("Y"));
        let z = b.get_union_type(BTreeSet::from([fx, fw, null]), names("Z"));
        b.get_type(Type::Class { properties: vec![prop("a", y), prop("b", z)] }, names("X"), Some(fx));
        b.get_type(Type::Class { properties: vec![prop("b", z), prop("a", y)] }, names("W"), Some(fw));
        b.add_top_level("Root", fx);
        let g = b.finish();

        let folded = g
            .remap("fold", &StringTypeMapping::preserving(), true, &IndexMap::from([(z, y)]), false, false)
            .unwrap();
        assert_eq!(intersections(&folded), 0);
        let root = folded.top_levels()["Root"];
        let children = folded.get(root).children();
        assert_eq!(children[0], children[1]);
        let view = folded.attribute_view(&NAMES);
        let union_names: Vec<&str> = view.get(children[0]).names().iter().map(String::as_str).collect();
        assert_eq!(union_names, vec!["Y", "Z"]);
    }

    #[test]
    fn fixed_point_merges_across_iterations() {
        let g = twin_classes_on_a_cycle();
        assert_eq!(g.all_types_unordered().len(), 4);

        // first pass folds X into W behind an indirection, the second one
        // sees no further change
        let settled = g.rewrite_fixed_point(true, false).unwrap();
        assert_eq!(settled.all_types_unordered().len(), 3);
        assert_eq!(settled.serial(), 3);
        assert_eq!(intersections(&settled), 0);
        let root = settled.top_levels()["Root"];
        let view = settled.attribute_view(&NAMES);
        let merged: Vec<&str> = view.get(root).names().iter().map(String::as_str).collect();
        assert_eq!(merged, vec!["W", "X"]);

        let again = settled.rewrite_fixed_point(true, false).unwrap();
        assert_eq!(again.all_types_unordered().len(), 3);
        assert_eq!(again.serial(), settled.serial() + 1);
    }

    #[test]
    fn group_on_a_cycle_becomes_self_referential() {
        let mut b = TypeBuilder::new(GraphOptions { track_provenance: true });
        let fa = b.reserve_type_ref();
        let fb = b.reserve_type_ref();
        b.get_type(Type::Class { properties: vec![prop("next", fa)] }, names("B"), Some(fb));
        b.get_type(Type::Class { properties: vec![prop("next", fb)] }, names("A"), Some(fa));
        let root = class(&mut b, "R", &[("first", fa)]);
        b.add_top_level("R", root);
        let g = b.finish();

        let calls = Cell::new(0);
        let replacer = |group: &[TypeRef], rb: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| {
            calls.set(calls.get() + 1);
            let old = rb.old_graph();
            // the member's successor is in the group, so this is `fwd`
            let next = rb.reconstitute(old.get(group[0]).children()[0]);
            assert_eq!(next, fwd);
            let attributes = rb.combined_attributes(group);
            rb.builder()
                .get_type(Type::Class { properties: vec![prop("next", next)] }, attributes, Some(fwd))
        };
        let new = g
            .rewrite("merge cycle", &StringTypeMapping::preserving(), false, &[vec![fa, fb]], false, &replacer, false)
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(new.serial(), 1);
        assert_eq!(intersections(&new), 0);
        let merged = new.get(new.top_levels()["R"]).children()[0];
        assert_eq!(new.get(merged).children(), vec![merged]);
        assert_eq!(new.parents_of_type(merged).len(), 2);
        assert_eq!(new.all_types_unordered().len(), 2);
        let view = new.attribute_view(&NAMES);
        let merged_names: Vec<&str> = view.get(merged).names().iter().map(String::as_str).collect();
        assert_eq!(merged_names, vec!["A", "B"]);
    }

    #[test]
    fn alphabetizing_rewrite_sorts_properties() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let int = b.get_primitive_type(PrimitiveKind::Integer, TypeAttributes::empty());
        let root = class(&mut b, "Root", &[("zeta", int), ("alpha", int)]);
        b.add_top_level("Root", root);
        let g = b.finish();

        let sorted = g.garbage_collect(true, false).unwrap();
        let Type::Class { properties } = sorted.get(sorted.top_levels()["Root"]) else {
            panic!("root is not a class");
        };
        let order: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec!["alpha", "zeta"]);
    }

    #[test]
    fn render_lists_roots_and_nodes() {
        let mut b = TypeBuilder::new(GraphOptions::default());
        let string = b.get_primitive_type(PrimitiveKind::String, TypeAttributes::empty());
        let root = class(&mut b, "Person", &[("name", string)]);
        b.add_top_level("Root", root);
        let g = b.finish();
        assert_eq!(
            g.render_graph(),
            "top-level Root: 1\n0: string\n1: class Person -> 0 | names: Person\n"
        );

        let dump = serde_json::to_value(g.dump()).unwrap();
        assert_eq!(dump["top_levels"]["Root"], 1);
        assert_eq!(dump["types"][1]["kind"], "class");
        assert_eq!(dump["types"][1]["name"], "Person");
        assert_eq!(dump["types"][0]["primitive"], "string");
    }

    #[test]
    #[should_panic(expected = "is itself remapped")]
    fn chained_remap_is_fatal() {
        let TwoClasses { graph, string, a, b, .. } = two_classes(GraphOptions::default());
        let map = IndexMap::from([(a, b), (b, string)]);
        let _ = graph.remap("chain", &StringTypeMapping::preserving(), false, &map, false, false);
    }

    #[test]
    #[should_panic(expected = "replacement groups")]
    fn overlapping_groups_are_fatal() {
        let TwoClasses { graph, a, b, .. } = two_classes(GraphOptions::default());
        let replacer = |_: &[TypeRef], _: &mut GraphRewriteBuilder<'_>, fwd: TypeRef| fwd;
        let _ = graph.rewrite(
            "overlap",
            &StringTypeMapping::preserving(),
            false,
            &[vec![a], vec![a, b]],
            false,
            &replacer,
            false,
        );
    }

    #[test]
    #[should_panic(expected = "internal error")]
    fn reference_from_another_generation_is_fatal() {
        let TwoClasses { graph, parent, .. } = two_classes(GraphOptions::default());
        let next = graph.garbage_collect(false, false).unwrap();
        next.get(parent);
    }
}
