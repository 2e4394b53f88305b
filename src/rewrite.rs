//! Construction context for deriving one generation from another.
//!
//! Old nodes are reconstituted lazily, starting from the top-levels, so
//! anything unreachable is left behind. A node still being rebuilt when a
//! cycle leads back to it gets a reserved slot that its dependents point at
//! until the node itself is finished.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::attributes::TypeAttributes;
use crate::builder::TypeBuilder;
use crate::type_graph::TypeGraph;
use crate::type_ref::TypeRef;
use crate::types::StringTypeMapping;
use crate::{assert_internal, internal_error};

/// Builds the node that replaces a group of old nodes.
///
/// Called with the group, the rewrite builder, and the forwarding reference
/// reserved for the group's replacement. Returns the replacement.
pub type Replacer<'g> = dyn Fn(&[TypeRef], &mut GraphRewriteBuilder<'g>, TypeRef) -> TypeRef + 'g;

enum Mode<'g> {
    Rewrite {
        groups: Vec<Vec<TypeRef>>,
        group_of: HashMap<usize, usize>,
        replacer: &'g Replacer<'g>,
    },
    Remap {
        map: HashMap<usize, TypeRef>,
        attribute_sources: HashMap<usize, Vec<TypeRef>>,
    },
}

pub struct GraphRewriteBuilder<'g> {
    old: &'g TypeGraph,
    builder: TypeBuilder,
    mode: Mode<'g>,
    reconstituted: HashMap<usize, TypeRef>,
    in_progress: HashSet<usize>,
    placeholders: HashMap<usize, TypeRef>,
    lost_type_attributes: bool,
}

impl<'g> GraphRewriteBuilder<'g> {
    pub(crate) fn for_rewrite(
        old: &'g TypeGraph,
        string_type_mapping: StringTypeMapping,
        alphabetize_properties: bool,
        replacement_groups: &[Vec<TypeRef>],
        replacer: &'g Replacer<'g>,
    ) -> Self {
        let mut group_of = HashMap::new();
        for (group_index, group) in replacement_groups.iter().enumerate() {
            assert_internal!(!group.is_empty(), "replacement group {group_index} is empty");
            for member in group {
                member.assert_serial(old.serial());
                if let Some(previous) = group_of.insert(member.index(), group_index) {
                    if previous != group_index {
                        internal_error!(
                            "type {member:?} is in replacement groups {previous} and {group_index}"
                        );
                    }
                }
            }
        }
        let mode = Mode::Rewrite {
            groups: replacement_groups.to_vec(),
            group_of,
            replacer,
        };
        Self::new(old, string_type_mapping, alphabetize_properties, mode)
    }

    pub(crate) fn for_remap(
        old: &'g TypeGraph,
        string_type_mapping: StringTypeMapping,
        alphabetize_properties: bool,
        map: &IndexMap<TypeRef, TypeRef>,
    ) -> Self {
        let mut attribute_sources: HashMap<usize, Vec<TypeRef>> = HashMap::new();
        for (source, target) in map {
            source.assert_serial(old.serial());
            target.assert_serial(old.serial());
            assert_internal!(
                !map.contains_key(target),
                "remap target {target:?} is itself remapped"
            );
            attribute_sources.entry(target.index()).or_default().push(*source);
        }
        let mode = Mode::Remap {
            map: map.iter().map(|(source, target)| (source.index(), *target)).collect(),
            attribute_sources,
        };
        Self::new(old, string_type_mapping, alphabetize_properties, mode)
    }

    fn new(
        old: &'g TypeGraph,
        string_type_mapping: StringTypeMapping,
        alphabetize_properties: bool,
        mode: Mode<'g>,
    ) -> Self {
        let builder = TypeBuilder::for_generation(
            old.serial() + 1,
            old.options(),
            string_type_mapping,
            alphabetize_properties,
        );
        Self {
            old,
            builder,
            mode,
            reconstituted: HashMap::new(),
            in_progress: HashSet::new(),
            placeholders: HashMap::new(),
            lost_type_attributes: false,
        }
    }

    /// The generation being rewritten.
    pub fn old_graph(&self) -> &'g TypeGraph {
        self.old
    }

    /// The open generation under construction.
    pub fn builder(&mut self) -> &mut TypeBuilder {
        &mut self.builder
    }

    /// Declare that this rewrite drops attributes on purpose, which turns
    /// off the lost-attribute check for it.
    pub fn set_lost_type_attributes(&mut self) {
        self.lost_type_attributes = true;
    }

    pub(crate) fn lost_type_attributes(&self) -> bool {
        self.lost_type_attributes
    }

    pub(crate) fn did_add_forwarding_intersection(&self) -> bool {
        self.builder.did_add_forwarding_intersection()
    }

    /// Attributes of all `old_refs`, combined.
    pub fn combined_attributes(&self, old_refs: &[TypeRef]) -> TypeAttributes {
        let old = self.old;
        let sets: Vec<TypeAttributes> = old_refs.iter().map(|r| old.attributes(*r)).collect();
        TypeAttributes::combine_all(&sets)
    }

    /// The new-generation counterpart of the old node `old_ref`.
    ///
    /// May be a reference whose node is not built yet when `old_ref` sits on
    /// a cycle that is currently being reconstituted.
    pub fn reconstitute(&mut self, old_ref: TypeRef) -> TypeRef {
        let old = self.old;
        old_ref.assert_serial(old.serial());
        let old_ref = self.map_target(old_ref);
        let index = old_ref.index();

        if let Some(&done) = self.reconstituted.get(&index) {
            return done;
        }
        if let Some(group) = self.group_of(index) {
            return self.replace_group(group);
        }
        if self.in_progress.contains(&index) {
            if let Some(&placeholder) = self.placeholders.get(&index) {
                return placeholder;
            }
            let placeholder = self.builder.reserve_type_ref();
            self.placeholders.insert(index, placeholder);
            return placeholder;
        }

        self.in_progress.insert(index);
        let new_type = old.get(old_ref).map_children(|child| self.reconstitute(child));
        self.in_progress.remove(&index);

        let attributes = self.reconstituted_attributes(old_ref);
        let forwarding = self.placeholders.remove(&index);
        let new_ref = match (forwarding, &self.mode) {
            // a remap never folds a node on a cycle into an existing one;
            // merging is left to the fixed point
            (Some(placeholder), Mode::Remap { .. }) => {
                self.builder.define_type(placeholder, new_type, attributes);
                placeholder
            }
            _ => self.builder.get_type(new_type, attributes, forwarding),
        };
        self.reconstituted.insert(index, new_ref);
        new_ref
    }

    fn map_target(&self, old_ref: TypeRef) -> TypeRef {
        match &self.mode {
            Mode::Remap { map, .. } => map.get(&old_ref.index()).copied().unwrap_or(old_ref),
            Mode::Rewrite { .. } => old_ref,
        }
    }

    fn group_of(&self, index: usize) -> Option<usize> {
        match &self.mode {
            Mode::Rewrite { group_of, .. } => group_of.get(&index).copied(),
            Mode::Remap { .. } => None,
        }
    }

    fn reconstituted_attributes(&self, old_ref: TypeRef) -> TypeAttributes {
        let attributes = self.old.attributes(old_ref);
        match &self.mode {
            Mode::Remap { attribute_sources, .. } => match attribute_sources.get(&old_ref.index()) {
                Some(sources) => sources
                    .iter()
                    .fold(attributes, |acc, source| acc.combine(&self.old.attributes(*source))),
                None => attributes,
            },
            Mode::Rewrite { .. } => attributes,
        }
    }

    fn replace_group(&mut self, group: usize) -> TypeRef {
        let (members, replacer) = match &self.mode {
            Mode::Rewrite { groups, replacer, .. } => (groups[group].clone(), *replacer),
            Mode::Remap { .. } => internal_error!("remap has no replacement groups"),
        };
        let forwarding = self.builder.reserve_type_ref();
        for member in &members {
            self.reconstituted.insert(member.index(), forwarding);
        }
        let replacement = replacer(members.as_slice(), self, forwarding);
        replacement.assert_serial(self.old.serial() + 1);
        if replacement != forwarding {
            self.builder.add_forwarding_intersection(forwarding, replacement);
        }
        forwarding
    }

    pub(crate) fn process(&mut self) {
        let old = self.old;
        for (name, old_root) in old.top_levels() {
            let new_root = self.reconstitute(*old_root);
            self.builder.add_top_level(name, new_root);
            self.builder
                .add_top_level_attributes(name, old.attribute_store().attributes_for_top_level(name));
        }

        // groups no root reaches still get their replacer call
        let pending: Vec<usize> = match &self.mode {
            Mode::Rewrite { groups, .. } => (0..groups.len())
                .filter(|&g| !self.reconstituted.contains_key(&groups[g][0].index()))
                .collect(),
            Mode::Remap { .. } => Vec::new(),
        };
        for group in pending {
            self.replace_group(group);
        }
        assert_internal!(self.placeholders.is_empty(), "placeholders left after rewrite");
    }

    pub(crate) fn finish(self) -> TypeGraph {
        self.builder.finish()
    }
}
