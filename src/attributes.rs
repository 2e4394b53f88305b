//! Type attributes: typed values attached to nodes or top-level roots.
//!
//! Every attribute kind brings its own combine rule, so merging two sets
//! never has to know what the values mean. Kinds are `static` items and are
//! keyed by name, which therefore has to be unique.
pub mod description;
pub mod names;
pub mod provenance;

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::internal_error;

pub use description::DESCRIPTION;
pub use names::{NAMES, TypeNames};
pub use provenance::{PROVENANCE, ProvenanceSet};

/// Descriptor for one attribute kind with values of type `T`.
pub struct AttributeKind<T> {
    name: &'static str,
    combine: fn(&T, &T) -> T,
    stringify: Option<fn(&T) -> Option<String>>,
    identity: Option<fn(&T) -> String>,
    _value: PhantomData<fn() -> T>,
}

impl<T> AttributeKind<T> {
    pub const fn new(name: &'static str, combine: fn(&T, &T) -> T) -> Self {
        Self {
            name,
            combine,
            stringify: None,
            identity: None,
            _value: PhantomData,
        }
    }

    /// Render values of this kind in debug prints.
    pub const fn with_stringify(mut self, stringify: fn(&T) -> Option<String>) -> Self {
        self.stringify = Some(stringify);
        self
    }

    /// Make values of this kind part of a node's identity, so two nodes that
    /// differ only in this attribute are not merged by the builder.
    pub const fn in_identity(mut self, identity: fn(&T) -> String) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn combine(&self, a: &T, b: &T) -> T {
        (self.combine)(a, b)
    }
}

/// Combine rule for scalar kinds: the later value replaces the earlier one.
pub fn last_write_wins<T: Clone>(_: &T, later: &T) -> T {
    later.clone()
}

type AttributeValue = Rc<dyn Any>;

trait ErasedKind {
    fn name(&self) -> &'static str;
    fn combine_erased(&self, a: &AttributeValue, b: &AttributeValue) -> AttributeValue;
    fn stringify_erased(&self, value: &AttributeValue) -> Option<String>;
    fn identity_erased(&self, value: &AttributeValue) -> Option<String>;
}

impl<T: 'static> AttributeKind<T> {
    fn downcast<'v>(&self, value: &'v AttributeValue) -> &'v T {
        match value.downcast_ref::<T>() {
            Some(v) => v,
            None => internal_error!("attribute `{}` holds a value of the wrong type", self.name),
        }
    }
}

impl<T: 'static> ErasedKind for AttributeKind<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn combine_erased(&self, a: &AttributeValue, b: &AttributeValue) -> AttributeValue {
        Rc::new(self.combine(self.downcast(a), self.downcast(b)))
    }

    fn stringify_erased(&self, value: &AttributeValue) -> Option<String> {
        self.stringify.and_then(|f| f(self.downcast(value)))
    }

    fn identity_erased(&self, value: &AttributeValue) -> Option<String> {
        self.identity.map(|f| f(self.downcast(value)))
    }
}

#[derive(Clone)]
struct Entry {
    kind: &'static dyn ErasedKind,
    value: AttributeValue,
}

/// An immutable, insertion-ordered set of attributes.
///
/// All operations return a new set; values are shared, not copied.
#[derive(Clone, Default)]
pub struct TypeAttributes {
    entries: IndexMap<&'static str, Entry>,
}

impl TypeAttributes {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton<T: 'static>(kind: &'static AttributeKind<T>, value: T) -> Self {
        Self::empty().with(kind, value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get<T: 'static>(&self, kind: &'static AttributeKind<T>) -> Option<&T> {
        self.entries
            .get(kind.name)
            .map(|entry| kind.downcast(&entry.value))
    }

    pub fn contains_kind(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn kind_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Add `value`, combining with an existing value of the same kind.
    pub fn with<T: 'static>(&self, kind: &'static AttributeKind<T>, value: T) -> Self {
        let entry = Entry { kind, value: Rc::new(value) };
        let mut out = self.clone();
        out.merge_entry(kind.name, entry);
        out
    }

    pub fn without(&self, name: &str) -> Self {
        let mut out = self.clone();
        out.entries.shift_remove(name);
        out
    }

    /// Merge two sets; entries of `other` are combined into `self` per kind.
    pub fn combine(&self, other: &TypeAttributes) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        let mut out = self.clone();
        for (name, entry) in &other.entries {
            out.merge_entry(*name, entry.clone());
        }
        out
    }

    pub fn combine_all<'a, I>(sets: I) -> Self
    where
        I: IntoIterator<Item = &'a TypeAttributes>,
    {
        sets.into_iter()
            .fold(Self::empty(), |acc, attrs| acc.combine(attrs))
    }

    fn merge_entry(&mut self, name: &'static str, entry: Entry) {
        match self.entries.get_mut(name) {
            Some(existing) => {
                existing.value = existing.kind.combine_erased(&existing.value, &entry.value);
            }
            None => {
                self.entries.insert(name, entry);
            }
        }
    }

    /// `(kind, rendering)` for every attribute whose kind renders itself.
    pub fn stringified(&self) -> Vec<(&'static str, String)> {
        self.entries
            .values()
            .filter_map(|e| e.kind.stringify_erased(&e.value).map(|s| (e.kind.name(), s)))
            .collect()
    }

    /// The part of this set that takes part in node identity.
    pub fn identity_key(&self) -> Vec<(&'static str, String)> {
        let mut key: Vec<_> = self
            .entries
            .values()
            .filter_map(|e| e.kind.identity_erased(&e.value).map(|s| (e.kind.name(), s)))
            .collect();
        key.sort();
        key
    }
}

impl fmt::Debug for TypeAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, entry) in &self.entries {
            match entry.kind.stringify_erased(&entry.value) {
                Some(s) => map.entry(name, &s),
                None => map.entry(name, &"<opaque>"),
            };
        }
        map.finish()
    }
}
