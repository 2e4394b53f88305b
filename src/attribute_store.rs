use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;

use crate::attributes::{AttributeKind, TypeAttributes};
use crate::internal_error;
use crate::type_ref::TypeRef;

/// Attributes of one graph generation.
///
/// Slot `i` holds the attributes of node `i`; an absent slot means "no
/// attributes". The slot array only ever grows.
#[derive(Clone, Debug, Default)]
pub struct AttributeStore {
    serial: u32,
    values: Vec<Option<TypeAttributes>>,
    top_level_values: IndexMap<String, TypeAttributes>,
}

impl AttributeStore {
    pub(crate) fn new(serial: u32) -> Self {
        Self { serial, ..Self::default() }
    }

    pub fn attributes_for_type(&self, ty: TypeRef) -> TypeAttributes {
        ty.assert_serial(self.serial);
        self.values
            .get(ty.index())
            .and_then(Option::as_ref)
            .cloned()
            .unwrap_or_default()
    }

    pub fn attributes_for_top_level(&self, name: &str) -> TypeAttributes {
        self.top_level_values.get(name).cloned().unwrap_or_default()
    }

    pub fn top_level_names(&self) -> impl Iterator<Item = &str> {
        self.top_level_values.keys().map(String::as_str)
    }

    pub fn set<T: 'static>(&mut self, kind: &'static AttributeKind<T>, ty: TypeRef, value: T) {
        self.add_attributes(ty, TypeAttributes::singleton(kind, value));
    }

    pub fn set_for_top_level<T: 'static>(
        &mut self,
        kind: &'static AttributeKind<T>,
        name: &str,
        value: T,
    ) {
        self.add_attributes_for_top_level(name, TypeAttributes::singleton(kind, value));
    }

    /// Merge `attributes` into the node's existing set.
    pub fn add_attributes(&mut self, ty: TypeRef, attributes: TypeAttributes) {
        ty.assert_serial(self.serial);
        if attributes.is_empty() {
            return;
        }
        let index = ty.index();
        if self.values.len() <= index {
            self.values.resize(index + 1, None);
        }
        let slot = &mut self.values[index];
        *slot = Some(match slot.take() {
            Some(existing) => existing.combine(&attributes),
            None => attributes,
        });
    }

    pub fn add_attributes_for_top_level(&mut self, name: &str, attributes: TypeAttributes) {
        if attributes.is_empty() {
            return;
        }
        let merged = match self.top_level_values.get(name) {
            Some(existing) => existing.combine(&attributes),
            None => attributes,
        };
        self.top_level_values.insert(name.to_string(), merged);
    }

    pub fn try_get<T: 'static>(&self, kind: &'static AttributeKind<T>, ty: TypeRef) -> Option<&T> {
        ty.assert_serial(self.serial);
        self.values.get(ty.index())?.as_ref()?.get(kind)
    }

    pub fn get<T: 'static>(&self, kind: &'static AttributeKind<T>, ty: TypeRef) -> &T {
        match self.try_get(kind, ty) {
            Some(value) => value,
            None => internal_error!("attribute `{}` missing on type {ty:?}", kind.name()),
        }
    }

    pub fn try_get_for_top_level<T: 'static>(
        &self,
        kind: &'static AttributeKind<T>,
        name: &str,
    ) -> Option<&T> {
        self.top_level_values.get(name)?.get(kind)
    }

    pub fn get_for_top_level<T: 'static>(&self, kind: &'static AttributeKind<T>, name: &str) -> &T {
        match self.try_get_for_top_level(kind, name) {
            Some(value) => value,
            None => internal_error!("attribute `{}` missing on top-level `{name}`", kind.name()),
        }
    }
}

/// [`AttributeStore`] access bound to a single attribute kind.
///
/// Over `&AttributeStore` it only reads; over `&mut AttributeStore` it can
/// also write.
pub struct AttributeStoreView<S, T: 'static> {
    store: S,
    kind: &'static AttributeKind<T>,
}

impl<S, T: 'static> AttributeStoreView<S, T>
where
    S: Deref<Target = AttributeStore>,
{
    pub fn new(store: S, kind: &'static AttributeKind<T>) -> Self {
        Self { store, kind }
    }

    pub fn try_get(&self, ty: TypeRef) -> Option<&T> {
        self.store.try_get(self.kind, ty)
    }

    pub fn get(&self, ty: TypeRef) -> &T {
        self.store.get(self.kind, ty)
    }

    pub fn try_get_for_top_level(&self, name: &str) -> Option<&T> {
        self.store.try_get_for_top_level(self.kind, name)
    }

    pub fn get_for_top_level(&self, name: &str) -> &T {
        self.store.get_for_top_level(self.kind, name)
    }
}

impl<S, T: 'static> AttributeStoreView<S, T>
where
    S: DerefMut<Target = AttributeStore>,
{
    pub fn set(&mut self, ty: TypeRef, value: T) {
        self.store.set(self.kind, ty, value);
    }

    pub fn set_for_top_level(&mut self, name: &str, value: T) {
        self.store.set_for_top_level(self.kind, name, value);
    }
}
