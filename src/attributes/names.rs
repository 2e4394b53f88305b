use std::collections::BTreeSet;

use super::AttributeKind;

/// Candidate names for a type, gathered from wherever it was seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeNames {
    names: BTreeSet<String>,
}

impl TypeNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// The name a renderer would pick; alphabetically first for determinism.
    pub fn combined_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    fn union(a: &Self, b: &Self) -> Self {
        Self { names: &a.names | &b.names }
    }

    fn render(&self) -> Option<String> {
        if self.names.is_empty() {
            return None;
        }
        Some(self.names.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

pub static NAMES: AttributeKind<TypeNames> =
    AttributeKind::new("names", TypeNames::union).with_stringify(TypeNames::render);
