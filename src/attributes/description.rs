use std::collections::BTreeSet;

use super::AttributeKind;

fn union(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a | b
}

fn render(set: &BTreeSet<String>) -> Option<String> {
    set.first().map(|first| {
        if set.len() > 1 {
            format!("{first} (+{} more)", set.len() - 1)
        } else {
            first.clone()
        }
    })
}

/// Free-form documentation collected for a type or a top-level.
pub static DESCRIPTION: AttributeKind<BTreeSet<String>> =
    AttributeKind::new("description", union).with_stringify(render);
