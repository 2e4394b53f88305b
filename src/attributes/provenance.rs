use std::collections::BTreeSet;

use super::AttributeKind;

/// Origin markers of a type. Only used to audit rewrites.
pub type ProvenanceSet = BTreeSet<u32>;

fn union(a: &ProvenanceSet, b: &ProvenanceSet) -> ProvenanceSet {
    a | b
}

fn render(set: &ProvenanceSet) -> Option<String> {
    let markers: Vec<String> = set.iter().map(u32::to_string).collect();
    Some(markers.join(","))
}

pub static PROVENANCE: AttributeKind<ProvenanceSet> =
    AttributeKind::new("provenance", union).with_stringify(render);
