//! Pass 1: inner-class relation reconstruction.
//!
//! Remapping tools routinely drop the InnerClasses attribute; this pass
//! rebuilds it from class names and enum parentage. Enum constant
//! subclasses are always anonymous-flagged; `Outer$Inner` names are split
//! into named or anonymous relations; a second sweep attaches the relation
//! to every class owning a field of the inner type so both ends carry
//! consistent records.

use std::collections::{HashMap, HashSet};

use larch_classfile::access::{ACC_ENUM, ACC_FINAL, ACC_STATIC, ACC_SYNTHETIC};
use larch_classfile::InnerClassRelation;
use larch_graph::{ClassGraph, ClassId};
use tracing::debug;

use crate::{FailurePolicy, RecoverError, RecoveryPass};

const ENUM_BASE: &str = "java/lang/Enum";

pub struct InnerClassPass;

impl RecoveryPass for InnerClassPass {
    fn name(&self) -> &'static str {
        "inner-classes"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        let mut enums: HashSet<String> = HashSet::new();
        for unit in graph.units() {
            if unit.super_name.as_deref() == Some(ENUM_BASE) {
                enums.insert(unit.name.clone());
            }
        }

        // Relations discovered by splitting class names, keyed by inner
        // name; consulted by the field sweep below.
        let mut split_inner: HashMap<String, InnerClassRelation> = HashMap::new();
        // Relations to attach to the outer end, keyed by outer class name.
        let mut parents: HashMap<String, Vec<InnerClassRelation>> = HashMap::new();
        // Relations to attach to the inner class itself.
        let mut self_attach: Vec<(ClassId, InnerClassRelation)> = Vec::new();

        for id in graph.ids() {
            let unit = graph.get(id);
            let super_name = unit.super_name.as_deref().unwrap_or_default();
            if enums.contains(super_name) {
                // Subclass of a loaded enum: an anonymous constant body.
                if unit.has_inner_relation(&unit.name) {
                    continue;
                }
                let rel = InnerClassRelation {
                    inner: unit.name.clone(),
                    outer: None,
                    inner_name: None,
                    access_flags: ACC_FINAL | ACC_ENUM,
                };
                parents
                    .entry(super_name.to_string())
                    .or_default()
                    .push(rel.clone());
                self_attach.push((id, rel));
            } else if let Some(sep) = unit.name.rfind('$') {
                if unit.has_inner_relation(&unit.name) {
                    continue;
                }
                let outer = &unit.name[..sep];
                let tail = &unit.name[sep + 1..];
                let anonymous = !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit());

                let rel = if anonymous {
                    InnerClassRelation {
                        inner: unit.name.clone(),
                        outer: None,
                        inner_name: None,
                        access_flags: unit.access_flags,
                    }
                } else {
                    // A captured outer-instance reference shows up as a
                    // synthetic instance field; its absence marks the inner
                    // class as static.
                    let captures_outer = unit.fields.iter().any(|f| {
                        f.access_flags & ACC_SYNTHETIC != 0 && f.access_flags & ACC_STATIC == 0
                    });
                    let mut access = unit.access_flags;
                    if !captures_outer {
                        access |= ACC_STATIC;
                    }
                    InnerClassRelation {
                        inner: unit.name.clone(),
                        outer: Some(outer.to_string()),
                        inner_name: Some(tail.to_string()),
                        access_flags: access,
                    }
                };

                if graph.id_of(outer).is_none() {
                    return Err(RecoverError::MissingOwner {
                        class: unit.name.clone(),
                        owner: outer.to_string(),
                    });
                }
                parents.entry(outer.to_string()).or_default().push(rel.clone());
                split_inner.insert(unit.name.clone(), rel.clone());
                self_attach.push((id, rel));
            }
        }

        // Second sweep: classes owning a field typed as a split inner class
        // get the relation attached too.
        let mut field_attach: Vec<(ClassId, Vec<InnerClassRelation>)> = Vec::new();
        for id in graph.ids() {
            let unit = graph.get(id);
            let mut rels = Vec::new();
            for field in &unit.fields {
                let Some(name) = object_name(&field.descriptor) else {
                    continue;
                };
                if let Some(rel) = split_inner.get(name) {
                    debug!(
                        class = %unit.name,
                        field = %field.name,
                        inner = %rel.inner,
                        "attaching inner relation to field owner"
                    );
                    rels.push(rel.clone());
                }
            }
            if !rels.is_empty() {
                field_attach.push((id, rels));
            }
        }
        for (id, rels) in field_attach {
            let unit = graph.get_mut(id);
            for rel in rels {
                unit.add_inner_relation(rel);
            }
        }

        for (outer, rels) in parents {
            let Some(outer_id) = graph.id_of(&outer) else {
                // Checked during the split sweep; enum parents are loaded
                // by construction.
                continue;
            };
            let unit = graph.get_mut(outer_id);
            for rel in rels {
                unit.add_inner_relation(rel);
            }
        }
        for (id, rel) in self_attach {
            graph.get_mut(id).add_inner_relation(rel);
        }
        Ok(())
    }
}

/// Object class name a field descriptor refers to, unwrapping arrays.
fn object_name(descriptor: &str) -> Option<&str> {
    if descriptor.len() < 4 {
        // Most likely a primitive.
        return None;
    }
    let elem = descriptor.trim_start_matches('[');
    if elem.starts_with('L') && elem.ends_with(';') {
        Some(&elem[1..elem.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::ACC_PUBLIC;
    use larch_classfile::{ClassUnit, Field};
    use pretty_assertions::assert_eq;

    fn run(graph: &mut ClassGraph) {
        InnerClassPass.run(graph).unwrap();
    }

    #[test]
    fn enum_constant_subclasses_are_anonymous_flagged() {
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Color", ENUM_BASE, ACC_PUBLIC | ACC_ENUM),
            ClassUnit::new("p/Color$1", "p/Color", 0),
        ])
        .unwrap();
        run(&mut graph);

        let body = graph.by_name("p/Color$1").unwrap();
        assert_eq!(body.inner_classes.len(), 1);
        let rel = &body.inner_classes[0];
        assert_eq!(rel.outer, None);
        assert_eq!(rel.inner_name, None);
        assert_eq!(rel.access_flags, ACC_FINAL | ACC_ENUM);
        // The enum itself carries the record as well.
        assert!(graph.by_name("p/Color").unwrap().has_inner_relation("p/Color$1"));
    }

    #[test]
    fn named_inner_without_captured_field_is_static() {
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Outer", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("p/Outer$Helper", "java/lang/Object", 0),
        ])
        .unwrap();
        run(&mut graph);

        let rel = &graph.by_name("p/Outer$Helper").unwrap().inner_classes[0];
        assert_eq!(rel.outer.as_deref(), Some("p/Outer"));
        assert_eq!(rel.inner_name.as_deref(), Some("Helper"));
        assert_ne!(rel.access_flags & ACC_STATIC, 0);
    }

    #[test]
    fn captured_outer_reference_suppresses_static() {
        let mut inner = ClassUnit::new("p/Outer$Held", "java/lang/Object", 0);
        inner
            .fields
            .push(Field::new(ACC_SYNTHETIC | ACC_FINAL, "this$0", "Lp/Outer;"));
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Outer", "java/lang/Object", ACC_PUBLIC),
            inner,
        ])
        .unwrap();
        run(&mut graph);

        let rel = &graph.by_name("p/Outer$Held").unwrap().inner_classes[0];
        assert_eq!(rel.access_flags & ACC_STATIC, 0);
    }

    #[test]
    fn field_owners_receive_the_relation() {
        let mut user = ClassUnit::new("p/User", "java/lang/Object", ACC_PUBLIC);
        user.fields.push(Field::new(0, "h", "Lp/Outer$Helper;"));
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Outer", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("p/Outer$Helper", "java/lang/Object", 0),
            user,
        ])
        .unwrap();
        run(&mut graph);

        assert!(graph
            .by_name("p/User")
            .unwrap()
            .has_inner_relation("p/Outer$Helper"));
    }

    #[test]
    fn second_run_adds_no_relations() {
        let mut user = ClassUnit::new("p/User", "java/lang/Object", ACC_PUBLIC);
        user.fields.push(Field::new(0, "h", "[Lp/Outer$Helper;"));
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Color", ENUM_BASE, ACC_PUBLIC | ACC_ENUM),
            ClassUnit::new("p/Color$1", "p/Color", 0),
            ClassUnit::new("p/Outer", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("p/Outer$Helper", "java/lang/Object", 0),
            user,
        ])
        .unwrap();
        run(&mut graph);
        let counts: Vec<usize> = graph.units().map(|u| u.inner_classes.len()).collect();
        run(&mut graph);
        let counts_after: Vec<usize> = graph.units().map(|u| u.inner_classes.len()).collect();
        assert_eq!(counts, counts_after);
    }

    #[test]
    fn missing_outer_is_fatal() {
        let mut graph =
            ClassGraph::build(vec![ClassUnit::new("p/Gone$Inner", "java/lang/Object", 0)])
                .unwrap();
        let err = InnerClassPass.run(&mut graph).unwrap_err();
        assert!(matches!(err, RecoverError::MissingOwner { .. }));
    }
}
