//! Pass 6: re-linking of anonymous classes whose names no longer carry the
//! `Outer$N` form.
//!
//! A candidate looks like a desugared anonymous class body: package-private,
//! one synthetic final capture field, one package-private constructor that
//! receives the capture. The link is only restored when the evidence is
//! unambiguous, so a candidate constructed from more than one place, from
//! itself, from nowhere, or stored in a named field anywhere is left alone.

use larch_classfile::access::{
    is_package_private, ACC_FINAL, ACC_PROTECTED, ACC_PUBLIC, ACC_SYNTHETIC,
};
use larch_classfile::{DescReader, EnclosingMethod, InnerClassRelation, Insn, InvokeKind};
use larch_graph::{ClassGraph, ClassId};
use tracing::debug;

use crate::{FailurePolicy, RecoverError, RecoveryPass};

pub struct AnonymousClassPass;

struct Link {
    candidate: ClassId,
    invoker: ClassId,
    enclosing: EnclosingMethod,
}

impl RecoveryPass for AnonymousClassPass {
    fn name(&self) -> &'static str {
        "anonymous-classes"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        let mut links = Vec::new();
        for id in graph.ids() {
            if let Some(link) = resolve(graph, id)? {
                links.push(link);
            }
        }

        for link in links {
            let name = graph.get(link.candidate).name.clone();
            let relation = InnerClassRelation {
                inner: name.clone(),
                outer: None,
                inner_name: None,
                access_flags: graph.get(link.candidate).access_flags,
            };
            let invoker_name = graph.get(link.invoker).name.clone();
            let candidate = graph.get_mut(link.candidate);
            candidate.outer_class = Some(invoker_name);
            candidate.outer_method = Some(link.enclosing);
            candidate.add_inner_relation(relation.clone());
            graph.get_mut(link.invoker).add_inner_relation(relation);
        }
        Ok(())
    }
}

fn resolve(graph: &ClassGraph, id: ClassId) -> Result<Option<Link>, RecoverError> {
    let unit = graph.get(id);
    if unit.outer_class.is_some() || !is_package_private(unit.access_flags) {
        return Ok(None);
    }
    let [capture] = unit.fields.as_slice() else {
        return Ok(None);
    };
    // A captured-outer reference is synthetic, final and never visible
    // outside the class's package.
    if capture.access_flags & ACC_SYNTHETIC == 0
        || capture.access_flags & ACC_FINAL == 0
        || capture.access_flags & (ACC_PUBLIC | ACC_PROTECTED) != 0
    {
        return Ok(None);
    }
    let ctors: Vec<_> = unit.methods.iter().filter(|m| m.name == "<init>").collect();
    let [ctor] = ctors.as_slice() else {
        return Ok(None);
    };
    if !is_package_private(ctor.access_flags) {
        return Ok(None);
    }
    let params = DescReader::new(&ctor.descriptor)?.collect_types()?;
    if !params.contains(&capture.descriptor.as_str()) {
        return Ok(None);
    }

    // The class must not escape into a named field anywhere.
    let self_desc = format!("L{};", unit.name);
    for other in graph.units() {
        for field in &other.fields {
            if field.access_flags & ACC_SYNTHETIC != 0 {
                continue;
            }
            if field.descriptor.trim_start_matches('[') == self_desc {
                debug!(
                    class = %unit.name,
                    holder = %other.name,
                    field = %field.name,
                    "candidate escapes into a field, not anonymous"
                );
                return Ok(None);
            }
        }
    }

    // Exactly one construction site, outside the candidate itself.
    let mut site: Option<(ClassId, EnclosingMethod)> = None;
    for other_id in graph.ids() {
        let other = graph.get(other_id);
        for method in &other.methods {
            let constructs = method.instructions.iter().any(|insn| {
                matches!(
                    insn,
                    Insn::Invoke { kind: InvokeKind::Special, owner, name, .. }
                        if owner == &unit.name && name == "<init>"
                )
            });
            if !constructs {
                continue;
            }
            if other_id == id {
                return Ok(None);
            }
            let enclosing = EnclosingMethod {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
            };
            match &site {
                None => site = Some((other_id, enclosing)),
                Some(_) => {
                    debug!(class = %unit.name, "multiple construction sites, leaving unlinked");
                    return Ok(None);
                }
            }
        }
    }
    let Some((invoker, enclosing)) = site else {
        return Ok(None);
    };
    Ok(Some(Link {
        candidate: id,
        invoker,
        enclosing,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::{ClassUnit, Field, Method};
    use pretty_assertions::assert_eq;

    fn candidate(name: &str) -> ClassUnit {
        let mut unit = ClassUnit::new(name, "java/lang/Object", 0);
        unit.fields
            .push(Field::new(ACC_SYNTHETIC | ACC_FINAL, "a", "Lp/Outer;"));
        unit.methods.push(Method::new(0, "<init>", "(Lp/Outer;)V"));
        unit
    }

    fn invoker(name: &str, method: &str, target: &str) -> ClassUnit {
        let mut unit = ClassUnit::new(name, "java/lang/Object", ACC_PUBLIC);
        let mut m = Method::new(ACC_PUBLIC, method, "()V");
        m.instructions.push(Insn::Invoke {
            kind: InvokeKind::Special,
            owner: target.to_string(),
            name: "<init>".to_string(),
            descriptor: "(Lp/Outer;)V".to_string(),
        });
        unit.methods.push(m);
        unit
    }

    #[test]
    fn sole_construction_site_becomes_the_enclosing_method() {
        let mut graph = ClassGraph::build(vec![
            candidate("p/a"),
            invoker("p/Outer", "open", "p/a"),
        ])
        .unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();

        let cand = graph.by_name("p/a").unwrap();
        assert_eq!(cand.outer_class.as_deref(), Some("p/Outer"));
        assert_eq!(
            cand.outer_method,
            Some(EnclosingMethod {
                name: "open".to_string(),
                descriptor: "()V".to_string(),
            })
        );
        assert!(cand.has_inner_relation("p/a"));
        assert!(graph.by_name("p/Outer").unwrap().has_inner_relation("p/a"));
    }

    #[test]
    fn two_construction_sites_leave_the_candidate_unlinked() {
        let mut graph = ClassGraph::build(vec![
            candidate("p/a"),
            invoker("p/Outer", "open", "p/a"),
            invoker("p/Other", "run", "p/a"),
        ])
        .unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/a").unwrap().outer_class, None);
    }

    #[test]
    fn field_escape_disqualifies() {
        let mut holder = ClassUnit::new("p/Holder", "java/lang/Object", ACC_PUBLIC);
        holder.fields.push(Field::new(ACC_PUBLIC, "kept", "Lp/a;"));
        let mut graph = ClassGraph::build(vec![
            candidate("p/a"),
            invoker("p/Outer", "open", "p/a"),
            holder,
        ])
        .unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/a").unwrap().outer_class, None);
    }

    #[test]
    fn visible_capture_field_disqualifies() {
        let mut cand = candidate("p/a");
        cand.fields[0].access_flags |= ACC_PUBLIC;
        let mut graph =
            ClassGraph::build(vec![cand, invoker("p/Outer", "open", "p/a")]).unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/a").unwrap().outer_class, None);
    }

    #[test]
    fn self_construction_disqualifies() {
        let mut cand = candidate("p/a");
        let mut m = Method::new(0, "copy", "()V");
        m.instructions.push(Insn::Invoke {
            kind: InvokeKind::Special,
            owner: "p/a".to_string(),
            name: "<init>".to_string(),
            descriptor: "(Lp/Outer;)V".to_string(),
        });
        cand.methods.push(m);
        let mut graph =
            ClassGraph::build(vec![cand, invoker("p/Outer", "open", "p/a")]).unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/a").unwrap().outer_class, None);
    }

    #[test]
    fn already_linked_candidates_are_skipped() {
        let mut cand = candidate("p/a");
        cand.outer_class = Some("p/Elsewhere".to_string());
        let mut graph =
            ClassGraph::build(vec![cand, invoker("p/Outer", "open", "p/a")]).unwrap();
        AnonymousClassPass.run(&mut graph).unwrap();
        assert_eq!(
            graph.by_name("p/a").unwrap().outer_class.as_deref(),
            Some("p/Elsewhere")
        );
    }
}
