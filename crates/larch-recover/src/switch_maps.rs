//! Pass 3: recognition of compiler-generated switch-over-enum lookup
//! holders and renaming of their lookup field.
//!
//! Javac emits an anonymous holder class with a single static `[I` field
//! filled in `<clinit>` from the ordinals of one enum. The obfuscated field
//! name is replaced with the canonical `$SwitchMap$<enum>` form and every
//! reference to it across the graph is rewritten in the same step.

use std::collections::BTreeSet;

use larch_classfile::access::{ACC_STATIC, ACC_SYNTHETIC};
use larch_classfile::{FieldOp, InnerClassRelation, Insn};
use larch_graph::{ClassGraph, ClassId};
use tracing::debug;

use crate::{FailurePolicy, RecoverError, RecoveryPass};

pub struct SwitchMapPass;

struct Plan {
    holder: ClassId,
    holder_name: String,
    old_name: String,
    new_name: String,
}

impl RecoveryPass for SwitchMapPass {
    fn name(&self) -> &'static str {
        "switch-maps"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        let mut plans = Vec::new();
        for id in graph.ids() {
            if let Some(plan) = match_holder(graph, id) {
                plans.push(plan);
            }
        }

        for plan in plans {
            // Rename the field itself.
            let holder = graph.get_mut(plan.holder);
            if let Some(field) = holder
                .fields
                .iter_mut()
                .find(|f| f.name == plan.old_name && f.descriptor == "[I")
            {
                field.name = plan.new_name.clone();
            }

            // Rewrite every reference and remember which classes used it.
            let mut users: BTreeSet<ClassId> = BTreeSet::new();
            for id in graph.ids() {
                let unit = graph.get_mut(id);
                let mut touched = false;
                for method in &mut unit.methods {
                    for insn in &mut method.instructions {
                        if let Insn::Field {
                            owner,
                            name,
                            descriptor,
                            ..
                        } = insn
                        {
                            if owner == &plan.holder_name
                                && name == &plan.old_name
                                && descriptor == "[I"
                            {
                                *name = plan.new_name.clone();
                                touched = true;
                            }
                        }
                    }
                }
                if touched && id != plan.holder {
                    users.insert(id);
                }
            }

            let relation = InnerClassRelation {
                inner: plan.holder_name.clone(),
                outer: None,
                inner_name: None,
                access_flags: ACC_STATIC | ACC_SYNTHETIC,
            };
            graph.get_mut(plan.holder).add_inner_relation(relation.clone());
            for id in users {
                graph.get_mut(id).add_inner_relation(relation.clone());
            }
        }
        Ok(())
    }
}

/// Checks one class against the holder shape. Any deviation skips the site.
fn match_holder(graph: &ClassGraph, id: ClassId) -> Option<Plan> {
    let unit = graph.get(id);
    if unit.super_name.as_deref() != Some("java/lang/Object") || !unit.interfaces.is_empty() {
        return None;
    }
    let [field] = unit.fields.as_slice() else {
        return None;
    };
    if field.descriptor != "[I" || field.access_flags & ACC_STATIC == 0 {
        return None;
    }
    let [clinit] = unit.methods.as_slice() else {
        return None;
    };
    if clinit.name != "<clinit>" {
        return None;
    }

    let mut stores = 0usize;
    let mut enum_owner: Option<&str> = None;
    for insn in &clinit.instructions {
        let Insn::Field {
            op,
            owner,
            name,
            descriptor,
        } = insn
        else {
            continue;
        };
        match op {
            FieldOp::PutStatic if owner == &unit.name && name == &field.name => {
                stores += 1;
            }
            FieldOp::GetStatic if descriptor.starts_with('L') && owner != &unit.name => {
                match enum_owner {
                    None => enum_owner = Some(owner),
                    Some(seen) if seen == owner => {}
                    Some(seen) => {
                        debug!(
                            class = %unit.name,
                            first = %seen,
                            second = %owner,
                            "lookup holder reads constants of two owners, skipping"
                        );
                        return None;
                    }
                }
            }
            _ => {}
        }
    }
    if stores != 1 {
        return None;
    }
    let enum_owner = enum_owner?;
    if let Some(owner_unit) = graph.by_name(enum_owner) {
        if owner_unit.super_name.as_deref() != Some("java/lang/Enum") {
            return None;
        }
    }

    let new_name = format!("$SwitchMap${}", enum_owner.replace('/', "$"));
    if field.name == new_name {
        return None;
    }
    Some(Plan {
        holder: id,
        holder_name: unit.name.clone(),
        old_name: field.name.clone(),
        new_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::{ACC_ENUM, ACC_FINAL, ACC_PUBLIC};
    use larch_classfile::{ClassUnit, Field, Method};
    use pretty_assertions::assert_eq;

    fn get_static(owner: &str, name: &str, descriptor: &str) -> Insn {
        Insn::Field {
            op: FieldOp::GetStatic,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    fn holder(name: &str, enum_name: &str) -> ClassUnit {
        let mut unit = ClassUnit::new(name, "java/lang/Object", ACC_SYNTHETIC);
        unit.fields
            .push(Field::new(ACC_STATIC | ACC_FINAL | ACC_SYNTHETIC, "a", "[I"));
        let mut clinit = Method::new(ACC_STATIC, "<clinit>", "()V");
        clinit.instructions = vec![
            Insn::NewArray {
                element: "I".to_string(),
            },
            Insn::Field {
                op: FieldOp::PutStatic,
                owner: name.to_string(),
                name: "a".to_string(),
                descriptor: "[I".to_string(),
            },
            get_static(enum_name, "RED", &format!("L{enum_name};")),
            get_static(enum_name, "BLUE", &format!("L{enum_name};")),
            Insn::Return(None),
        ];
        unit.methods.push(clinit);
        unit
    }

    fn color_enum() -> ClassUnit {
        ClassUnit::new("p/Color", "java/lang/Enum", ACC_PUBLIC | ACC_ENUM)
    }

    #[test]
    fn holder_field_is_renamed_and_references_rewritten() {
        let mut user = ClassUnit::new("p/User", "java/lang/Object", ACC_PUBLIC);
        let mut m = Method::new(ACC_PUBLIC, "pick", "()V");
        m.instructions.push(get_static("p/User$1", "a", "[I"));
        user.methods.push(m);

        let mut graph =
            ClassGraph::build(vec![color_enum(), holder("p/User$1", "p/Color"), user]).unwrap();
        SwitchMapPass.run(&mut graph).unwrap();

        let holder = graph.by_name("p/User$1").unwrap();
        assert_eq!(holder.fields[0].name, "$SwitchMap$p$Color");
        let user = graph.by_name("p/User").unwrap();
        match &user.methods[0].instructions[0] {
            Insn::Field { name, .. } => assert_eq!(name, "$SwitchMap$p$Color"),
            other => panic!("unexpected instruction {other:?}"),
        }
        // Both the holder and the user carry the anonymous relation.
        assert!(holder.has_inner_relation("p/User$1"));
        assert!(user.has_inner_relation("p/User$1"));
        assert_eq!(
            user.inner_classes[0].access_flags,
            ACC_STATIC | ACC_SYNTHETIC
        );
    }

    #[test]
    fn mixed_constant_owners_skip_the_site() {
        let mut h = holder("p/User$1", "p/Color");
        h.methods[0]
            .instructions
            .push(get_static("p/Shape", "SQUARE", "Lp/Shape;"));
        let mut graph = ClassGraph::build(vec![
            color_enum(),
            ClassUnit::new("p/Shape", "java/lang/Enum", ACC_PUBLIC | ACC_ENUM),
            h,
        ])
        .unwrap();
        SwitchMapPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/User$1").unwrap().fields[0].name, "a");
    }

    #[test]
    fn loaded_non_enum_owner_skips_the_site() {
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/Color", "java/lang/Object", ACC_PUBLIC),
            holder("p/User$1", "p/Color"),
        ])
        .unwrap();
        SwitchMapPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/User$1").unwrap().fields[0].name, "a");
    }

    #[test]
    fn unloaded_owner_is_trusted() {
        let mut graph = ClassGraph::build(vec![holder("p/User$1", "ext/Kind")]).unwrap();
        SwitchMapPass.run(&mut graph).unwrap();
        assert_eq!(
            graph.by_name("p/User$1").unwrap().fields[0].name,
            "$SwitchMap$ext$Kind"
        );
    }

    #[test]
    fn rerun_changes_nothing() {
        let mut graph =
            ClassGraph::build(vec![color_enum(), holder("p/User$1", "p/Color")]).unwrap();
        SwitchMapPass.run(&mut graph).unwrap();
        let snapshot = graph.by_name("p/User$1").unwrap().clone();
        SwitchMapPass.run(&mut graph).unwrap();
        assert_eq!(graph.by_name("p/User$1").unwrap(), &snapshot);
    }
}
