//! Pass 4: named loop variables for desugared for-each-over-array loops.
//!
//! The javac desugaring is a fixed instruction shape: cache the array, cache
//! its length, count an index up and load the element at the top of the
//! body. When the element slot has no table entry and is written nowhere
//! else, an entry scoped to the loop is synthesized with a name derived from
//! the element type.

use larch_classfile::{
    primitive_word, return_type, short_name, BranchKind, ConstValue, Insn, LabelId,
    LocalVariable, Method, VarKind,
};
use larch_graph::ClassGraph;
use tracing::debug;

use crate::cursor::{next_op, prev_op};
use crate::{FailurePolicy, RecoverError, RecoveryPass};

pub struct ForeachLvtPass;

impl RecoveryPass for ForeachLvtPass {
    fn name(&self) -> &'static str {
        "foreach-lvt"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        for id in graph.ids() {
            let class_name = graph.get(id).name.clone();
            for method in &mut graph.get_mut(id).methods {
                let entries = scan_method(&class_name, method);
                method.local_variables.extend(entries);
            }
        }
        Ok(())
    }
}

struct LoopMatch {
    element_slot: u16,
    store_pos: usize,
    array_desc: String,
    start: LabelId,
    end: LabelId,
}

fn scan_method(class_name: &str, method: &Method) -> Vec<LocalVariable> {
    let insns = &method.instructions;
    let mut entries = Vec::new();
    for (pos, insn) in insns.iter().enumerate() {
        if !matches!(insn, Insn::Store { kind: VarKind::Ref, .. }) {
            continue;
        }
        let Some(m) = match_loop(insns, pos) else {
            continue;
        };
        if method
            .local_variables
            .iter()
            .any(|v| v.slot == m.element_slot)
        {
            continue;
        }
        // The element slot must be single-assignment, otherwise the inferred
        // name could shadow an unrelated variable.
        let exclusive = !insns.iter().enumerate().any(|(i, other)| match other {
            Insn::Store { slot, .. } => *slot == m.element_slot && i != m.store_pos,
            Insn::Iinc { slot, .. } => *slot == m.element_slot,
            _ => false,
        });
        if !exclusive {
            debug!(
                class = class_name,
                method = %method.name,
                slot = m.element_slot,
                "loop element slot is reused, leaving it unnamed"
            );
            continue;
        }

        let element = &m.array_desc[1..];
        let name = match primitive_word(element) {
            Some(word) => word.to_string(),
            None => short_name(element),
        };
        entries.push(LocalVariable {
            name,
            descriptor: element.to_string(),
            signature: None,
            slot: m.element_slot,
            start: m.start,
            end: m.end,
        });
    }
    entries
}

/// Matches the desugared loop shape starting from the array store at `pos`.
/// Labels are tolerated between opcodes except for the back-edge target,
/// which must sit directly before the index comparison.
fn match_loop(insns: &[Insn], pos: usize) -> Option<LoopMatch> {
    let Insn::Store {
        kind: VarKind::Ref,
        slot: array_slot,
    } = insns[pos]
    else {
        return None;
    };

    let (p1, i1) = next_op(insns, pos + 1)?;
    let Insn::Load {
        kind: VarKind::Ref,
        slot,
    } = i1
    else {
        return None;
    };
    if *slot != array_slot {
        return None;
    }
    let (p2, i2) = next_op(insns, p1 + 1)?;
    if !matches!(i2, Insn::ArrayLength) {
        return None;
    }
    let (p3, i3) = next_op(insns, p2 + 1)?;
    let Insn::Store {
        kind: VarKind::Int,
        slot: bound_slot,
    } = *i3
    else {
        return None;
    };
    let (p4, i4) = next_op(insns, p3 + 1)?;
    if !matches!(i4, Insn::Ldc(ConstValue::Int(0))) {
        return None;
    }
    let (p5, i5) = next_op(insns, p4 + 1)?;
    let Insn::Store {
        kind: VarKind::Int,
        slot: index_slot,
    } = *i5
    else {
        return None;
    };

    // The loop head label is the start of the element's live range.
    let start = insns.get(p5 + 1)?.as_label()?;

    let (p6, i6) = next_op(insns, p5 + 2)?;
    if !matches!(i6, Insn::Load { kind: VarKind::Int, slot } if *slot == index_slot) {
        return None;
    }
    let (p7, i7) = next_op(insns, p6 + 1)?;
    if !matches!(i7, Insn::Load { kind: VarKind::Int, slot } if *slot == bound_slot) {
        return None;
    }
    let (p8, i8) = next_op(insns, p7 + 1)?;
    let Insn::Branch {
        kind: BranchKind::IcmpGe,
        target: end,
    } = *i8
    else {
        return None;
    };
    let (p9, i9) = next_op(insns, p8 + 1)?;
    if !matches!(i9, Insn::Load { kind: VarKind::Ref, slot } if *slot == array_slot) {
        return None;
    }
    let (p10, i10) = next_op(insns, p9 + 1)?;
    if !matches!(i10, Insn::Load { kind: VarKind::Int, slot } if *slot == index_slot) {
        return None;
    }
    let (p11, i11) = next_op(insns, p10 + 1)?;
    if !matches!(i11, Insn::ArrayLoad(_)) {
        return None;
    }
    let (store_pos, i12) = next_op(insns, p11 + 1)?;
    let Insn::Store {
        slot: element_slot, ..
    } = *i12
    else {
        return None;
    };

    let array_desc = producer_desc(insns, pos)?;
    if !array_desc.starts_with('[') {
        return None;
    }
    Some(LoopMatch {
        element_slot,
        store_pos,
        array_desc,
        start,
        end,
    })
}

/// Descriptor of the array value consumed by the store at `store_pos`,
/// found by walking backwards to its producer. Slot aliases are followed to
/// their latest preceding store.
fn producer_desc(insns: &[Insn], store_pos: usize) -> Option<String> {
    let mut pos = store_pos;
    loop {
        let (p, insn) = prev_op(insns, pos)?;
        match insn {
            Insn::Dup => pos = p,
            Insn::NewArray { element } => return Some(format!("[{element}")),
            Insn::Field { op, descriptor, .. } if op.is_read() => {
                return descriptor.starts_with('[').then(|| descriptor.clone());
            }
            Insn::Invoke { descriptor, .. } => {
                let ret = return_type(descriptor).ok()?;
                return ret.starts_with('[').then(|| ret.to_string());
            }
            Insn::CheckCast { class } => {
                return class.starts_with('[').then(|| class.clone());
            }
            Insn::Load {
                kind: VarKind::Ref,
                slot,
            } => {
                let mut q = p;
                loop {
                    let (r, prior) = prev_op(insns, q)?;
                    if matches!(prior, Insn::Store { kind: VarKind::Ref, slot: s } if s == slot) {
                        pos = r;
                        break;
                    }
                    q = r;
                }
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::{ACC_PUBLIC, ACC_STATIC};
    use larch_classfile::{ArrayKind, ClassUnit, FieldOp};
    use pretty_assertions::assert_eq;

    fn store(kind: VarKind, slot: u16) -> Insn {
        Insn::Store { kind, slot }
    }

    fn load(kind: VarKind, slot: u16) -> Insn {
        Insn::Load { kind, slot }
    }

    /// The desugared shape over `values`, with the array produced by a
    /// static field read. Slots: 0 array, 1 length, 2 index, 3 element.
    fn loop_body(array_desc: &str, element_store: Insn) -> Vec<Insn> {
        vec![
            Insn::Field {
                op: FieldOp::GetStatic,
                owner: "p/A".to_string(),
                name: "values".to_string(),
                descriptor: array_desc.to_string(),
            },
            store(VarKind::Ref, 0),
            load(VarKind::Ref, 0),
            Insn::ArrayLength,
            store(VarKind::Int, 1),
            Insn::Ldc(ConstValue::Int(0)),
            store(VarKind::Int, 2),
            Insn::Label(LabelId(0)),
            load(VarKind::Int, 2),
            load(VarKind::Int, 1),
            Insn::Branch {
                kind: BranchKind::IcmpGe,
                target: LabelId(1),
            },
            load(VarKind::Ref, 0),
            load(VarKind::Int, 2),
            Insn::ArrayLoad(ArrayKind::Int),
            element_store,
            Insn::Iinc { slot: 2, delta: 1 },
            Insn::Goto(LabelId(0)),
            Insn::Label(LabelId(1)),
            Insn::Return(None),
        ]
    }

    fn graph_with(insns: Vec<Insn>) -> ClassGraph {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        let mut m = Method::new(ACC_STATIC, "sum", "()V");
        m.instructions = insns;
        unit.methods.push(m);
        ClassGraph::build(vec![unit]).unwrap()
    }

    #[test]
    fn int_array_loop_gets_a_primitive_named_entry() {
        let mut graph = graph_with(loop_body("[I", store(VarKind::Int, 3)));
        ForeachLvtPass.run(&mut graph).unwrap();

        let lvt = &graph.by_name("p/A").unwrap().methods[0].local_variables;
        assert_eq!(lvt.len(), 1);
        assert_eq!(lvt[0].name, "int");
        assert_eq!(lvt[0].descriptor, "I");
        assert_eq!(lvt[0].slot, 3);
        assert_eq!(lvt[0].start, LabelId(0));
        assert_eq!(lvt[0].end, LabelId(1));
    }

    #[test]
    fn object_array_loop_names_after_the_element_class() {
        let mut graph = graph_with(loop_body(
            "[Ljava/lang/String;",
            store(VarKind::Ref, 3),
        ));
        ForeachLvtPass.run(&mut graph).unwrap();

        let lvt = &graph.by_name("p/A").unwrap().methods[0].local_variables;
        assert_eq!(lvt[0].name, "string");
        assert_eq!(lvt[0].descriptor, "Ljava/lang/String;");
    }

    #[test]
    fn reused_element_slot_is_skipped() {
        let mut insns = loop_body("[I", store(VarKind::Int, 3));
        insns.push(store(VarKind::Int, 3));
        let mut graph = graph_with(insns);
        ForeachLvtPass.run(&mut graph).unwrap();
        assert!(graph.by_name("p/A").unwrap().methods[0]
            .local_variables
            .is_empty());
    }

    #[test]
    fn missing_loop_head_label_is_skipped() {
        let mut insns = loop_body("[I", store(VarKind::Int, 3));
        insns.retain(|i| !matches!(i, Insn::Label(LabelId(0))));
        let mut graph = graph_with(insns);
        ForeachLvtPass.run(&mut graph).unwrap();
        assert!(graph.by_name("p/A").unwrap().methods[0]
            .local_variables
            .is_empty());
    }

    #[test]
    fn array_type_follows_slot_aliases() {
        // NewArray, stored to slot 4, reloaded, then stored to the loop
        // array slot.
        let mut insns = vec![
            Insn::NewArray {
                element: "J".to_string(),
            },
            store(VarKind::Ref, 4),
            load(VarKind::Ref, 4),
        ];
        insns.extend(loop_body("[J", store(VarKind::Long, 3)).into_iter().skip(1));
        let mut graph = graph_with(insns);
        ForeachLvtPass.run(&mut graph).unwrap();

        let lvt = &graph.by_name("p/A").unwrap().methods[0].local_variables;
        assert_eq!(lvt[0].name, "long");
        assert_eq!(lvt[0].descriptor, "J");
    }
}
