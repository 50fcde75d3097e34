//! Pass 5: reconstructed generic signatures for comparator implementations.
//!
//! A class implementing exactly `java/util/Comparator` with its generic
//! signature stripped still carries the synthetic bridge `compare` taking
//! two objects; the casts inside the bridge name the comparand type. Unlike
//! the other passes this one aborts the batch on a candidate that does not
//! match: a comparator whose bridge has been tampered with means the input
//! is not trustworthy.

use larch_classfile::access::{ACC_BRIDGE, ACC_SYNTHETIC};
use larch_classfile::{ClassUnit, Insn, InvokeKind, VarKind};
use larch_graph::ClassGraph;

use crate::cursor::next_op;
use crate::{FailurePolicy, RecoverError, RecoveryPass};

const BRIDGE_DESC: &str = "(Ljava/lang/Object;Ljava/lang/Object;)I";

pub struct ComparatorSignaturePass;

impl RecoveryPass for ComparatorSignaturePass {
    fn name(&self) -> &'static str {
        "comparator-signatures"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::AbortClass
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        let mut plans = Vec::new();
        for id in graph.ids() {
            let unit = graph.get(id);
            if unit.signature.is_some() || unit.interfaces != ["java/util/Comparator"] {
                continue;
            }
            let comparand = comparand_type(unit)?;
            plans.push((
                id,
                format!("Ljava/lang/Object;Ljava/util/Comparator<L{comparand};>;"),
            ));
        }
        for (id, signature) in plans {
            graph.get_mut(id).signature = Some(signature);
        }
        Ok(())
    }
}

fn shape_error(unit: &ClassUnit, reason: &'static str) -> RecoverError {
    RecoverError::ComparatorShape {
        class: unit.name.clone(),
        reason,
    }
}

/// Extracts the comparand type from the synthetic bridge. The bridge body
/// is always `this, cast(a), cast(b), invokevirtual compare, ireturn`.
fn comparand_type(unit: &ClassUnit) -> Result<String, RecoverError> {
    let bridge = unit
        .methods
        .iter()
        .find(|m| {
            m.name == "compare"
                && m.descriptor == BRIDGE_DESC
                && m.access_flags & (ACC_SYNTHETIC | ACC_BRIDGE) != 0
        })
        .ok_or_else(|| shape_error(unit, "no synthetic compare bridge"))?;

    let insns = &bridge.instructions;
    let expect = |pos: usize| {
        next_op(insns, pos).ok_or_else(|| shape_error(unit, "bridge body ends early"))
    };

    let (p0, i0) = expect(0)?;
    if !matches!(i0, Insn::Load { kind: VarKind::Ref, slot: 0 }) {
        return Err(shape_error(unit, "bridge does not start with a self load"));
    }
    let (p1, i1) = expect(p0 + 1)?;
    if !matches!(i1, Insn::Load { kind: VarKind::Ref, slot: 1 }) {
        return Err(shape_error(unit, "first argument load missing"));
    }
    let (p2, i2) = expect(p1 + 1)?;
    let Insn::CheckCast { class: first } = i2 else {
        return Err(shape_error(unit, "first comparand cast missing"));
    };
    let (p3, i3) = expect(p2 + 1)?;
    if !matches!(i3, Insn::Load { kind: VarKind::Ref, slot: 2 }) {
        return Err(shape_error(unit, "second argument load missing"));
    }
    let (p4, i4) = expect(p3 + 1)?;
    let Insn::CheckCast { class: second } = i4 else {
        return Err(shape_error(unit, "second comparand cast missing"));
    };
    if first != second {
        return Err(shape_error(unit, "comparand casts disagree"));
    }
    let (p5, i5) = expect(p4 + 1)?;
    let expected_desc = format!("(L{first};L{first};)I");
    match i5 {
        Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner,
            name,
            descriptor,
        } if owner == &unit.name && name == "compare" && descriptor == &expected_desc => {}
        _ => return Err(shape_error(unit, "bridge does not delegate to compare")),
    }
    let (p6, i6) = expect(p5 + 1)?;
    if !matches!(i6, Insn::Return(Some(VarKind::Int))) {
        return Err(shape_error(unit, "bridge does not return the comparison"));
    }
    if next_op(insns, p6 + 1).is_some() {
        return Err(shape_error(unit, "trailing instructions after return"));
    }
    Ok(first.clone())
}
