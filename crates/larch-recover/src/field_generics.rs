//! Pass 7: recovered element types for raw container fields.
//!
//! A field typed as a known container with its generic signature stripped is
//! usually iterated somewhere, and the desugared for-each loop casts every
//! element to the same class. One consistent cast across the whole graph
//! fixes the element type; disagreeing casts leave the field raw.

use std::collections::{BTreeMap, BTreeSet};

use larch_classfile::{short_name, Insn, InvokeKind, LocalVariable, VarKind};
use larch_graph::{ClassGraph, ClassId};
use tracing::debug;

use crate::cursor::next_op;
use crate::{FailurePolicy, RecoverError, RecoveryPass};

/// Containers whose sole type parameter is the element type.
const CONTAINERS: &[&str] = &[
    "Ljava/lang/Iterable;",
    "Ljava/util/ArrayDeque;",
    "Ljava/util/ArrayList;",
    "Ljava/util/Collection;",
    "Ljava/util/Deque;",
    "Ljava/util/HashSet;",
    "Ljava/util/LinkedHashSet;",
    "Ljava/util/LinkedList;",
    "Ljava/util/List;",
    "Ljava/util/Queue;",
    "Ljava/util/Set;",
    "Ljava/util/TreeSet;",
    "Ljava/util/Vector;",
];

pub struct FieldGenericsPass;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FieldKey {
    owner: String,
    name: String,
    descriptor: String,
}

impl RecoveryPass for FieldGenericsPass {
    fn name(&self) -> &'static str {
        "field-generics"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        let mut candidates: BTreeSet<FieldKey> = BTreeSet::new();
        for unit in graph.units() {
            for field in &unit.fields {
                if field.signature.is_none() && CONTAINERS.contains(&field.descriptor.as_str()) {
                    candidates.insert(FieldKey {
                        owner: unit.name.clone(),
                        name: field.name.clone(),
                        descriptor: field.descriptor.clone(),
                    });
                }
            }
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let mut elements: BTreeMap<FieldKey, BTreeSet<String>> = BTreeMap::new();
        let mut lvt_adds: Vec<(ClassId, usize, LocalVariable)> = Vec::new();
        for id in graph.ids() {
            let unit = graph.get(id);
            for (m_idx, method) in unit.methods.iter().enumerate() {
                let insns = &method.instructions;
                for pos in 0..insns.len() {
                    let Some((key, site)) = match_iteration(insns, pos, &candidates) else {
                        continue;
                    };
                    elements
                        .entry(key)
                        .or_default()
                        .insert(site.element.clone());
                    if let Some(slot) = site.element_slot {
                        let covered = method.local_variables.iter().any(|v| v.slot == slot)
                            || lvt_adds
                                .iter()
                                .any(|(c, m, v)| *c == id && *m == m_idx && v.slot == slot);
                        if !covered {
                            lvt_adds.push((
                                id,
                                m_idx,
                                LocalVariable {
                                    name: short_name(&site.element),
                                    descriptor: format!("L{};", site.element),
                                    signature: None,
                                    slot,
                                    start: site.start,
                                    end: site.end,
                                },
                            ));
                        }
                    }
                }
            }
        }

        for (id, m_idx, var) in lvt_adds {
            graph.get_mut(id).methods[m_idx].local_variables.push(var);
        }
        for (key, types) in elements {
            if types.len() > 1 {
                debug!(
                    owner = %key.owner,
                    field = %key.name,
                    "element casts disagree, leaving the field raw"
                );
                continue;
            }
            let element = types.first().cloned().unwrap_or_default();
            let Some(owner_id) = graph.id_of(&key.owner) else {
                continue;
            };
            let unit = graph.get_mut(owner_id);
            if let Some(field) = unit
                .fields
                .iter_mut()
                .find(|f| f.name == key.name && f.descriptor == key.descriptor)
            {
                let raw = &key.descriptor[..key.descriptor.len() - 1];
                field.signature = Some(format!("{raw}<L{element};>;"));
            }
        }
        Ok(())
    }
}

struct IterationSite {
    element: String,
    element_slot: Option<u16>,
    start: larch_classfile::LabelId,
    end: larch_classfile::LabelId,
}

/// Matches an iterator loop over a candidate field read at `pos`.
fn match_iteration(
    insns: &[Insn],
    pos: usize,
    candidates: &BTreeSet<FieldKey>,
) -> Option<(FieldKey, IterationSite)> {
    let Insn::Field {
        op,
        owner,
        name,
        descriptor,
    } = &insns[pos]
    else {
        return None;
    };
    if !op.is_read() {
        return None;
    }
    let key = FieldKey {
        owner: owner.clone(),
        name: name.clone(),
        descriptor: descriptor.clone(),
    };
    if !candidates.contains(&key) {
        return None;
    }

    let (p1, i1) = next_op(insns, pos + 1)?;
    if !matches!(
        i1,
        Insn::Invoke { name, descriptor, .. }
            if name == "iterator" && descriptor == "()Ljava/util/Iterator;"
    ) {
        return None;
    }
    let (p2, i2) = next_op(insns, p1 + 1)?;
    let Insn::Store {
        kind: VarKind::Ref,
        slot: iter_slot,
    } = *i2
    else {
        return None;
    };
    let start = insns.get(p2 + 1)?.as_label()?;
    let (p3, i3) = next_op(insns, p2 + 2)?;
    if !matches!(i3, Insn::Load { kind: VarKind::Ref, slot } if *slot == iter_slot) {
        return None;
    }
    let (p4, i4) = next_op(insns, p3 + 1)?;
    if !matches!(
        i4,
        Insn::Invoke { name, descriptor, .. } if name == "hasNext" && descriptor == "()Z"
    ) {
        return None;
    }
    let (p5, i5) = next_op(insns, p4 + 1)?;
    let Insn::Branch {
        kind: larch_classfile::BranchKind::Eq,
        target: end,
    } = *i5
    else {
        return None;
    };
    let (p6, i6) = next_op(insns, p5 + 1)?;
    if !matches!(i6, Insn::Load { kind: VarKind::Ref, slot } if *slot == iter_slot) {
        return None;
    }
    let (p7, i7) = next_op(insns, p6 + 1)?;
    if !matches!(
        i7,
        Insn::Invoke { kind: InvokeKind::Interface, name, descriptor, .. }
            if name == "next" && descriptor == "()Ljava/lang/Object;"
    ) {
        return None;
    }
    let (p8, i8) = next_op(insns, p7 + 1)?;
    let Insn::CheckCast { class } = i8 else {
        return None;
    };
    if class.starts_with('[') {
        return None;
    }

    let element_slot = match next_op(insns, p8 + 1) {
        Some((
            _,
            Insn::Store {
                kind: VarKind::Ref,
                slot,
            },
        )) => Some(*slot),
        _ => None,
    };
    Some((
        key,
        IterationSite {
            element: class.clone(),
            element_slot,
            start,
            end,
        },
    ))
}
