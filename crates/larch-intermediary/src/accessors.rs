//! Getter method names derived from the field they return.
//!
//! An obfuscated method whose whole body is a read of one of its own fields
//! is an accessor. The rename is registered on every class that specifies
//! the method upward through the hierarchy, and the mapping file records one
//! row per class the rename will eventually reach, so a consumer of the map
//! sees the same owners the rename engine will touch.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use larch_classfile::{return_type, ClassUnit, FieldOp, Insn, Method, VarKind};
use larch_graph::ClassGraph;
use larch_remap::{propagation_targets, OverrideScope};
use tracing::debug;

use crate::{IntermediaryError, IntermediaryGenerator};

/// Method names longer than this are assumed meaningful and left alone.
const OBFUSCATED_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FieldKey {
    owner: String,
    name: String,
}

struct Getter {
    method_name: String,
    descriptor: String,
    is_static: bool,
}

impl IntermediaryGenerator<'_> {
    /// Proposes `getX` names for unambiguous accessors. Returns the number
    /// of accessors renamed (not the number of owners reached).
    pub fn propose_accessor_names(&mut self) -> Result<usize, IntermediaryError> {
        let graph = self.graph;
        let subtypes = graph.subtype_index();

        // None marks a field with two competing accessors; neither wins.
        let mut getters: BTreeMap<FieldKey, Option<Getter>> = BTreeMap::new();
        for unit in graph.units() {
            for method in &unit.methods {
                let Some(field_name) = accessor_shape(unit, method) else {
                    continue;
                };
                let key = FieldKey {
                    owner: unit.name.clone(),
                    name: field_name,
                };
                match getters.entry(key) {
                    Entry::Vacant(v) => {
                        v.insert(Some(Getter {
                            method_name: method.name.clone(),
                            descriptor: method.descriptor.clone(),
                            is_static: method.is_static(),
                        }));
                    }
                    Entry::Occupied(mut o) => {
                        o.insert(None);
                    }
                }
            }
        }

        let mut proposed = 0usize;
        for (key, getter) in getters {
            let Some(getter) = getter else {
                debug!(
                    owner = %key.owner,
                    field = %key.name,
                    "several accessors read the same field, skipping"
                );
                continue;
            };
            let Some(unit) = graph.by_name(&key.owner) else {
                continue;
            };
            let new_name = accessor_name(&key.name);

            let specifiers = if getter.is_static {
                vec![key.owner.clone()]
            } else {
                specifying_classes(graph, unit, &getter.method_name, &getter.descriptor)
            };
            let mut reached: BTreeSet<String> = BTreeSet::new();
            for specifier in &specifiers {
                reached.extend(propagation_targets(
                    graph,
                    &subtypes,
                    specifier,
                    &getter.method_name,
                    &getter.descriptor,
                )?);
            }
            // The proposed name must be free on every class the rename
            // reaches, otherwise application would merge two methods.
            let taken = reached.iter().any(|owner| {
                graph
                    .by_name(owner)
                    .is_some_and(|u| u.method(&new_name, &getter.descriptor).is_some())
            });
            if taken {
                debug!(
                    owner = %key.owner,
                    name = %new_name,
                    "accessor name already taken in the hierarchy, skipping"
                );
                continue;
            }

            for specifier in &specifiers {
                self.remapper.remap_method(
                    specifier,
                    &getter.descriptor,
                    &getter.method_name,
                    &new_name,
                )?;
            }
            for owner in &reached {
                self.record_method(owner, &getter.descriptor, &getter.method_name, &new_name)?;
            }
            proposed += 1;
        }
        Ok(proposed)
    }
}

/// Name of the field an accessor-shaped method returns, if it is one.
fn accessor_shape(unit: &ClassUnit, method: &Method) -> Option<String> {
    if method.name.len() > OBFUSCATED_LEN || !method.descriptor.starts_with("()") {
        return None;
    }
    let ret = return_type(&method.descriptor).ok()?;
    if ret == "V" {
        return None;
    }

    let mut ops = method
        .instructions
        .iter()
        .filter(|i| !matches!(i, Insn::Label(_)));
    if !method.is_static() {
        if !matches!(
            ops.next()?,
            Insn::Load {
                kind: VarKind::Ref,
                slot: 0
            }
        ) {
            return None;
        }
    }
    let field_name = match ops.next()? {
        Insn::Field {
            op,
            owner,
            name,
            descriptor,
        } if op.is_read()
            && op.is_static() == method.is_static()
            && owner == &unit.name
            && descriptor == ret =>
        {
            name.clone()
        }
        _ => return None,
    };
    if !matches!(ops.next()?, Insn::Return(Some(_))) {
        return None;
    }
    if ops.next().is_some() {
        return None;
    }
    Some(field_name)
}

/// `count` becomes `getCount`; names too short to capitalize usefully keep
/// a separator instead: `q` becomes `get_q`.
fn accessor_name(field: &str) -> String {
    if field.len() > 2 {
        let mut chars = field.chars();
        match chars.next() {
            Some(first) => format!("get{}{}", first.to_ascii_uppercase(), chars.as_str()),
            None => format!("get_{field}"),
        }
    } else {
        format!("get_{field}")
    }
}

/// Every loaded ancestor declaring the virtual method such that renaming it
/// there keeps the override relation intact, plus the class itself.
fn specifying_classes(
    graph: &ClassGraph,
    unit: &ClassUnit,
    name: &str,
    descriptor: &str,
) -> Vec<String> {
    let mut out = vec![unit.name.clone()];
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();
    if let Some(s) = &unit.super_name {
        stack.push(s.clone());
    }
    stack.extend(unit.interfaces.iter().cloned());

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(ancestor) = graph.by_name(&current) else {
            continue;
        };
        if let Some(s) = &ancestor.super_name {
            stack.push(s.clone());
        }
        stack.extend(ancestor.interfaces.iter().cloned());

        let Some(decl) = ancestor.method(name, descriptor) else {
            continue;
        };
        if decl.is_static() {
            continue;
        }
        match OverrideScope::from_flags(decl.access_flags) {
            OverrideScope::Never => {}
            OverrideScope::Package if ancestor.package() != unit.package() => {}
            _ => out.push(ancestor.name.clone()),
        }
    }
    out
}
