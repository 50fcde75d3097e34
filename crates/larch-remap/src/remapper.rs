//! Pending rename accumulation and the single atomic application pass.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use larch_classfile::access::{ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC};
use larch_classfile::{ConstValue, Insn};
use larch_graph::{ClassGraph, ClassId, SubtypeIndex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RemapError {
    #[error("conflicting class rename for {owner}: {first} vs {second}")]
    ClassConflict {
        owner: String,
        first: String,
        second: String,
    },
    #[error("conflicting field rename for {owner}.{name}:{descriptor}: {first} vs {second}")]
    FieldConflict {
        owner: String,
        name: String,
        descriptor: String,
        first: String,
        second: String,
    },
    #[error("conflicting method rename for {owner}.{name}{descriptor}: {first} vs {second}")]
    MethodConflict {
        owner: String,
        name: String,
        descriptor: String,
        first: String,
        second: String,
    },
    #[error("two renames collapse onto {kind} {owner}.{name}")]
    InjectivityViolation {
        kind: &'static str,
        owner: String,
        name: String,
    },
    #[error("subtype graph corruption: cycle through {class}")]
    SubtypeCycle { class: String },
}

/// How far a virtual-method rename propagates from its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideScope {
    /// Static, private or final: the rename stays local.
    Never,
    /// Package-private: propagates to subtypes in the same package only.
    Package,
    /// Protected or public: propagates through the whole subtype closure.
    Always,
}

impl OverrideScope {
    pub fn from_flags(access_flags: u16) -> OverrideScope {
        if access_flags & (ACC_STATIC | ACC_FINAL | ACC_PRIVATE) != 0 {
            OverrideScope::Never
        } else if access_flags & (ACC_PROTECTED | ACC_PUBLIC) != 0 {
            OverrideScope::Always
        } else {
            OverrideScope::Package
        }
    }
}

/// Pre-rename identity of a member; the key of every pending map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct MemberKey {
    owner: String,
    name: String,
    descriptor: String,
}

impl MemberKey {
    fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        MemberKey {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

/// Accumulates rename requests keyed by pre-rename identity, then applies
/// them all in one [`Remapper::process`] pass.
///
/// A second request with the same key but a different new name is a
/// conflict and is rejected, never silently overwritten. `process()` is
/// all-or-nothing: propagation expansion, conflict and injectivity checks
/// complete before the first mutation is committed.
#[derive(Debug, Default)]
pub struct Remapper {
    class_renames: BTreeMap<String, String>,
    field_renames: BTreeMap<MemberKey, String>,
    method_renames: BTreeMap<MemberKey, String>,
}

impl Remapper {
    pub fn new() -> Self {
        Remapper::default()
    }

    pub fn is_empty(&self) -> bool {
        self.class_renames.is_empty()
            && self.field_renames.is_empty()
            && self.method_renames.is_empty()
    }

    pub fn pending_classes(&self) -> usize {
        self.class_renames.len()
    }

    pub fn pending_fields(&self) -> usize {
        self.field_renames.len()
    }

    pub fn pending_methods(&self) -> usize {
        self.method_renames.len()
    }

    pub fn remap_class(&mut self, old: &str, new: &str) -> Result<(), RemapError> {
        match self.class_renames.entry(old.to_string()) {
            Entry::Occupied(e) if e.get() != new => Err(RemapError::ClassConflict {
                owner: old.to_string(),
                first: e.get().clone(),
                second: new.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(new.to_string());
                Ok(())
            }
        }
    }

    pub fn remap_field(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> Result<(), RemapError> {
        match self.field_renames.entry(MemberKey::new(owner, old, descriptor)) {
            Entry::Occupied(e) if e.get() != new => Err(RemapError::FieldConflict {
                owner: owner.to_string(),
                name: old.to_string(),
                descriptor: descriptor.to_string(),
                first: e.get().clone(),
                second: new.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(new.to_string());
                Ok(())
            }
        }
    }

    /// Inserts a method rename request. The rename is propagated through
    /// the override lattice during [`Remapper::process`] unless the
    /// originating declaration is static, private or final or its owner is
    /// effectively non-overridable.
    pub fn remap_method(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> Result<(), RemapError> {
        match self.method_renames.entry(MemberKey::new(owner, old, descriptor)) {
            Entry::Occupied(e) if e.get() != new => Err(RemapError::MethodConflict {
                owner: owner.to_string(),
                name: old.to_string(),
                descriptor: descriptor.to_string(),
                first: e.get().clone(),
                second: new.to_string(),
            }),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(new.to_string());
                Ok(())
            }
        }
    }

    /// Cancels a pending method rename request.
    pub fn remove_method_remap(&mut self, owner: &str, descriptor: &str, old: &str) {
        self.method_renames
            .remove(&MemberKey::new(owner, old, descriptor));
    }

    /// Applies every pending rewrite across every loaded class in one pass.
    ///
    /// All identity lookups are evaluated against the pre-rename state; on
    /// success the pending sets are cleared, on error nothing is mutated.
    pub fn process(&mut self, graph: &mut ClassGraph) -> Result<(), RemapError> {
        let subtypes = graph.subtype_index();

        // Expand virtual method renames through the override lattice.
        let mut methods: BTreeMap<MemberKey, String> = BTreeMap::new();
        for (key, new_name) in &self.method_renames {
            let targets =
                propagation_targets(graph, &subtypes, &key.owner, &key.name, &key.descriptor)?;
            for target in targets {
                let expanded = MemberKey::new(&target, &key.name, &key.descriptor);
                match methods.entry(expanded) {
                    // A logical override reached from several propagation
                    // origins is renamed once per owner; disagreeing origins
                    // are a conflict.
                    Entry::Occupied(e) if e.get() != new_name => {
                        return Err(RemapError::MethodConflict {
                            owner: target,
                            name: key.name.clone(),
                            descriptor: key.descriptor.clone(),
                            first: e.get().clone(),
                            second: new_name.clone(),
                        });
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(v) => {
                        v.insert(new_name.clone());
                    }
                }
            }
        }

        self.check_injectivity(&methods)?;
        self.apply(graph, &methods);
        graph.rebuild_name_index();

        self.class_renames.clear();
        self.field_renames.clear();
        self.method_renames.clear();
        Ok(())
    }

    /// No two distinct original keys may collapse onto the same post-rename
    /// identity.
    fn check_injectivity(&self, methods: &BTreeMap<MemberKey, String>) -> Result<(), RemapError> {
        let mut class_targets: BTreeMap<&str, &str> = BTreeMap::new();
        for (old, new) in &self.class_renames {
            if class_targets.insert(new, old).is_some() {
                return Err(RemapError::InjectivityViolation {
                    kind: "class",
                    owner: String::new(),
                    name: new.clone(),
                });
            }
        }

        let mut field_targets: BTreeSet<(String, String, String)> = BTreeSet::new();
        for (key, new) in &self.field_renames {
            let target = (
                self.map_class(&key.owner),
                self.remap_desc(&key.descriptor),
                new.clone(),
            );
            if !field_targets.insert(target) {
                return Err(RemapError::InjectivityViolation {
                    kind: "field",
                    owner: self.map_class(&key.owner),
                    name: new.clone(),
                });
            }
        }

        let mut method_targets: BTreeSet<(String, String, String)> = BTreeSet::new();
        for (key, new) in methods {
            let target = (
                self.map_class(&key.owner),
                self.remap_desc(&key.descriptor),
                new.clone(),
            );
            if !method_targets.insert(target) {
                return Err(RemapError::InjectivityViolation {
                    kind: "method",
                    owner: self.map_class(&key.owner),
                    name: new.clone(),
                });
            }
        }
        Ok(())
    }

    fn apply(&self, graph: &mut ClassGraph, methods: &BTreeMap<MemberKey, String>) {
        let ids: Vec<ClassId> = graph.ids().collect();
        for id in ids {
            let unit = graph.get_mut(id);
            let old_owner = unit.name.clone();
            let old_outer = unit.outer_class.clone();

            unit.name = self.map_class(&unit.name);
            if let Some(super_name) = &mut unit.super_name {
                *super_name = self.map_class(super_name);
            }
            for itf in &mut unit.interfaces {
                *itf = self.map_class(itf);
            }
            if let Some(sig) = &mut unit.signature {
                *sig = self.remap_signature(sig);
            }
            if let Some(enclosing) = &mut unit.outer_method {
                if let Some(outer) = &old_outer {
                    let key = MemberKey::new(outer, &enclosing.name, &enclosing.descriptor);
                    if let Some(new) = methods.get(&key) {
                        enclosing.name = new.clone();
                    }
                }
                enclosing.descriptor = self.remap_desc(&enclosing.descriptor);
            }
            if let Some(outer) = &mut unit.outer_class {
                *outer = self.map_class(outer);
            }

            for field in &mut unit.fields {
                let key = MemberKey::new(&old_owner, &field.name, &field.descriptor);
                if let Some(new) = self.field_renames.get(&key) {
                    field.name = new.clone();
                }
                field.descriptor = self.remap_desc(&field.descriptor);
                if let Some(sig) = &mut field.signature {
                    *sig = self.remap_signature(sig);
                }
            }

            for method in &mut unit.methods {
                let key = MemberKey::new(&old_owner, &method.name, &method.descriptor);
                if let Some(new) = methods.get(&key) {
                    method.name = new.clone();
                }
                method.descriptor = self.remap_desc(&method.descriptor);
                if let Some(sig) = &mut method.signature {
                    *sig = self.remap_signature(sig);
                }
                for var in &mut method.local_variables {
                    var.descriptor = self.remap_desc(&var.descriptor);
                    if let Some(sig) = &mut var.signature {
                        *sig = self.remap_signature(sig);
                    }
                }
                for insn in &mut method.instructions {
                    self.rewrite_insn(insn, methods);
                }
            }

            for rel in &mut unit.inner_classes {
                rel.inner = self.map_class(&rel.inner);
                if let Some(outer) = &mut rel.outer {
                    *outer = self.map_class(outer);
                }
                if rel.inner_name.is_some() {
                    let simple = rel
                        .inner
                        .rsplit(['$', '/'])
                        .next()
                        .unwrap_or(rel.inner.as_str());
                    rel.inner_name = Some(simple.to_string());
                }
            }
        }
    }

    fn rewrite_insn(&self, insn: &mut Insn, methods: &BTreeMap<MemberKey, String>) {
        match insn {
            Insn::Field {
                owner,
                name,
                descriptor,
                ..
            } => {
                let key = MemberKey::new(owner, name, descriptor);
                if let Some(new) = self.field_renames.get(&key) {
                    *name = new.clone();
                }
                *owner = self.map_ref(owner);
                *descriptor = self.remap_desc(descriptor);
            }
            Insn::Invoke {
                owner,
                name,
                descriptor,
                ..
            } => {
                let key = MemberKey::new(owner, name, descriptor);
                if let Some(new) = methods.get(&key) {
                    *name = new.clone();
                }
                *owner = self.map_ref(owner);
                *descriptor = self.remap_desc(descriptor);
            }
            Insn::New { class } => *class = self.map_class(class),
            Insn::NewArray { element } => *element = self.remap_desc(element),
            Insn::CheckCast { class } => *class = self.map_ref(class),
            Insn::Ldc(ConstValue::ClassRef(class)) => *class = self.map_ref(class),
            _ => {}
        }
    }

    fn map_class(&self, name: &str) -> String {
        self.class_renames
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Maps an internal name that may also be an array descriptor (as seen
    /// in checkcast and field-access owners).
    fn map_ref(&self, name: &str) -> String {
        if name.starts_with('[') {
            self.remap_desc(name)
        } else {
            self.map_class(name)
        }
    }

    /// Rewrites class-name substrings of a field or method descriptor.
    pub fn remap_desc(&self, desc: &str) -> String {
        let bytes = desc.as_bytes();
        let mut out = String::with_capacity(desc.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'L' {
                if let Some(rel) = desc[i..].find(';') {
                    let name = &desc[i + 1..i + rel];
                    out.push('L');
                    out.push_str(&self.map_class(name));
                    out.push(';');
                    i += rel + 1;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }

    /// Rewrites class-name substrings of a generic signature.
    ///
    /// Class types inside a signature start with `L` only at a
    /// type-start position; names end at `;` or `<`. Type variables and
    /// inner-class suffixes are copied verbatim.
    pub fn remap_signature(&self, sig: &str) -> String {
        let bytes = sig.as_bytes();
        let mut out = String::with_capacity(sig.len());
        let mut i = 0;
        let mut prev: Option<u8> = None;
        while i < bytes.len() {
            let at_type_start = matches!(
                prev,
                None | Some(b'(' | b')' | b'[' | b'<' | b'>' | b';' | b':' | b'+' | b'-' | b'*')
            );
            if bytes[i] == b'L' && at_type_start {
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != b';' && bytes[j] != b'<' {
                    j += 1;
                }
                out.push('L');
                out.push_str(&self.map_class(&sig[start..j]));
                prev = Some(b'L');
                i = j;
                continue;
            }
            out.push(bytes[i] as char);
            prev = Some(bytes[i]);
            i += 1;
        }
        out
    }
}

/// Set of class names a method rename starting at `owner` must touch,
/// walking the direct-subtype adjacency depth-first under the originating
/// declaration's visibility scope.
///
/// Every subtype is visited at most once per originating rename; a revisit
/// of a class still on the traversal stack means the subtype graph has a
/// cycle and is fatal.
pub fn propagation_targets(
    graph: &ClassGraph,
    subtypes: &SubtypeIndex,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> Result<BTreeSet<String>, RemapError> {
    let mut out = BTreeSet::new();
    out.insert(owner.to_string());

    let Some(owner_id) = graph.id_of(owner) else {
        return Ok(out);
    };
    let Some(decl) = graph.get(owner_id).method(name, descriptor) else {
        warn!(owner, name, descriptor, "rename target not declared on owner; rename stays local");
        return Ok(out);
    };
    let owner_final = graph.get(owner_id).access_flags & ACC_FINAL != 0;
    let scope = if owner_final {
        OverrideScope::Never
    } else {
        OverrideScope::from_flags(decl.access_flags)
    };
    if scope == OverrideScope::Never {
        return Ok(out);
    }

    let origin_package = package_of(owner).to_string();
    let mut visited: HashSet<ClassId> = HashSet::new();
    let mut on_stack: HashSet<ClassId> = HashSet::new();
    visited.insert(owner_id);
    visit(
        graph,
        subtypes,
        name,
        descriptor,
        owner_id,
        scope,
        &origin_package,
        &mut visited,
        &mut on_stack,
        &mut out,
    )?;
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn visit(
    graph: &ClassGraph,
    subtypes: &SubtypeIndex,
    name: &str,
    descriptor: &str,
    current: ClassId,
    scope: OverrideScope,
    origin_package: &str,
    visited: &mut HashSet<ClassId>,
    on_stack: &mut HashSet<ClassId>,
    out: &mut BTreeSet<String>,
) -> Result<(), RemapError> {
    on_stack.insert(current);
    for &child in subtypes.direct_subtypes(current) {
        if on_stack.contains(&child) {
            return Err(RemapError::SubtypeCycle {
                class: graph.get(child).name.clone(),
            });
        }
        if visited.contains(&child) {
            continue;
        }
        let child_unit = graph.get(child);
        if scope == OverrideScope::Package && child_unit.package() != origin_package {
            // A package-private rename stops at the package boundary.
            continue;
        }
        visited.insert(child);
        out.insert(child_unit.name.clone());

        // Once propagation reaches an always-visible override it stays
        // unconditional, even when intermediate declarations are narrower.
        let mut child_scope = scope;
        if scope != OverrideScope::Always {
            if let Some(m) = child_unit.method(name, descriptor) {
                if m.access_flags & ACC_STATIC == 0 {
                    child_scope = OverrideScope::from_flags(m.access_flags);
                }
            }
        }
        if child_scope != OverrideScope::Never {
            visit(
                graph,
                subtypes,
                name,
                descriptor,
                child,
                child_scope,
                origin_package,
                visited,
                on_stack,
                out,
            )?;
        }
    }
    on_stack.remove(&current);
    Ok(())
}

fn package_of(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::{ACC_PUBLIC, ACC_STATIC};
    use larch_classfile::{ClassUnit, Field, FieldOp, InvokeKind, Method, VarKind};
    use pretty_assertions::assert_eq;

    fn class_with_method(name: &str, super_name: &str, method_flags: u16) -> ClassUnit {
        let mut unit = ClassUnit::new(name, super_name, 0);
        unit.methods.push(Method::new(method_flags, "m", "()V"));
        unit
    }

    fn graph_abc(method_flags: u16) -> ClassGraph {
        // A declares m(); B extends A (same package, no override);
        // C extends B (different package).
        let a = class_with_method("p/A", "java/lang/Object", method_flags);
        let b = ClassUnit::new("p/B", "p/A", 0);
        let c = ClassUnit::new("q/C", "p/B", 0);
        ClassGraph::build(vec![a, b, c]).unwrap()
    }

    #[test]
    fn package_private_rename_stops_at_package_boundary() {
        let mut graph = graph_abc(0);
        // C declares an override of its own; it lives in another package,
        // so the package-private rename must not reach it.
        let c = graph.id_of("q/C").unwrap();
        graph.get_mut(c).methods.push(Method::new(0, "m", "()V"));

        let mut remapper = Remapper::new();
        remapper.remap_method("p/A", "()V", "m", "n").unwrap();
        remapper.process(&mut graph).unwrap();

        assert_eq!(graph.by_name("p/A").unwrap().methods[0].name, "n");
        assert_eq!(graph.by_name("q/C").unwrap().methods[0].name, "m");
    }

    #[test]
    fn public_rename_crosses_package_boundary() {
        let mut graph = graph_abc(ACC_PUBLIC);
        // Give C an override so the propagation is observable there.
        let c = graph.id_of("q/C").unwrap();
        graph
            .get_mut(c)
            .methods
            .push(Method::new(ACC_PUBLIC, "m", "()V"));

        let mut remapper = Remapper::new();
        remapper.remap_method("p/A", "()V", "m", "n").unwrap();
        remapper.process(&mut graph).unwrap();

        assert_eq!(graph.by_name("p/A").unwrap().methods[0].name, "n");
        assert_eq!(graph.by_name("q/C").unwrap().methods[0].name, "n");
    }

    #[test]
    fn package_scoped_targets_reported() {
        let graph = graph_abc(0);
        let subtypes = graph.subtype_index();
        let targets = propagation_targets(&graph, &subtypes, "p/A", "m", "()V").unwrap();
        assert_eq!(
            targets.into_iter().collect::<Vec<_>>(),
            vec!["p/A".to_string(), "p/B".to_string()]
        );
    }

    #[test]
    fn conflicting_request_is_rejected() {
        let mut remapper = Remapper::new();
        remapper.remap_class("p/a", "p/Alpha").unwrap();
        let err = remapper.remap_class("p/a", "p/Beta").unwrap_err();
        assert!(matches!(err, RemapError::ClassConflict { .. }));
        // Re-inserting the same target is idempotent.
        remapper.remap_class("p/a", "p/Alpha").unwrap();
    }

    #[test]
    fn injectivity_violation_commits_nothing() {
        let mut graph = ClassGraph::build(vec![{
            let mut unit = ClassUnit::new("p/A", "java/lang/Object", 0);
            unit.fields.push(Field::new(ACC_STATIC, "a", "I"));
            unit.fields.push(Field::new(ACC_STATIC, "b", "I"));
            unit
        }])
        .unwrap();

        let mut remapper = Remapper::new();
        remapper.remap_field("p/A", "I", "a", "count").unwrap();
        remapper.remap_field("p/A", "I", "b", "count").unwrap();
        let err = remapper.process(&mut graph).unwrap_err();
        assert!(matches!(err, RemapError::InjectivityViolation { .. }));

        let unit = graph.by_name("p/A").unwrap();
        assert_eq!(unit.fields[0].name, "a");
        assert_eq!(unit.fields[1].name, "b");
    }

    #[test]
    fn class_rename_rewrites_descriptors_signatures_and_operands() {
        let mut owner = ClassUnit::new("p/a", "java/lang/Object", ACC_PUBLIC);
        owner.fields.push({
            let mut f = Field::new(0, "items", "Ljava/util/List;");
            f.signature = Some("Ljava/util/List<Lp/a;>;".to_string());
            f
        });
        let mut m = Method::new(ACC_PUBLIC, "make", "(Lp/a;)Lp/a;");
        m.instructions.push(Insn::New {
            class: "p/a".to_string(),
        });
        m.instructions.push(Insn::Invoke {
            kind: InvokeKind::Special,
            owner: "p/a".to_string(),
            name: "<init>".to_string(),
            descriptor: "()V".to_string(),
        });
        m.instructions.push(Insn::Field {
            op: FieldOp::GetField,
            owner: "p/a".to_string(),
            name: "items".to_string(),
            descriptor: "Ljava/util/List;".to_string(),
        });
        m.instructions.push(Insn::Return(Some(VarKind::Ref)));
        owner.methods.push(m);

        let mut graph = ClassGraph::build(vec![owner]).unwrap();
        let mut remapper = Remapper::new();
        remapper.remap_class("p/a", "p/class_a").unwrap();
        remapper.process(&mut graph).unwrap();

        let unit = graph.by_name("p/class_a").expect("renamed unit indexed");
        assert_eq!(unit.methods[0].descriptor, "(Lp/class_a;)Lp/class_a;");
        assert_eq!(
            unit.fields[0].signature.as_deref(),
            Some("Ljava/util/List<Lp/class_a;>;")
        );
        match &unit.methods[0].instructions[1] {
            Insn::Invoke { owner, .. } => assert_eq!(owner, "p/class_a"),
            other => panic!("unexpected instruction {other:?}"),
        }
    }

    #[test]
    fn signature_rewrite_leaves_type_variables_alone() {
        let mut remapper = Remapper::new();
        remapper.remap_class("p/a", "p/Renamed").unwrap();
        assert_eq!(
            remapper.remap_signature("<T:Lp/a;>Ljava/lang/Object;Ljava/util/Comparator<TT;>;"),
            "<T:Lp/Renamed;>Ljava/lang/Object;Ljava/util/Comparator<TT;>;"
        );
    }

    #[test]
    fn self_referential_subtype_edge_is_fatal() {
        let mut unit = class_with_method("p/Loop", "p/Loop", ACC_PUBLIC);
        unit.methods.push(Method::new(ACC_PUBLIC, "other", "()V"));
        let graph = ClassGraph::build(vec![unit]).unwrap();
        let subtypes = graph.subtype_index();
        let err = propagation_targets(&graph, &subtypes, "p/Loop", "m", "()V").unwrap_err();
        assert!(matches!(err, RemapError::SubtypeCycle { .. }));
    }
}
