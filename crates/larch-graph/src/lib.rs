//! The class graph: an arena of loaded class units plus derived indices.
//!
//! Units are addressed by stable integer ids; auxiliary indices (name
//! lookup, direct-subtype adjacency) store ids only and never duplicate
//! owned state, so a mutation through one view cannot silently diverge from
//! another. The graph is built once per batch, mutated destructively
//! through all passes and discarded after the final write.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use larch_classfile::ClassUnit;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate class unit: {0}")]
    DuplicateClass(String),
}

/// Stable id of a class unit within one [`ClassGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub struct ClassGraph {
    classes: Vec<ClassUnit>,
    by_name: HashMap<String, ClassId>,
}

impl ClassGraph {
    pub fn build(units: Vec<ClassUnit>) -> Result<Self, GraphError> {
        let mut graph = ClassGraph {
            classes: Vec::with_capacity(units.len()),
            by_name: HashMap::with_capacity(units.len()),
        };
        for unit in units {
            let id = ClassId(graph.classes.len() as u32);
            if graph.by_name.insert(unit.name.clone(), id).is_some() {
                return Err(GraphError::DuplicateClass(unit.name));
            }
            graph.classes.push(unit);
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> + 'static {
        (0..self.classes.len() as u32).map(ClassId)
    }

    pub fn get(&self, id: ClassId) -> &ClassUnit {
        &self.classes[id.index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassUnit {
        &mut self.classes[id.index()]
    }

    pub fn id_of(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassUnit> {
        self.id_of(name).map(|id| self.get(id))
    }

    pub fn units(&self) -> impl Iterator<Item = &ClassUnit> {
        self.classes.iter()
    }

    pub fn into_units(self) -> Vec<ClassUnit> {
        self.classes
    }

    /// Rebuilds the name index after class renames. Ids stay stable.
    pub fn rebuild_name_index(&mut self) {
        self.by_name.clear();
        for (idx, unit) in self.classes.iter().enumerate() {
            self.by_name.insert(unit.name.clone(), ClassId(idx as u32));
        }
    }

    /// Direct-subtype adjacency over superclass and interface edges,
    /// restricted to classes loaded in this graph. Built fresh at pass
    /// entry; append-only during a pass.
    pub fn subtype_index(&self) -> SubtypeIndex {
        let mut edges: HashMap<ClassId, Vec<ClassId>> = HashMap::new();
        for (idx, unit) in self.classes.iter().enumerate() {
            let id = ClassId(idx as u32);
            if let Some(super_name) = unit.super_name.as_deref() {
                if let Some(parent) = self.id_of(super_name) {
                    edges.entry(parent).or_default().push(id);
                }
            }
            for itf in &unit.interfaces {
                if let Some(parent) = self.id_of(itf) {
                    edges.entry(parent).or_default().push(id);
                }
            }
        }
        SubtypeIndex { edges }
    }
}

#[derive(Debug, Default)]
pub struct SubtypeIndex {
    edges: HashMap<ClassId, Vec<ClassId>>,
}

impl SubtypeIndex {
    pub fn direct_subtypes(&self, id: ClassId) -> &[ClassId] {
        self.edges.get(&id).map_or(&[], Vec::as_slice)
    }
}
