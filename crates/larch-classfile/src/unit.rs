//! The class unit model: one loaded, mutable class plus its members.

use crate::insn::{Insn, LabelId};

/// A loaded class. Identity is the unique slash-delimited `name`; units are
/// owned exclusively by the class graph and mutated in place by every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassUnit {
    pub name: String,
    /// `None` only for the root object type.
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    pub signature: Option<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub inner_classes: Vec<InnerClassRelation>,
    pub outer_class: Option<String>,
    pub outer_method: Option<EnclosingMethod>,
}

impl ClassUnit {
    pub fn new(name: impl Into<String>, super_name: impl Into<String>, access_flags: u16) -> Self {
        ClassUnit {
            name: name.into(),
            super_name: Some(super_name.into()),
            interfaces: Vec::new(),
            access_flags,
            signature: None,
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
            outer_class: None,
            outer_method: None,
        }
    }

    /// Package part of the class name, empty for the default package.
    pub fn package(&self) -> &str {
        match self.name.rfind('/') {
            Some(idx) => &self.name[..idx],
            None => "",
        }
    }

    /// Trailing segment of the class name.
    pub fn simple_name(&self) -> &str {
        match self.name.rfind('/') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }

    pub fn has_inner_relation(&self, inner: &str) -> bool {
        self.inner_classes.iter().any(|rel| rel.inner == inner)
    }

    /// Attaches a relation record, deduplicating by inner-class name.
    /// Returns true when the record was actually added.
    pub fn add_inner_relation(&mut self, rel: InnerClassRelation) -> bool {
        if self.has_inner_relation(&rel.inner) {
            return false;
        }
        self.inner_classes.push(rel);
        true
    }

    pub fn field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

/// Identity is the (owner name, name, descriptor) triplet; this is the key
/// used by rename maps and caches, never object identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
}

impl Field {
    pub fn new(access_flags: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Field {
            access_flags,
            name: name.into(),
            descriptor: descriptor.into(),
            signature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub instructions: Vec<Insn>,
    pub local_variables: Vec<LocalVariable>,
    pub parameters: Vec<String>,
    pub visible_annotations: Vec<String>,
    pub invisible_annotations: Vec<String>,
}

impl Method {
    pub fn new(access_flags: u16, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Method {
            access_flags,
            name: name.into(),
            descriptor: descriptor.into(),
            signature: None,
            instructions: Vec::new(),
            local_variables: Vec::new(),
            parameters: Vec::new(),
            visible_annotations: Vec::new(),
            invisible_annotations: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & crate::access::ACC_STATIC != 0
    }

    /// A label id not yet used anywhere in this method.
    pub fn fresh_label(&self) -> LabelId {
        let mut max = None;
        for insn in &self.instructions {
            let id = match insn {
                Insn::Label(l) => Some(*l),
                Insn::Goto(l) => Some(*l),
                Insn::Branch { target, .. } => Some(*target),
                _ => None,
            };
            if let Some(id) = id {
                max = Some(max.map_or(id, |m: LabelId| m.max(id)));
            }
        }
        LabelId(max.map_or(0, |l| l.0 + 1))
    }

    /// Start/end marker pair spanning the whole method body, inserting
    /// labels at the boundaries when none exist yet.
    pub fn body_span(&mut self) -> (LabelId, LabelId) {
        let start = match self.instructions.first() {
            Some(Insn::Label(l)) => *l,
            _ => {
                let l = self.fresh_label();
                self.instructions.insert(0, Insn::Label(l));
                l
            }
        };
        let end = match self.instructions.last() {
            Some(Insn::Label(l)) if *l != start => *l,
            _ => {
                let l = self.fresh_label();
                self.instructions.push(Insn::Label(l));
                l
            }
        };
        (start, end)
    }
}

/// One local-variable-table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub slot: u16,
    pub start: LabelId,
    pub end: LabelId,
}

/// A non-owning cross-reference between an inner class and its outer end;
/// attached to one or more class units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassRelation {
    pub inner: String,
    pub outer: Option<String>,
    pub inner_name: Option<String>,
    pub access_flags: u16,
}

/// The (name, descriptor) of an enclosing method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub name: String,
    pub descriptor: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ACC_STATIC;

    #[test]
    fn body_span_inserts_boundary_labels_once() {
        let mut m = Method::new(ACC_STATIC, "run", "()V");
        m.instructions.push(Insn::Return(None));
        let (start, end) = m.body_span();
        assert_ne!(start, end);
        assert_eq!(m.instructions.first(), Some(&Insn::Label(start)));
        assert_eq!(m.instructions.last(), Some(&Insn::Label(end)));
        // A second call reuses the existing markers.
        assert_eq!(m.body_span(), (start, end));
        assert_eq!(m.instructions.len(), 3);
    }

    #[test]
    fn inner_relations_deduplicate_by_inner_name() {
        let mut unit = ClassUnit::new("foo/Outer", "java/lang/Object", 0);
        let rel = InnerClassRelation {
            inner: "foo/Outer$Inner".to_string(),
            outer: Some("foo/Outer".to_string()),
            inner_name: Some("Inner".to_string()),
            access_flags: 0,
        };
        assert!(unit.add_inner_relation(rel.clone()));
        assert!(!unit.add_inner_relation(rel));
        assert_eq!(unit.inner_classes.len(), 1);
    }
}
