//! Bucketed class name proposals.
//!
//! Candidates (names too short to be meaningful) are grouped per package by
//! what the class is, then numbered within the bucket in a stable order. The
//! kind prefix keeps enums, interfaces and nested classes distinguishable in
//! stack traces even before any human renaming happens.

use std::collections::BTreeMap;

use larch_classfile::access::{ACC_INTERFACE, ACC_PROTECTED, ACC_PUBLIC};
use larch_classfile::ClassUnit;
use tracing::debug;

use crate::{base26, IntermediaryError, IntermediaryGenerator};

/// What a candidate class is, deciding its name prefix. The nested kinds
/// rely on relations restored by metadata recovery, so class name proposal
/// runs after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Enum,
    Local,
    Inner,
    Interface,
    Public,
    Protected,
    PackagePrivate,
}

impl Category {
    pub fn prefix(self) -> &'static str {
        match self {
            Category::Enum => "enum_",
            Category::Local => "localclass_",
            Category::Inner => "innerclass_",
            Category::Interface => "interface_",
            Category::Public => "class_",
            Category::Protected => "pclass_",
            Category::PackagePrivate => "ppclass_",
        }
    }

    pub fn of(unit: &ClassUnit) -> Category {
        if unit.super_name.as_deref() == Some("java/lang/Enum") {
            Category::Enum
        } else if unit.outer_method.is_some() {
            Category::Local
        } else if unit.outer_class.is_some() || unit.has_inner_relation(&unit.name) {
            Category::Inner
        } else if unit.access_flags & ACC_INTERFACE != 0 {
            Category::Interface
        } else if unit.access_flags & ACC_PUBLIC != 0 {
            Category::Public
        } else if unit.access_flags & ACC_PROTECTED != 0 {
            Category::Protected
        } else {
            Category::PackagePrivate
        }
    }
}

/// Simple names shorter than this are treated as obfuscated.
const MEANINGFUL_LEN: usize = 3;

impl IntermediaryGenerator<'_> {
    /// Proposes a name for every obfuscated class outside the protected
    /// packages. Returns the number of proposals made.
    pub fn propose_class_names(&mut self) -> Result<usize, IntermediaryError> {
        let graph = self.graph;
        let mut buckets: BTreeMap<(Category, String), Vec<&ClassUnit>> = BTreeMap::new();
        for unit in graph.units() {
            if unit.simple_name().len() >= MEANINGFUL_LEN {
                continue;
            }
            if self.is_protected(unit.package()) {
                debug!(class = %unit.name, "protected package, keeping the name");
                continue;
            }
            buckets
                .entry((Category::of(unit), unit.package().to_string()))
                .or_default()
                .push(unit);
        }

        let mut proposed = 0usize;
        for ((category, package), mut units) in buckets {
            units.sort_by(|a, b| {
                a.name
                    .len()
                    .cmp(&b.name.len())
                    .then_with(|| a.name.cmp(&b.name))
            });
            for (i, unit) in units.iter().enumerate() {
                let simple = format!("{}{}", category.prefix(), base26(i));
                let new = if package.is_empty() {
                    simple
                } else {
                    format!("{package}/{simple}")
                };
                self.remapper.remap_class(&unit.name, &new)?;
                self.record_class(&unit.name, &new)?;
                proposed += 1;
            }
        }
        Ok(proposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::ACC_ENUM;
    use larch_classfile::EnclosingMethod;
    use larch_graph::ClassGraph;
    use larch_remap::Remapper;
    use pretty_assertions::assert_eq;

    fn propose(graph: &mut ClassGraph, protect: &[&str]) -> Remapper {
        let mut remapper = Remapper::new();
        let mut gen = IntermediaryGenerator::new(graph, &mut remapper);
        for p in protect {
            gen.protect_package(p);
        }
        gen.propose_class_names().unwrap();
        remapper
    }

    #[test]
    fn public_classes_are_numbered_in_name_order() {
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/b", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("p/a", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("p/Keep", "java/lang/Object", ACC_PUBLIC),
        ])
        .unwrap();
        let mut remapper = propose(&mut graph, &[]);
        remapper.process(&mut graph).unwrap();

        assert!(graph.by_name("p/class_a").is_some());
        assert!(graph.by_name("p/class_b").is_some());
        assert!(graph.by_name("p/Keep").is_some());
        // "p/a" sorts before "p/b", so it takes the first number.
        assert_eq!(graph.by_name("p/class_a").unwrap().name, "p/class_a");
    }

    #[test]
    fn buckets_separate_kinds_and_packages() {
        let mut local = ClassUnit::new("p/d", "java/lang/Object", 0);
        local.outer_class = Some("p/Keep".to_string());
        local.outer_method = Some(EnclosingMethod {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
        });
        let mut inner = ClassUnit::new("p/e", "java/lang/Object", 0);
        inner.outer_class = Some("p/Keep".to_string());
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("p/a", "java/lang/Enum", ACC_PUBLIC | ACC_ENUM),
            ClassUnit::new("p/b", "java/lang/Object", ACC_PUBLIC | ACC_INTERFACE),
            ClassUnit::new("p/c", "java/lang/Object", 0),
            local,
            inner,
            ClassUnit::new("q/a", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("a", "java/lang/Object", ACC_PROTECTED),
        ])
        .unwrap();
        let mut remapper = propose(&mut graph, &[]);
        remapper.process(&mut graph).unwrap();

        assert!(graph.by_name("p/enum_a").is_some());
        assert!(graph.by_name("p/interface_a").is_some());
        assert!(graph.by_name("p/ppclass_a").is_some());
        assert!(graph.by_name("p/localclass_a").is_some());
        assert!(graph.by_name("p/innerclass_a").is_some());
        assert!(graph.by_name("q/class_a").is_some());
        // Default package gets no leading separator.
        assert!(graph.by_name("pclass_a").is_some());
    }

    #[test]
    fn protected_packages_are_skipped() {
        let mut graph = ClassGraph::build(vec![
            ClassUnit::new("keep/api/a", "java/lang/Object", ACC_PUBLIC),
            ClassUnit::new("other/a", "java/lang/Object", ACC_PUBLIC),
        ])
        .unwrap();
        let mut remapper = propose(&mut graph, &["keep"]);
        remapper.process(&mut graph).unwrap();

        assert!(graph.by_name("keep/api/a").is_some());
        assert!(graph.by_name("other/class_a").is_some());
    }
}
