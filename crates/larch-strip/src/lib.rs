//! Removal of methods marked with a build-time annotation.
//!
//! Used to cut test hooks and development-only entry points out of a
//! release archive. The annotation can be named in dotted source form,
//! internal form or as a full descriptor; all three normalize to the
//! descriptor the class files actually carry.

#![forbid(unsafe_code)]

use larch_graph::ClassGraph;
use tracing::debug;

/// Normalizes an annotation name to descriptor form:
/// `com.example.Internal`, `com/example/Internal` and
/// `Lcom/example/Internal;` all become `Lcom/example/Internal;`.
pub fn normalize_annotation(name: &str) -> String {
    if name.starts_with('L') && name.ends_with(';') {
        return name.to_string();
    }
    format!("L{};", name.replace('.', "/"))
}

/// Drops every method carrying the annotation, across the whole graph.
/// Both retention classes are checked. Returns the number of methods
/// removed.
pub fn strip_annotated_methods(graph: &mut ClassGraph, annotation: &str) -> usize {
    let descriptor = normalize_annotation(annotation);
    let mut removed = 0usize;
    for id in graph.ids() {
        let unit = graph.get_mut(id);
        let before = unit.methods.len();
        unit.methods.retain(|method| {
            let marked = method.visible_annotations.contains(&descriptor)
                || method.invisible_annotations.contains(&descriptor);
            if marked {
                debug!(
                    class = %unit.name,
                    method = %method.name,
                    descriptor = %method.descriptor,
                    "stripping annotated method"
                );
            }
            !marked
        });
        removed += before - unit.methods.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::ACC_PUBLIC;
    use larch_classfile::{ClassUnit, Method};
    use pretty_assertions::assert_eq;

    const MARKER: &str = "Lcom/example/TestOnly;";

    fn class_with_marked_method() -> ClassUnit {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        let mut hook = Method::new(ACC_PUBLIC, "debugDump", "()V");
        hook.invisible_annotations.push(MARKER.to_string());
        unit.methods.push(hook);
        unit.methods.push(Method::new(ACC_PUBLIC, "run", "()V"));
        unit
    }

    #[test]
    fn normalization_accepts_all_three_spellings() {
        assert_eq!(normalize_annotation("com.example.TestOnly"), MARKER);
        assert_eq!(normalize_annotation("com/example/TestOnly"), MARKER);
        assert_eq!(normalize_annotation(MARKER), MARKER);
    }

    #[test]
    fn marked_methods_are_removed_and_counted() {
        let mut graph = ClassGraph::build(vec![class_with_marked_method()]).unwrap();
        let removed = strip_annotated_methods(&mut graph, "com.example.TestOnly");
        assert_eq!(removed, 1);
        let unit = graph.by_name("p/A").unwrap();
        assert_eq!(unit.methods.len(), 1);
        assert_eq!(unit.methods[0].name, "run");
    }

    #[test]
    fn visible_retention_is_matched_too() {
        let mut unit = ClassUnit::new("p/B", "java/lang/Object", ACC_PUBLIC);
        let mut hook = Method::new(ACC_PUBLIC, "bench", "()V");
        hook.visible_annotations.push(MARKER.to_string());
        unit.methods.push(hook);
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        assert_eq!(strip_annotated_methods(&mut graph, MARKER), 1);
    }

    #[test]
    fn unrelated_annotations_are_kept() {
        let mut graph = ClassGraph::build(vec![class_with_marked_method()]).unwrap();
        let removed = strip_annotated_methods(&mut graph, "com.example.Other");
        assert_eq!(removed, 0);
        assert_eq!(graph.by_name("p/A").unwrap().methods.len(), 2);
    }
}
