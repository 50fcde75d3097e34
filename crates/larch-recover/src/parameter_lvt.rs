//! Pass 2: synthesized parameter names for methods whose local-variable
//! tables were stripped.
//!
//! Names come from the descriptor alone, so repeated recovery over the same
//! input reproduces identical tables. Methods that still carry a table are
//! left untouched, and a surviving parameter-name list is reused for the
//! table entries rather than regenerated.

use std::collections::HashMap;

use larch_classfile::access::{ACC_ABSTRACT, ACC_NATIVE};
use larch_classfile::{
    primitive_word, short_name, slot_width, DescReader, LocalVariable, Method,
};
use larch_graph::ClassGraph;

use crate::{FailurePolicy, RecoverError, RecoveryPass};

pub struct ParameterLvtPass;

impl RecoveryPass for ParameterLvtPass {
    fn name(&self) -> &'static str {
        "parameter-lvt"
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::SkipSite
    }

    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError> {
        for id in graph.ids() {
            for method in &mut graph.get_mut(id).methods {
                synthesize(method)?;
            }
        }
        Ok(())
    }
}

fn synthesize(method: &mut Method) -> Result<(), RecoverError> {
    if method.access_flags & (ACC_ABSTRACT | ACC_NATIVE) != 0 {
        return Ok(());
    }
    if !method.local_variables.is_empty() {
        return Ok(());
    }
    let descriptor = method.descriptor.clone();
    let tokens = DescReader::new(&descriptor)?.collect_types()?;
    if tokens.is_empty() {
        return Ok(());
    }

    let names = if method.parameters.is_empty() {
        parameter_names(&tokens)
    } else {
        method.parameters.clone()
    };
    let (start, end) = method.body_span();
    let mut slot = if method.is_static() { 0u16 } else { 1u16 };
    for (token, name) in tokens.iter().zip(&names) {
        method.local_variables.push(LocalVariable {
            name: name.clone(),
            descriptor: (*token).to_string(),
            signature: None,
            slot,
            start,
            end,
        });
        slot += slot_width(token);
    }
    method.parameters = names;
    Ok(())
}

/// One deterministic name per parameter token. A single array parameter is
/// plain `arr`; with several, each gets its ordinal. Other repeated base
/// names pick up a counting suffix starting at the second occurrence.
fn parameter_names(tokens: &[&str]) -> Vec<String> {
    let arrays = tokens.iter().filter(|t| t.starts_with('[')).count();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut arr_ordinal = 0usize;
    let mut names = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.starts_with('[') {
            arr_ordinal += 1;
            names.push(if arrays > 1 {
                format!("arr{arr_ordinal}")
            } else {
                "arr".to_string()
            });
            continue;
        }
        let base = match primitive_word(token) {
            Some(word) => word.to_string(),
            None => short_name(token),
        };
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        names.push(if *count == 1 {
            base
        } else {
            format!("{base}{count}")
        });
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_classfile::access::{ACC_ABSTRACT, ACC_PUBLIC, ACC_STATIC};
    use larch_classfile::{ClassUnit, Insn};
    use pretty_assertions::assert_eq;

    fn method_with_body(access: u16, desc: &str) -> Method {
        let mut m = Method::new(access, "m", desc);
        m.instructions.push(Insn::Return(None));
        m
    }

    fn lvt_of(graph: &ClassGraph, class: &str) -> Vec<(String, String, u16)> {
        graph.by_name(class).unwrap().methods[0]
            .local_variables
            .iter()
            .map(|v| (v.name.clone(), v.descriptor.clone(), v.slot))
            .collect()
    }

    #[test]
    fn names_follow_token_kinds_with_duplicate_suffixes() {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        unit.methods.push(method_with_body(
            ACC_STATIC,
            "(IILjava/lang/String;[BJ)V",
        ));
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        ParameterLvtPass.run(&mut graph).unwrap();

        assert_eq!(
            lvt_of(&graph, "p/A"),
            vec![
                ("int".to_string(), "I".to_string(), 0),
                ("int2".to_string(), "I".to_string(), 1),
                ("string".to_string(), "Ljava/lang/String;".to_string(), 2),
                ("arr".to_string(), "[B".to_string(), 3),
                ("long".to_string(), "J".to_string(), 4),
            ]
        );
    }

    #[test]
    fn instance_methods_reserve_slot_zero_and_wide_types_two_slots() {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        unit.methods.push(method_with_body(ACC_PUBLIC, "(DI)V"));
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        ParameterLvtPass.run(&mut graph).unwrap();

        assert_eq!(
            lvt_of(&graph, "p/A"),
            vec![
                ("double".to_string(), "D".to_string(), 1),
                ("int".to_string(), "I".to_string(), 3),
            ]
        );
    }

    #[test]
    fn multiple_arrays_get_ordinals() {
        assert_eq!(
            parameter_names(&["[I", "[Ljava/lang/String;", "I"]),
            vec!["arr1", "arr2", "int"]
        );
        assert_eq!(parameter_names(&["[I", "I"]), vec!["arr", "int"]);
    }

    #[test]
    fn existing_tables_and_abstract_methods_are_untouched() {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        let mut kept = method_with_body(ACC_PUBLIC, "(I)V");
        kept.local_variables.push(LocalVariable {
            name: "count".to_string(),
            descriptor: "I".to_string(),
            signature: None,
            slot: 1,
            start: larch_classfile::LabelId(0),
            end: larch_classfile::LabelId(1),
        });
        unit.methods.push(kept);
        unit.methods
            .push(Method::new(ACC_PUBLIC | ACC_ABSTRACT, "a", "(I)V"));
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        ParameterLvtPass.run(&mut graph).unwrap();

        let unit = graph.by_name("p/A").unwrap();
        assert_eq!(unit.methods[0].local_variables[0].name, "count");
        assert_eq!(unit.methods[0].local_variables.len(), 1);
        assert!(unit.methods[1].local_variables.is_empty());
    }

    #[test]
    fn surviving_parameter_names_feed_the_synthesized_table() {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        let mut named = method_with_body(ACC_STATIC, "(I)V");
        named.parameters = vec!["limit".to_string()];
        unit.methods.push(named);
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        ParameterLvtPass.run(&mut graph).unwrap();

        assert_eq!(
            lvt_of(&graph, "p/A"),
            vec![("limit".to_string(), "I".to_string(), 0)]
        );
        assert_eq!(
            graph.by_name("p/A").unwrap().methods[0].parameters,
            vec!["limit".to_string()]
        );
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut unit = ClassUnit::new("p/A", "java/lang/Object", ACC_PUBLIC);
        unit.methods.push(method_with_body(ACC_STATIC, "(I[J)V"));
        let mut graph = ClassGraph::build(vec![unit]).unwrap();
        ParameterLvtPass.run(&mut graph).unwrap();
        let first = lvt_of(&graph, "p/A");
        ParameterLvtPass.run(&mut graph).unwrap();
        assert_eq!(lvt_of(&graph, "p/A"), first);
    }
}
