//! Enum constant field names recovered from `<clinit>`.
//!
//! The constant's source name survives obfuscation as the string literal
//! passed to the enum constructor; the static field it lands in gets that
//! literal back as its name.

use std::collections::HashSet;

use larch_classfile::access::ACC_STATIC;
use larch_classfile::{ConstValue, FieldOp, Insn, InvokeKind};
use tracing::debug;

use crate::{IntermediaryError, IntermediaryGenerator};

impl IntermediaryGenerator<'_> {
    /// Proposes a rename for every enum constant field whose constructor
    /// literal disagrees with its current name. Returns the proposal count.
    pub fn propose_enum_constant_names(&mut self) -> Result<usize, IntermediaryError> {
        let graph = self.graph;
        let mut proposed = 0usize;
        for unit in graph.units() {
            if unit.super_name.as_deref() != Some("java/lang/Enum") {
                continue;
            }
            let self_desc = format!("L{};", unit.name);
            let members: HashSet<&str> = unit
                .fields
                .iter()
                .filter(|f| f.descriptor == self_desc && f.access_flags & ACC_STATIC != 0)
                .map(|f| f.name.as_str())
                .collect();
            if members.is_empty() {
                continue;
            }
            let Some(clinit) = unit.method("<clinit>", "()V") else {
                continue;
            };

            // One constant per New..PutStatic window; the first string
            // literal inside the window is the constructor's name argument.
            let mut constructing = false;
            let mut literal: Option<&str> = None;
            for insn in &clinit.instructions {
                match insn {
                    Insn::New { class } if class == &unit.name => {
                        constructing = true;
                        literal = None;
                    }
                    Insn::Ldc(ConstValue::Str(s)) if constructing && literal.is_none() => {
                        literal = Some(s);
                    }
                    Insn::Invoke {
                        kind: InvokeKind::Special,
                        owner,
                        name,
                        ..
                    } if owner == &unit.name && name == "<init>" => {
                        constructing = false;
                    }
                    Insn::Field {
                        op: FieldOp::PutStatic,
                        owner,
                        name,
                        descriptor,
                    } if owner == &unit.name && descriptor == &self_desc => {
                        let Some(lit) = literal.take() else {
                            continue;
                        };
                        if !members.contains(name.as_str()) || lit == name {
                            continue;
                        }
                        if members.contains(lit) || !is_identifier(lit) {
                            debug!(
                                owner = %unit.name,
                                field = %name,
                                literal = lit,
                                "constant literal unusable as a field name"
                            );
                            continue;
                        }
                        self.remapper.remap_field(&unit.name, &self_desc, name, lit)?;
                        self.record_field(&unit.name, &self_desc, name, lit)?;
                        proposed += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(proposed)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
