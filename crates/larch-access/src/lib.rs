//! Access widener files: a line-oriented format for loosening access flags
//! after renaming.
//!
//! The header is `accessWidener v1 intermediary` (or `v2`); records are
//! `<operation> class <name>` or `<operation> field|method <class> <name>
//! <descriptor>`. `#` starts a comment anywhere on a line. Supported
//! operations are `accessible`, `extendable`, `mutable` (drops final),
//! `natural` (drops synthetic) and `denumerised` (drops the enum flag).

#![forbid(unsafe_code)]

use std::io::BufRead;

use larch_classfile::access::{
    ACC_ENUM, ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_SYNTHETIC,
};
use larch_graph::ClassGraph;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("no access widener header found")]
    MissingHeader,
    #[error("malformed header, expected \"accessWidener v1|v2 intermediary\": {0:?}")]
    BadHeader(String),
    #[error("unsupported namespace {0:?}, only intermediary wideners can be applied")]
    BadNamespace(String),
    #[error("line {line}: expected {expected} blocks, got {found}")]
    BlockCount {
        line: usize,
        expected: &'static str,
        found: usize,
    },
    #[error("line {line}: unknown target kind {kind:?}")]
    UnknownTarget { line: usize, kind: String },
    #[error("line {line}: unknown operation {operation:?}")]
    UnknownOperation { line: usize, operation: String },
    #[error("line {line}: a field cannot be made extendable")]
    ExtendableField { line: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Class,
    Field,
    Method,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Raise visibility to public.
    Accessible,
    /// Drop final and raise visibility to at least protected.
    Extendable,
    /// Clear one specific flag bit.
    RemoveFlag(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessModifier {
    pub kind: TargetKind,
    pub class: String,
    pub name: Option<String>,
    pub descriptor: Option<String>,
    pub operation: Operation,
}

/// Parses a widener file into its modifier list. The header must be the
/// first meaningful line.
pub fn read_access_widener<R: BufRead>(reader: R) -> Result<Vec<AccessModifier>, AccessError> {
    let mut modifiers = Vec::new();
    let mut saw_header = false;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let meaningful = match line.find('#') {
            Some(at) => &line[..at],
            None => &line,
        };
        if meaningful.trim().is_empty() {
            continue;
        }
        let blocks: Vec<&str> = meaningful.split_whitespace().collect();
        if !saw_header {
            read_header(&blocks, meaningful)?;
            saw_header = true;
            continue;
        }
        modifiers.push(read_modifier(line_no, &blocks)?);
    }
    if !saw_header {
        return Err(AccessError::MissingHeader);
    }
    Ok(modifiers)
}

fn read_header(blocks: &[&str], line: &str) -> Result<(), AccessError> {
    if blocks.len() != 3 || !blocks[0].eq_ignore_ascii_case("accessWidener") {
        return Err(AccessError::BadHeader(line.trim().to_string()));
    }
    if blocks[1] != "v1" && blocks[1] != "v2" {
        return Err(AccessError::BadHeader(line.trim().to_string()));
    }
    if blocks[2] != "intermediary" {
        return Err(AccessError::BadNamespace(blocks[2].to_string()));
    }
    Ok(())
}

fn read_modifier(line_no: usize, blocks: &[&str]) -> Result<AccessModifier, AccessError> {
    let (kind, class, name, descriptor) = match blocks.get(1).map(|k| k.to_ascii_lowercase()) {
        Some(ref k) if k == "class" => {
            if blocks.len() != 3 {
                return Err(AccessError::BlockCount {
                    line: line_no,
                    expected: "3",
                    found: blocks.len(),
                });
            }
            (TargetKind::Class, blocks[2], None, None)
        }
        Some(ref k) if k == "field" || k == "method" => {
            if blocks.len() != 5 {
                return Err(AccessError::BlockCount {
                    line: line_no,
                    expected: "5",
                    found: blocks.len(),
                });
            }
            let kind = if k == "field" {
                TargetKind::Field
            } else {
                TargetKind::Method
            };
            (
                kind,
                blocks[2],
                Some(blocks[3].to_string()),
                Some(blocks[4].to_string()),
            )
        }
        Some(other) => {
            return Err(AccessError::UnknownTarget {
                line: line_no,
                kind: other,
            });
        }
        None => {
            return Err(AccessError::BlockCount {
                line: line_no,
                expected: "3 or 5",
                found: blocks.len(),
            });
        }
    };

    let operation = match blocks[0].to_ascii_lowercase().as_str() {
        "accessible" => Operation::Accessible,
        "extendable" => {
            if kind == TargetKind::Field {
                return Err(AccessError::ExtendableField { line: line_no });
            }
            Operation::Extendable
        }
        "mutable" => Operation::RemoveFlag(ACC_FINAL),
        "natural" => Operation::RemoveFlag(ACC_SYNTHETIC),
        "denumerised" => Operation::RemoveFlag(ACC_ENUM),
        other => {
            return Err(AccessError::UnknownOperation {
                line: line_no,
                operation: other.to_string(),
            });
        }
    };
    Ok(AccessModifier {
        kind,
        class: class.replace('.', "/"),
        name,
        descriptor,
        operation,
    })
}

/// Applies modifiers to the loaded classes. Targets that are not loaded are
/// logged and skipped; the return value counts the modifiers that landed.
pub fn apply_modifiers(graph: &mut ClassGraph, modifiers: &[AccessModifier]) -> usize {
    let mut applied = 0usize;
    for modifier in modifiers {
        let Some(id) = graph.id_of(&modifier.class) else {
            warn!(class = %modifier.class, "access widener target is not loaded");
            continue;
        };
        let unit = graph.get_mut(id);
        let flags = match modifier.kind {
            TargetKind::Class => Some(&mut unit.access_flags),
            TargetKind::Field => unit
                .fields
                .iter_mut()
                .find(|f| {
                    Some(&f.name) == modifier.name.as_ref()
                        && Some(&f.descriptor) == modifier.descriptor.as_ref()
                })
                .map(|f| &mut f.access_flags),
            TargetKind::Method => unit
                .methods
                .iter_mut()
                .find(|m| {
                    Some(&m.name) == modifier.name.as_ref()
                        && Some(&m.descriptor) == modifier.descriptor.as_ref()
                })
                .map(|m| &mut m.access_flags),
        };
        let Some(flags) = flags else {
            warn!(
                class = %modifier.class,
                member = modifier.name.as_deref().unwrap_or_default(),
                "access widener member target is missing"
            );
            continue;
        };
        *flags = widen(*flags, modifier.operation);
        applied += 1;
    }
    applied
}

fn widen(flags: u16, operation: Operation) -> u16 {
    match operation {
        Operation::Accessible => (flags & !(ACC_PRIVATE | ACC_PROTECTED)) | ACC_PUBLIC,
        Operation::Extendable => {
            let flags = flags & !ACC_FINAL;
            if flags & ACC_PUBLIC != 0 {
                flags
            } else {
                (flags & !ACC_PRIVATE) | ACC_PROTECTED
            }
        }
        Operation::RemoveFlag(bit) => flags & !bit,
    }
}
