//! Deterministic intermediary name proposals for obfuscated classes,
//! enum constants and accessor methods.
//!
//! Proposals are registered with a [`Remapper`] and optionally mirrored to a
//! tiny-v1 [`MappingWriter`]; nothing is applied until the caller runs
//! `Remapper::process`. All iteration orders are sorted, so the same input
//! always yields the same names.

#![forbid(unsafe_code)]

mod accessors;
mod classes;
mod enum_fields;

use larch_graph::ClassGraph;
use larch_remap::{MappingWriter, RemapError, Remapper};
use thiserror::Error;

pub use crate::classes::Category;

#[derive(Debug, Error)]
pub enum IntermediaryError {
    #[error(transparent)]
    Remap(#[from] RemapError),
    #[error(transparent)]
    Parse(#[from] larch_classfile::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct IntermediaryGenerator<'a> {
    graph: &'a ClassGraph,
    remapper: &'a mut Remapper,
    writer: Option<MappingWriter>,
    protected_packages: Vec<String>,
}

impl<'a> IntermediaryGenerator<'a> {
    pub fn new(graph: &'a ClassGraph, remapper: &'a mut Remapper) -> Self {
        IntermediaryGenerator {
            graph,
            remapper,
            writer: None,
            protected_packages: Vec::new(),
        }
    }

    /// Mirrors every proposal into a tiny-v1 map.
    pub fn with_writer(mut self, writer: MappingWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Classes under this package (and its subpackages) keep their names.
    pub fn protect_package(&mut self, package: &str) {
        self.protected_packages.push(package.to_string());
    }

    /// Flushes the mapping file, if any.
    pub fn finish(self) -> std::io::Result<()> {
        match self.writer {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }

    fn is_protected(&self, package: &str) -> bool {
        self.protected_packages
            .iter()
            .any(|p| package == p || package.starts_with(&format!("{p}/")))
    }

    fn record_class(&mut self, old: &str, new: &str) -> std::io::Result<()> {
        match &mut self.writer {
            Some(w) => w.class(old, new),
            None => Ok(()),
        }
    }

    fn record_field(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> std::io::Result<()> {
        match &mut self.writer {
            Some(w) => w.field(owner, descriptor, old, new),
            None => Ok(()),
        }
    }

    fn record_method(
        &mut self,
        owner: &str,
        descriptor: &str,
        old: &str,
        new: &str,
    ) -> std::io::Result<()> {
        match &mut self.writer {
            Some(w) => w.method(owner, descriptor, old, new),
            None => Ok(()),
        }
    }
}

/// Bijective base-26 over `a..z`: 0 is `a`, 25 is `z`, 26 is `aa`.
pub(crate) fn base26(mut n: usize) -> String {
    let mut out = String::new();
    loop {
        out.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.chars().rev().collect()
}
