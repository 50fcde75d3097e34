//! The symbol rename engine and the tiny-v1 mapping file format.
//!
//! Rename requests are accumulated against pre-rename symbol identity and
//! applied in one atomic [`Remapper::process`] pass over the whole class
//! graph; virtual method renames propagate through the override lattice
//! under visibility-scope rules.

#![forbid(unsafe_code)]

mod mapping;
mod remapper;

pub use crate::mapping::{invert_tiny_v1, read_tiny_v1, MappingError, MappingWriter};
pub use crate::remapper::{propagation_targets, OverrideScope, RemapError, Remapper};
