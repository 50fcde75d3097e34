//! The metadata recovery engine: a fixed, ordered battery of independent
//! heuristic passes over the class graph.
//!
//! Order matters; later passes assume local-variable tables synthesized by
//! earlier ones. Each pass declares its failure policy up front: most skip
//! a candidate site that does not match the expected instruction shape and
//! move on, while the comparator-signature pass treats a shape violation as
//! fatal.

#![forbid(unsafe_code)]

mod anonymous_classes;
mod comparator_signatures;
mod cursor;
mod field_generics;
mod foreach_lvt;
mod inner_classes;
mod parameter_lvt;
mod switch_maps;

use larch_graph::ClassGraph;
use thiserror::Error;
use tracing::info;

pub use crate::anonymous_classes::AnonymousClassPass;
pub use crate::comparator_signatures::ComparatorSignaturePass;
pub use crate::field_generics::FieldGenericsPass;
pub use crate::foreach_lvt::ForeachLvtPass;
pub use crate::inner_classes::InnerClassPass;
pub use crate::parameter_lvt::ParameterLvtPass;
pub use crate::switch_maps::SwitchMapPass;

#[derive(Debug, Error)]
pub enum RecoverError {
    /// A relation map is missing an expected owner entry: internally
    /// inconsistent input, fatal.
    #[error("outer class {owner} of {class} is not loaded")]
    MissingOwner { class: String, owner: String },
    #[error("comparator bridge shape violation in {class}: {reason}")]
    ComparatorShape { class: String, reason: &'static str },
    #[error(transparent)]
    Parse(#[from] larch_classfile::ParseError),
}

/// Failure policy of one pass, chosen explicitly at its definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A non-matching candidate site is skipped with no mutation and no
    /// cross-site effect.
    SkipSite,
    /// A non-matching candidate aborts the batch.
    AbortClass,
}

pub trait RecoveryPass {
    fn name(&self) -> &'static str;
    fn policy(&self) -> FailurePolicy;
    fn run(&self, graph: &mut ClassGraph) -> Result<(), RecoverError>;
}

/// The documented pass order. Pass 2 must precede passes that assume
/// synthesized parameter tables; pass 1 must precede anonymous-class
/// bucketing downstream.
pub fn default_passes() -> Vec<Box<dyn RecoveryPass>> {
    vec![
        Box::new(InnerClassPass),
        Box::new(ParameterLvtPass),
        Box::new(SwitchMapPass),
        Box::new(ForeachLvtPass),
        Box::new(ComparatorSignaturePass),
        Box::new(AnonymousClassPass),
        Box::new(FieldGenericsPass),
    ]
}

/// Runs the full battery in order; the first fatal error aborts the batch.
pub fn run_recovery(graph: &mut ClassGraph) -> Result<(), RecoverError> {
    for pass in default_passes() {
        info!(pass = pass.name(), "running recovery pass");
        pass.run(graph)?;
    }
    Ok(())
}
