//! In-memory model for JVM class units plus the descriptor decoder.
//!
//! This crate is the shared vocabulary of the whole workspace: every
//! recovery pass and the rename engine operate on [`ClassUnit`] values and
//! the closed [`Insn`] instruction set defined here.

#![forbid(unsafe_code)]

pub mod access;
mod descriptor;
mod error;
mod insn;
mod unit;

pub use crate::descriptor::{
    primitive_word, return_type, short_name, slot_width, DescReader,
};
pub use crate::error::{ParseError, Result};
pub use crate::insn::{
    ArrayKind, BranchKind, ConstValue, FieldOp, Insn, InvokeKind, LabelId, VarKind,
};
pub use crate::unit::{ClassUnit, EnclosingMethod, Field, InnerClassRelation, LocalVariable, Method};
