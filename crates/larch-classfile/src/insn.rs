//! A closed instruction model covering exactly the opcode categories the
//! recovery heuristics and the rename engine dispatch on.
//!
//! Instructions are owned by their [`crate::Method`] and referenced only by
//! position. Labels are method-local; jump instructions name a [`LabelId`]
//! that appears as an [`Insn::Label`] marker somewhere in the same method.

/// A method-local label. Ids are unique within one instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// Kind of a local-slot load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    Ref,
    Int,
    Long,
    Float,
    Double,
}

/// Element kind of an array load/store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Ref,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

impl FieldOp {
    pub fn is_read(self) -> bool {
        matches!(self, FieldOp::GetStatic | FieldOp::GetField)
    }

    pub fn is_static(self) -> bool {
        matches!(self, FieldOp::GetStatic | FieldOp::PutStatic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

/// Constant-load operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Str(String),
    ClassRef(String),
    Null,
}

/// Condition of a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    IcmpEq,
    IcmpNe,
    IcmpLt,
    IcmpGe,
    IcmpGt,
    IcmpLe,
    Null,
    NonNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Position marker; the target of jumps and local-variable ranges.
    Label(LabelId),
    Load {
        kind: VarKind,
        slot: u16,
    },
    Store {
        kind: VarKind,
        slot: u16,
    },
    Iinc {
        slot: u16,
        delta: i16,
    },
    Field {
        op: FieldOp,
        owner: String,
        name: String,
        descriptor: String,
    },
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        descriptor: String,
    },
    New {
        class: String,
    },
    /// Array allocation; `element` is the element type descriptor
    /// (`"I"`, `"Ljava/lang/String;"`, ...).
    NewArray {
        element: String,
    },
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    ArrayLength,
    /// `class` is an internal name or, for array casts, a descriptor.
    CheckCast {
        class: String,
    },
    Ldc(ConstValue),
    Goto(LabelId),
    Branch {
        kind: BranchKind,
        target: LabelId,
    },
    Dup,
    /// `None` is a void return.
    Return(Option<VarKind>),
}

impl Insn {
    /// Label id carried by this instruction, if it is a label marker.
    pub fn as_label(&self) -> Option<LabelId> {
        match self {
            Insn::Label(l) => Some(*l),
            _ => None,
        }
    }
}
