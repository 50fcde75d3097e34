//! Small helpers for walking instruction lists while tolerating label
//! markers between the opcodes of a matched shape.

use larch_classfile::Insn;

/// Next non-label instruction at or after `i`, with its position.
pub(crate) fn next_op(insns: &[Insn], mut i: usize) -> Option<(usize, &Insn)> {
    while i < insns.len() {
        if !matches!(insns[i], Insn::Label(_)) {
            return Some((i, &insns[i]));
        }
        i += 1;
    }
    None
}

/// Previous non-label instruction strictly before `i`, with its position.
pub(crate) fn prev_op(insns: &[Insn], i: usize) -> Option<(usize, &Insn)> {
    let mut j = i;
    while j > 0 {
        j -= 1;
        if !matches!(insns[j], Insn::Label(_)) {
            return Some((j, &insns[j]));
        }
    }
    None
}
