//! Dead-flag elision.
//!
//! Two rewrites over the packed host flags:
//!
//! 1. A flag rebuild whose written guest bits are all overwritten by
//!    the next rebuild before any other use degrades into a move.
//! 2. A backward liveness scan over the host flag byte clears
//!    `update_host_flags` on ALU ops and shifts whose produced flags
//!    no later opcode consumes. The carry bit stays live across the
//!    micro-block boundary: a later micro-block (or chained block)
//!    may consume it without rebuilding it first.

use arm_jit_core::{AluOp, AnyRef, IREmitter, IROp, ShiftOp};

const N: u8 = 1;
const Z: u8 = 2;
const C: u8 = 4;
const V: u8 = 8;

fn update_mask(flag_n: bool, flag_z: bool, flag_c: bool, flag_v: bool) -> u8 {
    let mut mask = 0;
    if flag_n {
        mask |= N;
    }
    if flag_z {
        mask |= Z;
    }
    if flag_c {
        mask |= C;
    }
    if flag_v {
        mask |= V;
    }
    mask
}

pub fn run(emitter: &mut IREmitter) {
    elide_covered_rebuilds(emitter);
    clear_unconsumed_producers(emitter);
}

/// Rewrite `UpdateFlags` ops whose only reader is a later
/// `UpdateFlags` writing a superset of the same bits.
fn elide_covered_rebuilds(emitter: &mut IREmitter) {
    let code = emitter.code_mut();
    for index in 0..code.len() {
        let IROp::UpdateFlags {
            result,
            input,
            flag_n,
            flag_z,
            flag_c,
            flag_v,
        } = code[index].clone()
        else {
            continue;
        };
        let mask = update_mask(flag_n, flag_z, flag_c, flag_v);

        let mut readers = code[index + 1..].iter().filter(|op| op.reads(result));
        let (Some(reader), None) = (readers.next(), readers.next()) else {
            continue;
        };
        let IROp::UpdateFlags {
            input: next_input,
            flag_n,
            flag_z,
            flag_c,
            flag_v,
            ..
        } = reader
        else {
            continue;
        };
        let next_mask = update_mask(*flag_n, *flag_z, *flag_c, *flag_v);
        if *next_input == result && next_mask & mask == mask {
            tracing::trace!(%result, "flag rebuild covered by successor");
            code[index] = IROp::Mov {
                result,
                source: AnyRef::Var(input),
                update_host_flags: false,
            };
        }
    }
}

/// Flags an ALU op makes visible in the packed flag bytes, and the
/// flags it destroys there.
fn alu_flag_sets(op: AluOp) -> (u8, u8) {
    if op.is_arithmetic() {
        (N | Z | C | V, N | Z | C | V)
    } else {
        // Logical ops re-inject the previous carry and leave the
        // overflow byte alone.
        (N | Z, N | Z)
    }
}

fn clear_unconsumed_producers(emitter: &mut IREmitter) {
    let mut live = C;

    for op in emitter.code_mut().iter_mut().rev() {
        match op {
            IROp::UpdateFlags {
                flag_n,
                flag_z,
                flag_c,
                flag_v,
                ..
            } => {
                live |= update_mask(*flag_n, *flag_z, *flag_c, *flag_v);
            }
            IROp::UpdateSticky { .. } => live |= V,
            IROp::Alu {
                op,
                update_host_flags,
                ..
            } => {
                if *update_host_flags {
                    let (produced, killed) = alu_flag_sets(*op);
                    if produced & live == 0 {
                        *update_host_flags = false;
                    } else {
                        live &= !killed;
                    }
                }
                if op.uses_carry() {
                    live |= C;
                }
            }
            IROp::Shift {
                op,
                amount,
                update_host_flags,
                ..
            } => {
                if *update_host_flags {
                    if live & C == 0 {
                        *update_host_flags = false;
                    } else {
                        live &= !C;
                    }
                }
                let is_rrx = *op == ShiftOp::Ror
                    && matches!(amount, AnyRef::Const(c) if c.value == 0);
                if *update_host_flags || is_rrx {
                    live |= C;
                }
            }
            IROp::Mov {
                update_host_flags, ..
            }
            | IROp::Mvn {
                update_host_flags, ..
            } => {
                if *update_host_flags {
                    if live & (N | Z) == 0 {
                        *update_host_flags = false;
                    } else {
                        live &= !(N | Z);
                    }
                }
            }
            IROp::Multiply {
                update_host_flags, ..
            } => {
                if *update_host_flags {
                    if live & (N | Z) == 0 {
                        *update_host_flags = false;
                    } else {
                        // The rebuild zeroes the carry byte as well.
                        live &= !(N | Z | C);
                    }
                }
            }
            IROp::Add64 {
                update_host_flags, ..
            } => {
                if *update_host_flags {
                    if live & (N | Z | C) == 0 {
                        *update_host_flags = false;
                    } else {
                        live &= !(N | Z | C);
                    }
                }
            }
            IROp::ClearCarry | IROp::SetCarry => live &= !C,
            IROp::QAdd { .. } | IROp::QSub { .. } => live &= !V,
            _ => {}
        }
    }
}
