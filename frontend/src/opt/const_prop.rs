//! Constant propagation.
//!
//! Maintains a dense variable → known-constant map, folds shifter and
//! ALU ops whose operands are all known, and rewrites folded ops into
//! constant moves (or a no-op when the result is dead and no flag
//! update is requested). `ROR #0` is never folded: that encoding is
//! RRX and consumes the carry flag.

use arm_jit_core::{AluOp, AnyRef, IRConstant, IRDataType, IREmitter, IROp, ShiftOp, VarRef};

pub fn run(emitter: &mut IREmitter) {
    let mut known: Vec<Option<IRConstant>> = vec![None; emitter.vars().len()];
    let var_types: Vec<IRDataType> = emitter.vars().iter().map(|v| v.data_type).collect();
    let code = emitter.code_mut();

    for index in 0..code.len() {
        match code[index].clone() {
            IROp::Mov {
                result,
                source: AnyRef::Const(constant),
                ..
            } => {
                propagate(code, &mut known, index, result, constant);
            }
            IROp::Shift {
                op,
                result,
                operand,
                amount: AnyRef::Const(amount),
                update_host_flags,
            } => {
                let Some(operand) = known[operand.id()] else {
                    continue;
                };
                let value = match op {
                    ShiftOp::Lsl => {
                        let shift = amount.value & 255;
                        if shift >= 32 {
                            0
                        } else {
                            operand.value << shift
                        }
                    }
                    ShiftOp::Lsr => {
                        // LSR #0 encodes LSR #32.
                        let shift = amount.value & 255;
                        if shift == 0 || shift >= 32 {
                            0
                        } else {
                            operand.value >> shift
                        }
                    }
                    ShiftOp::Asr => {
                        let mut shift = amount.value & 255;
                        if shift == 0 || shift >= 32 {
                            shift = 31;
                        }
                        ((operand.value as i32) >> shift) as u32
                    }
                    ShiftOp::Ror => {
                        if amount.value == 0 {
                            // RRX
                            continue;
                        }
                        operand.value.rotate_right(amount.value & 31)
                    }
                };
                let constant = IRConstant::new(value);
                propagate(code, &mut known, index, result, constant);
                if !update_host_flags {
                    code[index] = IROp::Mov {
                        result,
                        source: constant.into(),
                        update_host_flags: false,
                    };
                }
            }
            IROp::Alu {
                op,
                result,
                lhs,
                rhs: AnyRef::Const(rhs),
                update_host_flags,
            } => {
                let foldable = matches!(
                    op,
                    AluOp::Add | AluOp::Sub | AluOp::And | AluOp::Bic | AluOp::Eor | AluOp::Orr
                );
                if !foldable {
                    continue;
                }
                let Some(lhs) = known[lhs.id()] else {
                    continue;
                };
                let value = match op {
                    AluOp::Add => lhs.value.wrapping_add(rhs.value),
                    AluOp::Sub => lhs.value.wrapping_sub(rhs.value),
                    AluOp::And => lhs.value & rhs.value,
                    AluOp::Bic => lhs.value & !rhs.value,
                    AluOp::Eor => lhs.value ^ rhs.value,
                    AluOp::Orr => lhs.value | rhs.value,
                    _ => unreachable!(),
                };
                let constant = IRConstant::new(value);

                if let Some(result) = result {
                    propagate(code, &mut known, index, result, constant);
                    if matches!(op, AluOp::Add | AluOp::Sub) {
                        // A move cannot reproduce carry/overflow.
                        if !update_host_flags {
                            code[index] = IROp::Mov {
                                result,
                                source: constant.into(),
                                update_host_flags: false,
                            };
                        }
                    } else {
                        // Logical ops and MOVS produce the same N/Z.
                        code[index] = IROp::Mov {
                            result,
                            source: constant.into(),
                            update_host_flags,
                        };
                    }
                } else if !update_host_flags {
                    code[index] = IROp::Nop;
                }
            }
            IROp::Multiply {
                result_hi,
                result_lo,
                lhs,
                rhs,
                update_host_flags,
            } => {
                let (Some(lhs_const), Some(rhs_const)) = (known[lhs.id()], known[rhs.id()])
                else {
                    continue;
                };
                match result_hi {
                    Some(result_hi) => {
                        let product = if var_types[lhs.id()] == IRDataType::SInt32 {
                            (lhs_const.value as i32 as i64)
                                .wrapping_mul(rhs_const.value as i32 as i64)
                                as u64
                        } else {
                            (lhs_const.value as u64).wrapping_mul(rhs_const.value as u64)
                        };
                        let lo = IRConstant::new(product as u32);
                        let hi = IRConstant::new((product >> 32) as u32);
                        propagate(code, &mut known, index, result_lo, lo);
                        propagate(code, &mut known, index, result_hi, hi);
                    }
                    None => {
                        let constant =
                            IRConstant::new(lhs_const.value.wrapping_mul(rhs_const.value));
                        propagate(code, &mut known, index, result_lo, constant);
                        code[index] = IROp::Mov {
                            result: result_lo,
                            source: constant.into(),
                            update_host_flags,
                        };
                    }
                }
            }
            _ => {}
        }
    }
}

/// Record a known constant and rewrite downstream reads in place.
fn propagate(
    code: &mut [IROp],
    known: &mut [Option<IRConstant>],
    index: usize,
    var: VarRef,
    constant: IRConstant,
) {
    tracing::trace!(%var, value = constant.value, "constant propagated");
    known[var.id()] = Some(constant);
    for op in code[index + 1..].iter_mut() {
        if op.reads(var) {
            op.propagate_constant(var, constant);
        }
    }
}
