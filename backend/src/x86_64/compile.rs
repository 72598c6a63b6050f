//! Per-IR-opcode host code emission.
//!
//! Flag discipline: guest N/Z/C/V mirror into RAX — AH holds the
//! `lahf` image (carry in bit 0), AL holds the overflow byte written
//! by `seto`. Subtractions complement the host carry with `cmc` to
//! produce the guest borrow convention. Logical ops re-inject the
//! previous carry through `bt eax, 8` before `lahf`.

use arm_jit_core::{
    AluOp, AnyRef, IREmitter, IROp, IRDataType, JitError, MemoryFlags, ShiftOp, State, VarRef,
};

use super::backend::X64Backend;
use super::compile_simd;
use super::emitter::*;
use super::regalloc::RegisterAllocator;
use super::regs::*;
use arm_jit_core::CodeBuffer;

pub(crate) fn compile_op(
    backend: &X64Backend,
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    emitter: &IREmitter,
    op: &IROp,
) -> Result<(), JitError> {
    match op {
        IROp::Nop => Ok(()),
        IROp::LoadGPR { reg, result } => {
            let offset = State::gpr_offset(reg.mode, reg.reg) as i32;
            let result = ra.get_gpr(buf, *result)?;
            emit_load(buf, false, result, STATE_REG, offset);
            Ok(())
        }
        IROp::StoreGPR { reg, value } => {
            let offset = State::gpr_offset(reg.mode, reg.reg) as i32;
            store_state(buf, ra, offset, *value)
        }
        IROp::LoadSPSR { result, mode } => {
            let offset = State::spsr_offset(*mode)? as i32;
            let result = ra.get_gpr(buf, *result)?;
            emit_load(buf, false, result, STATE_REG, offset);
            Ok(())
        }
        IROp::StoreSPSR { value, mode } => {
            let offset = State::spsr_offset(*mode)? as i32;
            store_state(buf, ra, offset, *value)
        }
        IROp::LoadCPSR { result } => {
            let result = ra.get_gpr(buf, *result)?;
            emit_load(buf, false, result, STATE_REG, State::cpsr_offset() as i32);
            Ok(())
        }
        IROp::StoreCPSR { value } => store_state(buf, ra, State::cpsr_offset() as i32, *value),
        IROp::ClearCarry => {
            emit_and_ah(buf, 0xFE);
            Ok(())
        }
        IROp::SetCarry => {
            emit_or_ah(buf, 0x01);
            Ok(())
        }
        IROp::UpdateFlags {
            result,
            input,
            flag_n,
            flag_z,
            flag_c,
            flag_v,
        } => compile_update_flags(buf, ra, *result, *input, *flag_n, *flag_z, *flag_c, *flag_v),
        IROp::UpdateSticky { result, input } => {
            let result_reg = ra.get_gpr(buf, *result)?;
            let input_reg = ra.get_gpr(buf, *input)?;
            emit_movzx8(buf, result_reg, Reg::Rax);
            emit_shift_ri(buf, ShiftKind::Shl, false, result_reg, 27);
            emit_arith_rr(buf, ArithOp::Or, false, result_reg, input_reg);
            Ok(())
        }
        IROp::UpdateGE { result, input } => {
            compile_simd::compile_update_ge(buf, ra, *result, *input)
        }
        IROp::Shift {
            op,
            result,
            operand,
            amount,
            update_host_flags,
        } => compile_shift(buf, ra, *op, *result, *operand, *amount, *update_host_flags),
        IROp::Alu {
            op,
            result,
            lhs,
            rhs,
            update_host_flags,
        } => compile_alu(buf, ra, *op, *result, *lhs, *rhs, *update_host_flags),
        IROp::Mov {
            result,
            source,
            update_host_flags,
        } => compile_mov(buf, ra, *result, *source, *update_host_flags, false),
        IROp::Mvn {
            result,
            source,
            update_host_flags,
        } => compile_mov(buf, ra, *result, *source, *update_host_flags, true),
        IROp::Multiply {
            result_hi,
            result_lo,
            lhs,
            rhs,
            update_host_flags,
        } => compile_mul(
            buf,
            ra,
            emitter,
            *result_hi,
            *result_lo,
            *lhs,
            *rhs,
            *update_host_flags,
        ),
        IROp::Add64 {
            result_hi,
            result_lo,
            lhs_hi,
            lhs_lo,
            rhs_hi,
            rhs_lo,
            update_host_flags,
        } => compile_add64(
            buf,
            ra,
            *result_hi,
            *result_lo,
            *lhs_hi,
            *lhs_lo,
            *rhs_hi,
            *rhs_lo,
            *update_host_flags,
        ),
        IROp::MemoryRead {
            flags,
            result,
            address,
        } => compile_memory_read(backend, buf, ra, *flags, *result, *address),
        IROp::MemoryWrite {
            flags,
            source,
            address,
        } => compile_memory_write(backend, buf, ra, *flags, *source, *address),
        IROp::Flush {
            address_out,
            address_in,
            cpsr_in,
        } => {
            let cpsr_reg = ra.get_gpr(buf, *cpsr_in)?;
            let r15_in = ra.get_gpr(buf, *address_in)?;
            let r15_out = ra.get_gpr(buf, *address_out)?;
            // Branchless: out = in + 4 + (arm ? 4 : 0).
            emit_test_ri(buf, cpsr_reg, 1 << 5);
            emit_setcc(buf, Cc::E, r15_out);
            emit_movzx8(buf, r15_out, r15_out);
            emit_lea_sib(buf, r15_out, r15_in, r15_out, 2, 4);
            Ok(())
        }
        IROp::FlushExchange {
            address_out,
            cpsr_out,
            address_in,
            cpsr_in,
        } => compile_flush_exchange(buf, ra, *address_out, *cpsr_out, *address_in, *cpsr_in),
        IROp::Clz { result, operand } => {
            let result = ra.get_gpr(buf, *result)?;
            let operand = ra.get_gpr(buf, *operand)?;
            emit_lzcnt(buf, result, operand);
            Ok(())
        }
        IROp::QAdd { result, lhs, rhs } => compile_qaddsub(buf, ra, *result, *lhs, *rhs, false),
        IROp::QSub { result, lhs, rhs } => compile_qaddsub(buf, ra, *result, *lhs, *rhs, true),
        IROp::Parallel {
            op,
            result,
            lhs,
            rhs,
        } => compile_simd::compile_parallel(buf, ra, *op, *result, *lhs, *rhs),
        IROp::ReadCoprocessor {
            result,
            coprocessor,
            opcode1,
            cn,
            cm,
            opcode2,
        } => compile_mrc(
            backend,
            buf,
            ra,
            *result,
            *coprocessor,
            pack_cp_op(*opcode1, *cn, *cm, *opcode2),
        ),
        IROp::WriteCoprocessor {
            value,
            coprocessor,
            opcode1,
            cn,
            cm,
            opcode2,
        } => compile_mcr(
            backend,
            buf,
            ra,
            *value,
            *coprocessor,
            pack_cp_op(*opcode1, *cn, *cm, *opcode2),
        ),
    }
}

fn pack_cp_op(opcode1: u32, cn: u32, cm: u32, opcode2: u32) -> u32 {
    (opcode1 << 11) | (cn << 7) | (cm << 3) | opcode2
}

/// Bind `result` to a register holding the lhs value: a dying lhs
/// hands its register over and the copy disappears. The rhs must not
/// alias the lhs, and the lhs must not be read again afterwards.
fn result_from_lhs(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    lhs: VarRef,
    rhs: AnyRef,
) -> Result<Reg, JitError> {
    let lhs_reg = ra.get_gpr(buf, lhs)?;
    if rhs.as_var() != Some(lhs) {
        ra.release_and_reuse_gpr(lhs, result);
    }
    let result_reg = ra.get_gpr(buf, result)?;
    if result_reg != lhs_reg {
        emit_mov_rr(buf, false, result_reg, lhs_reg);
    }
    Ok(result_reg)
}

/// Materialize an operand into a host GPR (constants go through a
/// scratch register).
fn operand_gpr(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    value: AnyRef,
) -> Result<Reg, JitError> {
    match value {
        AnyRef::Var(var) => ra.get_gpr(buf, var),
        AnyRef::Const(constant) => {
            let reg = ra.scratch_gpr(buf)?;
            emit_mov_ri(buf, reg, constant.value);
            Ok(reg)
        }
        AnyRef::Null => Err(JitError::TypeMismatch("operand must not be null")),
    }
}

fn store_state(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    offset: i32,
    value: AnyRef,
) -> Result<(), JitError> {
    match value {
        AnyRef::Const(constant) => {
            emit_store_imm(buf, STATE_REG, offset, constant.value);
            Ok(())
        }
        AnyRef::Var(var) => {
            let reg = ra.get_gpr(buf, var)?;
            emit_store(buf, false, reg, STATE_REG, offset);
            Ok(())
        }
        AnyRef::Null => Err(JitError::TypeMismatch("store value must not be null")),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_update_flags(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    input: VarRef,
    flag_n: bool,
    flag_z: bool,
    flag_c: bool,
    flag_v: bool,
) -> Result<(), JitError> {
    let mut mask: u32 = 0;
    if flag_n {
        mask |= 0x8000_0000;
    }
    if flag_z {
        mask |= 0x4000_0000;
    }
    if flag_c {
        mask |= 0x2000_0000;
    }
    if flag_v {
        mask |= 0x1000_0000;
    }

    let result_reg = ra.get_gpr(buf, result)?;
    let input_reg = ra.get_gpr(buf, input)?;
    let pext_mask_reg = ra.scratch_gpr(buf)?;
    let flags_reg = ra.scratch_gpr(buf)?;

    // Pick V (al bit 0), C (ah bit 0), Z and N out of RAX and move
    // them into the guest's top nibble.
    emit_mov_ri(buf, pext_mask_reg, 0xC101);
    emit_pext(buf, flags_reg, Reg::Rax, pext_mask_reg);
    emit_shift_ri(buf, ShiftKind::Shl, false, flags_reg, 28);
    emit_arith_ri(buf, ArithOp::And, false, flags_reg, mask as i32);

    emit_mov_rr(buf, false, result_reg, input_reg);
    emit_arith_ri(buf, ArithOp::And, false, result_reg, !mask as i32);
    emit_arith_rr(buf, ArithOp::Or, false, result_reg, flags_reg);
    Ok(())
}

fn compile_shift(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    op: ShiftOp,
    result: VarRef,
    operand: VarRef,
    amount: AnyRef,
    update_host_flags: bool,
) -> Result<(), JitError> {
    match op {
        ShiftOp::Lsl => {
            let result_reg = ra.get_gpr(buf, result)?;
            let operand_reg = ra.get_gpr(buf, operand)?;
            emit_mov_rr(buf, false, result_reg, operand_reg);
            emit_shift_ri(buf, ShiftKind::Shl, true, result_reg, 32);
            match amount {
                AnyRef::Const(constant) => {
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_ri(
                        buf,
                        ShiftKind::Shl,
                        true,
                        result_reg,
                        constant.value.min(33) as u8,
                    );
                }
                AnyRef::Var(var) => {
                    let amount_reg = ra.get_gpr(buf, var)?;
                    emit_push(buf, Reg::Rcx);
                    emit_mov_cl(buf, 33);
                    emit_cmp_r8_imm(buf, amount_reg, 33);
                    emit_cmovcc(buf, Cc::L, false, Reg::Rcx, amount_reg);
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_cl(buf, ShiftKind::Shl, true, result_reg);
                    emit_pop(buf, Reg::Rcx);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("lsl: null amount")),
            }
            if update_host_flags {
                emit_lahf(buf);
            }
            emit_shift_ri(buf, ShiftKind::Shr, true, result_reg, 32);
            Ok(())
        }
        ShiftOp::Lsr => {
            let result_reg = ra.get_gpr(buf, result)?;
            let operand_reg = ra.get_gpr(buf, operand)?;
            emit_mov_rr(buf, false, result_reg, operand_reg);
            match amount {
                AnyRef::Const(constant) => {
                    // LSR #0 encodes LSR #32.
                    let mut value = constant.value;
                    if value == 0 {
                        value = 32;
                    }
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_ri(buf, ShiftKind::Shr, true, result_reg, value.min(33) as u8);
                }
                AnyRef::Var(var) => {
                    let amount_reg = ra.get_gpr(buf, var)?;
                    emit_push(buf, Reg::Rcx);
                    emit_mov_cl(buf, 33);
                    emit_cmp_r8_imm(buf, amount_reg, 33);
                    emit_cmovcc(buf, Cc::L, false, Reg::Rcx, amount_reg);
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_cl(buf, ShiftKind::Shr, true, result_reg);
                    emit_pop(buf, Reg::Rcx);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("lsr: null amount")),
            }
            if update_host_flags {
                emit_lahf(buf);
            }
            Ok(())
        }
        ShiftOp::Asr => {
            let result_reg = ra.get_gpr(buf, result)?;
            let operand_reg = ra.get_gpr(buf, operand)?;
            // Mirror the sign bit through the upper half.
            emit_movsxd(buf, result_reg, operand_reg);
            match amount {
                AnyRef::Const(constant) => {
                    // ASR #0 encodes ASR #32.
                    let mut value = constant.value;
                    if value == 0 {
                        value = 32;
                    }
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_ri(buf, ShiftKind::Sar, true, result_reg, value.min(33) as u8);
                }
                AnyRef::Var(var) => {
                    let amount_reg = ra.get_gpr(buf, var)?;
                    emit_push(buf, Reg::Rcx);
                    emit_mov_cl(buf, 33);
                    emit_cmp_r8_imm(buf, amount_reg, 33);
                    emit_cmovcc(buf, Cc::L, false, Reg::Rcx, amount_reg);
                    if update_host_flags {
                        emit_sahf(buf);
                    }
                    emit_shift_cl(buf, ShiftKind::Sar, true, result_reg);
                    emit_pop(buf, Reg::Rcx);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("asr: null amount")),
            }
            if update_host_flags {
                emit_lahf(buf);
            }
            // Clear the upper half of the result.
            emit_mov_rr(buf, false, result_reg, result_reg);
            Ok(())
        }
        ShiftOp::Ror => {
            let result_reg = ra.get_gpr(buf, result)?;
            let operand_reg = ra.get_gpr(buf, operand)?;
            emit_mov_rr(buf, false, result_reg, operand_reg);
            let mut done_patches = Vec::new();
            match amount {
                AnyRef::Const(constant) => {
                    if constant.value == 0 {
                        // ROR #0 encodes RRX #1.
                        emit_sahf(buf);
                        emit_shift_ri(buf, ShiftKind::Rcr, false, result_reg, 1);
                    } else {
                        if update_host_flags {
                            emit_sahf(buf);
                        }
                        emit_shift_ri(buf, ShiftKind::Ror, false, result_reg, constant.value as u8);
                    }
                }
                AnyRef::Var(var) => {
                    let amount_reg = ra.get_gpr(buf, var)?;
                    if update_host_flags {
                        // Rotating by a multiple of 32 leaves the value
                        // intact; by zero it also leaves carry intact.
                        emit_test_r8_imm(buf, amount_reg, 31);
                        let rotate = emit_jcc_forward(buf, Cc::Ne);
                        emit_cmp_r8_imm(buf, amount_reg, 0);
                        done_patches.push(emit_jcc_forward(buf, Cc::E));
                        emit_bt_ri(buf, result_reg, 31);
                        emit_lahf(buf);
                        done_patches.push(emit_jmp_forward(buf));
                        patch_forward(buf, rotate);
                    }
                    emit_push(buf, Reg::Rcx);
                    emit_mov_cl_r8(buf, amount_reg);
                    emit_shift_cl(buf, ShiftKind::Ror, false, result_reg);
                    emit_pop(buf, Reg::Rcx);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("ror: null amount")),
            }
            if update_host_flags {
                emit_lahf(buf);
            }
            for patch in done_patches {
                patch_forward(buf, patch);
            }
            Ok(())
        }
    }
}

fn compile_alu(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    op: AluOp,
    result: Option<VarRef>,
    lhs: VarRef,
    rhs: AnyRef,
    update_host_flags: bool,
) -> Result<(), JitError> {
    // Logical-class flag epilogue: rebuild N/Z, keep the old carry.
    let logical_flags = |buf: &mut CodeBuffer| {
        emit_bt_ri(buf, Reg::Rax, 8);
        emit_lahf(buf);
    };
    // Arithmetic flag epilogue: capture all four flags.
    let arith_flags = |buf: &mut CodeBuffer| {
        emit_lahf(buf);
        emit_setcc(buf, Cc::O, Reg::Rax);
    };

    match op {
        AluOp::And | AluOp::Eor | AluOp::Orr => {
            let arith = match op {
                AluOp::And => ArithOp::And,
                AluOp::Eor => ArithOp::Xor,
                _ => ArithOp::Or,
            };
            match result {
                None => {
                    let lhs_reg = ra.get_gpr(buf, lhs)?;
                    // Flag-only form (TST/TEQ).
                    if op == AluOp::And {
                        match rhs {
                            AnyRef::Const(c) => emit_test_ri(buf, lhs_reg, c.value),
                            AnyRef::Var(var) => {
                                let rhs_reg = ra.get_gpr(buf, var)?;
                                emit_test_rr(buf, false, lhs_reg, rhs_reg);
                            }
                            AnyRef::Null => {
                                return Err(JitError::TypeMismatch("alu: null rhs"))
                            }
                        }
                    } else {
                        // Evaluate destructively on a saved copy.
                        emit_push(buf, lhs_reg);
                        match rhs {
                            AnyRef::Const(c) => {
                                emit_arith_ri(buf, arith, false, lhs_reg, c.value as i32)
                            }
                            AnyRef::Var(var) => {
                                let rhs_reg = ra.get_gpr(buf, var)?;
                                emit_arith_rr(buf, arith, false, lhs_reg, rhs_reg);
                            }
                            AnyRef::Null => {
                                return Err(JitError::TypeMismatch("alu: null rhs"))
                            }
                        }
                        emit_pop(buf, lhs_reg);
                    }
                }
                Some(result) => {
                    let result_reg = result_from_lhs(buf, ra, result, lhs, rhs)?;
                    match rhs {
                        AnyRef::Const(c) => {
                            emit_arith_ri(buf, arith, false, result_reg, c.value as i32)
                        }
                        AnyRef::Var(var) => {
                            let rhs_reg = ra.get_gpr(buf, var)?;
                            emit_arith_rr(buf, arith, false, result_reg, rhs_reg);
                        }
                        AnyRef::Null => return Err(JitError::TypeMismatch("alu: null rhs")),
                    }
                }
            }
            if update_host_flags {
                logical_flags(buf);
            }
            Ok(())
        }
        AluOp::Bic => {
            let result =
                result.ok_or(JitError::TypeMismatch("bic: result must not be null"))?;
            let result_reg = ra.get_gpr(buf, result)?;
            let lhs_reg = ra.get_gpr(buf, lhs)?;
            match rhs {
                AnyRef::Const(c) => {
                    emit_mov_rr(buf, false, result_reg, lhs_reg);
                    emit_arith_ri(buf, ArithOp::And, false, result_reg, !c.value as i32);
                }
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_mov_rr(buf, false, result_reg, rhs_reg);
                    emit_not(buf, result_reg);
                    emit_arith_rr(buf, ArithOp::And, false, result_reg, lhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("bic: null rhs")),
            }
            if update_host_flags {
                logical_flags(buf);
            }
            Ok(())
        }
        AluOp::Sub => {
            match result {
                None => {
                    let lhs_reg = ra.get_gpr(buf, lhs)?;
                    match rhs {
                        AnyRef::Const(c) => {
                            emit_arith_ri(buf, ArithOp::Cmp, false, lhs_reg, c.value as i32)
                        }
                        AnyRef::Var(var) => {
                            let rhs_reg = ra.get_gpr(buf, var)?;
                            emit_arith_rr(buf, ArithOp::Cmp, false, lhs_reg, rhs_reg);
                        }
                        AnyRef::Null => return Err(JitError::TypeMismatch("sub: null rhs")),
                    }
                    emit_cmc(buf);
                }
                Some(result) => {
                    let result_reg = result_from_lhs(buf, ra, result, lhs, rhs)?;
                    match rhs {
                        AnyRef::Const(c) => {
                            emit_arith_ri(buf, ArithOp::Sub, false, result_reg, c.value as i32)
                        }
                        AnyRef::Var(var) => {
                            let rhs_reg = ra.get_gpr(buf, var)?;
                            emit_arith_rr(buf, ArithOp::Sub, false, result_reg, rhs_reg);
                        }
                        AnyRef::Null => return Err(JitError::TypeMismatch("sub: null rhs")),
                    }
                    emit_cmc(buf);
                }
            }
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
        AluOp::Rsb => {
            let result =
                result.ok_or(JitError::TypeMismatch("rsb: result must not be null"))?;
            let result_reg = ra.get_gpr(buf, result)?;
            let lhs_reg = ra.get_gpr(buf, lhs)?;
            match rhs {
                AnyRef::Const(c) => emit_mov_ri(buf, result_reg, c.value),
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_mov_rr(buf, false, result_reg, rhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("rsb: null rhs")),
            }
            emit_arith_rr(buf, ArithOp::Sub, false, result_reg, lhs_reg);
            emit_cmc(buf);
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
        AluOp::Add => {
            if result.is_none() && !update_host_flags {
                return Ok(());
            }
            let dest = match result {
                // RAX is about to be clobbered by lahf anyway.
                None => {
                    let lhs_reg = ra.get_gpr(buf, lhs)?;
                    emit_mov_rr(buf, false, Reg::Rax, lhs_reg);
                    Reg::Rax
                }
                Some(result) => result_from_lhs(buf, ra, result, lhs, rhs)?,
            };
            match rhs {
                AnyRef::Const(c) => emit_arith_ri(buf, ArithOp::Add, false, dest, c.value as i32),
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_arith_rr(buf, ArithOp::Add, false, dest, rhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("add: null rhs")),
            }
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
        AluOp::Adc => {
            let result =
                result.ok_or(JitError::TypeMismatch("adc: result must not be null"))?;
            let result_reg = result_from_lhs(buf, ra, result, lhs, rhs)?;
            emit_sahf(buf);
            match rhs {
                AnyRef::Const(c) => {
                    emit_arith_ri(buf, ArithOp::Adc, false, result_reg, c.value as i32)
                }
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_arith_rr(buf, ArithOp::Adc, false, result_reg, rhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("adc: null rhs")),
            }
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
        AluOp::Sbc => {
            let result =
                result.ok_or(JitError::TypeMismatch("sbc: result must not be null"))?;
            let result_reg = result_from_lhs(buf, ra, result, lhs, rhs)?;
            emit_sahf(buf);
            emit_cmc(buf);
            match rhs {
                AnyRef::Const(c) => {
                    emit_arith_ri(buf, ArithOp::Sbb, false, result_reg, c.value as i32)
                }
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_arith_rr(buf, ArithOp::Sbb, false, result_reg, rhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("sbc: null rhs")),
            }
            emit_cmc(buf);
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
        AluOp::Rsc => {
            let result =
                result.ok_or(JitError::TypeMismatch("rsc: result must not be null"))?;
            let result_reg = ra.get_gpr(buf, result)?;
            let lhs_reg = ra.get_gpr(buf, lhs)?;
            emit_sahf(buf);
            emit_cmc(buf);
            match rhs {
                AnyRef::Const(c) => emit_mov_ri(buf, result_reg, c.value),
                AnyRef::Var(var) => {
                    let rhs_reg = ra.get_gpr(buf, var)?;
                    emit_mov_rr(buf, false, result_reg, rhs_reg);
                }
                AnyRef::Null => return Err(JitError::TypeMismatch("rsc: null rhs")),
            }
            emit_arith_rr(buf, ArithOp::Sbb, false, result_reg, lhs_reg);
            emit_cmc(buf);
            if update_host_flags {
                arith_flags(buf);
            }
            Ok(())
        }
    }
}

fn compile_mov(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    source: AnyRef,
    update_host_flags: bool,
    invert: bool,
) -> Result<(), JitError> {
    let result_reg = match source {
        AnyRef::Const(c) => {
            let result_reg = ra.get_gpr(buf, result)?;
            emit_mov_ri(buf, result_reg, c.value);
            result_reg
        }
        AnyRef::Var(var) => {
            // A dying source hands its register over; the copy
            // disappears.
            let source_reg = ra.get_gpr(buf, var)?;
            ra.release_and_reuse_gpr(var, result);
            let result_reg = ra.get_gpr(buf, result)?;
            if result_reg != source_reg {
                emit_mov_rr(buf, false, result_reg, source_reg);
            }
            result_reg
        }
        AnyRef::Null => return Err(JitError::TypeMismatch("mov: null source")),
    };
    if invert {
        emit_not(buf, result_reg);
    }
    if update_host_flags {
        emit_test_rr(buf, false, result_reg, result_reg);
        emit_bt_ri(buf, Reg::Rax, 8);
        emit_lahf(buf);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compile_mul(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    emitter: &IREmitter,
    result_hi: Option<VarRef>,
    result_lo: VarRef,
    lhs: VarRef,
    rhs: VarRef,
    update_host_flags: bool,
) -> Result<(), JitError> {
    let result_lo_reg = ra.get_gpr(buf, result_lo)?;
    let lhs_reg = ra.get_gpr(buf, lhs)?;
    let rhs_reg = ra.get_gpr(buf, rhs)?;

    match result_hi {
        Some(result_hi) => {
            let result_hi_reg = ra.get_gpr(buf, result_hi)?;
            let rhs_ext_reg = ra.scratch_gpr(buf)?;

            if emitter.var(lhs).data_type == IRDataType::SInt32 {
                emit_movsxd(buf, result_hi_reg, lhs_reg);
                emit_movsxd(buf, rhs_ext_reg, rhs_reg);
            } else {
                emit_mov_rr(buf, false, result_hi_reg, lhs_reg);
                emit_mov_rr(buf, false, rhs_ext_reg, rhs_reg);
            }

            emit_imul_rr(buf, true, result_hi_reg, rhs_ext_reg);

            if update_host_flags {
                emit_test_rr(buf, true, result_hi_reg, result_hi_reg);
                emit_lahf(buf);
            }

            emit_mov_rr(buf, false, result_lo_reg, result_hi_reg);
            emit_shift_ri(buf, ShiftKind::Shr, true, result_hi_reg, 32);
        }
        None => {
            emit_mov_rr(buf, false, result_lo_reg, lhs_reg);
            emit_imul_rr(buf, false, result_lo_reg, rhs_reg);
            if update_host_flags {
                emit_test_rr(buf, false, result_lo_reg, result_lo_reg);
                emit_lahf(buf);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compile_add64(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result_hi: VarRef,
    result_lo: VarRef,
    lhs_hi: VarRef,
    lhs_lo: VarRef,
    rhs_hi: VarRef,
    rhs_lo: VarRef,
    update_host_flags: bool,
) -> Result<(), JitError> {
    let result_hi_reg = ra.get_gpr(buf, result_hi)?;
    let result_lo_reg = ra.get_gpr(buf, result_lo)?;
    let lhs_hi_reg = ra.get_gpr(buf, lhs_hi)?;
    let lhs_lo_reg = ra.get_gpr(buf, lhs_lo)?;
    let rhs_hi_reg = ra.get_gpr(buf, rhs_hi)?;
    let rhs_lo_reg = ra.get_gpr(buf, rhs_lo)?;

    if update_host_flags {
        // Pack both operands into 64-bit registers so one add yields
        // the N and Z of the full result.
        emit_mov_rr(buf, false, result_hi_reg, lhs_hi_reg);
        emit_shift_ri(buf, ShiftKind::Shl, true, result_hi_reg, 32);
        emit_arith_rr(buf, ArithOp::Or, true, result_hi_reg, lhs_lo_reg);

        emit_mov_rr(buf, false, result_lo_reg, rhs_hi_reg);
        emit_shift_ri(buf, ShiftKind::Shl, true, result_lo_reg, 32);
        emit_arith_rr(buf, ArithOp::Or, true, result_lo_reg, rhs_lo_reg);

        emit_arith_rr(buf, ArithOp::Add, true, result_hi_reg, result_lo_reg);
        emit_lahf(buf);

        emit_mov_rr(buf, false, result_lo_reg, result_hi_reg);
        emit_shift_ri(buf, ShiftKind::Shr, true, result_hi_reg, 32);
    } else {
        emit_mov_rr(buf, false, result_lo_reg, lhs_lo_reg);
        emit_mov_rr(buf, false, result_hi_reg, lhs_hi_reg);
        emit_arith_rr(buf, ArithOp::Add, false, result_lo_reg, rhs_lo_reg);
        emit_arith_rr(buf, ArithOp::Adc, false, result_hi_reg, rhs_hi_reg);
    }
    Ok(())
}

fn compile_memory_read(
    backend: &X64Backend,
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    flags: MemoryFlags,
    result: VarRef,
    address: AnyRef,
) -> Result<(), JitError> {
    let result_reg = ra.get_gpr(buf, result)?;
    let address_reg = operand_gpr(buf, ra, address)?;

    emit_push(buf, Reg::Rcx);

    let mut slow_patch = None;
    let mut final_patch = None;

    if let Some(table) = backend.page_table() {
        emit_mov_ri64(buf, Reg::Rcx, table.base);

        // Page table entry.
        emit_mov_rr(buf, false, result_reg, address_reg);
        emit_shift_ri(buf, ShiftKind::Shr, false, result_reg, table.shift as u8);
        emit_load_sib(buf, true, Reg::Rcx, Reg::Rcx, result_reg, 3);

        emit_test_rr(buf, true, Reg::Rcx, Reg::Rcx);
        slow_patch = Some(emit_jcc_forward(buf, Cc::E));

        emit_mov_rr(buf, false, result_reg, address_reg);
        if flags.contains(MemoryFlags::WORD) {
            emit_arith_ri(buf, ArithOp::And, false, result_reg, (table.mask & !3) as i32);
            emit_load_sib(buf, false, result_reg, Reg::Rcx, result_reg, 0);
        } else if flags.contains(MemoryFlags::HALF) {
            emit_arith_ri(buf, ArithOp::And, false, result_reg, (table.mask & !1) as i32);
            if flags.contains(MemoryFlags::SIGNED) {
                emit_load16_sx_sib(buf, result_reg, Reg::Rcx, result_reg);
            } else {
                emit_load16_zx_sib(buf, result_reg, Reg::Rcx, result_reg);
            }
        } else {
            emit_arith_ri(buf, ArithOp::And, false, result_reg, table.mask as i32);
            if flags.contains(MemoryFlags::SIGNED) {
                emit_load8_sx_sib(buf, result_reg, Reg::Rcx, result_reg);
            } else {
                emit_load8_zx_sib(buf, result_reg, Reg::Rcx, result_reg);
            }
        }
        final_patch = Some(emit_jmp_forward(buf));
    }

    if let Some(patch) = slow_patch {
        patch_forward(buf, patch);
    }

    // Slow path: System V callout.
    for &reg in SLOW_PATH_SAVED {
        emit_push(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED_SYSV {
        emit_push(buf, reg);
    }

    emit_mov_rr(buf, false, ARG1, address_reg);
    let callee = if flags.contains(MemoryFlags::WORD) {
        emit_arith_ri(buf, ArithOp::And, false, ARG1, !3);
        super::backend::read_word_shim as usize as u64
    } else if flags.contains(MemoryFlags::HALF) {
        emit_arith_ri(buf, ArithOp::And, false, ARG1, !1);
        super::backend::read_half_shim as usize as u64
    } else {
        super::backend::read_byte_shim as usize as u64
    };

    emit_mov_ri64(buf, Reg::Rax, callee);
    emit_mov_ri64(buf, ARG0, backend.memory_ptr());
    emit_mov_ri(buf, ARG2, DATA_BUS);
    emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 0x20);
    emit_call_reg(buf, Reg::Rax);
    emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, 0x20);

    for &reg in SLOW_PATH_SAVED_SYSV.iter().rev() {
        emit_pop(buf, reg);
    }
    // RAX stays pushed until the result is extracted from it.
    for &reg in SLOW_PATH_SAVED[1..].iter().rev() {
        emit_pop(buf, reg);
    }

    if flags.contains(MemoryFlags::WORD) {
        emit_mov_rr(buf, false, result_reg, Reg::Rax);
    } else if flags.contains(MemoryFlags::HALF) {
        if flags.contains(MemoryFlags::SIGNED) {
            emit_movsx16(buf, result_reg, Reg::Rax);
        } else {
            emit_movzx16(buf, result_reg, Reg::Rax);
        }
    } else if flags.contains(MemoryFlags::SIGNED) {
        emit_movsx8(buf, result_reg, Reg::Rax);
    } else {
        emit_movzx8(buf, result_reg, Reg::Rax);
    }

    emit_pop(buf, Reg::Rax);

    if let Some(patch) = final_patch {
        patch_forward(buf, patch);
    }

    if flags.contains(MemoryFlags::ROTATE) {
        if flags.contains(MemoryFlags::WORD) {
            emit_mov_rr(buf, false, Reg::Rcx, address_reg);
            emit_and_cl(buf, 3);
            emit_shl_cl_imm(buf, 3);
            emit_shift_cl(buf, ShiftKind::Ror, false, result_reg);
        }
        if flags.contains(MemoryFlags::HALF) {
            emit_mov_rr(buf, false, Reg::Rcx, address_reg);
            emit_and_cl(buf, 1);
            emit_shl_cl_imm(buf, 3);
            emit_shift_cl(buf, ShiftKind::Ror, false, result_reg);
        }
    }

    // Legacy-core quirk: a misaligned signed halfword read is a
    // signed byte read from the high byte.
    let half_signed_v4 = MemoryFlags::HALF | MemoryFlags::SIGNED | MemoryFlags::ARMV4T;
    if flags.contains(half_signed_v4) {
        emit_bt_ri(buf, address_reg, 0);
        let aligned = emit_jcc_forward(buf, Cc::Ae);
        emit_shift_ri(buf, ShiftKind::Shr, false, result_reg, 8);
        emit_movsx8(buf, result_reg, result_reg);
        patch_forward(buf, aligned);
    }

    emit_pop(buf, Reg::Rcx);
    Ok(())
}

fn compile_memory_write(
    backend: &X64Backend,
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    flags: MemoryFlags,
    source: AnyRef,
    address: AnyRef,
) -> Result<(), JitError> {
    let source_reg = operand_gpr(buf, ra, source)?;
    let address_reg = operand_gpr(buf, ra, address)?;
    let scratch_reg = ra.scratch_gpr(buf)?;

    emit_push(buf, Reg::Rcx);

    let mut slow_patch = None;
    let mut final_patch = None;

    if let Some(table) = backend.page_table() {
        emit_mov_ri64(buf, Reg::Rcx, table.base);

        emit_mov_rr(buf, false, scratch_reg, address_reg);
        emit_shift_ri(buf, ShiftKind::Shr, false, scratch_reg, table.shift as u8);
        emit_load_sib(buf, true, Reg::Rcx, Reg::Rcx, scratch_reg, 3);

        emit_test_rr(buf, true, Reg::Rcx, Reg::Rcx);
        slow_patch = Some(emit_jcc_forward(buf, Cc::E));

        emit_mov_rr(buf, false, scratch_reg, address_reg);
        if flags.contains(MemoryFlags::WORD) {
            emit_arith_ri(buf, ArithOp::And, false, scratch_reg, (table.mask & !3) as i32);
            emit_store32_sib(buf, source_reg, Reg::Rcx, scratch_reg);
        } else if flags.contains(MemoryFlags::HALF) {
            emit_arith_ri(buf, ArithOp::And, false, scratch_reg, (table.mask & !1) as i32);
            emit_store16_sib(buf, source_reg, Reg::Rcx, scratch_reg);
        } else {
            emit_arith_ri(buf, ArithOp::And, false, scratch_reg, table.mask as i32);
            emit_store8_sib(buf, source_reg, Reg::Rcx, scratch_reg);
        }
        final_patch = Some(emit_jmp_forward(buf));
    }

    if let Some(patch) = slow_patch {
        patch_forward(buf, patch);
    }

    for &reg in SLOW_PATH_SAVED {
        emit_push(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED_SYSV {
        emit_push(buf, reg);
    }

    if ARG1 == source_reg {
        // The value sits in the address argument register; route it
        // through ARG3 with an exchange.
        emit_mov_rr(buf, false, ARG3, address_reg);
        emit_xchg_rr(buf, ARG1, ARG3);
        if flags.contains(MemoryFlags::HALF) {
            emit_movzx16(buf, ARG3, ARG3);
        } else if flags.contains(MemoryFlags::BYTE) {
            emit_movzx8(buf, ARG3, ARG3);
        }
    } else {
        emit_mov_rr(buf, false, ARG1, address_reg);
        if flags.contains(MemoryFlags::WORD) {
            emit_mov_rr(buf, false, ARG3, source_reg);
        } else if flags.contains(MemoryFlags::HALF) {
            emit_movzx16(buf, ARG3, source_reg);
        } else {
            emit_movzx8(buf, ARG3, source_reg);
        }
    }

    let callee = if flags.contains(MemoryFlags::WORD) {
        emit_arith_ri(buf, ArithOp::And, false, ARG1, !3);
        super::backend::write_word_shim as usize as u64
    } else if flags.contains(MemoryFlags::HALF) {
        emit_arith_ri(buf, ArithOp::And, false, ARG1, !1);
        super::backend::write_half_shim as usize as u64
    } else {
        super::backend::write_byte_shim as usize as u64
    };

    emit_mov_ri64(buf, Reg::Rax, callee);
    emit_mov_ri64(buf, ARG0, backend.memory_ptr());
    emit_mov_ri(buf, ARG2, DATA_BUS);
    emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 0x20);
    emit_call_reg(buf, Reg::Rax);
    emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, 0x20);

    for &reg in SLOW_PATH_SAVED_SYSV.iter().rev() {
        emit_pop(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED.iter().rev() {
        emit_pop(buf, reg);
    }

    if let Some(patch) = final_patch {
        patch_forward(buf, patch);
    }

    emit_pop(buf, Reg::Rcx);
    Ok(())
}

fn compile_flush_exchange(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    address_out: VarRef,
    cpsr_out: VarRef,
    address_in: VarRef,
    cpsr_in: VarRef,
) -> Result<(), JitError> {
    let address_out_reg = ra.get_gpr(buf, address_out)?;
    let address_in_reg = ra.get_gpr(buf, address_in)?;
    let cpsr_out_reg = ra.get_gpr(buf, cpsr_out)?;
    let cpsr_in_reg = ra.get_gpr(buf, cpsr_in)?;

    emit_mov_rr(buf, false, address_out_reg, address_in_reg);
    emit_mov_rr(buf, false, cpsr_out_reg, cpsr_in_reg);

    emit_test_ri(buf, address_in_reg, 1);
    let arm = emit_jcc_forward(buf, Cc::E);

    // Thumb target.
    emit_arith_ri(buf, ArithOp::Or, false, cpsr_out_reg, 1 << 5);
    emit_arith_ri(buf, ArithOp::And, false, address_out_reg, !1);
    emit_arith_ri(buf, ArithOp::Add, false, address_out_reg, 4);
    let done = emit_jmp_forward(buf);

    // ARM target.
    patch_forward(buf, arm);
    emit_arith_ri(buf, ArithOp::And, false, cpsr_out_reg, !(1 << 5));
    emit_arith_ri(buf, ArithOp::And, false, address_out_reg, !3);
    emit_arith_ri(buf, ArithOp::Add, false, address_out_reg, 8);

    patch_forward(buf, done);
    Ok(())
}

fn compile_qaddsub(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    lhs: VarRef,
    rhs: VarRef,
    subtract: bool,
) -> Result<(), JitError> {
    let result_reg = ra.get_gpr(buf, result)?;
    let lhs_reg = ra.get_gpr(buf, lhs)?;
    let rhs_reg = ra.get_gpr(buf, rhs)?;
    let temp_reg = ra.scratch_gpr(buf)?;

    emit_mov_rr(buf, false, result_reg, lhs_reg);
    let op = if subtract { ArithOp::Sub } else { ArithOp::Add };
    emit_arith_rr(buf, op, false, result_reg, rhs_reg);
    let skip = emit_jcc_forward(buf, Cc::No);

    emit_mov_ri(buf, temp_reg, 0x7FFF_FFFF);
    emit_mov_ri(buf, result_reg, 0x8000_0000);
    emit_cmovcc(buf, Cc::S, false, result_reg, temp_reg);

    patch_forward(buf, skip);
    emit_setcc(buf, Cc::O, Reg::Rax);
    Ok(())
}

fn compile_mrc(
    backend: &X64Backend,
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    coprocessor: u32,
    packed: u32,
) -> Result<(), JitError> {
    let result_reg = ra.get_gpr(buf, result)?;

    emit_push(buf, Reg::Rcx);
    for &reg in SLOW_PATH_SAVED {
        emit_push(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED_SYSV {
        emit_push(buf, reg);
    }

    emit_mov_ri64(buf, ARG0, backend.coprocessor_ptr());
    emit_mov_ri(buf, ARG1, coprocessor);
    emit_mov_ri(buf, ARG2, packed);
    emit_mov_ri64(buf, Reg::Rax, super::backend::cp_read_shim as usize as u64);
    emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 0x20);
    emit_call_reg(buf, Reg::Rax);
    emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, 0x20);

    for &reg in SLOW_PATH_SAVED_SYSV.iter().rev() {
        emit_pop(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED[1..].iter().rev() {
        emit_pop(buf, reg);
    }
    emit_mov_rr(buf, false, result_reg, Reg::Rax);
    emit_pop(buf, Reg::Rax);
    emit_pop(buf, Reg::Rcx);
    Ok(())
}

fn compile_mcr(
    backend: &X64Backend,
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    value: AnyRef,
    coprocessor: u32,
    packed: u32,
) -> Result<(), JitError> {
    let value_reg = operand_gpr(buf, ra, value)?;

    emit_push(buf, Reg::Rcx);
    for &reg in SLOW_PATH_SAVED {
        emit_push(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED_SYSV {
        emit_push(buf, reg);
    }

    emit_mov_rr(buf, false, ARG3, value_reg);
    emit_mov_ri(buf, ARG1, coprocessor);
    emit_mov_ri(buf, ARG2, packed);
    emit_mov_ri64(buf, ARG0, backend.coprocessor_ptr());
    emit_mov_ri64(buf, Reg::Rax, super::backend::cp_write_shim as usize as u64);
    emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, 0x20);
    emit_call_reg(buf, Reg::Rax);
    emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, 0x20);

    for &reg in SLOW_PATH_SAVED_SYSV.iter().rev() {
        emit_pop(buf, reg);
    }
    for &reg in SLOW_PATH_SAVED.iter().rev() {
        emit_pop(buf, reg);
    }
    emit_pop(buf, Reg::Rcx);
    Ok(())
}
