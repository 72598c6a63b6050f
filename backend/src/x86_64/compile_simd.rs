//! Packed parallel add/sub lowering over SSE2.
//!
//! Guest operands are 32-bit, so only the low lanes of each XMM
//! register carry data. The wrapping forms leave a per-lane
//! greater-than-or-equal mask in XMM0; `UpdateGE` folds that mask
//! into the guest CPSR through `pmovmskb` (word masks contribute bit
//! pairs, byte masks single bits, matching the GE nibble layout).

use arm_jit_core::{CodeBuffer, JitError, ParallelOp, VarRef};

use super::emitter::*;
use super::regalloc::RegisterAllocator;
use super::regs::{Reg, GE_XMM};

pub(crate) fn compile_update_ge(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result: VarRef,
    input: VarRef,
) -> Result<(), JitError> {
    let result_reg = ra.get_gpr(buf, result)?;
    let input_reg = ra.get_gpr(buf, input)?;
    let tmp_reg = ra.scratch_gpr(buf)?;

    emit_pmovmskb(buf, tmp_reg, GE_XMM);
    emit_arith_ri(buf, ArithOp::And, false, tmp_reg, 0xF);
    emit_shift_ri(buf, ShiftKind::Shl, false, tmp_reg, 16);

    emit_mov_rr(buf, false, result_reg, input_reg);
    emit_arith_ri(buf, ArithOp::And, false, result_reg, !0x000F_0000u32 as i32);
    emit_arith_rr(buf, ArithOp::Or, false, result_reg, tmp_reg);
    Ok(())
}

pub(crate) fn compile_parallel(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    op: ParallelOp,
    result: VarRef,
    lhs: VarRef,
    rhs: VarRef,
) -> Result<(), JitError> {
    let result_reg = ra.get_gpr(buf, result)?;
    let lhs_reg = ra.get_gpr(buf, lhs)?;
    let rhs_reg = ra.get_gpr(buf, rhs)?;

    let a = ra.scratch_xmm()?;
    let b = ra.scratch_xmm()?;
    emit_movq_xmm_gpr(buf, a, lhs_reg);
    emit_movq_xmm_gpr(buf, b, rhs_reg);

    use ParallelOp::*;
    match op {
        AddS16 => {
            let sum = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, sum, a);
            emit_sse_rr(buf, SSE_PADDW, sum, b);
            emit_movd_gpr_xmm(buf, result_reg, sum);
            // GE lane = saturated sum >= 0.
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PADDSW, GE_XMM, b);
            emit_sse_rr(buf, SSE_PCMPEQW, a, a);
            emit_sse_rr(buf, SSE_PCMPGTW, GE_XMM, a);
        }
        SubS16 => {
            let diff = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, diff, a);
            emit_sse_rr(buf, SSE_PSUBW, diff, b);
            emit_movd_gpr_xmm(buf, result_reg, diff);
            // GE lane = saturated difference >= 0.
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PSUBSW, GE_XMM, b);
            emit_sse_rr(buf, SSE_PCMPEQW, a, a);
            emit_sse_rr(buf, SSE_PCMPGTW, GE_XMM, a);
        }
        AddU16 => {
            let sum = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, sum, a);
            emit_sse_rr(buf, SSE_PADDW, sum, b);
            emit_movd_gpr_xmm(buf, result_reg, sum);
            // GE lane = carry out: biased compare of the operand
            // against the wrapped sum.
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PCMPEQW, b, b);
            emit_psllw_ri(buf, b, 15);
            emit_sse_rr(buf, SSE_PSUBW, GE_XMM, b);
            emit_sse_rr(buf, SSE_PSUBW, sum, b);
            emit_sse_rr(buf, SSE_PCMPGTW, GE_XMM, sum);
        }
        SubU16 => {
            let diff = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, diff, a);
            emit_sse_rr(buf, SSE_PSUBW, diff, b);
            emit_movd_gpr_xmm(buf, result_reg, diff);
            // GE lane = no borrow: b saturating-minus a is zero.
            emit_movq_xmm_xmm(buf, GE_XMM, b);
            emit_sse_rr(buf, SSE_PSUBUSW, GE_XMM, a);
            emit_sse_rr(buf, SSE_PXOR, b, b);
            emit_sse_rr(buf, SSE_PCMPEQW, GE_XMM, b);
        }
        QAddS16 => saturating(buf, result_reg, a, b, SSE_PADDSW),
        QSubS16 => saturating(buf, result_reg, a, b, SSE_PSUBSW),
        QAddU16 => saturating(buf, result_reg, a, b, SSE_PADDUSW),
        QSubU16 => saturating(buf, result_reg, a, b, SSE_PSUBUSW),
        HAddS16 => halving_add(buf, ra, result_reg, a, b, true)?,
        HAddU16 => halving_add(buf, ra, result_reg, a, b, false)?,
        HSubS16 => halving_sub(buf, ra, result_reg, a, b, true)?,
        HSubU16 => halving_sub(buf, ra, result_reg, a, b, false)?,
        AddS8 => {
            let sum = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, sum, a);
            emit_sse_rr(buf, SSE_PADDB, sum, b);
            emit_movd_gpr_xmm(buf, result_reg, sum);
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PADDSB, GE_XMM, b);
            emit_sse_rr(buf, SSE_PCMPEQB, a, a);
            emit_sse_rr(buf, SSE_PCMPGTB, GE_XMM, a);
        }
        SubS8 => {
            let diff = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, diff, a);
            emit_sse_rr(buf, SSE_PSUBB, diff, b);
            emit_movd_gpr_xmm(buf, result_reg, diff);
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PSUBSB, GE_XMM, b);
            emit_sse_rr(buf, SSE_PCMPEQB, a, a);
            emit_sse_rr(buf, SSE_PCMPGTB, GE_XMM, a);
        }
        AddU8 => {
            let sum = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, sum, a);
            emit_sse_rr(buf, SSE_PADDB, sum, b);
            emit_movd_gpr_xmm(buf, result_reg, sum);
            // Carry lane: a saturating-minus wrapped-sum non-zero.
            emit_movq_xmm_xmm(buf, GE_XMM, a);
            emit_sse_rr(buf, SSE_PSUBUSB, GE_XMM, sum);
            emit_sse_rr(buf, SSE_PXOR, b, b);
            emit_sse_rr(buf, SSE_PCMPEQB, GE_XMM, b);
            emit_sse_rr(buf, SSE_PCMPEQB, b, b);
            emit_sse_rr(buf, SSE_PXOR, GE_XMM, b);
        }
        SubU8 => {
            let diff = ra.scratch_xmm()?;
            emit_movq_xmm_xmm(buf, diff, a);
            emit_sse_rr(buf, SSE_PSUBB, diff, b);
            emit_movd_gpr_xmm(buf, result_reg, diff);
            emit_movq_xmm_xmm(buf, GE_XMM, b);
            emit_sse_rr(buf, SSE_PSUBUSB, GE_XMM, a);
            emit_sse_rr(buf, SSE_PXOR, b, b);
            emit_sse_rr(buf, SSE_PCMPEQB, GE_XMM, b);
        }
    }
    Ok(())
}

fn saturating(buf: &mut CodeBuffer, result_reg: Reg, a: super::regs::Xmm, b: super::regs::Xmm, op: u8) {
    emit_sse_rr(buf, op, a, b);
    emit_movd_gpr_xmm(buf, result_reg, a);
}

/// `(a + b) >> 1` per lane: `(a >> 1) + (b >> 1) + (a & b & 1)`.
fn halving_add(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result_reg: Reg,
    a: super::regs::Xmm,
    b: super::regs::Xmm,
    signed: bool,
) -> Result<(), JitError> {
    let carry = ra.scratch_xmm()?;
    let ones = ra.scratch_xmm()?;
    emit_movq_xmm_xmm(buf, carry, a);
    emit_sse_rr(buf, SSE_PAND, carry, b);
    emit_sse_rr(buf, SSE_PCMPEQW, ones, ones);
    emit_psrlw_ri(buf, ones, 15);
    emit_sse_rr(buf, SSE_PAND, carry, ones);
    if signed {
        emit_psraw_ri(buf, a, 1);
        emit_psraw_ri(buf, b, 1);
    } else {
        emit_psrlw_ri(buf, a, 1);
        emit_psrlw_ri(buf, b, 1);
    }
    emit_sse_rr(buf, SSE_PADDW, a, b);
    emit_sse_rr(buf, SSE_PADDW, a, carry);
    emit_movd_gpr_xmm(buf, result_reg, a);
    Ok(())
}

/// `(a - b) >> 1` per lane: `(a >> 1) - (b >> 1) - (~a & b & 1)`.
fn halving_sub(
    buf: &mut CodeBuffer,
    ra: &mut RegisterAllocator,
    result_reg: Reg,
    a: super::regs::Xmm,
    b: super::regs::Xmm,
    signed: bool,
) -> Result<(), JitError> {
    let borrow = ra.scratch_xmm()?;
    let ones = ra.scratch_xmm()?;
    emit_movq_xmm_xmm(buf, borrow, a);
    // borrow = ~borrow & b.
    emit_sse_rr(buf, SSE_PANDN, borrow, b);
    emit_sse_rr(buf, SSE_PCMPEQW, ones, ones);
    emit_psrlw_ri(buf, ones, 15);
    emit_sse_rr(buf, SSE_PAND, borrow, ones);
    if signed {
        emit_psraw_ri(buf, a, 1);
        emit_psraw_ri(buf, b, 1);
    } else {
        emit_psrlw_ri(buf, a, 1);
        emit_psrlw_ri(buf, b, 1);
    }
    emit_sse_rr(buf, SSE_PSUBW, a, b);
    emit_sse_rr(buf, SSE_PSUBW, a, borrow);
    emit_movd_gpr_xmm(buf, result_reg, a);
    Ok(())
}
