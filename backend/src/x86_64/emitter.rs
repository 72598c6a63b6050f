//! Raw x86-64 instruction encoders over the code buffer.
//!
//! Only the forms the compiler actually emits are implemented. All
//! 32-bit register ops zero-extend into the full 64-bit register,
//! which the shifter lowering relies on.

use arm_jit_core::CodeBuffer;

use super::regs::{Reg, Xmm};

/// Group-1 arithmetic ops, encoded in the /r and /n opcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

/// Group-2 shift/rotate ops (the /n field of D3 and C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftKind {
    Rol = 0,
    Ror = 1,
    Rcr = 3,
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

/// Condition codes for Jcc/SETcc/CMOVcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cc {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

fn rex(buf: &mut CodeBuffer, w: bool, r: bool, x: bool, b: bool, force: bool) {
    let mut byte = 0x40u8;
    if w {
        byte |= 8;
    }
    if r {
        byte |= 4;
    }
    if x {
        byte |= 2;
    }
    if b {
        byte |= 1;
    }
    if byte != 0x40 || force {
        buf.emit_u8(byte);
    }
}

fn modrm_reg(buf: &mut CodeBuffer, reg_low3: u8, rm_low3: u8) {
    buf.emit_u8(0xC0 | (reg_low3 << 3) | rm_low3);
}

/// ModR/M memory operand `[base + disp]`.
fn modrm_mem(buf: &mut CodeBuffer, reg_low3: u8, base: Reg, disp: i32) {
    let base_low = base.low3();
    let need_sib = base_low == 4; // RSP/R12
    let (mode, disp_size) = if disp == 0 && base_low != 5 {
        (0b00, 0)
    } else if (-128..=127).contains(&disp) {
        (0b01, 1)
    } else {
        (0b10, 4)
    };
    buf.emit_u8((mode << 6) | (reg_low3 << 3) | if need_sib { 4 } else { base_low });
    if need_sib {
        buf.emit_u8(0x24);
    }
    match disp_size {
        1 => buf.emit_u8(disp as u8),
        4 => buf.emit_u32(disp as u32),
        _ => {}
    }
}

/// ModR/M memory operand `[base + index * 2^scale + disp]`.
fn modrm_sib(buf: &mut CodeBuffer, reg_low3: u8, base: Reg, index: Reg, scale: u8, disp: i32) {
    debug_assert!(index != Reg::Rsp, "rsp cannot be an index");
    let base_low = base.low3();
    let (mode, disp_size) = if disp == 0 && base_low != 5 {
        (0b00, 0)
    } else if (-128..=127).contains(&disp) {
        (0b01, 1)
    } else {
        (0b10, 4)
    };
    buf.emit_u8((mode << 6) | (reg_low3 << 3) | 4);
    buf.emit_u8((scale << 6) | (index.low3() << 3) | base_low);
    match disp_size {
        1 => buf.emit_u8(disp as u8),
        4 => buf.emit_u32(disp as u32),
        _ => {}
    }
}

// -- Moves --

/// `mov dst, src`.
pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    rex(buf, rexw, src.high_bit(), false, dst.high_bit(), false);
    buf.emit_u8(0x89);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `mov dst32, imm32` (zero-extends).
pub fn emit_mov_ri(buf: &mut CodeBuffer, dst: Reg, imm: u32) {
    rex(buf, false, false, false, dst.high_bit(), false);
    buf.emit_u8(0xB8 + dst.low3());
    buf.emit_u32(imm);
}

/// `movabs dst, imm64` (compact forms for small values).
pub fn emit_mov_ri64(buf: &mut CodeBuffer, dst: Reg, imm: u64) {
    if imm <= u32::MAX as u64 {
        emit_mov_ri(buf, dst, imm as u32);
        return;
    }
    rex(buf, true, false, false, dst.high_bit(), false);
    buf.emit_u8(0xB8 + dst.low3());
    buf.emit_u64(imm);
}

/// `mov dst, [base + disp]`.
pub fn emit_load(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, disp: i32) {
    rex(buf, rexw, dst.high_bit(), false, base.high_bit(), false);
    buf.emit_u8(0x8B);
    modrm_mem(buf, dst.low3(), base, disp);
}

/// `mov [base + disp], src`.
pub fn emit_store(buf: &mut CodeBuffer, rexw: bool, src: Reg, base: Reg, disp: i32) {
    rex(buf, rexw, src.high_bit(), false, base.high_bit(), false);
    buf.emit_u8(0x89);
    modrm_mem(buf, src.low3(), base, disp);
}

/// `mov dword [base + disp], imm32`.
pub fn emit_store_imm(buf: &mut CodeBuffer, base: Reg, disp: i32, imm: u32) {
    rex(buf, false, false, false, base.high_bit(), false);
    buf.emit_u8(0xC7);
    modrm_mem(buf, 0, base, disp);
    buf.emit_u32(imm);
}

/// `mov byte [base + index], src8`.
pub fn emit_store8_sib(buf: &mut CodeBuffer, src: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        src.high_bit(),
        index.high_bit(),
        base.high_bit(),
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0x88);
    modrm_sib(buf, src.low3(), base, index, 0, 0);
}

/// `mov word [base + index], src16`.
pub fn emit_store16_sib(buf: &mut CodeBuffer, src: Reg, base: Reg, index: Reg) {
    buf.emit_u8(0x66);
    rex(
        buf,
        false,
        src.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x89);
    modrm_sib(buf, src.low3(), base, index, 0, 0);
}

/// `mov dword [base + index], src32`.
pub fn emit_store32_sib(buf: &mut CodeBuffer, src: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        src.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x89);
    modrm_sib(buf, src.low3(), base, index, 0, 0);
}

/// `mov dst, [base + index * 2^scale]` (64-bit when `rexw`).
pub fn emit_load_sib(buf: &mut CodeBuffer, rexw: bool, dst: Reg, base: Reg, index: Reg, scale: u8) {
    rex(
        buf,
        rexw,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x8B);
    modrm_sib(buf, dst.low3(), base, index, scale, 0);
}

/// `movzx dst32, byte [base + index]`.
pub fn emit_load8_zx_sib(buf: &mut CodeBuffer, dst: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB6);
    modrm_sib(buf, dst.low3(), base, index, 0, 0);
}

/// `movsx dst32, byte [base + index]`.
pub fn emit_load8_sx_sib(buf: &mut CodeBuffer, dst: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBE);
    modrm_sib(buf, dst.low3(), base, index, 0, 0);
}

/// `movzx dst32, word [base + index]`.
pub fn emit_load16_zx_sib(buf: &mut CodeBuffer, dst: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB7);
    modrm_sib(buf, dst.low3(), base, index, 0, 0);
}

/// `movsx dst32, word [base + index]`.
pub fn emit_load16_sx_sib(buf: &mut CodeBuffer, dst: Reg, base: Reg, index: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBF);
    modrm_sib(buf, dst.low3(), base, index, 0, 0);
}

// -- Register-to-register widenings --

/// `movzx dst32, src8`.
pub fn emit_movzx8(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        false,
        src.high_bit(),
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB6);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `movsx dst32, src8`.
pub fn emit_movsx8(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(
        buf,
        false,
        dst.high_bit(),
        false,
        src.high_bit(),
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBE);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `movzx dst32, src16`.
pub fn emit_movzx16(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(buf, false, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xB7);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `movsx dst32, src16`.
pub fn emit_movsx16(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(buf, false, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBF);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `movsxd dst64, src32`.
pub fn emit_movsxd(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(buf, true, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x63);
    modrm_reg(buf, dst.low3(), src.low3());
}

// -- Arithmetic --

/// `op dst, src` (group-1, register form).
pub fn emit_arith_rr(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, src: Reg) {
    rex(buf, rexw, src.high_bit(), false, dst.high_bit(), false);
    buf.emit_u8((op as u8) * 8 + 1);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `op dst, imm` (group-1, immediate form; picks the sign-extended
/// 8-bit encoding when it fits).
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    rex(buf, rexw, false, false, dst.high_bit(), false);
    if (-128..=127).contains(&imm) {
        buf.emit_u8(0x83);
        modrm_reg(buf, op as u8, dst.low3());
        buf.emit_u8(imm as u8);
    } else {
        buf.emit_u8(0x81);
        modrm_reg(buf, op as u8, dst.low3());
        buf.emit_u32(imm as u32);
    }
}

/// `test dst, src` (32-bit).
pub fn emit_test_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    rex(buf, rexw, src.high_bit(), false, dst.high_bit(), false);
    buf.emit_u8(0x85);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `test dst32, imm32`.
pub fn emit_test_ri(buf: &mut CodeBuffer, dst: Reg, imm: u32) {
    rex(buf, false, false, false, dst.high_bit(), false);
    buf.emit_u8(0xF7);
    modrm_reg(buf, 0, dst.low3());
    buf.emit_u32(imm);
}

/// `not dst32`.
pub fn emit_not(buf: &mut CodeBuffer, dst: Reg) {
    rex(buf, false, false, false, dst.high_bit(), false);
    buf.emit_u8(0xF7);
    modrm_reg(buf, 2, dst.low3());
}

/// `imul dst, src`.
pub fn emit_imul_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    rex(buf, rexw, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xAF);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `lzcnt dst32, src32`.
pub fn emit_lzcnt(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    buf.emit_u8(0xF3);
    rex(buf, false, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBD);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `pext dst32, src1_32, src2_32` (BMI2, VEX-encoded).
pub fn emit_pext(buf: &mut CodeBuffer, dst: Reg, src1: Reg, src2: Reg) {
    buf.emit_u8(0xC4);
    let byte1 = ((!dst.high_bit() as u8) << 7) | (1 << 6) | ((!src2.high_bit() as u8) << 5) | 0x02;
    buf.emit_u8(byte1);
    // W=0, vvvv = !src1, L=0, pp=F2.
    buf.emit_u8((((!(src1 as u8)) & 0xF) << 3) | 0x03);
    buf.emit_u8(0xF5);
    modrm_reg(buf, dst.low3(), src2.low3());
}

// -- Shifts --

/// `shift dst, cl`.
pub fn emit_shift_cl(buf: &mut CodeBuffer, kind: ShiftKind, rexw: bool, dst: Reg) {
    rex(buf, rexw, false, false, dst.high_bit(), false);
    buf.emit_u8(0xD3);
    modrm_reg(buf, kind as u8, dst.low3());
}

/// `shift dst, imm8`.
pub fn emit_shift_ri(buf: &mut CodeBuffer, kind: ShiftKind, rexw: bool, dst: Reg, imm: u8) {
    rex(buf, rexw, false, false, dst.high_bit(), false);
    buf.emit_u8(0xC1);
    modrm_reg(buf, kind as u8, dst.low3());
    buf.emit_u8(imm);
}

// -- Flag manipulation --

pub fn emit_lahf(buf: &mut CodeBuffer) {
    buf.emit_u8(0x9E);
}

pub fn emit_sahf(buf: &mut CodeBuffer) {
    buf.emit_u8(0x9F);
}

pub fn emit_cmc(buf: &mut CodeBuffer) {
    buf.emit_u8(0xF5);
}

/// `and ah, imm8`.
pub fn emit_and_ah(buf: &mut CodeBuffer, imm: u8) {
    buf.emit_u8(0x80);
    buf.emit_u8(0xE4);
    buf.emit_u8(imm);
}

/// `or ah, imm8`.
pub fn emit_or_ah(buf: &mut CodeBuffer, imm: u8) {
    buf.emit_u8(0x80);
    buf.emit_u8(0xCC);
    buf.emit_u8(imm);
}

/// `mov cl, imm8`.
pub fn emit_mov_cl(buf: &mut CodeBuffer, imm: u8) {
    buf.emit_u8(0xB1);
    buf.emit_u8(imm);
}

/// `mov cl, src8`.
pub fn emit_mov_cl_r8(buf: &mut CodeBuffer, src: Reg) {
    rex(
        buf,
        false,
        src.high_bit(),
        false,
        false,
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0x88);
    modrm_reg(buf, src.low3(), 1); // cl
}

/// `and cl, imm8`.
pub fn emit_and_cl(buf: &mut CodeBuffer, imm: u8) {
    buf.emit_u8(0x80);
    buf.emit_u8(0xE1);
    buf.emit_u8(imm);
}

/// `shl cl, imm8`.
pub fn emit_shl_cl_imm(buf: &mut CodeBuffer, imm: u8) {
    buf.emit_u8(0xC0);
    buf.emit_u8(0xE1);
    buf.emit_u8(imm);
}

/// `xchg dst32, src32`.
pub fn emit_xchg_rr(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    rex(buf, false, src.high_bit(), false, dst.high_bit(), false);
    buf.emit_u8(0x87);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `cmp src8, imm8` over the low byte of `src`.
pub fn emit_cmp_r8_imm(buf: &mut CodeBuffer, src: Reg, imm: u8) {
    rex(
        buf,
        false,
        false,
        false,
        src.high_bit(),
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0x80);
    modrm_reg(buf, 7, src.low3());
    buf.emit_u8(imm);
}

/// `test src8, imm8` over the low byte of `src`.
pub fn emit_test_r8_imm(buf: &mut CodeBuffer, src: Reg, imm: u8) {
    rex(
        buf,
        false,
        false,
        false,
        src.high_bit(),
        src.low3() >= 4 && !src.high_bit(),
    );
    buf.emit_u8(0xF6);
    modrm_reg(buf, 0, src.low3());
    buf.emit_u8(imm);
}

/// `cmp byte [base + index], 0`.
pub fn emit_cmp_mem8_zero(buf: &mut CodeBuffer, base: Reg, index: Reg) {
    rex(buf, false, false, index.high_bit(), base.high_bit(), false);
    buf.emit_u8(0x80);
    modrm_sib(buf, 7, base, index, 0, 0);
    buf.emit_u8(0);
}

/// `cmp byte [base + disp], 0`.
pub fn emit_cmp_mem8_disp_zero(buf: &mut CodeBuffer, base: Reg, disp: i32) {
    rex(buf, false, false, false, base.high_bit(), false);
    buf.emit_u8(0x80);
    modrm_mem(buf, 7, base, disp);
    buf.emit_u8(0);
}

/// `add dword [base + disp], imm32`.
pub fn emit_add_mem_imm(buf: &mut CodeBuffer, base: Reg, disp: i32, imm: i32) {
    rex(buf, false, false, false, base.high_bit(), false);
    if (-128..=127).contains(&imm) {
        buf.emit_u8(0x83);
        modrm_mem(buf, 0, base, disp);
        buf.emit_u8(imm as u8);
    } else {
        buf.emit_u8(0x81);
        modrm_mem(buf, 0, base, disp);
        buf.emit_u32(imm as u32);
    }
}

/// `bt dst32, imm8`.
pub fn emit_bt_ri(buf: &mut CodeBuffer, dst: Reg, bit: u8) {
    rex(buf, false, false, false, dst.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xBA);
    modrm_reg(buf, 4, dst.low3());
    buf.emit_u8(bit);
}

/// `setcc dst8`.
pub fn emit_setcc(buf: &mut CodeBuffer, cc: Cc, dst: Reg) {
    rex(
        buf,
        false,
        false,
        false,
        dst.high_bit(),
        dst.low3() >= 4 && !dst.high_bit(),
    );
    buf.emit_u8(0x0F);
    buf.emit_u8(0x90 + cc as u8);
    modrm_reg(buf, 0, dst.low3());
}

/// `cmovcc dst, src`.
pub fn emit_cmovcc(buf: &mut CodeBuffer, cc: Cc, rexw: bool, dst: Reg, src: Reg) {
    rex(buf, rexw, dst.high_bit(), false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x40 + cc as u8);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `lea dst32, [base + index * 2^scale + disp]`.
pub fn emit_lea_sib(
    buf: &mut CodeBuffer,
    dst: Reg,
    base: Reg,
    index: Reg,
    scale: u8,
    disp: i32,
) {
    rex(
        buf,
        false,
        dst.high_bit(),
        index.high_bit(),
        base.high_bit(),
        false,
    );
    buf.emit_u8(0x8D);
    modrm_sib(buf, dst.low3(), base, index, scale, disp);
}

// -- Stack and control flow --

pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    rex(buf, false, false, false, reg.high_bit(), false);
    buf.emit_u8(0x50 + reg.low3());
}

pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    rex(buf, false, false, false, reg.high_bit(), false);
    buf.emit_u8(0x58 + reg.low3());
}

pub fn emit_call_reg(buf: &mut CodeBuffer, reg: Reg) {
    rex(buf, false, false, false, reg.high_bit(), false);
    buf.emit_u8(0xFF);
    modrm_reg(buf, 2, reg.low3());
}

pub fn emit_jmp_reg(buf: &mut CodeBuffer, reg: Reg) {
    rex(buf, false, false, false, reg.high_bit(), false);
    buf.emit_u8(0xFF);
    modrm_reg(buf, 4, reg.low3());
}

pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(0xC3);
}

/// Forward `jmp rel32`; returns the displacement offset to patch.
pub fn emit_jmp_forward(buf: &mut CodeBuffer) -> usize {
    buf.emit_u8(0xE9);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// Forward `jcc rel32`; returns the displacement offset to patch.
pub fn emit_jcc_forward(buf: &mut CodeBuffer, cc: Cc) -> usize {
    buf.emit_u8(0x0F);
    buf.emit_u8(0x80 + cc as u8);
    let at = buf.offset();
    buf.emit_u32(0);
    at
}

/// Patch a forward jump displacement to land at the current offset.
pub fn patch_forward(buf: &mut CodeBuffer, at: usize) {
    let disp = buf.offset() as i64 - (at as i64 + 4);
    buf.patch_u32(at, disp as u32);
}

// -- SSE --

/// `movq xmm, gpr64`.
pub fn emit_movq_xmm_gpr(buf: &mut CodeBuffer, dst: Xmm, src: Reg) {
    buf.emit_u8(0x66);
    rex(buf, true, dst.0 >= 8, false, src.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x6E);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// `movq gpr64, xmm`.
pub fn emit_movq_gpr_xmm(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    buf.emit_u8(0x66);
    rex(buf, true, src.0 >= 8, false, dst.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x7E);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `movd gpr32, xmm`.
pub fn emit_movd_gpr_xmm(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    buf.emit_u8(0x66);
    rex(buf, false, src.0 >= 8, false, dst.high_bit(), false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x7E);
    modrm_reg(buf, src.low3(), dst.low3());
}

/// `movq xmm, xmm` (low 64 bits).
pub fn emit_movq_xmm_xmm(buf: &mut CodeBuffer, dst: Xmm, src: Xmm) {
    buf.emit_u8(0xF3);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x7E);
    modrm_reg(buf, dst.low3(), src.low3());
}

/// Generic 66-0F-prefixed packed op `xmm, xmm` (paddw, psubsw, ...).
pub fn emit_sse_rr(buf: &mut CodeBuffer, opcode: u8, dst: Xmm, src: Xmm) {
    buf.emit_u8(0x66);
    buf.emit_u8(0x0F);
    buf.emit_u8(opcode);
    modrm_reg(buf, dst.low3(), src.low3());
}

pub const SSE_PADDB: u8 = 0xFC;
pub const SSE_PADDW: u8 = 0xFD;
pub const SSE_PSUBB: u8 = 0xF8;
pub const SSE_PSUBW: u8 = 0xF9;
pub const SSE_PADDSB: u8 = 0xEC;
pub const SSE_PADDSW: u8 = 0xED;
pub const SSE_PSUBSB: u8 = 0xE8;
pub const SSE_PSUBSW: u8 = 0xE9;
pub const SSE_PADDUSB: u8 = 0xDC;
pub const SSE_PADDUSW: u8 = 0xDD;
pub const SSE_PSUBUSB: u8 = 0xD8;
pub const SSE_PSUBUSW: u8 = 0xD9;
pub const SSE_PCMPEQB: u8 = 0x74;
pub const SSE_PCMPEQW: u8 = 0x75;
pub const SSE_PCMPGTB: u8 = 0x64;
pub const SSE_PCMPGTW: u8 = 0x65;
pub const SSE_PAND: u8 = 0xDB;
pub const SSE_PANDN: u8 = 0xDF;
pub const SSE_POR: u8 = 0xEB;
pub const SSE_PXOR: u8 = 0xEF;
pub const SSE_PACKSSWB: u8 = 0x63;

/// `psllw xmm, imm8` (`/6`), `psrlw` (`/2`), `psraw` (`/4`).
pub fn emit_psllw_ri(buf: &mut CodeBuffer, dst: Xmm, imm: u8) {
    emit_pshift_w(buf, 6, dst, imm);
}

pub fn emit_psrlw_ri(buf: &mut CodeBuffer, dst: Xmm, imm: u8) {
    emit_pshift_w(buf, 2, dst, imm);
}

pub fn emit_psraw_ri(buf: &mut CodeBuffer, dst: Xmm, imm: u8) {
    emit_pshift_w(buf, 4, dst, imm);
}

fn emit_pshift_w(buf: &mut CodeBuffer, op: u8, dst: Xmm, imm: u8) {
    buf.emit_u8(0x66);
    buf.emit_u8(0x0F);
    buf.emit_u8(0x71);
    modrm_reg(buf, op, dst.low3());
    buf.emit_u8(imm);
}

/// `pmovmskb gpr32, xmm`.
pub fn emit_pmovmskb(buf: &mut CodeBuffer, dst: Reg, src: Xmm) {
    buf.emit_u8(0x66);
    rex(buf, false, dst.high_bit(), false, src.0 >= 8, false);
    buf.emit_u8(0x0F);
    buf.emit_u8(0xD7);
    modrm_reg(buf, dst.low3(), src.low3());
}
