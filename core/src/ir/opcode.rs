//! IR opcode records.
//!
//! A closed variant over every IR instruction. Each opcode answers
//! `reads`/`writes` for liveness, `repoint` for identity rewrites and
//! `propagate_constant` for constant folding. Operands that the
//! shifter treats differently between shift-by-register and
//! shift-by-immediate encodings (the shift amount) deliberately do
//! not accept constant propagation.

use crate::cpu::{Mode, GPR};
use crate::ir::value::{AnyRef, IRConstant, VarRef};

/// A guest register qualified with the bank-selecting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestReg {
    pub reg: GPR,
    pub mode: Mode,
}

impl GuestReg {
    pub fn new(reg: GPR, mode: Mode) -> Self {
        GuestReg { reg, mode }
    }
}

impl std::fmt::Display for GuestReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}_{}", self.reg as u8, self.mode)
    }
}

/// Barrel shifter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftOp {
    pub fn name(self) -> &'static str {
        match self {
            ShiftOp::Lsl => "lsl",
            ShiftOp::Lsr => "lsr",
            ShiftOp::Asr => "asr",
            ShiftOp::Ror => "ror",
        }
    }
}

/// Binary ALU operations (MOV/MVN are separate opcodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    And,
    Bic,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Orr,
}

impl AluOp {
    pub fn name(self) -> &'static str {
        match self {
            AluOp::And => "and",
            AluOp::Bic => "bic",
            AluOp::Eor => "eor",
            AluOp::Sub => "sub",
            AluOp::Rsb => "rsb",
            AluOp::Add => "add",
            AluOp::Adc => "adc",
            AluOp::Sbc => "sbc",
            AluOp::Rsc => "rsc",
            AluOp::Orr => "orr",
        }
    }

    /// Arithmetic ops produce all of N/Z/C/V; logical ops produce N/Z
    /// and leave carry to the shifter.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            AluOp::Sub | AluOp::Rsb | AluOp::Add | AluOp::Adc | AluOp::Sbc | AluOp::Rsc
        )
    }

    /// Ops that consume the incoming carry flag.
    pub fn uses_carry(self) -> bool {
        matches!(self, AluOp::Adc | AluOp::Sbc | AluOp::Rsc)
    }
}

/// Packed parallel add/sub kinds over 64-bit operands.
///
/// Only the wrapping forms produce greater-than-or-equal flags; the
/// saturating and halving forms leave them untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParallelOp {
    AddS16,
    SubS16,
    AddU16,
    SubU16,
    QAddS16,
    QSubS16,
    QAddU16,
    QSubU16,
    HAddS16,
    HSubS16,
    HAddU16,
    HSubU16,
    AddS8,
    SubS8,
    AddU8,
    SubU8,
}

impl ParallelOp {
    pub fn name(self) -> &'static str {
        match self {
            ParallelOp::AddS16 => "padd.s16",
            ParallelOp::SubS16 => "psub.s16",
            ParallelOp::AddU16 => "padd.u16",
            ParallelOp::SubU16 => "psub.u16",
            ParallelOp::QAddS16 => "pqadd.s16",
            ParallelOp::QSubS16 => "pqsub.s16",
            ParallelOp::QAddU16 => "pqadd.u16",
            ParallelOp::QSubU16 => "pqsub.u16",
            ParallelOp::HAddS16 => "phadd.s16",
            ParallelOp::HSubS16 => "phsub.s16",
            ParallelOp::HAddU16 => "phadd.u16",
            ParallelOp::HSubU16 => "phsub.u16",
            ParallelOp::AddS8 => "padd.s8",
            ParallelOp::SubS8 => "psub.s8",
            ParallelOp::AddU8 => "padd.u8",
            ParallelOp::SubU8 => "psub.u8",
        }
    }

    pub fn sets_ge(self) -> bool {
        matches!(
            self,
            ParallelOp::AddS16
                | ParallelOp::SubS16
                | ParallelOp::AddU16
                | ParallelOp::SubU16
                | ParallelOp::AddS8
                | ParallelOp::SubS8
                | ParallelOp::AddU8
                | ParallelOp::SubU8
        )
    }

    pub fn is_bytes(self) -> bool {
        matches!(
            self,
            ParallelOp::AddS8 | ParallelOp::SubS8 | ParallelOp::AddU8 | ParallelOp::SubU8
        )
    }
}

bitflags::bitflags! {
    /// Access width and post-processing flags on memory opcodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        const BYTE = 1;
        const HALF = 2;
        const WORD = 4;
        /// Rotate a misaligned read right by `8 * (address & mask)`.
        const ROTATE = 8;
        const SIGNED = 16;
        /// Legacy-core behavior: a misaligned signed halfword read is
        /// a signed byte read from the high byte.
        const ARMV4T = 32;
    }
}

/// One IR instruction.
#[derive(Debug, Clone)]
pub enum IROp {
    Nop,
    LoadGPR {
        reg: GuestReg,
        result: VarRef,
    },
    StoreGPR {
        reg: GuestReg,
        value: AnyRef,
    },
    LoadSPSR {
        result: VarRef,
        mode: Mode,
    },
    StoreSPSR {
        value: AnyRef,
        mode: Mode,
    },
    LoadCPSR {
        result: VarRef,
    },
    StoreCPSR {
        value: AnyRef,
    },
    ClearCarry,
    SetCarry,
    /// Rebuild guest flags from the packed host flag bytes.
    UpdateFlags {
        result: VarRef,
        input: VarRef,
        flag_n: bool,
        flag_z: bool,
        flag_c: bool,
        flag_v: bool,
    },
    /// OR the host overflow byte into the sticky saturation bit.
    UpdateSticky {
        result: VarRef,
        input: VarRef,
    },
    /// Transfer the packed SIMD flag vector into the GE nibble.
    UpdateGE {
        result: VarRef,
        input: VarRef,
    },
    Shift {
        op: ShiftOp,
        result: VarRef,
        operand: VarRef,
        amount: AnyRef,
        update_host_flags: bool,
    },
    /// Binary ALU op. A null result denotes the flag-only compare
    /// forms (TST/TEQ/CMP/CMN).
    Alu {
        op: AluOp,
        result: Option<VarRef>,
        lhs: VarRef,
        rhs: AnyRef,
        update_host_flags: bool,
    },
    Mov {
        result: VarRef,
        source: AnyRef,
        update_host_flags: bool,
    },
    Mvn {
        result: VarRef,
        source: AnyRef,
        update_host_flags: bool,
    },
    /// 32x32 multiply; with `result_hi` present, a widening 64-bit
    /// multiply whose signedness follows the operand data type.
    Multiply {
        result_hi: Option<VarRef>,
        result_lo: VarRef,
        lhs: VarRef,
        rhs: VarRef,
        update_host_flags: bool,
    },
    /// 64-bit addition over four 32-bit halves.
    Add64 {
        result_hi: VarRef,
        result_lo: VarRef,
        lhs_hi: VarRef,
        lhs_lo: VarRef,
        rhs_hi: VarRef,
        rhs_lo: VarRef,
        update_host_flags: bool,
    },
    MemoryRead {
        flags: MemoryFlags,
        result: VarRef,
        address: AnyRef,
    },
    MemoryWrite {
        flags: MemoryFlags,
        source: AnyRef,
        address: AnyRef,
    },
    /// Pipeline reload: out = in + (thumb ? 4 : 8).
    Flush {
        address_out: VarRef,
        address_in: VarRef,
        cpsr_in: VarRef,
    },
    /// Pipeline reload with instruction-set exchange on address bit 0.
    FlushExchange {
        address_out: VarRef,
        cpsr_out: VarRef,
        address_in: VarRef,
        cpsr_in: VarRef,
    },
    Clz {
        result: VarRef,
        operand: VarRef,
    },
    QAdd {
        result: VarRef,
        lhs: VarRef,
        rhs: VarRef,
    },
    QSub {
        result: VarRef,
        lhs: VarRef,
        rhs: VarRef,
    },
    Parallel {
        op: ParallelOp,
        result: VarRef,
        lhs: VarRef,
        rhs: VarRef,
    },
    ReadCoprocessor {
        result: VarRef,
        coprocessor: u32,
        opcode1: u32,
        cn: u32,
        cm: u32,
        opcode2: u32,
    },
    WriteCoprocessor {
        value: AnyRef,
        coprocessor: u32,
        opcode1: u32,
        cn: u32,
        cm: u32,
        opcode2: u32,
    },
}

impl IROp {
    /// Whether this opcode reads `var`.
    pub fn reads(&self, var: VarRef) -> bool {
        match self {
            IROp::Nop | IROp::ClearCarry | IROp::SetCarry => false,
            IROp::LoadGPR { .. } | IROp::LoadSPSR { .. } | IROp::LoadCPSR { .. } => false,
            IROp::StoreGPR { value, .. }
            | IROp::StoreSPSR { value, .. }
            | IROp::StoreCPSR { value } => value.reads(var),
            IROp::UpdateFlags { input, .. }
            | IROp::UpdateSticky { input, .. }
            | IROp::UpdateGE { input, .. } => *input == var,
            IROp::Shift {
                operand, amount, ..
            } => *operand == var || amount.reads(var),
            IROp::Alu { lhs, rhs, .. } => *lhs == var || rhs.reads(var),
            IROp::Mov { source, .. } | IROp::Mvn { source, .. } => source.reads(var),
            IROp::Multiply { lhs, rhs, .. } => *lhs == var || *rhs == var,
            IROp::Add64 {
                lhs_hi,
                lhs_lo,
                rhs_hi,
                rhs_lo,
                ..
            } => *lhs_hi == var || *lhs_lo == var || *rhs_hi == var || *rhs_lo == var,
            IROp::MemoryRead { address, .. } => address.reads(var),
            IROp::MemoryWrite {
                source, address, ..
            } => source.reads(var) || address.reads(var),
            IROp::Flush {
                address_in,
                cpsr_in,
                ..
            } => *address_in == var || *cpsr_in == var,
            IROp::FlushExchange {
                address_in,
                cpsr_in,
                ..
            } => *address_in == var || *cpsr_in == var,
            IROp::Clz { operand, .. } => *operand == var,
            IROp::QAdd { lhs, rhs, .. }
            | IROp::QSub { lhs, rhs, .. }
            | IROp::Parallel { lhs, rhs, .. } => *lhs == var || *rhs == var,
            IROp::ReadCoprocessor { .. } => false,
            IROp::WriteCoprocessor { value, .. } => value.reads(var),
        }
    }

    /// Whether this opcode defines `var`.
    pub fn writes(&self, var: VarRef) -> bool {
        match self {
            IROp::LoadGPR { result, .. }
            | IROp::LoadSPSR { result, .. }
            | IROp::LoadCPSR { result }
            | IROp::UpdateFlags { result, .. }
            | IROp::UpdateSticky { result, .. }
            | IROp::UpdateGE { result, .. }
            | IROp::Shift { result, .. }
            | IROp::Mov { result, .. }
            | IROp::Mvn { result, .. }
            | IROp::MemoryRead { result, .. }
            | IROp::Clz { result, .. }
            | IROp::QAdd { result, .. }
            | IROp::QSub { result, .. }
            | IROp::Parallel { result, .. }
            | IROp::ReadCoprocessor { result, .. } => *result == var,
            IROp::Alu { result, .. } => *result == Some(var),
            IROp::Multiply {
                result_hi,
                result_lo,
                ..
            } => *result_lo == var || *result_hi == Some(var),
            IROp::Add64 {
                result_hi,
                result_lo,
                ..
            } => *result_hi == var || *result_lo == var,
            IROp::Flush { address_out, .. } => *address_out == var,
            IROp::FlushExchange {
                address_out,
                cpsr_out,
                ..
            } => *address_out == var || *cpsr_out == var,
            _ => false,
        }
    }

    /// Rewrite every reference to `var_old` (reads and writes) into
    /// `var_new`.
    pub fn repoint(&mut self, var_old: VarRef, var_new: VarRef) {
        let fix = |var: &mut VarRef| {
            if *var == var_old {
                *var = var_new;
            }
        };
        let fix_opt = |var: &mut Option<VarRef>| {
            if *var == Some(var_old) {
                *var = Some(var_new);
            }
        };
        match self {
            IROp::Nop | IROp::ClearCarry | IROp::SetCarry => {}
            IROp::LoadGPR { result, .. }
            | IROp::LoadSPSR { result, .. }
            | IROp::LoadCPSR { result }
            | IROp::ReadCoprocessor { result, .. } => fix(result),
            IROp::StoreGPR { value, .. }
            | IROp::StoreSPSR { value, .. }
            | IROp::StoreCPSR { value }
            | IROp::WriteCoprocessor { value, .. } => value.repoint(var_old, var_new),
            IROp::UpdateFlags { result, input, .. }
            | IROp::UpdateSticky { result, input }
            | IROp::UpdateGE { result, input } => {
                fix(result);
                fix(input);
            }
            IROp::Shift {
                result,
                operand,
                amount,
                ..
            } => {
                fix(result);
                fix(operand);
                amount.repoint(var_old, var_new);
            }
            IROp::Alu {
                result, lhs, rhs, ..
            } => {
                fix_opt(result);
                fix(lhs);
                rhs.repoint(var_old, var_new);
            }
            IROp::Mov { result, source, .. } | IROp::Mvn { result, source, .. } => {
                fix(result);
                source.repoint(var_old, var_new);
            }
            IROp::Multiply {
                result_hi,
                result_lo,
                lhs,
                rhs,
                ..
            } => {
                fix_opt(result_hi);
                fix(result_lo);
                fix(lhs);
                fix(rhs);
            }
            IROp::Add64 {
                result_hi,
                result_lo,
                lhs_hi,
                lhs_lo,
                rhs_hi,
                rhs_lo,
                ..
            } => {
                fix(result_hi);
                fix(result_lo);
                fix(lhs_hi);
                fix(lhs_lo);
                fix(rhs_hi);
                fix(rhs_lo);
            }
            IROp::MemoryRead {
                result, address, ..
            } => {
                fix(result);
                address.repoint(var_old, var_new);
            }
            IROp::MemoryWrite {
                source, address, ..
            } => {
                source.repoint(var_old, var_new);
                address.repoint(var_old, var_new);
            }
            IROp::Flush {
                address_out,
                address_in,
                cpsr_in,
            } => {
                fix(address_out);
                fix(address_in);
                fix(cpsr_in);
            }
            IROp::FlushExchange {
                address_out,
                cpsr_out,
                address_in,
                cpsr_in,
            } => {
                fix(address_out);
                fix(cpsr_out);
                fix(address_in);
                fix(cpsr_in);
            }
            IROp::Clz { result, operand } => {
                fix(result);
                fix(operand);
            }
            IROp::QAdd { result, lhs, rhs }
            | IROp::QSub { result, lhs, rhs }
            | IROp::Parallel {
                result, lhs, rhs, ..
            } => {
                fix(result);
                fix(lhs);
                fix(rhs);
            }
        }
    }

    /// Replace operand reads of `var` with `constant` where the
    /// opcode accepts an immediate in that position. Shift amounts
    /// never fold: shift-by-register and shift-by-immediate encode
    /// different guest semantics.
    pub fn propagate_constant(&mut self, var: VarRef, constant: IRConstant) {
        match self {
            IROp::StoreGPR { value, .. }
            | IROp::StoreSPSR { value, .. }
            | IROp::StoreCPSR { value }
            | IROp::WriteCoprocessor { value, .. } => value.propagate_constant(var, constant),
            IROp::Alu { rhs, .. } => rhs.propagate_constant(var, constant),
            IROp::Mov { source, .. } | IROp::Mvn { source, .. } => {
                source.propagate_constant(var, constant)
            }
            IROp::MemoryRead { address, .. } => address.propagate_constant(var, constant),
            IROp::MemoryWrite {
                source, address, ..
            } => {
                source.propagate_constant(var, constant);
                address.propagate_constant(var, constant);
            }
            _ => {}
        }
    }

    /// Opcodes with guest-observable effects beyond their SSA writes.
    pub fn has_side_effects(&self) -> bool {
        match self {
            IROp::StoreGPR { .. }
            | IROp::StoreSPSR { .. }
            | IROp::StoreCPSR { .. }
            | IROp::ClearCarry
            | IROp::SetCarry
            | IROp::MemoryRead { .. }
            | IROp::MemoryWrite { .. }
            | IROp::ReadCoprocessor { .. }
            | IROp::WriteCoprocessor { .. } => true,
            // The flag-setting parallel forms publish the GE vector.
            IROp::Parallel { op, .. } => op.sets_ge(),
            _ => false,
        }
    }

    /// Whether the opcode requests a host-flag rebuild.
    pub fn update_host_flags(&self) -> bool {
        match self {
            IROp::Shift {
                update_host_flags, ..
            }
            | IROp::Alu {
                update_host_flags, ..
            }
            | IROp::Mov {
                update_host_flags, ..
            }
            | IROp::Mvn {
                update_host_flags, ..
            }
            | IROp::Multiply {
                update_host_flags, ..
            }
            | IROp::Add64 {
                update_host_flags, ..
            } => *update_host_flags,
            _ => false,
        }
    }
}

fn flag_suffix(update_host_flags: bool) -> &'static str {
    if update_host_flags {
        "s"
    } else {
        ""
    }
}

impl std::fmt::Display for IROp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IROp::Nop => f.write_str("nop"),
            IROp::LoadGPR { reg, result } => write!(f, "ldgpr {}, {}", reg, result),
            IROp::StoreGPR { reg, value } => write!(f, "stgpr {}, {}", reg, value),
            IROp::LoadSPSR { result, mode } => write!(f, "ldspsr.{} {}", mode, result),
            IROp::StoreSPSR { value, mode } => write!(f, "stspsr.{} {}", mode, value),
            IROp::LoadCPSR { result } => write!(f, "ldcpsr {}", result),
            IROp::StoreCPSR { value } => write!(f, "stcpsr {}", value),
            IROp::ClearCarry => f.write_str("clearcarry"),
            IROp::SetCarry => f.write_str("setcarry"),
            IROp::UpdateFlags {
                result,
                input,
                flag_n,
                flag_z,
                flag_c,
                flag_v,
            } => write!(
                f,
                "update.{}{}{}{} {}, {}",
                if *flag_n { 'n' } else { '-' },
                if *flag_z { 'z' } else { '-' },
                if *flag_c { 'c' } else { '-' },
                if *flag_v { 'v' } else { '-' },
                result,
                input
            ),
            IROp::UpdateSticky { result, input } => write!(f, "update.q {}, {}", result, input),
            IROp::UpdateGE { result, input } => write!(f, "update.ge {}, {}", result, input),
            IROp::Shift {
                op,
                result,
                operand,
                amount,
                update_host_flags,
            } => write!(
                f,
                "{}{} {}, {}, {}",
                op.name(),
                flag_suffix(*update_host_flags),
                result,
                operand,
                amount
            ),
            IROp::Alu {
                op,
                result,
                lhs,
                rhs,
                update_host_flags,
            } => {
                write!(f, "{}{} ", op.name(), flag_suffix(*update_host_flags))?;
                match result {
                    Some(result) => write!(f, "{}, ", result)?,
                    None => f.write_str("(null), ")?,
                }
                write!(f, "{}, {}", lhs, rhs)
            }
            IROp::Mov {
                result,
                source,
                update_host_flags,
            } => write!(
                f,
                "mov{} {}, {}",
                flag_suffix(*update_host_flags),
                result,
                source
            ),
            IROp::Mvn {
                result,
                source,
                update_host_flags,
            } => write!(
                f,
                "mvn{} {}, {}",
                flag_suffix(*update_host_flags),
                result,
                source
            ),
            IROp::Multiply {
                result_hi,
                result_lo,
                lhs,
                rhs,
                update_host_flags,
            } => {
                write!(f, "mul{} ", flag_suffix(*update_host_flags))?;
                match result_hi {
                    Some(hi) => write!(f, "({}, {})", hi, result_lo)?,
                    None => write!(f, "{}", result_lo)?,
                }
                write!(f, ", {}, {}", lhs, rhs)
            }
            IROp::Add64 {
                result_hi,
                result_lo,
                lhs_hi,
                lhs_lo,
                rhs_hi,
                rhs_lo,
                update_host_flags,
            } => write!(
                f,
                "add{} ({}, {}), ({}, {}), ({}, {})",
                flag_suffix(*update_host_flags),
                result_hi,
                result_lo,
                lhs_hi,
                lhs_lo,
                rhs_hi,
                rhs_lo
            ),
            IROp::MemoryRead {
                flags,
                result,
                address,
            } => {
                let size = memory_size_mnemonic(*flags);
                let rotate = if flags.contains(MemoryFlags::ROTATE) {
                    "r"
                } else {
                    ""
                };
                write!(f, "ldr.{}{} {}, [{}]", size, rotate, result, address)
            }
            IROp::MemoryWrite {
                flags,
                source,
                address,
            } => {
                let size = memory_size_mnemonic(*flags);
                write!(f, "str.{} {}, [{}]", size, source, address)
            }
            IROp::Flush {
                address_out,
                address_in,
                cpsr_in,
            } => write!(f, "flush {}, {}, {}", address_out, address_in, cpsr_in),
            IROp::FlushExchange {
                address_out,
                cpsr_out,
                address_in,
                cpsr_in,
            } => write!(
                f,
                "flushxchg {}, {}, {}, {}",
                address_out, cpsr_out, address_in, cpsr_in
            ),
            IROp::Clz { result, operand } => write!(f, "clz {}, {}", result, operand),
            IROp::QAdd { result, lhs, rhs } => write!(f, "qadd {}, {}, {}", result, lhs, rhs),
            IROp::QSub { result, lhs, rhs } => write!(f, "qsub {}, {}, {}", result, lhs, rhs),
            IROp::Parallel {
                op,
                result,
                lhs,
                rhs,
            } => write!(f, "{} {}, {}, {}", op.name(), result, lhs, rhs),
            IROp::ReadCoprocessor {
                result,
                coprocessor,
                opcode1,
                cn,
                cm,
                opcode2,
            } => write!(
                f,
                "mrc {}, cp{}, #{}, {}, {}, #{}",
                result, coprocessor, opcode1, cn, cm, opcode2
            ),
            IROp::WriteCoprocessor {
                value,
                coprocessor,
                opcode1,
                cn,
                cm,
                opcode2,
            } => write!(
                f,
                "mcr {}, cp{}, #{}, {}, {}, #{}",
                value, coprocessor, opcode1, cn, cm, opcode2
            ),
        }
    }
}

fn memory_size_mnemonic(flags: MemoryFlags) -> &'static str {
    if flags.contains(MemoryFlags::WORD) {
        "w"
    } else if flags.contains(MemoryFlags::HALF) {
        "h"
    } else {
        "b"
    }
}
