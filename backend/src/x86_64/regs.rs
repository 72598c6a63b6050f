//! Host register definitions and the static reservation scheme.
//!
//! Reserved for the whole block:
//!   - RAX: packed host flags (AH = `lahf` image, AL = overflow byte)
//!   - RBX: remaining-cycles counter
//!   - RCX: guest state pointer
//!   - RBP: spill frame base
//!   - XMM0: packed greater-than-or-equal flag vector

use arm_jit_core::cpu::Bus;

/// x86-64 general-purpose register numbers (ModR/M encoding order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    #[inline]
    pub const fn high_bit(self) -> bool {
        (self as u8) >= 8
    }
}

/// XMM register numbers. Only XMM0-XMM5 are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xmm(pub u8);

impl Xmm {
    #[inline]
    pub const fn low3(self) -> u8 {
        self.0 & 0x7
    }
}

/// Pointer to the guest state record, live for the whole block.
pub const STATE_REG: Reg = Reg::Rcx;
/// Remaining-cycles counter.
pub const CYCLE_REG: Reg = Reg::Rbx;
/// Spill frame base.
pub const FRAME_REG: Reg = Reg::Rbp;
/// GE flag vector.
pub const GE_XMM: Xmm = Xmm(0);

/// Allocation order for variable GPRs (allocated from the back).
pub const ALLOCATABLE_GPRS: &[Reg] = &[
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// Allocation order for variable XMM registers.
pub const ALLOCATABLE_XMMS: &[Xmm] = &[Xmm(1), Xmm(2), Xmm(3), Xmm(4), Xmm(5)];

/// System V argument registers for the slow-path callouts.
pub const ARG0: Reg = Reg::Rdi;
pub const ARG1: Reg = Reg::Rsi;
pub const ARG2: Reg = Reg::Rdx;
pub const ARG3: Reg = Reg::Rcx;

/// Caller-saved registers preserved around slow-path callouts
/// (RAX holds the packed flags and is pushed separately first).
pub const SLOW_PATH_SAVED: &[Reg] = &[Reg::Rax, Reg::Rdx, Reg::R8, Reg::R9, Reg::R10, Reg::R11];
pub const SLOW_PATH_SAVED_SYSV: &[Reg] = &[Reg::Rsi, Reg::Rdi];

/// Number of 32-bit spill slots in the stack frame.
pub const SPILL_AREA_SIZE: usize = 32;

/// Frame displacement: one pointer-sized pad plus the spill area.
pub const STACK_DISPLACEMENT: u32 = 8 + (SPILL_AREA_SIZE as u32) * 4;

/// Bus code passed to the slow-path memory callbacks.
pub const DATA_BUS: u32 = Bus::Data as u32;
