//! Banked guest register file.
//!
//! The struct layout is fixed (`repr(C)`) so that compiled code can
//! address registers as byte offsets from the state base pointer. The
//! mode × register → offset lookup table is built once and never
//! mutated afterwards.

use std::sync::OnceLock;

use memoffset::offset_of;

use crate::cpu::{Mode, StatusRegister, GPR, MODES};
use crate::error::JitError;

/// Registers visible in every processor mode: R0-R7, R15 and CPSR.
#[repr(C)]
#[derive(Clone)]
pub struct CommonBank {
    pub reg: [u32; 8],
    pub r15: u32,
    pub cpsr: StatusRegister,
}

/// R8-R14 plus SPSR. One instance for FIQ, one shared by all other
/// modes (whose R8-R12 alias the shared bank).
#[repr(C)]
#[derive(Clone)]
pub struct WideBank {
    pub reg: [u32; 7],
    pub spsr: StatusRegister,
}

/// R13-R14 plus SPSR for IRQ, Supervisor, Abort and Undefined modes.
#[repr(C)]
#[derive(Clone)]
pub struct NarrowBank {
    pub reg: [u32; 2],
    pub spsr: StatusRegister,
}

/// Complete guest CPU state.
#[repr(C)]
#[derive(Clone)]
pub struct State {
    common: CommonBank,
    fiq: WideBank,
    sys: WideBank,
    irq: NarrowBank,
    svc: NarrowBank,
    abt: NarrowBank,
    und: NarrowBank,
}

const NO_OFFSET: u32 = u32::MAX;

/// Byte offsets from the state base, per mode code (0..0x20) and
/// register index. `NO_OFFSET` marks invalid combinations.
struct OffsetTable {
    gpr: [[u32; 16]; 0x20],
    spsr: [u32; 0x20],
    cpsr: u32,
}

fn offset_table() -> &'static OffsetTable {
    static TABLE: OnceLock<OffsetTable> = OnceLock::new();
    TABLE.get_or_init(build_offset_table)
}

fn build_offset_table() -> OffsetTable {
    let common = offset_of!(State, common);
    let fiq = offset_of!(State, fiq);
    let sys = offset_of!(State, sys);
    let irq = offset_of!(State, irq);
    let svc = offset_of!(State, svc);
    let abt = offset_of!(State, abt);
    let und = offset_of!(State, und);

    let wide_reg = |bank: usize, i: usize| (bank + offset_of!(WideBank, reg) + i * 4) as u32;
    let narrow_reg = |bank: usize, i: usize| (bank + offset_of!(NarrowBank, reg) + i * 4) as u32;

    let mut table = OffsetTable {
        gpr: [[NO_OFFSET; 16]; 0x20],
        spsr: [NO_OFFSET; 0x20],
        cpsr: (common + offset_of!(CommonBank, cpsr)) as u32,
    };

    for mode in MODES {
        let row = &mut table.gpr[mode as usize];
        for i in 0..8 {
            row[i] = (common + offset_of!(CommonBank, reg) + i * 4) as u32;
        }
        let source = if mode == Mode::Fiq { fiq } else { sys };
        for i in 8..13 {
            row[i] = wide_reg(source, i - 8);
        }
        row[15] = (common + offset_of!(CommonBank, r15)) as u32;
    }

    for i in 0..2 {
        table.gpr[Mode::User as usize][13 + i] = wide_reg(sys, 5 + i);
        table.gpr[Mode::System as usize][13 + i] = wide_reg(sys, 5 + i);
        table.gpr[Mode::Fiq as usize][13 + i] = wide_reg(fiq, 5 + i);
        table.gpr[Mode::Irq as usize][13 + i] = narrow_reg(irq, i);
        table.gpr[Mode::Supervisor as usize][13 + i] = narrow_reg(svc, i);
        table.gpr[Mode::Abort as usize][13 + i] = narrow_reg(abt, i);
        table.gpr[Mode::Undefined as usize][13 + i] = narrow_reg(und, i);
    }

    table.spsr[Mode::Fiq as usize] = (fiq + offset_of!(WideBank, spsr)) as u32;
    table.spsr[Mode::Irq as usize] = (irq + offset_of!(NarrowBank, spsr)) as u32;
    table.spsr[Mode::Supervisor as usize] = (svc + offset_of!(NarrowBank, spsr)) as u32;
    table.spsr[Mode::Abort as usize] = (abt + offset_of!(NarrowBank, spsr)) as u32;
    table.spsr[Mode::Undefined as usize] = (und + offset_of!(NarrowBank, spsr)) as u32;

    table
}

impl State {
    pub fn new() -> Self {
        let mut state = State {
            common: CommonBank {
                reg: [0; 8],
                r15: 0,
                cpsr: StatusRegister::default(),
            },
            fiq: WideBank { reg: [0; 7], spsr: StatusRegister(0) },
            sys: WideBank { reg: [0; 7], spsr: StatusRegister(0) },
            irq: NarrowBank { reg: [0; 2], spsr: StatusRegister(0) },
            svc: NarrowBank { reg: [0; 2], spsr: StatusRegister(0) },
            abt: NarrowBank { reg: [0; 2], spsr: StatusRegister(0) },
            und: NarrowBank { reg: [0; 2], spsr: StatusRegister(0) },
        };
        state.reset();
        state
    }

    pub fn reset(&mut self) {
        self.common = CommonBank {
            reg: [0; 8],
            r15: 0,
            cpsr: StatusRegister::default(),
        };
        self.fiq = WideBank { reg: [0; 7], spsr: StatusRegister(0) };
        self.sys = WideBank { reg: [0; 7], spsr: StatusRegister(0) };
        self.irq = NarrowBank { reg: [0; 2], spsr: StatusRegister(0) };
        self.svc = NarrowBank { reg: [0; 2], spsr: StatusRegister(0) };
        self.abt = NarrowBank { reg: [0; 2], spsr: StatusRegister(0) };
        self.und = NarrowBank { reg: [0; 2], spsr: StatusRegister(0) };
    }

    pub fn base_ptr(&self) -> *const u8 {
        self as *const State as *const u8
    }

    /// Byte offset of a general-purpose register for a given mode.
    pub fn gpr_offset(mode: Mode, reg: GPR) -> u32 {
        offset_table().gpr[mode as usize][reg.index()]
    }

    /// Byte offset of the current status register.
    pub fn cpsr_offset() -> u32 {
        offset_table().cpsr
    }

    /// Byte offset of the saved status register for a privileged mode.
    /// User and System modes have none.
    pub fn spsr_offset(mode: Mode) -> Result<u32, JitError> {
        let offset = offset_table().spsr[mode as usize];
        if offset == NO_OFFSET {
            return Err(JitError::invalid_mode(mode));
        }
        Ok(offset)
    }

    pub fn gpr(&self, mode: Mode, reg: GPR) -> u32 {
        let offset = Self::gpr_offset(mode, reg);
        // SAFETY: the offset table only yields in-bounds u32 fields.
        unsafe { *(self.base_ptr().add(offset as usize) as *const u32) }
    }

    pub fn set_gpr(&mut self, mode: Mode, reg: GPR, value: u32) {
        let offset = Self::gpr_offset(mode, reg);
        // SAFETY: see `gpr`.
        unsafe {
            *(self.base_ptr().add(offset as usize) as *mut u32) = value;
        }
    }

    pub fn cpsr(&self) -> StatusRegister {
        self.common.cpsr
    }

    pub fn cpsr_mut(&mut self) -> &mut StatusRegister {
        &mut self.common.cpsr
    }

    pub fn spsr(&self, mode: Mode) -> Result<StatusRegister, JitError> {
        let offset = Self::spsr_offset(mode)?;
        // SAFETY: see `gpr`.
        Ok(unsafe { *(self.base_ptr().add(offset as usize) as *const StatusRegister) })
    }

    pub fn set_spsr(&mut self, mode: Mode, value: StatusRegister) -> Result<(), JitError> {
        let offset = Self::spsr_offset(mode)?;
        // SAFETY: see `gpr`.
        unsafe {
            *(self.base_ptr().add(offset as usize) as *mut StatusRegister) = value;
        }
        Ok(())
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
