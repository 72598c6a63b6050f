//! x86-64 backend: call trampoline, per-block compilation, condition
//! guards, and the cycle/IRQ epilogue with table-driven tail-chaining.

use std::io;

use arm_jit_core::{
    BasicBlock, CodeBuffer, Condition, Coprocessor, JitError, Memory, Mode, State, GPR,
};

use super::compile::compile_op;
use super::emitter::*;
use super::regalloc::RegisterAllocator;
use super::regs::*;

/// Coprocessor slots owned by the dispatcher; addressed from
/// generated code through a stable pointer.
pub type CoprocessorSlots = [Option<Box<dyn Coprocessor>>; 16];

/// Captured page-table fast path parameters.
#[derive(Debug, Clone, Copy)]
pub struct PageTableInfo {
    pub base: u64,
    pub shift: u32,
    pub mask: u32,
}

/// Stable addresses the generated code is wired against.
pub struct BackendParams {
    pub state: *mut State,
    pub memory: *mut Box<dyn Memory>,
    pub coprocessors: *mut CoprocessorSlots,
    pub irq_line: *const bool,
    /// Base of the first-level block table (entries: `*mut` second
    /// level, 8 bytes each).
    pub table_base: *const u8,
    /// Byte offset of the entry pointer inside a block record.
    pub block_entry_offset: u32,
    pub page_table: Option<PageTableInfo>,
}

/// Truth table for each (condition, flag-nibble) pair. The nibble is
/// `cpsr >> 28`: N=8, Z=4, C=2, V=1.
pub fn build_condition_table() -> Box<[[u8; 16]; 16]> {
    let mut table = Box::new([[0u8; 16]; 16]);
    for flags in 0..16usize {
        let n = flags & 8 != 0;
        let z = flags & 4 != 0;
        let c = flags & 2 != 0;
        let v = flags & 1 != 0;

        table[Condition::EQ as usize][flags] = z as u8;
        table[Condition::NE as usize][flags] = !z as u8;
        table[Condition::CS as usize][flags] = c as u8;
        table[Condition::CC as usize][flags] = !c as u8;
        table[Condition::MI as usize][flags] = n as u8;
        table[Condition::PL as usize][flags] = !n as u8;
        table[Condition::VS as usize][flags] = v as u8;
        table[Condition::VC as usize][flags] = !v as u8;
        table[Condition::HI as usize][flags] = (c && !z) as u8;
        table[Condition::LS as usize][flags] = (!c || z) as u8;
        table[Condition::GE as usize][flags] = (n == v) as u8;
        table[Condition::LT as usize][flags] = (n != v) as u8;
        table[Condition::GT as usize][flags] = (!(z || (n != v))) as u8;
        table[Condition::LE as usize][flags] = (z || (n != v)) as u8;
        table[Condition::AL as usize][flags] = 1;
        table[Condition::NV as usize][flags] = 0;
    }
    table
}

pub struct X64Backend {
    params: BackendParams,
    condition_table: Box<[[u8; 16]; 16]>,
    trampoline: CodeBuffer,
}

impl X64Backend {
    pub fn new(params: BackendParams) -> io::Result<Self> {
        let mut backend = X64Backend {
            params,
            condition_table: build_condition_table(),
            trampoline: CodeBuffer::new(256)?,
        };
        backend.emit_call_block();
        Ok(backend)
    }

    pub fn condition_table(&self) -> &[[u8; 16]; 16] {
        &self.condition_table
    }

    pub(crate) fn page_table(&self) -> Option<PageTableInfo> {
        self.params.page_table
    }

    pub(crate) fn memory_ptr(&self) -> u64 {
        self.params.memory as u64
    }

    pub(crate) fn coprocessor_ptr(&self) -> u64 {
        self.params.coprocessors as u64
    }

    /// Emit the entry trampoline: saves callee-preserved registers,
    /// sets up the reserved registers and the spill frame, rebuilds
    /// the host carry from CPSR bit 29, then calls the block.
    fn emit_call_block(&mut self) {
        let buf = &mut self.trampoline;
        let cpsr_offset = State::cpsr_offset() as i32;

        for &reg in &[Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15] {
            emit_push(buf, reg);
        }
        emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, STACK_DISPLACEMENT as i32);
        emit_mov_rr(buf, true, FRAME_REG, Reg::Rsp);

        emit_mov_rr(buf, true, Reg::R12, ARG0); // block entry
        emit_movsxd(buf, CYCLE_REG, ARG1); // requested cycles

        emit_mov_ri64(buf, STATE_REG, self.params.state as u64);
        emit_load(buf, false, Reg::Rdx, STATE_REG, cpsr_offset);
        emit_bt_ri(buf, Reg::Rdx, 29);
        emit_lahf(buf);

        emit_call_reg(buf, Reg::R12);

        emit_mov_rr(buf, true, Reg::Rax, CYCLE_REG);
        emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, STACK_DISPLACEMENT as i32);
        for &reg in [Reg::Rbx, Reg::Rbp, Reg::R12, Reg::R13, Reg::R14, Reg::R15]
            .iter()
            .rev()
        {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
    }

    /// Run a compiled block with the given cycle count; returns the
    /// cycles left over.
    ///
    /// # Safety
    /// The block must have been compiled against this backend's
    /// parameter set, and all captured pointers must still be valid.
    pub unsafe fn call(&self, block: &BasicBlock, cycles: i32) -> i32 {
        debug_assert!(!block.entry.is_null());
        let call_block: unsafe extern "C" fn(*const u8, i32) -> i32 =
            std::mem::transmute(self.trampoline.base_ptr());
        call_block(block.entry, cycles)
    }

    /// Compile a translated block into host code.
    pub fn compile(&self, block: &mut BasicBlock) -> Result<(), JitError> {
        let isize = block.key.instruction_size();
        let pc_offset = State::gpr_offset(Mode::User, GPR::PC) as i32;
        let cpsr_offset = State::cpsr_offset() as i32;

        let op_count: usize = block
            .micro_blocks
            .iter()
            .map(|mb| mb.emitter.code().len())
            .sum();
        let mut buf = CodeBuffer::new(op_count * 256 + block.micro_blocks.len() * 64 + 1024)
            .expect("mmap failed");

        for mb in &block.micro_blocks {
            let mut ra = RegisterAllocator::new(&mb.emitter);
            let mut skip_patch = None;

            // Guard: index the condition row with the flag nibble and
            // branch over the micro-block when the predicate is false.
            if mb.condition != Condition::AL {
                let row = &self.condition_table[mb.condition as usize] as *const [u8; 16];
                emit_mov_ri64(&mut buf, Reg::R8, row as u64);
                emit_load(&mut buf, false, Reg::Rdx, STATE_REG, cpsr_offset);
                emit_shift_ri(&mut buf, ShiftKind::Shr, false, Reg::Rdx, 28);
                emit_cmp_mem8_zero(&mut buf, Reg::R8, Reg::Rdx);
                skip_patch = Some(emit_jcc_forward(&mut buf, Cc::E));
            }

            for (location, op) in mb.emitter.code().iter().enumerate() {
                ra.set_location(location as i32);
                compile_op(self, &mut buf, &mut ra, &mb.emitter, op)?;
            }

            if let Some(skip) = skip_patch {
                let done = emit_jmp_forward(&mut buf);
                // Skip path: advance the PC over the micro-block.
                patch_forward(&mut buf, skip);
                emit_add_mem_imm(
                    &mut buf,
                    STATE_REG,
                    pc_offset,
                    (mb.length * isize) as i32,
                );
                patch_forward(&mut buf, done);
            }
        }

        self.emit_epilogue(&mut buf, block.length, pc_offset, cpsr_offset);

        tracing::debug!(
            key = block.key.0,
            host_bytes = buf.offset(),
            "block compiled"
        );

        block.entry = buf.base_ptr();
        block.code = Some(buf);
        Ok(())
    }

    /// Block epilogue: charge cycles, poll the interrupt line, then
    /// either chain to the next block through the two-level table or
    /// return to the dispatcher.
    fn emit_epilogue(&self, buf: &mut CodeBuffer, length: u32, pc_offset: i32, cpsr_offset: i32) {
        let mut exit_patches = Vec::new();

        emit_arith_ri(buf, ArithOp::Sub, true, CYCLE_REG, length as i32);
        exit_patches.push(emit_jcc_forward(buf, Cc::Le));

        emit_mov_ri64(buf, Reg::Rdx, self.params.irq_line as u64);
        emit_cmp_mem8_disp_zero(buf, Reg::Rdx, 0);
        exit_patches.push(emit_jcc_forward(buf, Cc::Ne));

        // Rebuild the block key from R15 and CPSR.
        emit_load(buf, false, Reg::Rdx, STATE_REG, pc_offset);
        emit_load(buf, false, Reg::Rsi, STATE_REG, cpsr_offset);
        emit_shift_ri(buf, ShiftKind::Shr, false, Reg::Rdx, 1);
        emit_arith_ri(buf, ArithOp::And, false, Reg::Rsi, 0x3F);
        emit_shift_ri(buf, ShiftKind::Shl, true, Reg::Rsi, 31);
        emit_arith_rr(buf, ArithOp::Or, true, Reg::Rdx, Reg::Rsi);

        // Split into the two table indices.
        emit_mov_rr(buf, true, Reg::Rsi, Reg::Rdx);
        emit_shift_ri(buf, ShiftKind::Shr, true, Reg::Rsi, 19);
        emit_arith_ri(buf, ArithOp::And, false, Reg::Rdx, 0x7FFFF);

        emit_mov_ri64(buf, Reg::Rdi, self.params.table_base as u64);
        emit_load_sib(buf, true, Reg::Rdi, Reg::Rdi, Reg::Rsi, 3);
        emit_test_rr(buf, true, Reg::Rdi, Reg::Rdi);
        exit_patches.push(emit_jcc_forward(buf, Cc::E));

        emit_load_sib(buf, true, Reg::Rdi, Reg::Rdi, Reg::Rdx, 3);
        emit_test_rr(buf, true, Reg::Rdi, Reg::Rdi);
        exit_patches.push(emit_jcc_forward(buf, Cc::E));

        emit_load(
            buf,
            true,
            Reg::Rdi,
            Reg::Rdi,
            self.params.block_entry_offset as i32,
        );
        emit_jmp_reg(buf, Reg::Rdi);

        for patch in exit_patches {
            patch_forward(buf, patch);
        }
        emit_ret(buf);
    }
}

// -- Slow-path callouts --
//
// The generated code holds a thin pointer to the dispatcher-owned
// `Box<dyn Memory>` slot, so virtual dispatch happens here.

fn bus_from_raw(bus: u32) -> arm_jit_core::Bus {
    match bus {
        0 => arm_jit_core::Bus::Code,
        1 => arm_jit_core::Bus::Data,
        _ => arm_jit_core::Bus::System,
    }
}

pub(crate) unsafe extern "C" fn read_byte_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
) -> u32 {
    (*memory).read_byte(address, bus_from_raw(bus)) as u32
}

pub(crate) unsafe extern "C" fn read_half_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
) -> u32 {
    (*memory).read_half(address, bus_from_raw(bus)) as u32
}

pub(crate) unsafe extern "C" fn read_word_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
) -> u32 {
    (*memory).read_word(address, bus_from_raw(bus))
}

pub(crate) unsafe extern "C" fn write_byte_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
    value: u32,
) {
    (*memory).write_byte(address, value as u8, bus_from_raw(bus));
}

pub(crate) unsafe extern "C" fn write_half_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
    value: u32,
) {
    (*memory).write_half(address, value as u16, bus_from_raw(bus));
}

pub(crate) unsafe extern "C" fn write_word_shim(
    memory: *mut Box<dyn Memory>,
    address: u32,
    bus: u32,
    value: u32,
) {
    (*memory).write_word(address, value, bus_from_raw(bus));
}

pub(crate) unsafe extern "C" fn cp_read_shim(
    table: *mut CoprocessorSlots,
    id: u32,
    packed: u32,
) -> u32 {
    match &mut (*table)[id as usize & 0xF] {
        Some(cp) => cp.read(
            (packed >> 11) & 0x7,
            (packed >> 7) & 0xF,
            (packed >> 3) & 0xF,
            packed & 0x7,
        ),
        None => 0,
    }
}

pub(crate) unsafe extern "C" fn cp_write_shim(
    table: *mut CoprocessorSlots,
    id: u32,
    packed: u32,
    value: u32,
) {
    if let Some(cp) = &mut (*table)[id as usize & 0xF] {
        cp.write(
            (packed >> 11) & 0x7,
            (packed >> 7) & 0xF,
            (packed >> 3) & 0xF,
            packed & 0x7,
            value,
        );
    }
}
