//! Dispatcher and CPU façade.
//!
//! Looks up blocks by `(PC, mode, thumb)`, recompiles on miss or on a
//! first-word hash mismatch, runs them through the backend trampoline
//! and accounts executed cycles. Interrupt acknowledgement happens
//! between blocks, never inside one.

pub mod cache;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use memoffset::offset_of;

use arm_jit_backend::x86_64::backend::{BackendParams, CoprocessorSlots, PageTableInfo};
use arm_jit_backend::X64Backend;
use arm_jit_core::{
    BasicBlock, BlockKey, Bus, Coprocessor, JitError, Memory, Mode, State, StatusRegister, GPR,
};
use arm_jit_frontend::{opt, Translator};

use cache::BasicBlockCache;

pub use arm_jit_core as core;

/// Construction parameters for the JIT.
pub struct Descriptor {
    pub memory: Box<dyn Memory>,
    pub exception_base: u32,
}

pub struct Jit {
    state: Box<State>,
    memory: Box<Box<dyn Memory>>,
    coprocessors: Box<CoprocessorSlots>,
    irq_line: Box<bool>,
    wait_for_irq: Box<bool>,
    cycles_to_run: i32,
    exception_base: u32,
    translator: Translator,
    cache: BasicBlockCache,
    backend: X64Backend,
    /// Keys of blocks that baked the exception base into their code.
    exception_block_keys: Rc<RefCell<HashSet<BlockKey>>>,
}

impl Jit {
    pub fn new(descriptor: Descriptor) -> Self {
        let state = Box::new(State::new());
        let mut memory = Box::new(descriptor.memory);
        let coprocessors: Box<CoprocessorSlots> = Box::new(std::array::from_fn(|_| None));
        let irq_line = Box::new(false);
        let wait_for_irq = Box::new(false);
        let cache = BasicBlockCache::new();

        let page_table = memory.page_table().map(|table| PageTableInfo {
            base: table.entries_ptr() as u64,
            shift: table.page_shift(),
            mask: table.page_mask(),
        });

        let params = BackendParams {
            state: &*state as *const State as *mut State,
            memory: &mut *memory as *mut Box<dyn Memory>,
            coprocessors: &*coprocessors as *const CoprocessorSlots as *mut CoprocessorSlots,
            irq_line: &*irq_line as *const bool,
            table_base: cache.table_base(),
            block_entry_offset: offset_of!(BasicBlock, entry) as u32,
            page_table,
        };
        let backend = X64Backend::new(params).expect("mmap failed");

        let mut jit = Jit {
            state,
            memory,
            coprocessors,
            irq_line,
            wait_for_irq,
            cycles_to_run: 0,
            exception_base: descriptor.exception_base,
            translator: Translator::new(descriptor.exception_base),
            cache,
            backend,
            exception_block_keys: Rc::new(RefCell::new(HashSet::new())),
        };
        jit.reset();
        jit
    }

    /// Attach a coprocessor; compiled MRC/MCR route through it.
    pub fn attach_coprocessor(&mut self, id: usize, coprocessor: Box<dyn Coprocessor>) {
        assert!(id < 16);
        self.coprocessors[id] = Some(coprocessor);
        self.cache.flush();
    }

    pub fn reset(&mut self) {
        *self.irq_line = false;
        *self.wait_for_irq = false;
        self.cycles_to_run = 0;
        self.state.reset();
        self.set_gpr(GPR::PC, self.exception_base);
        self.cache.flush();
        self.exception_block_keys.borrow_mut().clear();
    }

    pub fn irq_line(&mut self) -> &mut bool {
        &mut *self.irq_line
    }

    pub fn wait_for_irq(&mut self) -> &mut bool {
        &mut *self.wait_for_irq
    }

    pub fn exception_base(&self) -> u32 {
        self.exception_base
    }

    /// Change the exception vector base, invalidating every block
    /// that depends on the old one.
    pub fn set_exception_base(&mut self, exception_base: u32) {
        if exception_base == self.exception_base {
            return;
        }
        let keys: Vec<BlockKey> = self.exception_block_keys.borrow().iter().copied().collect();
        for key in keys {
            self.cache.set(key, None);
        }
        self.translator.set_exception_base(exception_base);
        self.exception_base = exception_base;
    }

    pub fn clear_icache(&mut self) {
        self.cache.flush();
    }

    pub fn clear_icache_range(&mut self, address_lo: u32, address_hi: u32) {
        self.cache.flush_range(address_lo, address_hi);
    }

    /// Run for (at least) the requested number of cycles; returns the
    /// number actually executed.
    pub fn run(&mut self, cycles: i32) -> Result<i32, JitError> {
        if *self.wait_for_irq && !*self.irq_line {
            return Ok(0);
        }

        self.cycles_to_run += cycles;
        let cycles_available = self.cycles_to_run;

        while self.cycles_to_run > 0 {
            if *self.irq_line {
                self.signal_irq();
            }

            let key = BlockKey::from_state(&self.state);
            let hash = self.block_hash(key);

            let needs_compile = match self.cache.get(key) {
                Some(block) => block.hash != hash,
                None => true,
            };
            if needs_compile {
                let block = self.compile(key, hash)?;
                let track_exception_base = block.uses_exception_base;
                // Install first: displacing a previous incarnation
                // fires its release callback, which untracks the key.
                self.cache.set(key, Some(block));
                if track_exception_base {
                    self.exception_block_keys.borrow_mut().insert(key);
                }
            }

            let block = self.cache.get(key).expect("block just installed");
            // SAFETY: the block was compiled against this JIT's state,
            // memory and cache pointers, all still alive.
            self.cycles_to_run = unsafe { self.backend.call(block, self.cycles_to_run) };

            if *self.wait_for_irq {
                let executed = cycles_available - self.cycles_to_run;
                self.cycles_to_run = 0;
                return Ok(executed);
            }
        }

        Ok(cycles_available - self.cycles_to_run)
    }

    fn compile(&mut self, key: BlockKey, hash: u32) -> Result<Box<BasicBlock>, JitError> {
        let mut block = Box::new(BasicBlock::new(key));
        block.hash = hash;

        self.translator.translate(&mut block, &mut **self.memory)?;

        for mb in &mut block.micro_blocks {
            opt::optimize(&mut mb.emitter);
        }

        if block.uses_exception_base {
            let keys = Rc::clone(&self.exception_block_keys);
            block.register_release_callback(move |released| {
                keys.borrow_mut().remove(&released.key);
            });
        }

        self.backend.compile(&mut block)?;
        // The IR is only needed until host emission.
        block.micro_blocks.clear();
        Ok(block)
    }

    /// Hash of the first guest instruction word, used to detect code
    /// overwrites at dispatch time.
    fn block_hash(&mut self, key: BlockKey) -> u32 {
        self.memory
            .read_word(key.fetch_address() & !3, Bus::Code)
    }

    fn signal_irq(&mut self) {
        *self.wait_for_irq = false;

        let cpsr = self.state.cpsr();
        if cpsr.irq_masked() {
            return;
        }

        self.state
            .set_spsr(Mode::Irq, cpsr)
            .expect("IRQ mode always has an SPSR");

        let return_address = if cpsr.thumb() {
            self.state.gpr(Mode::User, GPR::PC)
        } else {
            self.state.gpr(Mode::User, GPR::PC).wrapping_sub(4)
        };
        self.state.set_gpr(Mode::Irq, GPR::LR, return_address);

        let mut new_cpsr = cpsr;
        new_cpsr.set_mode(Mode::Irq);
        new_cpsr.set_thumb(false);
        new_cpsr.0 |= StatusRegister::IRQ_MASK;
        *self.state.cpsr_mut() = new_cpsr;

        // Vector fetch, with the ARM-state pipeline offset.
        self.state.set_gpr(
            Mode::User,
            GPR::PC,
            self.exception_base.wrapping_add(0x18).wrapping_add(8),
        );
    }

    // -- Register file accessors --

    fn current_mode(&self) -> Mode {
        self.state.cpsr().mode().unwrap_or(Mode::System)
    }

    pub fn gpr(&self, reg: GPR) -> u32 {
        self.gpr_mode(reg, self.current_mode())
    }

    pub fn gpr_mode(&self, reg: GPR, mode: Mode) -> u32 {
        self.state.gpr(mode, reg)
    }

    pub fn set_gpr(&mut self, reg: GPR, value: u32) {
        self.set_gpr_mode(reg, self.current_mode(), value);
    }

    /// Writing the PC also applies the pipeline offset the translator
    /// assumes of a freshly flushed state.
    pub fn set_gpr_mode(&mut self, reg: GPR, mode: Mode, value: u32) {
        self.state.set_gpr(mode, reg, value);
        if reg == GPR::PC {
            let offset = if self.state.cpsr().thumb() { 4 } else { 8 };
            self.state
                .set_gpr(mode, GPR::PC, value.wrapping_add(offset));
        }
    }

    pub fn cpsr(&self) -> StatusRegister {
        self.state.cpsr()
    }

    pub fn set_cpsr(&mut self, value: StatusRegister) {
        *self.state.cpsr_mut() = value;
    }

    pub fn spsr(&self, mode: Mode) -> Result<StatusRegister, JitError> {
        self.state.spsr(mode)
    }

    pub fn set_spsr(&mut self, mode: Mode, value: StatusRegister) -> Result<(), JitError> {
        self.state.set_spsr(mode, value)
    }
}
