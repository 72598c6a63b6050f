//! Basic block and micro-block records.

use crate::code_buffer::CodeBuffer;
use crate::cpu::{Condition, Mode};
use crate::error::JitError;
use crate::ir::emitter::IREmitter;
use crate::state::State;

/// Block identity: the pipeline-ahead R15 and the mode/Thumb bits of
/// the CPSR, packed as `(r15 >> 1) | ((cpsr & 0x3F) << 31)`.
///
/// The low 19 bits and the remaining high bits index the two-level
/// block table; the compiled epilogue recomputes this value inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey(pub u64);

impl BlockKey {
    pub fn from_state(state: &State) -> Self {
        let r15 = state.gpr(Mode::User, crate::cpu::GPR::PC) as u64;
        let cpsr = state.cpsr().bits() as u64;
        BlockKey((r15 >> 1) | ((cpsr & 0x3F) << 31))
    }

    /// The pipeline-ahead R15 the key was formed from.
    pub fn address(self) -> u32 {
        ((self.0 & 0x7FFF_FFFF) << 1) as u32
    }

    pub fn mode(self) -> Result<Mode, JitError> {
        Mode::from_bits(((self.0 >> 31) & 0x1F) as u32)
    }

    pub fn thumb(self) -> bool {
        (self.0 >> 36) & 1 != 0
    }

    pub fn instruction_size(self) -> u32 {
        if self.thumb() {
            2
        } else {
            4
        }
    }

    /// Address of the first instruction the block translates (the key
    /// address minus the two-instruction prefetch distance).
    pub fn fetch_address(self) -> u32 {
        self.address()
            .wrapping_sub(2 * self.instruction_size())
    }
}

/// A maximal run of guest instructions sharing one condition code.
pub struct MicroBlock {
    pub condition: Condition,
    /// Guest-instruction count, for the PC advance on the skip path.
    pub length: u32,
    pub emitter: IREmitter,
}

impl MicroBlock {
    pub fn new(condition: Condition) -> Self {
        MicroBlock {
            condition,
            length: 0,
            emitter: IREmitter::new(),
        }
    }
}

type ReleaseCallback = Box<dyn FnMut(&BasicBlock)>;

/// A translated (and eventually compiled) basic block.
///
/// `repr(C)` with `entry` first: the compiled epilogue loads the
/// entry pointer straight out of this struct when tail-chaining.
#[repr(C)]
pub struct BasicBlock {
    /// Entry point of the compiled code; null until compiled.
    pub entry: *const u8,
    pub key: BlockKey,
    /// Hash of the first guest instruction word, for overwrite
    /// detection.
    pub hash: u32,
    /// Guest instruction count (the cycle charge of the block).
    pub length: u32,
    /// Whether translation baked the exception base into the code.
    pub uses_exception_base: bool,
    pub micro_blocks: Vec<MicroBlock>,
    /// Host code memory; lives until the block is released.
    pub code: Option<CodeBuffer>,
    release_callbacks: Vec<ReleaseCallback>,
}

impl BasicBlock {
    pub fn new(key: BlockKey) -> Self {
        BasicBlock {
            entry: std::ptr::null(),
            key,
            hash: 0,
            length: 0,
            uses_exception_base: false,
            micro_blocks: Vec::new(),
            code: None,
            release_callbacks: Vec::new(),
        }
    }

    pub fn register_release_callback(&mut self, callback: impl FnMut(&BasicBlock) + 'static) {
        self.release_callbacks.push(Box::new(callback));
    }

    /// Fire the release callbacks. Called exactly once by the cache
    /// right before the block is dropped.
    pub fn release(&mut self) {
        let mut callbacks = std::mem::take(&mut self.release_callbacks);
        for callback in &mut callbacks {
            callback(self);
        }
    }
}
