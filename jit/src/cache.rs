//! Two-level basic-block cache.
//!
//! The first level is indexed by the high bits of the block key, the
//! second by the low 19 bits. Entries are owning pointers; compiled
//! code walks the same arrays when tail-chaining, so the tables must
//! never move while blocks execute.

use arm_jit_core::{BasicBlock, BlockKey};

const L2_BITS: u32 = 19;
const L2_SIZE: usize = 1 << L2_BITS;
/// Keys are 37 bits wide, leaving 18 for the first level.
const L1_SIZE: usize = 1 << 18;

pub struct BasicBlockCache {
    l1: Box<[*mut *mut BasicBlock]>,
}

impl BasicBlockCache {
    pub fn new() -> Self {
        BasicBlockCache {
            l1: vec![std::ptr::null_mut(); L1_SIZE].into_boxed_slice(),
        }
    }

    /// Base of the first-level table, for the compiled epilogue.
    pub fn table_base(&self) -> *const u8 {
        self.l1.as_ptr() as *const u8
    }

    fn split(key: BlockKey) -> (usize, usize) {
        ((key.0 >> L2_BITS) as usize, (key.0 as usize) & (L2_SIZE - 1))
    }

    pub fn get(&self, key: BlockKey) -> Option<&BasicBlock> {
        let (hi, lo) = Self::split(key);
        let l2 = self.l1[hi];
        if l2.is_null() {
            return None;
        }
        // SAFETY: populated second-level tables have L2_SIZE slots;
        // non-null slots point at live, owned blocks.
        unsafe { (*l2.add(lo)).as_ref() }
    }

    /// Install (or remove, with `None`) the block for a key. A
    /// displaced block is released and freed.
    pub fn set(&mut self, key: BlockKey, block: Option<Box<BasicBlock>>) {
        let (hi, lo) = Self::split(key);
        if self.l1[hi].is_null() {
            if block.is_none() {
                return;
            }
            let table: Box<[*mut BasicBlock]> =
                vec![std::ptr::null_mut(); L2_SIZE].into_boxed_slice();
            self.l1[hi] = Box::into_raw(table) as *mut *mut BasicBlock;
        }
        let l2 = self.l1[hi];
        // SAFETY: slot index is below L2_SIZE by construction.
        unsafe {
            let slot = l2.add(lo);
            release_slot(slot);
            *slot = match block {
                Some(block) => Box::into_raw(block),
                None => std::ptr::null_mut(),
            };
        }
    }

    /// Drop every cached block.
    pub fn flush(&mut self) {
        tracing::debug!("full block cache flush");
        for entry in self.l1.iter_mut() {
            let l2 = *entry;
            if l2.is_null() {
                continue;
            }
            // SAFETY: reconstruct the boxed slice allocated in `set`.
            unsafe {
                for lo in 0..L2_SIZE {
                    release_slot(l2.add(lo));
                }
                drop(Box::from_raw(std::slice::from_raw_parts_mut(l2, L2_SIZE)));
            }
            *entry = std::ptr::null_mut();
        }
    }

    /// Drop every block whose guest code overlaps `[lo, hi)`.
    pub fn flush_range(&mut self, lo: u32, hi: u32) {
        tracing::debug!(lo, hi, "range block cache flush");
        for entry in self.l1.iter() {
            let l2 = *entry;
            if l2.is_null() {
                continue;
            }
            for index in 0..L2_SIZE {
                // SAFETY: see `get`.
                unsafe {
                    let slot = l2.add(index);
                    let Some(block) = (*slot).as_ref() else {
                        continue;
                    };
                    let start = block.key.fetch_address();
                    let end =
                        start.wrapping_add(block.length * block.key.instruction_size());
                    if start < hi && end > lo {
                        release_slot(slot);
                        *slot = std::ptr::null_mut();
                    }
                }
            }
        }
    }
}

/// Release and free the block a slot points at, if any.
///
/// # Safety
/// `slot` must be a valid second-level slot whose non-null value is
/// an owning pointer produced by `Box::into_raw`.
unsafe fn release_slot(slot: *mut *mut BasicBlock) {
    let old = *slot;
    if !old.is_null() {
        let mut block = Box::from_raw(old);
        block.release();
        *slot = std::ptr::null_mut();
    }
}

impl Default for BasicBlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BasicBlockCache {
    fn drop(&mut self) {
        self.flush();
    }
}
