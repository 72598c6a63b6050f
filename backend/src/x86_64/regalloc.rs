//! Linear-scan register allocator with a dual GPR/XMM bank and a
//! 32-slot spill area.
//!
//! Invariant: between its definition and last use, a variable's
//! current value lives in exactly one of a host GPR, a host XMM
//! register, or a spill slot. Lifetimes are precomputed as the last
//! opcode index that reads or writes each variable; registers are
//! released as the compiler advances past that point.

use arm_jit_core::{CodeBuffer, IREmitter, JitError, VarRef};

use super::emitter::{emit_load, emit_movq_gpr_xmm, emit_movq_xmm_gpr, emit_store};
use super::regs::{Reg, Xmm, ALLOCATABLE_GPRS, ALLOCATABLE_XMMS, FRAME_REG, SPILL_AREA_SIZE};

pub struct RegisterAllocator<'a> {
    emitter: &'a IREmitter,

    free_gprs: Vec<Reg>,
    free_xmms: Vec<Xmm>,

    var_to_gpr: Vec<Option<Reg>>,
    var_to_xmm: Vec<Option<Xmm>>,
    var_to_spill_slot: Vec<Option<usize>>,
    last_use: Vec<i32>,

    spill_used: [bool; SPILL_AREA_SIZE],

    scratch_gprs: Vec<Reg>,
    scratch_xmms: Vec<Xmm>,

    location: i32,
}

impl<'a> RegisterAllocator<'a> {
    pub fn new(emitter: &'a IREmitter) -> Self {
        let var_count = emitter.vars().len();
        let mut allocator = RegisterAllocator {
            emitter,
            free_gprs: ALLOCATABLE_GPRS.to_vec(),
            free_xmms: ALLOCATABLE_XMMS.to_vec(),
            var_to_gpr: vec![None; var_count],
            var_to_xmm: vec![None; var_count],
            var_to_spill_slot: vec![None; var_count],
            last_use: vec![-1; var_count],
            spill_used: [false; SPILL_AREA_SIZE],
            scratch_gprs: Vec::new(),
            scratch_xmms: Vec::new(),
            location: 0,
        };
        allocator.evaluate_lifetimes();
        allocator
    }

    fn evaluate_lifetimes(&mut self) {
        for var in self.emitter.vars() {
            let var_ref = VarRef(var.id);
            let mut last = -1;
            for (location, op) in self.emitter.code().iter().enumerate() {
                if op.reads(var_ref) || op.writes(var_ref) {
                    last = location as i32;
                }
            }
            self.last_use[var.id as usize] = last;
        }
    }

    /// Advance to the opcode at `location`: release registers bound
    /// to dead variables and scratches taken by the previous opcode.
    pub fn set_location(&mut self, location: i32) {
        self.location = location;
        self.release_dead_variables();
        self.release_scratch_registers();
    }

    fn release_dead_variables(&mut self) {
        for id in 0..self.last_use.len() {
            if self.location > self.last_use[id] {
                if let Some(reg) = self.var_to_gpr[id].take() {
                    self.free_gprs.push(reg);
                }
                if let Some(xmm) = self.var_to_xmm[id].take() {
                    self.free_xmms.push(xmm);
                }
                if let Some(slot) = self.var_to_spill_slot[id].take() {
                    self.spill_used[slot] = false;
                }
            }
        }
    }

    fn release_scratch_registers(&mut self) {
        self.free_gprs.append(&mut self.scratch_gprs);
        self.free_xmms.append(&mut self.scratch_xmms);
    }

    /// Host GPR currently bound to `var`, allocating (and reloading
    /// from a spill slot or XMM bank) if necessary.
    pub fn get_gpr(&mut self, buf: &mut CodeBuffer, var: VarRef) -> Result<Reg, JitError> {
        let id = var.id();
        if let Some(reg) = self.var_to_gpr[id] {
            return Ok(reg);
        }

        let reg = self.find_free_gpr(buf)?;

        if let Some(slot) = self.var_to_spill_slot[id].take() {
            emit_load(buf, false, reg, FRAME_REG, (slot * 4) as i32);
            self.spill_used[slot] = false;
        } else if let Some(xmm) = self.var_to_xmm[id].take() {
            emit_movq_gpr_xmm(buf, reg, xmm);
            self.free_xmms.push(xmm);
        }

        self.var_to_gpr[id] = Some(reg);
        Ok(reg)
    }

    /// Host XMM register bound to `var`; demotes a GPR binding.
    pub fn get_xmm(&mut self, buf: &mut CodeBuffer, var: VarRef) -> Result<Xmm, JitError> {
        let id = var.id();
        if let Some(xmm) = self.var_to_xmm[id] {
            return Ok(xmm);
        }

        let xmm = self.find_free_xmm()?;

        if let Some(reg) = self.var_to_gpr[id].take() {
            emit_movq_xmm_gpr(buf, xmm, reg);
            self.free_gprs.push(reg);
        } else if let Some(slot) = self.var_to_spill_slot[id].take() {
            // Spill reloads go through a GPR.
            let reg = self.find_free_gpr(buf)?;
            emit_load(buf, false, reg, FRAME_REG, (slot * 4) as i32);
            self.spill_used[slot] = false;
            emit_movq_xmm_gpr(buf, xmm, reg);
            self.free_gprs.push(reg);
        }

        self.var_to_xmm[id] = Some(xmm);
        Ok(xmm)
    }

    /// Scratch GPR, released at the next opcode boundary.
    pub fn scratch_gpr(&mut self, buf: &mut CodeBuffer) -> Result<Reg, JitError> {
        let reg = self.find_free_gpr(buf)?;
        self.scratch_gprs.push(reg);
        Ok(reg)
    }

    /// Scratch XMM register, released at the next opcode boundary.
    pub fn scratch_xmm(&mut self) -> Result<Xmm, JitError> {
        let xmm = self.find_free_xmm()?;
        self.scratch_xmms.push(xmm);
        Ok(xmm)
    }

    /// If `var_old` dies at the current opcode, hand its GPR to
    /// `var_new` without a move. The caller must not read `var_old`
    /// after writing `var_new`.
    pub fn release_and_reuse_gpr(&mut self, var_old: VarRef, var_new: VarRef) {
        if self.var_to_gpr[var_new.id()].is_some() {
            return;
        }
        if self.last_use[var_old.id()] != self.location {
            return;
        }
        if let Some(reg) = self.var_to_gpr[var_old.id()].take() {
            self.var_to_gpr[var_new.id()] = Some(reg);
        }
    }

    pub fn is_gpr_free(&self, reg: Reg) -> bool {
        self.free_gprs.contains(&reg)
    }

    fn find_free_gpr(&mut self, buf: &mut CodeBuffer) -> Result<Reg, JitError> {
        if let Some(reg) = self.free_gprs.pop() {
            return Ok(reg);
        }

        // No free register: spill a live variable that the current
        // opcode does not touch.
        let current_op = &self.emitter.code()[self.location as usize];
        for var in self.emitter.vars() {
            let id = var.id as usize;
            let Some(reg) = self.var_to_gpr[id] else {
                continue;
            };
            let var_ref = VarRef(var.id);
            if current_op.reads(var_ref) || current_op.writes(var_ref) {
                continue;
            }
            let Some(slot) = self.spill_used.iter().position(|used| !used) else {
                break;
            };
            emit_store(buf, false, reg, FRAME_REG, (slot * 4) as i32);
            self.spill_used[slot] = true;
            self.var_to_spill_slot[id] = Some(slot);
            self.var_to_gpr[id] = None;
            return Ok(reg);
        }

        Err(JitError::OutOfRegisters)
    }

    fn find_free_xmm(&mut self) -> Result<Xmm, JitError> {
        self.free_xmms.pop().ok_or(JitError::OutOfRegisters)
    }
}
