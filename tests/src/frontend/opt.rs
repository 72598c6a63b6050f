use arm_jit_core::{
    AluOp, AnyRef, GuestReg, IRConstant, IRDataType, IREmitter, IROp, Mode, ShiftOp, VarRef, GPR,
};
use arm_jit_frontend::opt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::translate::translate_arm;
use crate::common::{asm, RAM_BASE};

#[test]
fn constant_folding_collapses_to_a_single_store() {
    // MOV r1, #5; MOV r2, #7; ADD r0, r1, r2.
    let mut block = translate_arm(&[
        asm::mov_imm(1, 5),
        asm::mov_imm(2, 7),
        asm::add_reg(0, 1, 2),
        asm::b_self(RAM_BASE + 12),
    ]);

    for mb in &mut block.micro_blocks {
        opt::optimize(&mut mb.emitter);
    }

    let code = block.micro_blocks[0].emitter.code();
    // Everything folds: no ALU, shifter or move survives.
    assert!(!code.iter().any(|op| matches!(
        op,
        IROp::Alu { .. } | IROp::Shift { .. } | IROp::Mov { .. } | IROp::LoadGPR { .. }
    )));
    // The destination store carries the folded constant.
    assert!(code.iter().any(|op| matches!(
        op,
        IROp::StoreGPR {
            reg: GuestReg { reg: GPR::R0, .. },
            value: AnyRef::Const(IRConstant { value: 12, .. }),
        }
    )));
}

#[test]
fn covered_flag_update_is_elided() {
    // ANDS r3, r0, #1; ADDS r4, r1, r2; ADDS r5, r4, #1.
    let mut block = translate_arm(&[
        asm::ands_imm(3, 0, 1),
        asm::adds_reg(4, 1, 2),
        asm::adds_imm(5, 4, 1),
        asm::b_self(RAM_BASE + 12),
    ]);

    for mb in &mut block.micro_blocks {
        opt::optimize(&mut mb.emitter);
    }

    let code = block.micro_blocks[0].emitter.code();
    // The AND's flag production is overwritten before any read.
    let and_op = code
        .iter()
        .find(|op| matches!(op, IROp::Alu { op: AluOp::And, .. }))
        .expect("AND survives (its result is stored)");
    assert!(!and_op.update_host_flags());

    // The final flag producer keeps its update.
    let live_adds = code
        .iter()
        .filter(|op| matches!(op, IROp::Alu { op: AluOp::Add, .. }) && op.update_host_flags())
        .count();
    assert!(live_adds >= 1);
}

#[test]
fn superseded_context_store_is_removed() {
    // Two stores to r0 in one micro-block; the first must go.
    let mut block = translate_arm(&[
        asm::mov_imm(0, 1),
        asm::mov_imm(0, 2),
        asm::b_self(RAM_BASE + 8),
    ]);
    for mb in &mut block.micro_blocks {
        opt::optimize(&mut mb.emitter);
    }
    let stores: Vec<u32> = block.micro_blocks[0]
        .emitter
        .code()
        .iter()
        .filter_map(|op| match op {
            IROp::StoreGPR {
                reg: GuestReg { reg: GPR::R0, .. },
                value: AnyRef::Const(constant),
            } => Some(constant.value),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![2]);
}

// -- Constant propagation fidelity --
//
// Random micro-blocks of pure ALU and shifter ops must compute the
// same guest registers before and after optimization.

#[derive(Default)]
struct Evaluator {
    vars: Vec<u32>,
}

impl Evaluator {
    fn resolve(&self, value: AnyRef) -> u32 {
        match value {
            AnyRef::Var(var) => self.vars[var.id()],
            AnyRef::Const(constant) => constant.value,
            AnyRef::Null => panic!("null operand"),
        }
    }

    fn run(&mut self, emitter: &IREmitter, regs: &mut [u32; 16]) {
        self.vars = vec![0; emitter.vars().len()];
        for op in emitter.code() {
            match op {
                IROp::Nop => {}
                IROp::LoadGPR { reg, result } => {
                    self.vars[result.id()] = regs[reg.reg.index()];
                }
                IROp::StoreGPR { reg, value } => {
                    regs[reg.reg.index()] = self.resolve(*value);
                }
                IROp::Mov { result, source, .. } => {
                    self.vars[result.id()] = self.resolve(*source);
                }
                IROp::Mvn { result, source, .. } => {
                    self.vars[result.id()] = !self.resolve(*source);
                }
                IROp::Clz { result, operand } => {
                    self.vars[result.id()] = self.vars[operand.id()].leading_zeros();
                }
                IROp::Shift {
                    op,
                    result,
                    operand,
                    amount,
                    ..
                } => {
                    let value = self.vars[operand.id()];
                    let amount = self.resolve(*amount);
                    self.vars[result.id()] = eval_shift(*op, value, amount);
                }
                IROp::Alu {
                    op,
                    result,
                    lhs,
                    rhs,
                    ..
                } => {
                    let lhs = self.vars[lhs.id()];
                    let rhs = self.resolve(*rhs);
                    let value = match op {
                        AluOp::And => lhs & rhs,
                        AluOp::Bic => lhs & !rhs,
                        AluOp::Eor => lhs ^ rhs,
                        AluOp::Orr => lhs | rhs,
                        AluOp::Add => lhs.wrapping_add(rhs),
                        AluOp::Sub => lhs.wrapping_sub(rhs),
                        AluOp::Rsb => rhs.wrapping_sub(lhs),
                        _ => panic!("carry op in pure block"),
                    };
                    if let Some(result) = result {
                        self.vars[result.id()] = value;
                    }
                }
                other => panic!("unexpected op in pure block: {other}"),
            }
        }
    }
}

/// Immediate-encoding shifter semantics (what the backend emits).
fn eval_shift(op: ShiftOp, value: u32, amount: u32) -> u32 {
    match op {
        ShiftOp::Lsl => {
            if amount >= 32 {
                0
            } else {
                value << amount
            }
        }
        ShiftOp::Lsr => {
            if amount == 0 || amount >= 32 {
                0
            } else {
                value >> amount
            }
        }
        ShiftOp::Asr => {
            let amount = if amount == 0 || amount >= 32 {
                31
            } else {
                amount
            };
            ((value as i32) >> amount) as u32
        }
        ShiftOp::Ror => value.rotate_right(amount & 31),
    }
}

fn random_pure_block(rng: &mut StdRng) -> IREmitter {
    let mut emitter = IREmitter::new();
    let mode = Mode::System;

    let mut pool: Vec<VarRef> = Vec::new();
    for index in 0..8 {
        let var = emitter.create_var(IRDataType::UInt32, None);
        emitter.load_gpr(GuestReg::new(GPR::from_index(index), mode), var);
        pool.push(var);
    }

    for _ in 0..24 {
        let result = emitter.create_var(IRDataType::UInt32, None);
        let lhs = pool[rng.gen_range(0..pool.len())];
        match rng.gen_range(0..4) {
            0 => {
                let op = [ShiftOp::Lsl, ShiftOp::Lsr, ShiftOp::Asr, ShiftOp::Ror]
                    [rng.gen_range(0..4)];
                // ROR #0 is RRX; keep the generator out of that case.
                let min = if op == ShiftOp::Ror { 1 } else { 0 };
                let amount = rng.gen_range(min..32u32);
                emitter
                    .shift(op, result, lhs, AnyRef::from(amount), false)
                    .unwrap();
            }
            1 => {
                emitter.mov(result, AnyRef::from(rng.gen::<u32>()), false);
            }
            2 => {
                let op = [
                    AluOp::And,
                    AluOp::Bic,
                    AluOp::Eor,
                    AluOp::Orr,
                    AluOp::Add,
                    AluOp::Sub,
                    AluOp::Rsb,
                ][rng.gen_range(0..7)];
                let rhs: AnyRef = if rng.gen_bool(0.5) {
                    AnyRef::from(rng.gen::<u32>())
                } else {
                    AnyRef::Var(pool[rng.gen_range(0..pool.len())])
                };
                emitter.alu(op, Some(result), lhs, rhs, false).unwrap();
            }
            _ => {
                let source: AnyRef = AnyRef::Var(pool[rng.gen_range(0..pool.len())]);
                emitter.mvn(result, source, false);
            }
        }
        pool.push(result);
    }

    for index in 0..8 {
        let var = pool[pool.len() - 1 - index];
        emitter
            .store_gpr(GuestReg::new(GPR::from_index(index as u32), mode), var.into())
            .unwrap();
    }
    emitter
}

#[test]
fn constant_propagation_preserves_register_results() {
    let mut rng = StdRng::seed_from_u64(0x1BADB002);
    for _ in 0..64 {
        let emitter = random_pure_block(&mut rng);
        let mut optimized = IREmitter::new();
        // Rebuild an identical emitter by replaying the op list.
        for var in emitter.vars() {
            optimized.create_var(var.data_type, var.label);
        }
        optimized.code_mut().extend(emitter.code().iter().cloned());
        opt::optimize(&mut optimized);

        let mut regs_a = [0u32; 16];
        let mut regs_b = [0u32; 16];
        for index in 0..16 {
            let value = rng.gen::<u32>();
            regs_a[index] = value;
            regs_b[index] = value;
        }

        Evaluator::default().run(&emitter, &mut regs_a);
        Evaluator::default().run(&optimized, &mut regs_b);
        assert_eq!(regs_a, regs_b, "optimized block diverged");
    }
}
