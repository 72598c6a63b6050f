use arm_jit_core::{BasicBlock, BlockKey, Condition, Memory, Mode, State, StatusRegister, GPR};
use arm_jit_frontend::Translator;

use crate::common::{asm, new_ram, ram_write_word, TestMemory, RAM_BASE};

/// Translate an ARM program placed at the RAM base.
pub fn translate_arm(words: &[u32]) -> BasicBlock {
    let ram = new_ram();
    for (index, &word) in words.iter().enumerate() {
        ram_write_word(&ram, RAM_BASE + 4 * index as u32, word);
    }
    let mut memory = TestMemory::new(ram);

    let mut state = State::new();
    *state.cpsr_mut() = StatusRegister(Mode::System as u32);
    state.set_gpr(Mode::System, GPR::PC, RAM_BASE + 8);

    let mut block = BasicBlock::new(BlockKey::from_state(&state));
    Translator::new(RAM_BASE)
        .translate(&mut block, &mut memory as &mut dyn Memory)
        .expect("translation failed");
    block
}

#[test]
fn every_variable_has_one_definition() {
    let block = translate_arm(&[
        asm::mov_imm(0, 5),
        asm::adds_reg(2, 0, 1),
        asm::ldr_imm(3, 0, 0),
        asm::str_imm(3, 1, 4),
        asm::b_self(RAM_BASE + 16),
    ]);

    for mb in &block.micro_blocks {
        for var in mb.emitter.vars() {
            let var_ref = arm_jit_core::VarRef(var.id);
            let defs = mb
                .emitter
                .code()
                .iter()
                .filter(|op| op.writes(var_ref))
                .count();
            let reads = mb
                .emitter
                .code()
                .iter()
                .filter(|op| op.reads(var_ref))
                .count();
            assert!(defs <= 1, "v{} defined {} times", var.id, defs);
            if reads > 0 {
                assert_eq!(defs, 1, "v{} read without a definition", var.id);
            }
        }
    }
}

#[test]
fn condition_runs_form_micro_blocks() {
    let block = translate_arm(&[
        asm::movs_imm(0, 0),
        asm::with_cond(0, asm::mov_imm(1, 1)),
        asm::with_cond(0, asm::mov_imm(2, 2)),
        asm::with_cond(1, asm::mov_imm(3, 3)),
        asm::b_self(RAM_BASE + 16),
    ]);

    let conditions: Vec<(Condition, u32)> = block
        .micro_blocks
        .iter()
        .map(|mb| (mb.condition, mb.length))
        .collect();
    assert_eq!(
        conditions,
        vec![
            (Condition::AL, 1),
            (Condition::EQ, 2),
            (Condition::NE, 1),
            (Condition::AL, 1),
        ]
    );
    assert_eq!(block.length, 5);
}

#[test]
fn branch_ends_the_block() {
    let block = translate_arm(&[
        asm::mov_imm(0, 1),
        asm::b(RAM_BASE + 4, RAM_BASE + 0x40),
        // Unreachable; must not be translated.
        asm::mov_imm(0, 2),
    ]);
    assert_eq!(block.length, 2);
}

#[test]
fn software_interrupt_marks_exception_base_use() {
    let block = translate_arm(&[asm::swi(0)]);
    assert!(block.uses_exception_base);

    let block = translate_arm(&[asm::mov_imm(0, 1), asm::b_self(RAM_BASE + 4)]);
    assert!(!block.uses_exception_base);
}

#[test]
fn invalid_mode_in_key_is_rejected() {
    let ram = new_ram();
    let mut memory = TestMemory::new(ram);
    let mut state = State::new();
    *state.cpsr_mut() = StatusRegister(0x03); // undefined mode code
    state.set_gpr(Mode::System, GPR::PC, RAM_BASE + 8);
    let mut block = BasicBlock::new(BlockKey::from_state(&state));
    let result = Translator::new(RAM_BASE).translate(&mut block, &mut memory as &mut dyn Memory);
    assert!(result.is_err());
}
