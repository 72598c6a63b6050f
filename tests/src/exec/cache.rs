//! Block cache behavior: hash-based recompilation and range flushes.

use arm_jit_core::GPR;

use crate::common::{asm, TestBed, RAM_BASE};

#[test]
fn overwriting_the_first_word_forces_recompilation() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[asm::mov_imm(0, 1), asm::b_self(RAM_BASE + 4)],
    );
    bed.run_at(RAM_BASE, 2);
    assert_eq!(bed.jit.gpr(GPR::R0), 1);

    // Overwrite the first instruction word; the stored hash no
    // longer matches and the next dispatch recompiles.
    bed.write_word(RAM_BASE, asm::mov_imm(0, 9));
    bed.run_at(RAM_BASE, 2);
    assert_eq!(bed.jit.gpr(GPR::R0), 9);
}

#[test]
fn range_flush_is_selective() {
    let block_a = RAM_BASE + 0x100;
    let block_b = RAM_BASE + 0x200;

    let mut bed = TestBed::new();
    bed.load_program(
        block_a,
        &[
            asm::mov_imm(0, 1),
            asm::mov_imm(2, 5),
            asm::b_self(block_a + 8),
        ],
    );
    bed.load_program(
        block_b,
        &[
            asm::mov_imm(1, 1),
            asm::mov_imm(3, 5),
            asm::b_self(block_b + 8),
        ],
    );
    bed.run_at(block_a, 3);
    bed.run_at(block_b, 3);
    assert_eq!(bed.jit.gpr(GPR::R2), 5);
    assert_eq!(bed.jit.gpr(GPR::R3), 5);

    // Rewrite the second instruction of both blocks. The first word
    // (and so the hash) is untouched, so only a flush can expose the
    // change.
    bed.write_word(block_a + 4, asm::mov_imm(2, 9));
    bed.write_word(block_b + 4, asm::mov_imm(3, 9));
    bed.jit.clear_icache_range(block_a, block_a + 12);

    bed.run_at(block_a, 3);
    bed.run_at(block_b, 3);
    // The flushed block was recompiled; the other still runs its
    // cached translation.
    assert_eq!(bed.jit.gpr(GPR::R2), 9);
    assert_eq!(bed.jit.gpr(GPR::R3), 5);

    // A full flush drops the rest.
    bed.jit.clear_icache();
    bed.run_at(block_b, 3);
    assert_eq!(bed.jit.gpr(GPR::R3), 9);
}

#[test]
fn reset_flushes_the_cache() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 1),
            asm::mov_imm(1, 5),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1), 5);

    // Rewriting past the first word leaves the hash intact: the
    // cached translation keeps running until something flushes it.
    bed.write_word(RAM_BASE + 4, asm::mov_imm(1, 7));
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1), 5);

    bed.jit.reset();
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1), 7);
}

#[test]
fn changing_the_exception_base_invalidates_dependent_blocks() {
    let other_base = RAM_BASE + 0x1000;
    let mut bed = TestBed::new();
    // SWI block bakes the exception base into its code.
    bed.load_program(RAM_BASE + 0x08, &[asm::b_self(RAM_BASE + 0x08)]);
    bed.load_program(other_base + 0x08, &[asm::b_self(other_base + 0x08)]);
    bed.load_program(RAM_BASE + 0x40, &[asm::swi(0)]);

    bed.run_at(RAM_BASE + 0x40, 1);
    assert_eq!(bed.jit.gpr(GPR::PC), RAM_BASE + 0x08 + 8);

    bed.jit.set_exception_base(other_base);
    bed.run_at(RAM_BASE + 0x40, 1);
    assert_eq!(bed.jit.gpr(GPR::PC), other_base + 0x08 + 8);
}
