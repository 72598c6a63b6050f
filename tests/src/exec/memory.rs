//! Guest memory access: page-table fast path, slow-path callouts,
//! misaligned-read rotation and the legacy signed-halfword quirk.

use arm_jit_core::GPR;

use crate::common::{asm, TestBed, RAM_BASE, SLOW_BASE};

/// `r6 = RAM_BASE + offset` (offset must fit `imm8 ror 20`).
fn load_base(offset_imm: u32) -> [u32; 2] {
    [
        asm::mov_imm_ror(6, 2, 8),
        asm::add_imm_ror(6, 6, offset_imm, 20),
    ]
}

#[test]
fn word_load_rotates_misaligned_reads() {
    let data = RAM_BASE + 0x3000;
    let mut bed = TestBed::new();
    bed.write_word(data, 0x0302_0100);
    bed.write_word(data + 4, 0x0706_0504);

    let [a, b] = load_base(3);
    bed.load_program(
        RAM_BASE,
        &[
            a,
            b,
            asm::ldr_imm(3, 6, 2), // misaligned: word at data, rotated by 16
            asm::ldr_imm(4, 6, 4), // aligned
            asm::b_self(RAM_BASE + 16),
        ],
    );
    bed.run_at(RAM_BASE, 5);
    assert_eq!(bed.jit.gpr(GPR::R3), 0x0100_0302);
    assert_eq!(bed.jit.gpr(GPR::R4), 0x0706_0504);
}

#[test]
fn byte_and_halfword_widths() {
    let data = RAM_BASE + 0x3000;
    let mut bed = TestBed::new();
    bed.write_word(data, 0x1122_8344);

    let [a, b] = load_base(3);
    bed.load_program(
        RAM_BASE,
        &[
            a,
            b,
            asm::ldrb_imm(0, 6, 1),  // 0x83
            asm::ldrh_imm(1, 6, 0),  // 0x8344
            asm::ldrh_imm(2, 6, 2),  // 0x1122
            asm::b_self(RAM_BASE + 20),
        ],
    );
    bed.run_at(RAM_BASE, 6);
    assert_eq!(bed.jit.gpr(GPR::R0), 0x83);
    assert_eq!(bed.jit.gpr(GPR::R1), 0x8344);
    assert_eq!(bed.jit.gpr(GPR::R2), 0x1122);
}

#[test]
fn stores_hit_guest_memory() {
    let data = RAM_BASE + 0x3000;
    let mut bed = TestBed::new();
    let [a, b] = load_base(3);
    bed.load_program(
        RAM_BASE,
        &[
            a,
            b,
            asm::mov_imm(0, 0xAB),
            asm::str_imm(0, 6, 0),
            asm::strb_imm(0, 6, 8),
            asm::strh_imm(0, 6, 12),
            asm::b_self(RAM_BASE + 24),
        ],
    );
    bed.run_at(RAM_BASE, 7);
    assert_eq!(bed.read_ram_word(data), 0xAB);
    assert_eq!(bed.read_ram_word(data + 8), 0xAB);
    assert_eq!(bed.read_ram_word(data + 12), 0xAB);
}

#[test]
fn unmapped_pages_use_the_slow_callout() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(6, 4, 8),  // r6 = SLOW_BASE (0x0400_0000)
            asm::mov_imm(0, 0x5A),
            asm::str_imm(0, 6, 4),
            asm::ldr_imm(1, 6, 4),
            asm::ldrb_imm(2, 6, 4),
            asm::b_self(RAM_BASE + 20),
        ],
    );
    bed.run_at(RAM_BASE, 6);
    assert_eq!(bed.jit.gpr(GPR::R1), 0x5A);
    assert_eq!(bed.jit.gpr(GPR::R2), 0x5A);
    // The slow region really is distinct from the RAM window.
    assert_eq!(SLOW_BASE & 0xFF00_0000, 0x0400_0000);
}

#[test]
fn signed_halfword_loads() {
    let data = RAM_BASE + 0x3000;
    let mut bed = TestBed::new();
    bed.write_word(data, 0x0000_9234);

    let [a, b] = load_base(3);
    bed.load_program(
        RAM_BASE,
        &[
            a,
            b,
            asm::ldrsh_imm(0, 6, 0), // aligned: sign-extended halfword
            asm::ldrsh_imm(1, 6, 1), // misaligned: signed byte from the high byte
            asm::b_self(RAM_BASE + 16),
        ],
    );
    bed.run_at(RAM_BASE, 5);
    assert_eq!(bed.jit.gpr(GPR::R0), 0xFFFF_9234);
    assert_eq!(bed.jit.gpr(GPR::R1), 0xFFFF_FF92);
}
