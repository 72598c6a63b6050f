//! End-to-end scenarios: guest programs compiled and executed on the
//! host, asserting on guest-visible state afterwards.

use arm_jit_core::{Mode, StatusRegister, GPR};

use crate::common::{asm, TestBed, RAM_BASE};

const N: u32 = 1 << 31;
const Z: u32 = 1 << 30;
const C: u32 = 1 << 29;
const V: u32 = 1 << 28;
const Q: u32 = 1 << 27;

fn flags(bed: &TestBed) -> u32 {
    bed.jit.cpsr().bits() & 0xF000_0000
}

#[test]
fn adds_sets_carry_and_overflow() {
    // R0 = R1 = 0x8000_0000; ADDS R2, R0, R1.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(0, 2, 2),
            asm::mov_imm_ror(1, 2, 2),
            asm::adds_reg(2, 0, 1),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R2), 0);
    assert_eq!(flags(&bed), Z | C | V);
}

#[test]
fn subs_borrow_convention() {
    // CMP r0, #1 with r0 = 0: borrow happened, so guest C clears.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 0),
            asm::cmp_imm(0, 1),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(flags(&bed), N);

    // CMP r0, #1 with r0 = 2: no borrow, guest C sets.
    bed.load_program(
        RAM_BASE + 0x40,
        &[
            asm::mov_imm(0, 2),
            asm::cmp_imm(0, 1),
            asm::b_self(RAM_BASE + 0x48),
        ],
    );
    bed.run_at(RAM_BASE + 0x40, 3);
    assert_eq!(flags(&bed), C);
}

#[test]
fn adc_consumes_the_carry() {
    // Set carry with a compare, then ADC r2, r0, r1.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 10),
            asm::mov_imm(1, 20),
            asm::cmp_imm(0, 1), // 10 - 1: no borrow, C = 1
            asm::adc_reg(2, 0, 1),
            asm::b_self(RAM_BASE + 16),
        ],
    );
    bed.run_at(RAM_BASE, 5);
    assert_eq!(bed.jit.gpr(GPR::R2), 31);
}

#[test]
fn shifter_carry_feeds_logical_flags() {
    // MOVS r1, r0, LSR #1 with r0 = 3: result 1, carry out 1.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 3),
            asm::movs_lsr_imm(1, 0, 1),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1), 1);
    assert_eq!(flags(&bed), C);
}

#[test]
fn shift_by_register_uses_dynamic_amount() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 1),
            asm::mov_imm(1, 12),
            asm::mov_lsl_reg(2, 0, 1), // r2 = 1 << 12
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R2), 0x1000);
}

#[test]
fn flush_exchange_enters_thumb() {
    // BX to RAM_BASE + 0x101: Thumb code sets r1 = 42.
    let thumb = RAM_BASE + 0x100;
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(0, 2, 8),          // r0 = 0x0200_0000
            asm::add_imm_ror(0, 0, 1, 24),      // r0 += 0x100
            asm::add_imm(0, 0, 1),              // r0 |= 1
            asm::bx(0),
        ],
    );
    bed.load_thumb(thumb, &[0x212A, 0xE7FE]); // MOVS r1, #42; B .
    bed.run_at(RAM_BASE, 8);
    assert!(bed.jit.cpsr().thumb());
    assert_eq!(bed.jit.gpr(GPR::R1), 42);
    // The stored R15 is the Thumb pipeline-ahead value.
    assert_eq!(bed.jit.gpr(GPR::PC), thumb + 2 + 4);
}

#[test]
fn thumb_branch_link_pair() {
    let thumb = RAM_BASE + 0x100;
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(0, 2, 8),
            asm::add_imm_ror(0, 0, 1, 24),
            asm::add_imm(0, 0, 1),
            asm::bx(0),
        ],
    );
    // BL .+6: prefix, suffix, skipped slot, target.
    bed.load_thumb(
        thumb,
        &[
            0xF000, // BL prefix, offset 0
            0xF801, // BL suffix, offset 2 -> target = thumb + 6
            0xE7FE, // B . (skipped)
            0x2509, // MOVS r5, #9
            0xE7FE, // B .
        ],
    );
    bed.run_at(RAM_BASE, 12);
    assert_eq!(bed.jit.gpr(GPR::R5), 9);
    assert_eq!(bed.jit.gpr(GPR::LR), (thumb + 4) | 1);
}

#[test]
fn constant_folding_is_observable() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(1, 5),
            asm::mov_imm(2, 7),
            asm::add_reg(0, 1, 2),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R0), 12);
}

#[test]
fn qadd_saturates_and_sets_sticky_bit() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mvn_imm_ror(1, 2, 2), // r1 = !0x8000_0000 = 0x7FFF_FFFF
            asm::mov_imm(2, 1),
            asm::qadd(0, 1, 2),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R0), 0x7FFF_FFFF);
    assert_ne!(bed.jit.cpsr().bits() & Q, 0);
}

#[test]
fn multiplies() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 7),
            asm::mov_imm(1, 6),
            asm::mul(2, 0, 1),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R2), 42);
}

#[test]
fn long_multiplies_select_signedness() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mvn_imm_ror(0, 1, 0), // r0 = -2
            asm::mov_imm(1, 3),
            asm::smull(3, 2, 0, 1),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 4);
    assert_eq!(bed.jit.gpr(GPR::R2), 0xFFFF_FFFA); // -6 low
    assert_eq!(bed.jit.gpr(GPR::R3), 0xFFFF_FFFF); // -6 high

    bed.load_program(
        RAM_BASE + 0x40,
        &[
            asm::mvn_imm_ror(0, 1, 0), // r0 = 0xFFFF_FFFE
            asm::mov_imm(1, 3),
            asm::umull(5, 4, 0, 1),
            asm::b_self(RAM_BASE + 0x4C),
        ],
    );
    bed.run_at(RAM_BASE + 0x40, 4);
    assert_eq!(bed.jit.gpr(GPR::R4), 0xFFFF_FFFA);
    assert_eq!(bed.jit.gpr(GPR::R5), 2);
}

#[test]
fn clz_counts_leading_zeros() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 0x10),
            asm::clz(1, 0),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1), 27);
}

#[test]
fn conditional_micro_blocks_execute_and_skip() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::movs_imm(0, 0),                     // Z = 1
            asm::with_cond(0, asm::mov_imm(1, 1)),   // MOVEQ: runs
            asm::with_cond(1, asm::mov_imm(2, 2)),   // MOVNE: skipped
            asm::with_cond(0, asm::mov_imm(3, 3)),   // MOVEQ: runs
            asm::b_self(RAM_BASE + 16),
        ],
    );
    bed.run_at(RAM_BASE, 5);
    assert_eq!(bed.jit.gpr(GPR::R1), 1);
    assert_eq!(bed.jit.gpr(GPR::R2), 0);
    assert_eq!(bed.jit.gpr(GPR::R3), 3);
}

#[test]
fn skipped_micro_block_still_advances_the_pc() {
    // A skipped conditional branch must fall through to the next
    // instruction, not derail the PC.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::movs_imm(0, 1),                                  // Z = 0
            asm::with_cond(0, asm::b(RAM_BASE + 4, RAM_BASE)),    // BEQ: skipped
            asm::mov_imm(4, 7),
            asm::b_self(RAM_BASE + 12),
        ],
    );
    bed.run_at(RAM_BASE, 6);
    assert_eq!(bed.jit.gpr(GPR::R4), 7);
}

#[test]
fn block_data_transfer_round_trip() {
    let stack = RAM_BASE + 0x2000;
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(13, 2, 8),        // sp = 0x0200_0000
            asm::add_imm_ror(13, 13, 2, 20),   // sp += 0x2000
            asm::mov_imm(0, 1),
            asm::mov_imm(1, 2),
            asm::mov_imm(14, 3),
            asm::stmdb_wb(13, 0x4003),         // push {r0, r1, lr}
            asm::ldmia_wb(13, 0x001C),         // pop {r2, r3, r4}
            asm::b_self(RAM_BASE + 28),
        ],
    );
    bed.run_at(RAM_BASE, 8);
    assert_eq!(bed.jit.gpr(GPR::R2), 1);
    assert_eq!(bed.jit.gpr(GPR::R3), 2);
    assert_eq!(bed.jit.gpr(GPR::R4), 3);
    assert_eq!(bed.jit.gpr(GPR::SP), stack);
    assert_eq!(bed.read_ram_word(stack - 12), 1);
    assert_eq!(bed.read_ram_word(stack - 4), 3);
}

#[test]
fn register_pressure_forces_spills() {
    // Eleven loads live at once exceed the allocatable set.
    let data = RAM_BASE + 0x3000;
    let mut bed = TestBed::new();
    for index in 0..11u32 {
        bed.write_word(data + 4 * index, index + 1);
    }
    let mut program = vec![
        asm::mov_imm_ror(12, 2, 8),      // r12 = 0x0200_0000
        asm::add_imm_ror(12, 12, 3, 20), // r12 += 0x3000
    ];
    for index in 0..11u32 {
        program.push(asm::ldr_imm(index, 12, 4 * index));
    }
    // r11 = r0 + r1 + ... + r10 (accumulating into r11 last keeps
    // every loaded value live across the loads).
    program.push(asm::add_reg(11, 0, 1));
    for index in 2..11u32 {
        program.push(asm::add_reg(11, 11, index));
    }
    let end = RAM_BASE + 4 * (program.len() as u32);
    program.push(asm::b_self(end));
    bed.load_program(RAM_BASE, &program);
    bed.run_at(RAM_BASE, program.len() as i32);
    assert_eq!(bed.jit.gpr(GPR::R11), 66);
}

#[test]
fn parallel_add_sets_ge_flags() {
    let data = RAM_BASE + 0x3100;
    let mut bed = TestBed::new();
    bed.write_word(data, 0x0001_8000);
    bed.write_word(data + 4, 0x0001_FFFF);
    bed.write_word(data + 8, 0x0001_0001);
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(6, 2, 8),
            asm::add_imm_ror(6, 6, 0x31, 20), // r6 = data
            asm::ldr_imm(0, 6, 0),
            asm::ldr_imm(1, 6, 0),
            asm::sadd16(2, 0, 1), // lanes: 1+1, -32768 + -32768
            asm::b_self(RAM_BASE + 20),
        ],
    );
    bed.run_at(RAM_BASE, 6);
    assert_eq!(bed.jit.gpr(GPR::R2), 0x0002_0000);
    // High halfword sum >= 0, low halfword sum < 0.
    assert_eq!(bed.jit.cpsr().ge(), 0b1100);

    bed.load_program(
        RAM_BASE + 0x40,
        &[
            asm::mov_imm_ror(6, 2, 8),
            asm::add_imm_ror(6, 6, 0x31, 20),
            asm::ldr_imm(0, 6, 4),  // 0x0001_FFFF
            asm::ldr_imm(1, 6, 8),  // 0x0001_0001
            asm::uadd16(2, 0, 1),
            asm::b_self(RAM_BASE + 0x54),
        ],
    );
    bed.run_at(RAM_BASE + 0x40, 6);
    assert_eq!(bed.jit.gpr(GPR::R2), 0x0002_0000);
    // Low halfword carries, high does not.
    assert_eq!(bed.jit.cpsr().ge(), 0b0011);
}

#[test]
fn privileged_msr_switches_mode() {
    // MSR CPSR_c from System mode may change the mode field.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 0xD1), // FIQ mode, IRQ/FIQ masked
            asm::msr_cpsr_c(0),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.cpsr().mode().unwrap(), Mode::Fiq);
}

#[test]
fn user_mode_msr_writes_the_flag_byte_only() {
    // MSR CPSR_f from User mode reaches the whole flag byte,
    // including the sticky Q bit; the control write is dropped.
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm_ror(0, 0x88, 8), // N | Q
            asm::mov_imm(1, 0xD3),        // Supervisor mode bits
            asm::msr_cpsr_f(0),
            asm::msr_cpsr_c(1),
            asm::b_self(RAM_BASE + 16),
        ],
    );
    bed.jit.set_cpsr(StatusRegister(Mode::User as u32));
    bed.jit.set_gpr(GPR::PC, RAM_BASE);
    bed.jit.run(5).unwrap();

    let cpsr = bed.jit.cpsr();
    assert_ne!(cpsr.bits() & Q, 0, "User-mode MSR must reach Q");
    assert_eq!(cpsr.bits() & 0xF000_0000, N);
    // The attempted mode change was silently discarded.
    assert_eq!(cpsr.mode().unwrap(), Mode::User);
}

#[test]
fn mrs_reads_the_status_register() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::movs_imm(0, 0), // Z = 1
            asm::mrs_cpsr(1),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    bed.run_at(RAM_BASE, 3);
    assert_eq!(bed.jit.gpr(GPR::R1) & 0xF000_0000, Z);
    assert_eq!(bed.jit.gpr(GPR::R1) & 0x1F, Mode::System as u32);
}

#[test]
fn software_interrupt_enters_supervisor_mode() {
    let mut bed = TestBed::new();
    // Handler at the SWI vector just parks.
    bed.load_program(RAM_BASE + 0x08, &[asm::b_self(RAM_BASE + 0x08)]);
    bed.load_program(
        RAM_BASE + 0x40,
        &[asm::mov_imm(0, 5), asm::swi(0)],
    );
    bed.run_at(RAM_BASE + 0x40, 2);

    let cpsr = bed.jit.cpsr();
    assert_eq!(cpsr.mode().unwrap(), Mode::Supervisor);
    assert!(cpsr.irq_masked());
    let spsr = bed.jit.spsr(Mode::Supervisor).unwrap();
    assert_eq!(spsr.mode().unwrap(), Mode::System);
    assert_eq!(bed.jit.gpr_mode(GPR::LR, Mode::Supervisor), RAM_BASE + 0x48);
    assert_eq!(bed.jit.gpr(GPR::R0), 5);
}

#[test]
fn cycle_accounting_charges_block_length() {
    let mut bed = TestBed::new();
    bed.load_program(
        RAM_BASE,
        &[
            asm::mov_imm(0, 1),
            asm::mov_imm(1, 2),
            asm::b_self(RAM_BASE + 8),
        ],
    );
    // One requested cycle still runs the whole three-instruction
    // block; the overshoot is reported.
    let executed = bed.run_at(RAM_BASE, 1);
    assert_eq!(executed, 3);
}

#[test]
fn irq_line_redirects_execution() {
    let mut bed = TestBed::new();
    bed.load_program(RAM_BASE + 0x18, &[asm::b_self(RAM_BASE + 0x18)]);
    bed.load_program(RAM_BASE + 0x40, &[asm::b_self(RAM_BASE + 0x40)]);
    bed.run_at(RAM_BASE + 0x40, 4);
    let parked_pc = bed.jit.gpr(GPR::PC);

    *bed.jit.irq_line() = true;
    bed.jit.run(4).unwrap();

    let cpsr = bed.jit.cpsr();
    assert_eq!(cpsr.mode().unwrap(), Mode::Irq);
    assert!(cpsr.irq_masked());
    // LR_irq records the interrupted PC minus one fetch.
    assert_eq!(bed.jit.gpr_mode(GPR::LR, Mode::Irq), parked_pc - 4);
}

#[test]
fn wait_for_irq_suspends_execution() {
    let mut bed = TestBed::new();
    bed.load_program(RAM_BASE, &[asm::b_self(RAM_BASE)]);
    *bed.jit.wait_for_irq() = true;
    assert_eq!(bed.jit.run(100).unwrap(), 0);
}
