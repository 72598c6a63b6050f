use arm_jit_core::{Condition, ParallelOp, GPR};
use arm_jit_frontend::decode::{
    decode_arm, decode_thumb, DataOp, InstrKind, Operand2, ShiftType,
};

use crate::common::asm;

#[test]
fn arm_data_processing_register() {
    let decoded = decode_arm(asm::adds_reg(2, 0, 1));
    assert_eq!(decoded.condition, Condition::AL);
    let InstrKind::DataProcessing(dp) = decoded.kind else {
        panic!("expected data processing");
    };
    assert_eq!(dp.opcode, DataOp::Add);
    assert!(dp.set_flags);
    assert_eq!(dp.reg_dst, GPR::R2);
    assert_eq!(dp.reg_op1, GPR::R0);
    let Operand2::Register(shifted) = dp.operand2 else {
        panic!("expected register operand");
    };
    assert_eq!(shifted.reg, GPR::R1);
    assert_eq!(shifted.shift, ShiftType::Lsl);
    assert!(shifted.immediate);
    assert_eq!(shifted.amount_imm, 0);
}

#[test]
fn arm_data_processing_immediate_rotation() {
    // MOV r0, #2 ROR 2 == 0x80000000.
    let decoded = decode_arm(asm::mov_imm_ror(0, 2, 2));
    let InstrKind::DataProcessing(dp) = decoded.kind else {
        panic!("expected data processing");
    };
    let Operand2::Immediate(imm) = dp.operand2 else {
        panic!("expected immediate operand");
    };
    assert_eq!(imm.decode(), 0x8000_0000);
}

#[test]
fn arm_condition_field() {
    let decoded = decode_arm(asm::with_cond(0, asm::mov_imm(1, 1)));
    assert_eq!(decoded.condition, Condition::EQ);
    let decoded = decode_arm(asm::with_cond(0xB, asm::mov_imm(1, 1)));
    assert_eq!(decoded.condition, Condition::LT);
}

#[test]
fn arm_branch_offset() {
    let word = asm::b(0x100, 0x180);
    let InstrKind::Branch(branch) = decode_arm(word).kind else {
        panic!("expected branch");
    };
    assert!(!branch.link);
    // Offset is relative to the pipeline-ahead PC.
    assert_eq!(0x108i64 + branch.offset as i64, 0x180);
}

#[test]
fn arm_branch_exchange() {
    let InstrKind::BranchExchange(bx) = decode_arm(asm::bx(3)).kind else {
        panic!("expected bx");
    };
    assert_eq!(bx.reg, GPR::R3);
    assert!(!bx.link);
}

#[test]
fn arm_multiply_forms() {
    let InstrKind::Multiply(mul) = decode_arm(asm::mul(2, 0, 1)).kind else {
        panic!("expected mul");
    };
    assert_eq!(mul.reg_dst, GPR::R2);
    assert!(!mul.accumulate);

    let InstrKind::MultiplyLong(mull) = decode_arm(asm::smull(3, 2, 0, 1)).kind else {
        panic!("expected mull");
    };
    assert!(mull.signed);
    assert_eq!(mull.reg_dst_hi, GPR::R3);
    assert_eq!(mull.reg_dst_lo, GPR::R2);
}

#[test]
fn arm_parallel_add_sub() {
    let InstrKind::ParallelAddSub(p) = decode_arm(asm::sadd16(2, 0, 1)).kind else {
        panic!("expected parallel add/sub");
    };
    assert_eq!(p.opcode, ParallelOp::AddS16);
    assert_eq!(p.reg_dst, GPR::R2);
    assert_eq!(p.reg_lhs, GPR::R0);
    assert_eq!(p.reg_rhs, GPR::R1);
}

#[test]
fn arm_software_interrupt() {
    let InstrKind::SoftwareInterrupt(swi) = decode_arm(asm::swi(0x42)).kind else {
        panic!("expected swi");
    };
    assert_eq!(swi.comment, 0x42);
}

#[test]
fn thumb_move_immediate() {
    // MOVS r1, #42.
    let decoded = decode_thumb(0x212A);
    assert_eq!(decoded.condition, Condition::AL);
    let InstrKind::DataProcessing(dp) = decoded.kind else {
        panic!("expected data processing");
    };
    assert_eq!(dp.opcode, DataOp::Mov);
    assert!(dp.set_flags);
    assert_eq!(dp.reg_dst, GPR::R1);
    let Operand2::Immediate(imm) = dp.operand2 else {
        panic!("expected immediate");
    };
    assert_eq!(imm.decode(), 42);
}

#[test]
fn thumb_alu_neg_is_rsb_zero() {
    // NEG r0, r1 == RSBS r0, r1, #0.
    let decoded = decode_thumb(0x4248);
    let InstrKind::DataProcessing(dp) = decoded.kind else {
        panic!("expected data processing");
    };
    assert_eq!(dp.opcode, DataOp::Rsb);
    assert_eq!(dp.reg_dst, GPR::R0);
    assert_eq!(dp.reg_op1, GPR::R1);
}

#[test]
fn thumb_conditional_branch() {
    // BEQ .+4 (offset field 0).
    let decoded = decode_thumb(0xD000);
    assert_eq!(decoded.condition, Condition::EQ);
    assert!(matches!(decoded.kind, InstrKind::Branch(_)));
}

#[test]
fn thumb_branch_link_pair() {
    let InstrKind::ThumbBlPrefix(prefix) = decode_thumb(0xF000).kind else {
        panic!("expected BL prefix");
    };
    assert_eq!(prefix.offset, 0);

    let InstrKind::ThumbBlSuffix(suffix) = decode_thumb(0xF801).kind else {
        panic!("expected BL suffix");
    };
    assert_eq!(suffix.offset, 2);
    assert!(!suffix.exchange);

    let InstrKind::ThumbBlSuffix(blx) = decode_thumb(0xE801).kind else {
        panic!("expected BLX suffix");
    };
    assert!(blx.exchange);
}

#[test]
fn thumb_push_pop_register_lists() {
    // PUSH {r0, r1, lr}.
    let InstrKind::BlockDataTransfer(push) = decode_thumb(0xB503).kind else {
        panic!("expected block transfer");
    };
    assert!(!push.load);
    assert!(push.writeback);
    assert_eq!(push.reg_base, GPR::SP);
    assert_eq!(push.reg_list, 0x4003);

    // POP {r0, r1, pc}.
    let InstrKind::BlockDataTransfer(pop) = decode_thumb(0xBD03).kind else {
        panic!("expected block transfer");
    };
    assert!(pop.load);
    assert_eq!(pop.reg_list, 0x8003);
}
