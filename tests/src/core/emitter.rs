use arm_jit_core::{
    AluOp, AnyRef, GuestReg, IRDataType, IREmitter, IROp, Mode, ShiftOp, GPR,
};

fn var(emitter: &mut IREmitter) -> arm_jit_core::VarRef {
    emitter.create_var(IRDataType::UInt32, None)
}

#[test]
fn variable_ids_are_dense() {
    let mut emitter = IREmitter::new();
    for expected in 0..8 {
        let v = emitter.create_var(IRDataType::UInt32, Some("t"));
        assert_eq!(v.0, expected);
    }
}

#[test]
fn store_rejects_null_value() {
    let mut emitter = IREmitter::new();
    let reg = GuestReg::new(GPR::R0, Mode::User);
    assert!(emitter.store_gpr(reg, AnyRef::Null).is_err());
    assert!(emitter.store_cpsr(AnyRef::Null).is_err());
}

#[test]
fn alu_rejects_null_rhs() {
    let mut emitter = IREmitter::new();
    let lhs = var(&mut emitter);
    let result = var(&mut emitter);
    assert!(emitter
        .alu(AluOp::Add, Some(result), lhs, AnyRef::Null, false)
        .is_err());
}

#[test]
fn shift_rejects_null_amount() {
    let mut emitter = IREmitter::new();
    let operand = var(&mut emitter);
    let result = var(&mut emitter);
    assert!(emitter
        .shift(ShiftOp::Lsl, result, operand, AnyRef::Null, false)
        .is_err());
}

#[test]
fn mul_rejects_mismatched_types() {
    let mut emitter = IREmitter::new();
    let lhs = emitter.create_var(IRDataType::SInt32, None);
    let rhs = emitter.create_var(IRDataType::UInt32, None);
    let lo = emitter.create_var(IRDataType::UInt32, None);
    assert!(emitter.mul(None, lo, lhs, rhs, false).is_err());

    let rhs_signed = emitter.create_var(IRDataType::SInt32, None);
    assert!(emitter.mul(None, lo, lhs, rhs_signed, false).is_ok());
}

#[test]
fn spsr_access_in_unbanked_modes_is_rewritten() {
    let mut emitter = IREmitter::new();
    let result = var(&mut emitter);

    // User-mode SPSR load reads the CPSR instead.
    emitter.load_spsr(result, Mode::User);
    assert!(matches!(emitter.code()[0], IROp::LoadCPSR { .. }));

    // System-mode SPSR store emits nothing.
    let before = emitter.code().len();
    emitter.store_spsr(AnyRef::Var(result), Mode::System);
    assert_eq!(emitter.code().len(), before);

    // A privileged mode keeps the banked access.
    emitter.store_spsr(AnyRef::Var(result), Mode::Irq);
    assert!(matches!(
        emitter.code().last(),
        Some(IROp::StoreSPSR { mode: Mode::Irq, .. })
    ));
}

#[test]
fn repoint_rewrites_reads_and_writes() {
    let mut emitter = IREmitter::new();
    let a = var(&mut emitter);
    let b = var(&mut emitter);
    let c = var(&mut emitter);
    emitter
        .alu(AluOp::Add, Some(c), a, AnyRef::Var(b), false)
        .unwrap();

    let mut op = emitter.code()[0].clone();
    assert!(op.reads(b));
    op.repoint(b, a);
    assert!(!op.reads(b));
    assert!(op.reads(a));
    op.repoint(c, b);
    assert!(op.writes(b));
    assert!(!op.writes(c));
}
