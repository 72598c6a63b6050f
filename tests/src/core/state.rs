use arm_jit_core::cpu::MODES;
use arm_jit_core::{Mode, State, GPR};

#[test]
fn banking_shares_low_registers() {
    let mut state = State::new();
    state.set_gpr(Mode::User, GPR::R3, 0x1234);
    assert_eq!(state.gpr(Mode::Fiq, GPR::R3), 0x1234);
    assert_eq!(state.gpr(Mode::Irq, GPR::R3), 0x1234);
}

#[test]
fn banking_splits_r13_r14() {
    let mut state = State::new();
    state.set_gpr(Mode::Supervisor, GPR::SP, 0x100);
    state.set_gpr(Mode::Irq, GPR::SP, 0x200);
    state.set_gpr(Mode::User, GPR::SP, 0x300);
    assert_eq!(state.gpr(Mode::Supervisor, GPR::SP), 0x100);
    assert_eq!(state.gpr(Mode::Irq, GPR::SP), 0x200);
    assert_eq!(state.gpr(Mode::System, GPR::SP), 0x300);
}

#[test]
fn fiq_banks_r8_to_r12() {
    let mut state = State::new();
    state.set_gpr(Mode::User, GPR::R8, 1);
    state.set_gpr(Mode::Fiq, GPR::R8, 2);
    assert_eq!(state.gpr(Mode::User, GPR::R8), 1);
    assert_eq!(state.gpr(Mode::Irq, GPR::R8), 1);
    assert_eq!(state.gpr(Mode::Fiq, GPR::R8), 2);
}

#[test]
fn spsr_only_in_privileged_modes() {
    let state = State::new();
    assert!(state.spsr(Mode::User).is_err());
    assert!(state.spsr(Mode::System).is_err());
    assert!(state.spsr(Mode::Irq).is_ok());
    assert!(State::spsr_offset(Mode::Fiq).is_ok());
}

#[test]
fn r15_is_shared_across_modes() {
    for mode in MODES {
        assert_eq!(
            State::gpr_offset(mode, GPR::PC),
            State::gpr_offset(Mode::User, GPR::PC)
        );
    }
}

#[test]
fn invalid_mode_code_is_rejected() {
    assert!(Mode::from_bits(0x00).is_err());
    assert!(Mode::from_bits(0x14).is_err());
    assert!(Mode::from_bits(0x1E).is_err());
}

#[test]
fn offsets_are_stable() {
    // The lookup table is built once; repeated queries must agree.
    let first = State::gpr_offset(Mode::Fiq, GPR::R10);
    let second = State::gpr_offset(Mode::Fiq, GPR::R10);
    assert_eq!(first, second);
    assert_ne!(
        State::gpr_offset(Mode::Fiq, GPR::R10),
        State::gpr_offset(Mode::User, GPR::R10)
    );
}
