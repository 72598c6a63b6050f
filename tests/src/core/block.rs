use arm_jit_core::{BlockKey, Mode, State, StatusRegister, GPR};

#[test]
fn key_round_trip() {
    let mut state = State::new();
    state.set_gpr(Mode::User, GPR::PC, 0x0800_0108);
    *state.cpsr_mut() = StatusRegister(Mode::Irq as u32);
    let key = BlockKey::from_state(&state);
    assert_eq!(key.address(), 0x0800_0108);
    assert_eq!(key.mode().unwrap(), Mode::Irq);
    assert!(!key.thumb());
    assert_eq!(key.fetch_address(), 0x0800_0100);
}

#[test]
fn key_thumb_bit() {
    let mut state = State::new();
    state.set_gpr(Mode::User, GPR::PC, 0x0800_0104);
    *state.cpsr_mut() = StatusRegister(Mode::System as u32 | StatusRegister::THUMB);
    let key = BlockKey::from_state(&state);
    assert!(key.thumb());
    assert_eq!(key.instruction_size(), 2);
    assert_eq!(key.fetch_address(), 0x0800_0100);
}

#[test]
fn keys_distinguish_modes() {
    let mut state = State::new();
    state.set_gpr(Mode::User, GPR::PC, 0x100);
    *state.cpsr_mut() = StatusRegister(Mode::User as u32);
    let user = BlockKey::from_state(&state);
    *state.cpsr_mut() = StatusRegister(Mode::Fiq as u32);
    let fiq = BlockKey::from_state(&state);
    assert_ne!(user, fiq);
}

#[test]
fn release_callbacks_fire_once() {
    use arm_jit_core::BasicBlock;
    use std::cell::Cell;
    use std::rc::Rc;

    let fired = Rc::new(Cell::new(0));
    let state = State::new();
    let mut block = BasicBlock::new(BlockKey::from_state(&state));
    let counter = Rc::clone(&fired);
    block.register_release_callback(move |_| counter.set(counter.get() + 1));
    block.release();
    block.release();
    assert_eq!(fired.get(), 1);
}
