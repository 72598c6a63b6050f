//! Context load/store elision.
//!
//! Within a micro-block, a load that follows a store (or another
//! load) of the same state slot is elided: references to the loaded
//! variable are repointed at the known value, or rewritten into a
//! constant move when the slot holds an immediate. A store that is
//! superseded by a later store to the same slot is dropped. Slots are
//! identified by their byte offset in the guest state record, which
//! resolves register banking for free.

use std::collections::HashMap;

use arm_jit_core::{AnyRef, IREmitter, IROp, State, VarRef};

pub fn run(emitter: &mut IREmitter) {
    let mut known: HashMap<u32, AnyRef> = HashMap::new();
    let mut pending_store: HashMap<u32, usize> = HashMap::new();

    let code = emitter.code_mut();
    for index in 0..code.len() {
        match code[index].clone() {
            IROp::LoadGPR { reg, result } => {
                let slot = State::gpr_offset(reg.mode, reg.reg);
                forward_load(code, &mut known, index, slot, result);
            }
            IROp::LoadCPSR { result } => {
                forward_load(code, &mut known, index, State::cpsr_offset(), result);
            }
            IROp::LoadSPSR { result, mode } => {
                let slot = State::spsr_offset(mode).expect("SPSR load in unbanked mode");
                forward_load(code, &mut known, index, slot, result);
            }
            IROp::StoreGPR { reg, value } => {
                let slot = State::gpr_offset(reg.mode, reg.reg);
                supersede_store(code, &mut known, &mut pending_store, index, slot, value);
            }
            IROp::StoreCPSR { value } => {
                let slot = State::cpsr_offset();
                supersede_store(code, &mut known, &mut pending_store, index, slot, value);
            }
            IROp::StoreSPSR { value, mode } => {
                let slot = State::spsr_offset(mode).expect("SPSR store in unbanked mode");
                supersede_store(code, &mut known, &mut pending_store, index, slot, value);
            }
            _ => {}
        }
    }
}

fn forward_load(
    code: &mut [IROp],
    known: &mut HashMap<u32, AnyRef>,
    index: usize,
    slot: u32,
    result: VarRef,
) {
    match known.get(&slot) {
        Some(AnyRef::Var(source)) => {
            tracing::trace!(%result, %source, "context load forwarded");
            let source = *source;
            code[index] = IROp::Nop;
            for op in code[index + 1..].iter_mut() {
                op.repoint(result, source);
            }
        }
        Some(value @ AnyRef::Const(_)) => {
            tracing::trace!(%result, "context load folded to constant");
            let source = *value;
            code[index] = IROp::Mov {
                result,
                source,
                update_host_flags: false,
            };
        }
        _ => {
            known.insert(slot, AnyRef::Var(result));
        }
    }
}

fn supersede_store(
    code: &mut [IROp],
    known: &mut HashMap<u32, AnyRef>,
    pending_store: &mut HashMap<u32, usize>,
    index: usize,
    slot: u32,
    value: AnyRef,
) {
    if let Some(previous) = pending_store.insert(slot, index) {
        tracing::trace!(slot, "context store superseded");
        code[previous] = IROp::Nop;
    }
    known.insert(slot, value);
}
