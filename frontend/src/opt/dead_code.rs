//! Dead-code elision.
//!
//! Applies identity rewrites (`ADD #0`, `LSL #0`, `MOV var`) by
//! repointing all later references at the source variable, then drops
//! any opcode whose writes are unread downstream, has no side
//! effects, and requests no host-flag update.

use arm_jit_core::{AnyRef, IREmitter, IROp, VarRef};

pub fn run(emitter: &mut IREmitter) {
    let code = emitter.code_mut();

    let mut index = 0;
    while index < code.len() {
        if let Some((old, new)) = identity_rewrite(&code[index]) {
            for op in code[index + 1..].iter_mut() {
                op.repoint(old, new);
            }
            tracing::trace!(%old, %new, "identity repointed");
            code.remove(index);
            continue;
        }

        if removable(code, index) {
            tracing::trace!(op = %code[index], "dead code removed");
            code.remove(index);
            continue;
        }

        index += 1;
    }
}

/// Rewrites that make the defined variable an alias of an operand.
fn identity_rewrite(op: &IROp) -> Option<(VarRef, VarRef)> {
    match op {
        // ADD #0 is a no-operation.
        IROp::Alu {
            op: arm_jit_core::AluOp::Add,
            result: Some(result),
            lhs,
            rhs: AnyRef::Const(constant),
            update_host_flags: false,
        } if constant.value == 0 => Some((*result, *lhs)),
        // LSL #0 passes the operand through and leaves carry alone.
        IROp::Shift {
            op: arm_jit_core::ShiftOp::Lsl,
            result,
            operand,
            amount: AnyRef::Const(constant),
            ..
        } if constant.value == 0 => Some((*result, *operand)),
        // MOV of a variable introduces a redundant name.
        IROp::Mov {
            result,
            source: AnyRef::Var(source),
            update_host_flags: false,
        } => Some((*result, *source)),
        _ => None,
    }
}

fn removable(code: &[IROp], index: usize) -> bool {
    let op = &code[index];
    if op.has_side_effects() || op.update_host_flags() {
        return false;
    }
    // Every write must be unread downstream. Opcodes with no writes
    // and no side effects (e.g. nop) are trivially removable.
    let writes: Vec<VarRef> = written_vars(op);
    writes
        .iter()
        .all(|&var| !code[index + 1..].iter().any(|later| later.reads(var)))
}

fn written_vars(op: &IROp) -> Vec<VarRef> {
    let mut vars = Vec::new();
    match op {
        IROp::LoadGPR { result, .. }
        | IROp::LoadSPSR { result, .. }
        | IROp::LoadCPSR { result }
        | IROp::UpdateFlags { result, .. }
        | IROp::UpdateSticky { result, .. }
        | IROp::UpdateGE { result, .. }
        | IROp::Shift { result, .. }
        | IROp::Mov { result, .. }
        | IROp::Mvn { result, .. }
        | IROp::Clz { result, .. }
        | IROp::QAdd { result, .. }
        | IROp::QSub { result, .. }
        | IROp::Parallel { result, .. } => vars.push(*result),
        IROp::Alu { result, .. } => vars.extend(result.iter().copied()),
        IROp::Multiply {
            result_hi,
            result_lo,
            ..
        } => {
            vars.extend(result_hi.iter().copied());
            vars.push(*result_lo);
        }
        IROp::Add64 {
            result_hi,
            result_lo,
            ..
        } => {
            vars.push(*result_hi);
            vars.push(*result_lo);
        }
        IROp::Flush { address_out, .. } => vars.push(*address_out),
        IROp::FlushExchange {
            address_out,
            cpsr_out,
            ..
        } => {
            vars.push(*address_out);
            vars.push(*cpsr_out);
        }
        _ => {}
    }
    vars
}
