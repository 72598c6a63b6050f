//! IR optimization passes.
//!
//! Applied to each micro-block once, in a fixed order that each pass
//! relies on: context elision exposes constants and flag chains,
//! dead-flag elision runs before constant propagation so folding can
//! turn more ops into plain moves, and dead-code elision cleans up.

pub mod const_prop;
pub mod context_elision;
pub mod dead_code;
pub mod dead_flag;

use arm_jit_core::IREmitter;

pub fn optimize(emitter: &mut IREmitter) {
    context_elision::run(emitter);
    dead_flag::run(emitter);
    const_prop::run(emitter);
    dead_code::run(emitter);
}
