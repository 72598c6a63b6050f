use crate::cpu::Mode;

/// Fatal translation/compilation errors.
///
/// All of these indicate a bug in the translator or an unsupported
/// guest program shape; they abort the current block and propagate
/// out of `run()`.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// An undefined processor mode code, or an SPSR access through a
    /// pointer/offset path in a mode that has none (User, System).
    #[error("invalid processor mode: 0x{0:02X}")]
    InvalidMode(u32),

    /// The host code emitter was handed an IR opcode class it does
    /// not lower. Indicates a translator/backend mismatch.
    #[error("unhandled IR opcode: {0}")]
    UnhandledIROpcode(String),

    /// The register allocator found neither a free host register nor
    /// a spillable live variable.
    #[error("out of host registers and spill space")]
    OutOfRegisters,

    /// An IR builder rejected its operands (mismatched multiply data
    /// types, or a required operand that was null).
    #[error("{0}")]
    TypeMismatch(&'static str),
}

impl JitError {
    pub fn invalid_mode(mode: Mode) -> Self {
        JitError::InvalidMode(mode as u32)
    }
}
