//! IR value model: SSA variables, constants and operand references.
//!
//! Variables live in a pool owned by the emitter; opcodes refer to
//! them by dense id, so identity comparison is integer comparison.

/// Data type of an IR value. Only 32-bit integers exist; signedness
/// selects multiply/shift semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IRDataType {
    UInt32,
    SInt32,
}

impl std::fmt::Display for IRDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IRDataType::UInt32 => f.write_str("u32"),
            IRDataType::SInt32 => f.write_str("s32"),
        }
    }
}

/// Reference to an SSA variable (index into the emitter's pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarRef(pub u32);

impl VarRef {
    pub fn id(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VarRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An immutable SSA variable: defined exactly once, id dense from 0.
#[derive(Debug)]
pub struct IRVariable {
    pub id: u32,
    pub data_type: IRDataType,
    /// Optional usage hint for IR dumps.
    pub label: Option<&'static str>,
}

impl std::fmt::Display for IRVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.label {
            Some(label) => write!(f, "v{}_{}", self.id, label),
            None => write!(f, "v{}", self.id),
        }
    }
}

/// A 32-bit immediate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IRConstant {
    pub data_type: IRDataType,
    pub value: u32,
}

impl IRConstant {
    pub fn new(value: u32) -> Self {
        IRConstant {
            data_type: IRDataType::UInt32,
            value,
        }
    }
}

impl From<u32> for IRConstant {
    fn from(value: u32) -> Self {
        IRConstant::new(value)
    }
}

impl std::fmt::Display for IRConstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.value)
    }
}

/// Operand that may be absent, a variable, or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnyRef {
    #[default]
    Null,
    Var(VarRef),
    Const(IRConstant),
}

impl AnyRef {
    pub fn is_null(self) -> bool {
        matches!(self, AnyRef::Null)
    }

    pub fn as_var(self) -> Option<VarRef> {
        match self {
            AnyRef::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_const(self) -> Option<IRConstant> {
        match self {
            AnyRef::Const(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn reads(self, var: VarRef) -> bool {
        self.as_var() == Some(var)
    }

    pub fn repoint(&mut self, var_old: VarRef, var_new: VarRef) {
        if let AnyRef::Var(var) = self {
            if *var == var_old {
                *var = var_new;
            }
        }
    }

    pub fn propagate_constant(&mut self, var: VarRef, constant: IRConstant) {
        if let AnyRef::Var(v) = self {
            if *v == var {
                *self = AnyRef::Const(constant);
            }
        }
    }
}

impl From<VarRef> for AnyRef {
    fn from(var: VarRef) -> Self {
        AnyRef::Var(var)
    }
}

impl From<IRConstant> for AnyRef {
    fn from(constant: IRConstant) -> Self {
        AnyRef::Const(constant)
    }
}

impl From<u32> for AnyRef {
    fn from(value: u32) -> Self {
        AnyRef::Const(IRConstant::new(value))
    }
}

impl std::fmt::Display for AnyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyRef::Null => f.write_str("(null)"),
            AnyRef::Var(var) => var.fmt(f),
            AnyRef::Const(constant) => constant.fmt(f),
        }
    }
}
