//! Typed IR builders.
//!
//! The emitter owns the variable pool and the ordered opcode list of
//! one micro-block. Builders validate non-null invariants up front so
//! the optimizer and backend can assume well-formed operands.

use crate::cpu::Mode;
use crate::error::JitError;
use crate::ir::opcode::{AluOp, GuestReg, IROp, MemoryFlags, ParallelOp, ShiftOp};
use crate::ir::value::{AnyRef, IRDataType, IRVariable, VarRef};

#[derive(Default)]
pub struct IREmitter {
    vars: Vec<IRVariable>,
    code: Vec<IROp>,
}

impl IREmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self) -> &[IROp] {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut Vec<IROp> {
        &mut self.code
    }

    pub fn vars(&self) -> &[IRVariable] {
        &self.vars
    }

    pub fn var(&self, var: VarRef) -> &IRVariable {
        &self.vars[var.id()]
    }

    pub fn create_var(&mut self, data_type: IRDataType, label: Option<&'static str>) -> VarRef {
        let id = self.vars.len() as u32;
        self.vars.push(IRVariable {
            id,
            data_type,
            label,
        });
        VarRef(id)
    }

    fn push(&mut self, op: IROp) {
        self.code.push(op);
    }

    // -- Context load/store --

    pub fn load_gpr(&mut self, reg: GuestReg, result: VarRef) {
        self.push(IROp::LoadGPR { reg, result });
    }

    pub fn store_gpr(&mut self, reg: GuestReg, value: AnyRef) -> Result<(), JitError> {
        if value.is_null() {
            return Err(JitError::TypeMismatch("stgpr: value must not be null"));
        }
        self.push(IROp::StoreGPR { reg, value });
        Ok(())
    }

    /// User and System modes have no SPSR; loading it there reads the
    /// CPSR so translators can emit uniform code.
    pub fn load_spsr(&mut self, result: VarRef, mode: Mode) {
        if mode.has_spsr() {
            self.push(IROp::LoadSPSR { result, mode });
        } else {
            self.push(IROp::LoadCPSR { result });
        }
    }

    /// SPSR stores in User and System modes are silently dropped.
    pub fn store_spsr(&mut self, value: AnyRef, mode: Mode) {
        if mode.has_spsr() {
            self.push(IROp::StoreSPSR { value, mode });
        }
    }

    pub fn load_cpsr(&mut self, result: VarRef) {
        self.push(IROp::LoadCPSR { result });
    }

    pub fn store_cpsr(&mut self, value: AnyRef) -> Result<(), JitError> {
        if value.is_null() {
            return Err(JitError::TypeMismatch("stcpsr: value must not be null"));
        }
        self.push(IROp::StoreCPSR { value });
        Ok(())
    }

    // -- Flag updates --

    pub fn clear_carry(&mut self) {
        self.push(IROp::ClearCarry);
    }

    pub fn set_carry(&mut self) {
        self.push(IROp::SetCarry);
    }

    pub fn update_nz(&mut self, result: VarRef, input: VarRef) {
        self.update_flags(result, input, true, true, false, false);
    }

    pub fn update_nzc(&mut self, result: VarRef, input: VarRef) {
        self.update_flags(result, input, true, true, true, false);
    }

    pub fn update_nzcv(&mut self, result: VarRef, input: VarRef) {
        self.update_flags(result, input, true, true, true, true);
    }

    pub fn update_flags(
        &mut self,
        result: VarRef,
        input: VarRef,
        flag_n: bool,
        flag_z: bool,
        flag_c: bool,
        flag_v: bool,
    ) {
        self.push(IROp::UpdateFlags {
            result,
            input,
            flag_n,
            flag_z,
            flag_c,
            flag_v,
        });
    }

    pub fn update_q(&mut self, result: VarRef, input: VarRef) {
        self.push(IROp::UpdateSticky { result, input });
    }

    pub fn update_ge(&mut self, result: VarRef, input: VarRef) {
        self.push(IROp::UpdateGE { result, input });
    }

    // -- Shifter --

    pub fn shift(
        &mut self,
        op: ShiftOp,
        result: VarRef,
        operand: VarRef,
        amount: AnyRef,
        update_host_flags: bool,
    ) -> Result<(), JitError> {
        if amount.is_null() {
            return Err(JitError::TypeMismatch("shift: amount must not be null"));
        }
        self.push(IROp::Shift {
            op,
            result,
            operand,
            amount,
            update_host_flags,
        });
        Ok(())
    }

    // -- ALU --

    pub fn alu(
        &mut self,
        op: AluOp,
        result: Option<VarRef>,
        lhs: VarRef,
        rhs: AnyRef,
        update_host_flags: bool,
    ) -> Result<(), JitError> {
        if rhs.is_null() {
            return Err(JitError::TypeMismatch("alu: rhs operand must not be null"));
        }
        self.push(IROp::Alu {
            op,
            result,
            lhs,
            rhs,
            update_host_flags,
        });
        Ok(())
    }

    pub fn mov(&mut self, result: VarRef, source: AnyRef, update_host_flags: bool) {
        self.push(IROp::Mov {
            result,
            source,
            update_host_flags,
        });
    }

    pub fn mvn(&mut self, result: VarRef, source: AnyRef, update_host_flags: bool) {
        self.push(IROp::Mvn {
            result,
            source,
            update_host_flags,
        });
    }

    pub fn clz(&mut self, result: VarRef, operand: VarRef) {
        self.push(IROp::Clz { result, operand });
    }

    pub fn qadd(&mut self, result: VarRef, lhs: VarRef, rhs: VarRef) {
        self.push(IROp::QAdd { result, lhs, rhs });
    }

    pub fn qsub(&mut self, result: VarRef, lhs: VarRef, rhs: VarRef) {
        self.push(IROp::QSub { result, lhs, rhs });
    }

    pub fn parallel(&mut self, op: ParallelOp, result: VarRef, lhs: VarRef, rhs: VarRef) {
        self.push(IROp::Parallel {
            op,
            result,
            lhs,
            rhs,
        });
    }

    // -- Multiplier --

    pub fn mul(
        &mut self,
        result_hi: Option<VarRef>,
        result_lo: VarRef,
        lhs: VarRef,
        rhs: VarRef,
        update_host_flags: bool,
    ) -> Result<(), JitError> {
        if self.var(lhs).data_type != self.var(rhs).data_type {
            return Err(JitError::TypeMismatch(
                "mul: lhs and rhs operands must have the same data type",
            ));
        }
        self.push(IROp::Multiply {
            result_hi,
            result_lo,
            lhs,
            rhs,
            update_host_flags,
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add64(
        &mut self,
        result_hi: VarRef,
        result_lo: VarRef,
        lhs_hi: VarRef,
        lhs_lo: VarRef,
        rhs_hi: VarRef,
        rhs_lo: VarRef,
        update_host_flags: bool,
    ) {
        self.push(IROp::Add64 {
            result_hi,
            result_lo,
            lhs_hi,
            lhs_lo,
            rhs_hi,
            rhs_lo,
            update_host_flags,
        });
    }

    // -- Memory --

    pub fn ldr(&mut self, flags: MemoryFlags, result: VarRef, address: VarRef) {
        self.push(IROp::MemoryRead {
            flags,
            result,
            address: address.into(),
        });
    }

    pub fn str(&mut self, flags: MemoryFlags, source: VarRef, address: VarRef) {
        self.push(IROp::MemoryWrite {
            flags,
            source: source.into(),
            address: address.into(),
        });
    }

    // -- Pipeline control --

    pub fn flush(&mut self, address_out: VarRef, address_in: VarRef, cpsr_in: VarRef) {
        self.push(IROp::Flush {
            address_out,
            address_in,
            cpsr_in,
        });
    }

    pub fn flush_exchange(
        &mut self,
        address_out: VarRef,
        cpsr_out: VarRef,
        address_in: VarRef,
        cpsr_in: VarRef,
    ) {
        self.push(IROp::FlushExchange {
            address_out,
            cpsr_out,
            address_in,
            cpsr_in,
        });
    }

    // -- Coprocessor --

    pub fn mrc(
        &mut self,
        result: VarRef,
        coprocessor: u32,
        opcode1: u32,
        cn: u32,
        cm: u32,
        opcode2: u32,
    ) {
        self.push(IROp::ReadCoprocessor {
            result,
            coprocessor,
            opcode1,
            cn,
            cm,
            opcode2,
        });
    }

    pub fn mcr(
        &mut self,
        value: AnyRef,
        coprocessor: u32,
        opcode1: u32,
        cn: u32,
        cm: u32,
        opcode2: u32,
    ) {
        self.push(IROp::WriteCoprocessor {
            value,
            coprocessor,
            opcode1,
            cn,
            cm,
            opcode2,
        });
    }
}

impl std::fmt::Display for IREmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for var in &self.vars {
            writeln!(f, "{} {}", var.data_type, var)?;
        }
        writeln!(f)?;
        for (location, op) in self.code.iter().enumerate() {
            writeln!(f, "{:03} {}", location, op)?;
        }
        Ok(())
    }
}
