//! Lifts decoded guest instructions into condition-grouped
//! micro-blocks of IR.
//!
//! Each lift template stores the advanced PC at the end of the
//! instruction; the context load/store elision pass folds the
//! redundant intermediate stores away. R15 reads resolve to
//! translate-time constants because the instruction address is
//! statically known inside a micro-block.

use arm_jit_core::{
    AluOp, AnyRef, BasicBlock, Bus, Condition, GuestReg, IRDataType, JitError, Memory,
    MemoryFlags, MicroBlock, Mode, ShiftOp, VarRef, GPR,
};

use crate::decode::{self, DataOp, Decoded, InstrKind, Operand2, ShiftType, ShiftedRegister};

/// Hard cap on guest instructions per basic block.
const MAX_BLOCK_LENGTH: u32 = 32;

/// Exception vector offsets.
const VECTOR_UNDEFINED: u32 = 0x04;
const VECTOR_SWI: u32 = 0x08;

enum Status {
    Continue,
    BreakBasicBlock,
}

pub struct Translator {
    exception_base: u32,
}

impl Translator {
    pub fn new(exception_base: u32) -> Self {
        Translator { exception_base }
    }

    pub fn set_exception_base(&mut self, exception_base: u32) {
        self.exception_base = exception_base;
    }

    /// Translate the guest code a block key denotes into micro-blocks.
    pub fn translate(
        &self,
        block: &mut BasicBlock,
        memory: &mut dyn Memory,
    ) -> Result<(), JitError> {
        let key = block.key;
        let mode = key.mode()?;
        let thumb = key.thumb();
        let isize = key.instruction_size();

        let mut lift = Lift {
            mode,
            thumb,
            isize,
            address: key.fetch_address(),
            exception_base: self.exception_base,
            uses_exception_base: false,
            current: None,
            done: Vec::new(),
        };

        loop {
            let decoded = if thumb {
                decode::decode_thumb(memory.read_half(lift.address, Bus::Code))
            } else {
                decode::decode_arm(memory.read_word(lift.address, Bus::Code))
            };

            lift.begin_instruction(decoded.condition);
            block.length += 1;

            let status = lift.handle(&decoded)?;
            match status {
                Status::Continue => {
                    lift.advance_pc()?;
                    lift.address = lift.address.wrapping_add(isize);
                    if block.length >= MAX_BLOCK_LENGTH {
                        break;
                    }
                }
                Status::BreakBasicBlock => break,
            }
        }

        lift.finish();
        block.micro_blocks = lift.done;
        block.uses_exception_base = lift.uses_exception_base;
        Ok(())
    }
}

struct Lift {
    mode: Mode,
    thumb: bool,
    isize: u32,
    /// Address of the instruction currently being lifted.
    address: u32,
    exception_base: u32,
    uses_exception_base: bool,
    current: Option<MicroBlock>,
    done: Vec<MicroBlock>,
}

impl Lift {
    fn begin_instruction(&mut self, condition: Condition) {
        let split = match &self.current {
            Some(mb) => mb.condition != condition,
            None => true,
        };
        if split {
            if let Some(mb) = self.current.take() {
                self.done.push(mb);
            }
            self.current = Some(MicroBlock::new(condition));
        }
        let mb = self.current.as_mut().unwrap();
        mb.length += 1;
    }

    fn finish(&mut self) {
        if let Some(mb) = self.current.take() {
            self.done.push(mb);
        }
    }

    fn mb(&mut self) -> &mut MicroBlock {
        self.current.as_mut().unwrap()
    }

    /// The value R15 reads as during the current instruction.
    fn pc_value(&self) -> u32 {
        self.address.wrapping_add(2 * self.isize)
    }

    fn reg(&self, reg: GPR) -> GuestReg {
        GuestReg::new(reg, self.mode)
    }

    fn new_var(&mut self, label: &'static str) -> VarRef {
        self.mb()
            .emitter
            .create_var(IRDataType::UInt32, Some(label))
    }

    fn new_var_typed(&mut self, data_type: IRDataType, label: &'static str) -> VarRef {
        self.mb().emitter.create_var(data_type, Some(label))
    }

    /// Read a guest register as an operand; R15 reads resolve to a
    /// constant (plus `pc_extra` for the register-shift fetch delay).
    fn get_reg_any(&mut self, reg: GPR, pc_extra: u32) -> AnyRef {
        if reg == GPR::PC {
            AnyRef::from(self.pc_value().wrapping_add(pc_extra))
        } else {
            AnyRef::Var(self.load_reg(reg))
        }
    }

    /// Read a guest register into a variable.
    fn get_reg_var(&mut self, reg: GPR, pc_extra: u32) -> VarRef {
        match self.get_reg_any(reg, pc_extra) {
            AnyRef::Var(var) => var,
            value => {
                let var = self.new_var("pc");
                self.mb().emitter.mov(var, value, false);
                var
            }
        }
    }

    fn load_reg(&mut self, reg: GPR) -> VarRef {
        let guest = self.reg(reg);
        let var = self.new_var("reg");
        self.mb().emitter.load_gpr(guest, var);
        var
    }

    fn store_reg(&mut self, reg: GPR, value: impl Into<AnyRef>) -> Result<(), JitError> {
        let guest = self.reg(reg);
        self.mb().emitter.store_gpr(guest, value.into())
    }

    /// Store the pipeline-advanced PC for the next instruction.
    fn advance_pc(&mut self) -> Result<(), JitError> {
        let next = self.address.wrapping_add(3 * self.isize);
        self.store_reg(GPR::PC, next)
    }

    /// Terminate the block at a dynamic target held in `address_in`.
    fn flush_to(&mut self, address_in: VarRef, cpsr_in: Option<VarRef>) -> Result<(), JitError> {
        let cpsr = match cpsr_in {
            Some(var) => var,
            None => {
                let var = self.new_var("cpsr");
                self.mb().emitter.load_cpsr(var);
                var
            }
        };
        let out = self.new_var("pc");
        self.mb().emitter.flush(out, address_in, cpsr);
        self.store_reg(GPR::PC, out)
    }

    /// Terminate the block at a dynamic target, switching instruction
    /// sets on bit 0 of the target.
    fn flush_exchange_to(&mut self, address_in: VarRef) -> Result<(), JitError> {
        let cpsr_in = self.new_var("cpsr");
        self.mb().emitter.load_cpsr(cpsr_in);
        let address_out = self.new_var("pc");
        let cpsr_out = self.new_var("cpsr");
        self.mb()
            .emitter
            .flush_exchange(address_out, cpsr_out, address_in, cpsr_in);
        self.mb().emitter.store_cpsr(cpsr_out.into())?;
        self.store_reg(GPR::PC, address_out)
    }

    fn handle(&mut self, decoded: &Decoded) -> Result<Status, JitError> {
        match &decoded.kind {
            InstrKind::DataProcessing(dp) => self.data_processing(dp),
            InstrKind::Multiply(mul) => self.multiply(mul),
            InstrKind::MultiplyLong(mul) => self.multiply_long(mul),
            InstrKind::SingleDataSwap(swp) => self.single_data_swap(swp),
            InstrKind::BranchExchange(bx) => self.branch_exchange(bx),
            InstrKind::HalfwordSignedTransfer(hst) => self.halfword_signed_transfer(hst),
            InstrKind::SingleDataTransfer(sdt) => self.single_data_transfer(sdt),
            InstrKind::BlockDataTransfer(bdt) => self.block_data_transfer(bdt),
            InstrKind::Branch(b) => self.branch(b),
            InstrKind::CountLeadingZeros(clz) => self.count_leading_zeros(clz),
            InstrKind::SaturatingAddSub(q) => self.saturating_add_sub(q),
            InstrKind::ParallelAddSub(p) => self.parallel_add_sub(p),
            InstrKind::StatusTransfer(st) => self.status_transfer(st),
            InstrKind::CoprocessorRegisterTransfer(cp) => self.coprocessor_transfer(cp),
            InstrKind::SoftwareInterrupt(_) => self.exception(VECTOR_SWI, Mode::Supervisor),
            InstrKind::ThumbBlPrefix(prefix) => {
                let lr = self.pc_value().wrapping_add_signed(prefix.offset);
                self.store_reg(GPR::LR, lr)?;
                Ok(Status::Continue)
            }
            InstrKind::ThumbBlSuffix(suffix) => self.thumb_bl_suffix(suffix),
            InstrKind::Undefined(word) => {
                tracing::debug!(instruction = *word, address = self.address, "undefined");
                self.exception(VECTOR_UNDEFINED, Mode::Undefined)
            }
        }
    }

    // -- Data processing --

    fn data_processing(&mut self, dp: &decode::DataProcessing) -> Result<Status, JitError> {
        let set_flags = dp.set_flags;
        let shifter_flags = set_flags && dp.opcode.is_logical();

        // Register reads during a shift-by-register see R15 one fetch
        // further ahead.
        let pc_extra = match &dp.operand2 {
            Operand2::Register(shifted) if !shifted.immediate => self.isize,
            _ => 0,
        };

        let op2 = match &dp.operand2 {
            Operand2::Immediate(imm) => {
                let value = imm.decode();
                if shifter_flags && imm.rotate != 0 {
                    if value >> 31 != 0 {
                        self.mb().emitter.set_carry();
                    } else {
                        self.mb().emitter.clear_carry();
                    }
                }
                AnyRef::from(value)
            }
            Operand2::Register(shifted) => {
                self.shifter_operand(shifted, pc_extra, shifter_flags)?
            }
        };

        use DataOp::*;
        let result = if dp.opcode.is_compare() {
            None
        } else {
            Some(self.new_var("result"))
        };

        let emit_alu = |lift: &mut Lift, op: AluOp, result: Option<VarRef>| -> Result<(), JitError> {
            let lhs = lift.alu_lhs(dp.reg_op1, pc_extra);
            lift.mb().emitter.alu(op, result, lhs, op2, set_flags)
        };

        match dp.opcode {
            And => emit_alu(self, AluOp::And, result)?,
            Eor => emit_alu(self, AluOp::Eor, result)?,
            Sub => emit_alu(self, AluOp::Sub, result)?,
            Rsb => emit_alu(self, AluOp::Rsb, result)?,
            Add => emit_alu(self, AluOp::Add, result)?,
            Adc => emit_alu(self, AluOp::Adc, result)?,
            Sbc => emit_alu(self, AluOp::Sbc, result)?,
            Rsc => emit_alu(self, AluOp::Rsc, result)?,
            Tst => emit_alu(self, AluOp::And, None)?,
            Teq => emit_alu(self, AluOp::Eor, None)?,
            Cmp => emit_alu(self, AluOp::Sub, None)?,
            Cmn => emit_alu(self, AluOp::Add, None)?,
            Orr => emit_alu(self, AluOp::Orr, result)?,
            Bic => emit_alu(self, AluOp::Bic, result)?,
            Mov => self.mb().emitter.mov(result.unwrap(), op2, set_flags),
            Mvn => self.mb().emitter.mvn(result.unwrap(), op2, set_flags),
        }

        let writes_pc = result.is_some() && dp.reg_dst == GPR::PC;

        if set_flags && !writes_pc {
            let cpsr_in = self.new_var("cpsr");
            self.mb().emitter.load_cpsr(cpsr_in);
            let cpsr_out = self.new_var("cpsr");
            if dp.opcode.is_logical() {
                self.mb().emitter.update_nzc(cpsr_out, cpsr_in);
            } else {
                self.mb().emitter.update_nzcv(cpsr_out, cpsr_in);
            }
            self.mb().emitter.store_cpsr(cpsr_out.into())?;
        }

        if let Some(result) = result {
            if dp.reg_dst == GPR::PC {
                if set_flags {
                    // Exception return: CPSR is restored from the SPSR
                    // and the flush honors the restored Thumb bit.
                    let spsr = self.new_var("spsr");
                    let mode = self.mode;
                    self.mb().emitter.load_spsr(spsr, mode);
                    self.mb().emitter.store_cpsr(spsr.into())?;
                    self.flush_to(result, Some(spsr))?;
                } else {
                    self.flush_to(result, None)?;
                }
                return Ok(Status::BreakBasicBlock);
            }
            self.store_reg(dp.reg_dst, result)?;
        }

        Ok(Status::Continue)
    }

    /// Read the first ALU operand; Thumb PC-relative forms read an
    /// aligned PC.
    fn alu_lhs(&mut self, reg: GPR, pc_extra: u32) -> VarRef {
        if reg == GPR::PC {
            let mut value = self.pc_value().wrapping_add(pc_extra);
            if self.thumb {
                value &= !2;
            }
            let var = self.new_var("pc");
            self.mb().emitter.mov(var, AnyRef::from(value), false);
            var
        } else {
            self.load_reg(reg)
        }
    }

    /// Lift a shifter operand; returns the shifted value.
    fn shifter_operand(
        &mut self,
        shifted: &ShiftedRegister,
        pc_extra: u32,
        update_host_flags: bool,
    ) -> Result<AnyRef, JitError> {
        let operand = self.get_reg_var(shifted.reg, pc_extra);
        let op = match shifted.shift {
            ShiftType::Lsl => ShiftOp::Lsl,
            ShiftType::Lsr => ShiftOp::Lsr,
            ShiftType::Asr => ShiftOp::Asr,
            ShiftType::Ror => ShiftOp::Ror,
        };
        let amount: AnyRef = if shifted.immediate {
            // Immediate encodings: LSR/ASR #0 mean #32 and ROR #0
            // means RRX; the backend keys those off the constant 0.
            AnyRef::from(shifted.amount_imm)
        } else {
            AnyRef::Var(self.get_reg_var(shifted.amount_reg, pc_extra))
        };
        let result = self.new_var("op2");
        self.mb()
            .emitter
            .shift(op, result, operand, amount, update_host_flags)?;
        Ok(AnyRef::Var(result))
    }

    // -- Multiplies --

    fn multiply(&mut self, mul: &decode::Multiply) -> Result<Status, JitError> {
        let lhs = self.get_reg_var(mul.reg_op1, 0);
        let rhs = self.get_reg_var(mul.reg_op2, 0);
        let result = self.new_var("result");

        if mul.accumulate {
            let product = self.new_var("product");
            self.mb().emitter.mul(None, product, lhs, rhs, false)?;
            let acc = self.get_reg_var(mul.reg_acc, 0);
            self.mb().emitter.alu(
                AluOp::Add,
                Some(result),
                product,
                acc.into(),
                mul.set_flags,
            )?;
        } else {
            self.mb()
                .emitter
                .mul(None, result, lhs, rhs, mul.set_flags)?;
        }

        self.store_reg(mul.reg_dst, result)?;

        if mul.set_flags {
            let cpsr_in = self.new_var("cpsr");
            self.mb().emitter.load_cpsr(cpsr_in);
            let cpsr_out = self.new_var("cpsr");
            self.mb().emitter.update_nz(cpsr_out, cpsr_in);
            self.mb().emitter.store_cpsr(cpsr_out.into())?;
        }
        Ok(Status::Continue)
    }

    fn multiply_long(&mut self, mul: &decode::MultiplyLong) -> Result<Status, JitError> {
        let ty = if mul.signed {
            IRDataType::SInt32
        } else {
            IRDataType::UInt32
        };
        let lhs = self.new_var_typed(ty, "lhs");
        let rhs = self.new_var_typed(ty, "rhs");
        let lhs_reg = self.reg(mul.reg_op1);
        let rhs_reg = self.reg(mul.reg_op2);
        self.mb().emitter.load_gpr(lhs_reg, lhs);
        self.mb().emitter.load_gpr(rhs_reg, rhs);

        let hi = self.new_var_typed(ty, "hi");
        let lo = self.new_var_typed(ty, "lo");
        self.mb()
            .emitter
            .mul(Some(hi), lo, lhs, rhs, mul.set_flags && !mul.accumulate)?;

        let (out_hi, out_lo) = if mul.accumulate {
            let acc_hi = self.get_reg_var(mul.reg_dst_hi, 0);
            let acc_lo = self.get_reg_var(mul.reg_dst_lo, 0);
            let sum_hi = self.new_var("hi");
            let sum_lo = self.new_var("lo");
            self.mb()
                .emitter
                .add64(sum_hi, sum_lo, hi, lo, acc_hi, acc_lo, mul.set_flags);
            (sum_hi, sum_lo)
        } else {
            (hi, lo)
        };

        self.store_reg(mul.reg_dst_lo, out_lo)?;
        self.store_reg(mul.reg_dst_hi, out_hi)?;

        if mul.set_flags {
            let cpsr_in = self.new_var("cpsr");
            self.mb().emitter.load_cpsr(cpsr_in);
            let cpsr_out = self.new_var("cpsr");
            self.mb().emitter.update_nz(cpsr_out, cpsr_in);
            self.mb().emitter.store_cpsr(cpsr_out.into())?;
        }
        Ok(Status::Continue)
    }

    // -- Memory --

    fn single_data_swap(&mut self, swp: &decode::SingleDataSwap) -> Result<Status, JitError> {
        let address = self.get_reg_var(swp.reg_base, 0);
        let loaded = self.new_var("data");
        let read_flags = if swp.byte {
            MemoryFlags::BYTE
        } else {
            MemoryFlags::WORD | MemoryFlags::ROTATE
        };
        self.mb().emitter.ldr(read_flags, loaded, address);

        let source = self.get_reg_var(swp.reg_src, 0);
        let write_flags = if swp.byte {
            MemoryFlags::BYTE
        } else {
            MemoryFlags::WORD
        };
        self.mb().emitter.str(write_flags, source, address);

        if swp.reg_dst == GPR::PC {
            self.flush_to(loaded, None)?;
            return Ok(Status::BreakBasicBlock);
        }
        self.store_reg(swp.reg_dst, loaded)?;
        Ok(Status::Continue)
    }

    fn halfword_signed_transfer(
        &mut self,
        hst: &decode::HalfwordSignedTransfer,
    ) -> Result<Status, JitError> {
        let offset: AnyRef = if hst.immediate {
            AnyRef::from(hst.offset_imm)
        } else {
            AnyRef::Var(self.get_reg_var(hst.offset_reg, 0))
        };
        let flags = match (hst.opcode, hst.load) {
            (1, false) => MemoryFlags::HALF,
            (1, true) => MemoryFlags::HALF | MemoryFlags::ROTATE,
            (2, true) => MemoryFlags::BYTE | MemoryFlags::SIGNED,
            (3, true) => MemoryFlags::HALF | MemoryFlags::SIGNED | MemoryFlags::ARMV4T,
            // Store forms of the signed encodings are v5 doubleword
            // transfers, which this core does not implement.
            _ => return self.exception(VECTOR_UNDEFINED, Mode::Undefined),
        };
        self.transfer(
            hst.reg_base,
            hst.reg_dst,
            offset,
            hst.pre_increment,
            hst.add,
            hst.writeback,
            hst.load,
            flags,
        )
    }

    fn single_data_transfer(
        &mut self,
        sdt: &decode::SingleDataTransfer,
    ) -> Result<Status, JitError> {
        let offset: AnyRef = if sdt.immediate {
            AnyRef::from(sdt.offset_imm)
        } else {
            self.shifter_operand(&sdt.offset_reg, 0, false)?
        };
        let flags = match (sdt.byte, sdt.load) {
            (true, _) => MemoryFlags::BYTE,
            (false, true) => MemoryFlags::WORD | MemoryFlags::ROTATE,
            (false, false) => MemoryFlags::WORD,
        };
        self.transfer(
            sdt.reg_base,
            sdt.reg_dst,
            offset,
            sdt.pre_increment,
            sdt.add,
            sdt.writeback,
            sdt.load,
            flags,
        )
    }

    /// Shared single-transfer template: address computation, access,
    /// writeback and (for loads) the destination store or flush.
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &mut self,
        reg_base: GPR,
        reg_dst: GPR,
        offset: AnyRef,
        pre_increment: bool,
        add: bool,
        writeback: bool,
        load: bool,
        flags: MemoryFlags,
    ) -> Result<Status, JitError> {
        let base = if reg_base == GPR::PC && self.thumb {
            // Thumb PC-relative loads use the word-aligned PC.
            let var = self.new_var("pc");
            let value = self.pc_value() & !2;
            self.mb().emitter.mov(var, AnyRef::from(value), false);
            var
        } else {
            self.get_reg_var(reg_base, 0)
        };

        let alu_op = if add { AluOp::Add } else { AluOp::Sub };
        let offset_address = {
            let var = self.new_var("addr");
            self.mb()
                .emitter
                .alu(alu_op, Some(var), base, offset, false)?;
            var
        };
        let address = if pre_increment { offset_address } else { base };

        // Post-indexed transfers always write back.
        let write_base = !pre_increment || writeback;

        if load {
            let result = self.new_var("data");
            self.mb().emitter.ldr(flags, result, address);
            if write_base && reg_base != reg_dst {
                self.store_reg(reg_base, offset_address)?;
            }
            if reg_dst == GPR::PC {
                self.flush_to(result, None)?;
                return Ok(Status::BreakBasicBlock);
            }
            self.store_reg(reg_dst, result)?;
        } else {
            let source = self.get_reg_var_store(reg_dst);
            self.mb().emitter.str(flags, source, address);
            if write_base {
                self.store_reg(reg_base, offset_address)?;
            }
        }
        Ok(Status::Continue)
    }

    /// Source register for a store; R15 stores the address of the
    /// instruction plus three fetch widths.
    fn get_reg_var_store(&mut self, reg: GPR) -> VarRef {
        self.get_reg_var(reg, if reg == GPR::PC { self.isize } else { 0 })
    }

    fn block_data_transfer(
        &mut self,
        bdt: &decode::BlockDataTransfer,
    ) -> Result<Status, JitError> {
        let list = bdt.reg_list;
        if list == 0 {
            return self.exception(VECTOR_UNDEFINED, Mode::Undefined);
        }

        let count = 4 * list.count_ones();
        let pc_in_list = list & (1 << 15) != 0;
        // S bit: user-bank transfer unless this is an exception
        // return (load with PC in the list).
        let user_transfer = bdt.user_mode && !(bdt.load && pc_in_list);
        let transfer_mode = if user_transfer { Mode::User } else { self.mode };

        let base = self.get_reg_var(bdt.reg_base, 0);

        // Normalize to an ascending transfer from the lowest address.
        let start: i64 = if bdt.add {
            if bdt.pre_increment {
                4
            } else {
                0
            }
        } else if bdt.pre_increment {
            -(count as i64)
        } else {
            4 - count as i64
        };
        let final_delta: i64 = if bdt.add {
            count as i64
        } else {
            -(count as i64)
        };

        let base_in_list = list & (1 << bdt.reg_base.index()) != 0;
        let first_reg = list.trailing_zeros();

        let writeback_value = |lift: &mut Lift| -> Result<VarRef, JitError> {
            let var = lift.new_var("wb");
            lift.mb().emitter.alu(
                AluOp::Add,
                Some(var),
                base,
                AnyRef::from(final_delta as u32),
                false,
            )?;
            Ok(var)
        };

        // A store whose base is in the list (but not first) stores the
        // written-back value, so commit the writeback up front.
        let early_writeback = !bdt.load
            && bdt.writeback
            && base_in_list
            && first_reg != bdt.reg_base.index() as u32;
        if early_writeback {
            let wb = writeback_value(self)?;
            self.store_reg(bdt.reg_base, wb)?;
        }

        let mut loaded_pc = None;
        let mut slot = 0u32;
        for index in 0..16u32 {
            if list & (1 << index) == 0 {
                continue;
            }
            let reg = GPR::from_index(index);
            let address = {
                let var = self.new_var("addr");
                let delta = (start + 4 * slot as i64) as u32;
                self.mb().emitter.alu(
                    AluOp::Add,
                    Some(var),
                    base,
                    AnyRef::from(delta),
                    false,
                )?;
                var
            };
            slot += 1;

            if bdt.load {
                let data = self.new_var("data");
                self.mb().emitter.ldr(MemoryFlags::WORD, data, address);
                if reg == GPR::PC {
                    loaded_pc = Some(data);
                } else {
                    let guest = GuestReg::new(reg, transfer_mode);
                    self.mb().emitter.store_gpr(guest, data.into())?;
                }
            } else {
                let source = if reg == GPR::PC {
                    let var = self.new_var("pc");
                    let value = self.pc_value().wrapping_add(self.isize);
                    self.mb().emitter.mov(var, AnyRef::from(value), false);
                    var
                } else {
                    let guest = GuestReg::new(reg, transfer_mode);
                    let var = self.new_var("reg");
                    self.mb().emitter.load_gpr(guest, var);
                    var
                };
                self.mb().emitter.str(MemoryFlags::WORD, source, address);
            }
        }

        // A load with the base in the list keeps the loaded value.
        let suppress_writeback = bdt.load && base_in_list;
        if bdt.writeback && !suppress_writeback && !early_writeback {
            let wb = writeback_value(self)?;
            self.store_reg(bdt.reg_base, wb)?;
        }

        if let Some(pc) = loaded_pc {
            if bdt.user_mode {
                // Exception return: restore CPSR from SPSR.
                let spsr = self.new_var("spsr");
                let mode = self.mode;
                self.mb().emitter.load_spsr(spsr, mode);
                self.mb().emitter.store_cpsr(spsr.into())?;
                self.flush_to(pc, Some(spsr))?;
            } else {
                self.flush_to(pc, None)?;
            }
            return Ok(Status::BreakBasicBlock);
        }
        Ok(Status::Continue)
    }

    // -- Branches --

    fn branch(&mut self, b: &decode::Branch) -> Result<Status, JitError> {
        let target = self.pc_value().wrapping_add_signed(b.offset);
        if b.link {
            let lr = self.address.wrapping_add(self.isize);
            self.store_reg(GPR::LR, lr)?;
        }
        self.store_reg(GPR::PC, target.wrapping_add(2 * self.isize))?;
        Ok(Status::BreakBasicBlock)
    }

    fn branch_exchange(&mut self, bx: &decode::BranchExchange) -> Result<Status, JitError> {
        let target = self.get_reg_var(bx.reg, 0);
        if bx.link {
            let lr = if self.thumb {
                self.address.wrapping_add(2) | 1
            } else {
                self.address.wrapping_add(4)
            };
            self.store_reg(GPR::LR, lr)?;
        }
        self.flush_exchange_to(target)?;
        Ok(Status::BreakBasicBlock)
    }

    fn thumb_bl_suffix(&mut self, suffix: &decode::ThumbBlSuffix) -> Result<Status, JitError> {
        let lr = self.load_reg(GPR::LR);
        let target = self.new_var("target");
        self.mb().emitter.alu(
            AluOp::Add,
            Some(target),
            lr,
            AnyRef::from(suffix.offset),
            false,
        )?;
        let return_address = self.address.wrapping_add(2) | 1;
        self.store_reg(GPR::LR, return_address)?;

        if suffix.exchange {
            self.flush_exchange_to(target)?;
        } else {
            self.flush_to(target, None)?;
        }
        Ok(Status::BreakBasicBlock)
    }

    // -- Miscellaneous --

    fn count_leading_zeros(
        &mut self,
        clz: &decode::CountLeadingZeros,
    ) -> Result<Status, JitError> {
        let operand = self.get_reg_var(clz.reg_src, 0);
        let result = self.new_var("result");
        self.mb().emitter.clz(result, operand);
        self.store_reg(clz.reg_dst, result)?;
        Ok(Status::Continue)
    }

    fn saturating_add_sub(&mut self, q: &decode::SaturatingAddSub) -> Result<Status, JitError> {
        let lhs = self.get_reg_var(q.reg_lhs, 0);
        let rhs = self.get_reg_var(q.reg_rhs, 0);
        let result = self.new_var("result");
        if q.sub {
            self.mb().emitter.qsub(result, lhs, rhs);
        } else {
            self.mb().emitter.qadd(result, lhs, rhs);
        }
        self.store_reg(q.reg_dst, result)?;

        let cpsr_in = self.new_var("cpsr");
        self.mb().emitter.load_cpsr(cpsr_in);
        let cpsr_out = self.new_var("cpsr");
        self.mb().emitter.update_q(cpsr_out, cpsr_in);
        self.mb().emitter.store_cpsr(cpsr_out.into())?;
        Ok(Status::Continue)
    }

    fn parallel_add_sub(&mut self, p: &decode::ParallelAddSub) -> Result<Status, JitError> {
        let lhs = self.get_reg_var(p.reg_lhs, 0);
        let rhs = self.get_reg_var(p.reg_rhs, 0);
        let result = self.new_var("result");
        self.mb().emitter.parallel(p.opcode, result, lhs, rhs);
        self.store_reg(p.reg_dst, result)?;

        if p.opcode.sets_ge() {
            let cpsr_in = self.new_var("cpsr");
            self.mb().emitter.load_cpsr(cpsr_in);
            let cpsr_out = self.new_var("cpsr");
            self.mb().emitter.update_ge(cpsr_out, cpsr_in);
            self.mb().emitter.store_cpsr(cpsr_out.into())?;
        }
        Ok(Status::Continue)
    }

    fn status_transfer(&mut self, st: &decode::StatusTransfer) -> Result<Status, JitError> {
        if !st.write {
            // MRS
            let value = self.new_var("psr");
            if st.spsr {
                let mode = self.mode;
                self.mb().emitter.load_spsr(value, mode);
            } else {
                self.mb().emitter.load_cpsr(value);
            }
            self.store_reg(st.reg, value)?;
            return Ok(Status::Continue);
        }

        // MSR: only the flag byte (N/Z/C/V and the sticky Q bit) is
        // writable from User mode.
        let mut mask = st.byte_mask;
        if self.mode == Mode::User {
            mask &= 0xFF00_0000;
        }
        if mask == 0 {
            return Ok(Status::Continue);
        }

        let value: AnyRef = if st.immediate {
            AnyRef::from(st.imm.decode())
        } else {
            AnyRef::Var(self.get_reg_var(st.reg, 0))
        };

        let old = self.new_var("psr");
        if st.spsr {
            let mode = self.mode;
            self.mb().emitter.load_spsr(old, mode);
        } else {
            self.mb().emitter.load_cpsr(old);
        }

        let kept = self.new_var("psr");
        self.mb()
            .emitter
            .alu(AluOp::Bic, Some(kept), old, AnyRef::from(mask), false)?;

        let masked: AnyRef = match value {
            AnyRef::Const(constant) => AnyRef::from(constant.value & mask),
            AnyRef::Var(var) => {
                let out = self.new_var("psr");
                self.mb()
                    .emitter
                    .alu(AluOp::And, Some(out), var, AnyRef::from(mask), false)?;
                AnyRef::Var(out)
            }
            AnyRef::Null => unreachable!(),
        };

        let merged = self.new_var("psr");
        self.mb()
            .emitter
            .alu(AluOp::Orr, Some(merged), kept, masked, false)?;

        if st.spsr {
            let mode = self.mode;
            self.mb().emitter.store_spsr(merged.into(), mode);
            return Ok(Status::Continue);
        }

        self.mb().emitter.store_cpsr(merged.into())?;

        // Writing the control byte may have changed mode or
        // instruction set; re-enter through the dispatcher.
        if mask & 0xFF != 0 {
            let next = self.new_var("pc");
            let value = self.address.wrapping_add(self.isize);
            self.mb().emitter.mov(next, AnyRef::from(value), false);
            self.flush_to(next, Some(merged))?;
            return Ok(Status::BreakBasicBlock);
        }
        Ok(Status::Continue)
    }

    fn coprocessor_transfer(
        &mut self,
        cp: &decode::CoprocessorRegisterTransfer,
    ) -> Result<Status, JitError> {
        if cp.load {
            let result = self.new_var("result");
            self.mb()
                .emitter
                .mrc(result, cp.coprocessor, cp.opcode1, cp.cn, cp.cm, cp.opcode2);
            if cp.reg == GPR::PC {
                // MRC to R15 moves the top nibble into the flags.
                let cpsr_in = self.new_var("cpsr");
                self.mb().emitter.load_cpsr(cpsr_in);
                let kept = self.new_var("cpsr");
                self.mb().emitter.alu(
                    AluOp::And,
                    Some(kept),
                    cpsr_in,
                    AnyRef::from(0x0FFF_FFFFu32),
                    false,
                )?;
                let flags = self.new_var("flags");
                self.mb().emitter.alu(
                    AluOp::And,
                    Some(flags),
                    result,
                    AnyRef::from(0xF000_0000u32),
                    false,
                )?;
                let merged = self.new_var("cpsr");
                self.mb()
                    .emitter
                    .alu(AluOp::Orr, Some(merged), kept, flags.into(), false)?;
                self.mb().emitter.store_cpsr(merged.into())?;
            } else {
                self.store_reg(cp.reg, result)?;
            }
        } else {
            let value = self.get_reg_var_store(cp.reg);
            self.mb().emitter.mcr(
                value.into(),
                cp.coprocessor,
                cp.opcode1,
                cp.cn,
                cp.cm,
                cp.opcode2,
            );
        }
        Ok(Status::Continue)
    }

    /// Lift an exception entry: bank the CPSR, switch mode, mask IRQs,
    /// drop to ARM state and jump through the exception base.
    fn exception(&mut self, vector: u32, new_mode: Mode) -> Result<Status, JitError> {
        self.uses_exception_base = true;

        let cpsr = self.new_var("cpsr");
        self.mb().emitter.load_cpsr(cpsr);
        self.mb().emitter.store_spsr(cpsr.into(), new_mode);

        // Clear mode and Thumb bits, then select the new mode with
        // IRQs masked.
        let cleared = self.new_var("cpsr");
        self.mb()
            .emitter
            .alu(AluOp::Bic, Some(cleared), cpsr, AnyRef::from(0x3Fu32), false)?;
        let updated = self.new_var("cpsr");
        let set_bits = new_mode as u32 | 0x80;
        self.mb().emitter.alu(
            AluOp::Orr,
            Some(updated),
            cleared,
            AnyRef::from(set_bits),
            false,
        )?;
        self.mb().emitter.store_cpsr(updated.into())?;

        // Return address for the handler.
        let lr = self.address.wrapping_add(self.isize);
        let lr_reg = GuestReg::new(GPR::LR, new_mode);
        self.mb().emitter.store_gpr(lr_reg, AnyRef::from(lr))?;

        // ARM-state pipeline offset at the vector.
        let target = self.exception_base.wrapping_add(vector).wrapping_add(8);
        self.store_reg(GPR::PC, target)?;
        Ok(Status::BreakBasicBlock)
    }
}
