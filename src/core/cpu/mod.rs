use crate::core::cpu::cop0::{Cop0, ExceptionCode};
use crate::core::cpu::cop1::Cop1;
use crate::core::cpu::instruction::{Instruction, OPCODE_TABLE_SIZE, Opcode};
use crate::core::cpu::tlb::{BusAccess, TlbError, TlbErrorKind, resolve_virtual_address};
use crate::core::memory::Bus;
use tracing::debug;

pub mod cop0;
pub mod cop1;
pub mod disassembler;
pub mod instruction;
pub mod tlb;

pub const CYCLES_PER_INSTR: u64 = 1;
// Count is a 32-bit register kept pre-shifted, so the accumulator is 33 bits
const COUNT_MASK: u64 = 0x1_FFFF_FFFF;
const REG_LINK: usize = 31;

#[derive(Debug)]
pub enum CpuException {
    AddressErrorLoad(u64),
    AddressErrorStore(u64),
    Tlb(TlbError),
    SysCall,
    BreakPoint,
    Trap,
    ReservedInstruction(u32), // coprocessor index reported in Cause.CE
    CoprocessorUnusable(u32),
    ArithmeticOverflow,
}

pub type OperationException = Result<(), CpuException>;
pub type OpHandler = fn(&mut Cpu, &mut dyn Bus, &Instruction) -> OperationException;

pub struct Cpu {
    op_functions: [OpHandler; OPCODE_TABLE_SIZE],
    pub cp0: Cop0,
    pub cop1: Cop1,
    gpr: [u64; 32],
    hi: u64,
    lo: u64,
    pub pc: u64,
    pub next_pc: u64,
    pub prev_pc: u64,
    /// Set by a taken branch; consumed by the delay-slot bookkeeping of the
    /// exception engine. Cleared before every instruction.
    pub branch: bool,
    /// Raised by the exception engine so a compiled block can abort early.
    pub exception: bool,
    llbit: bool,
    /// Cached IM & IP summary, refreshed on every CP0 change.
    pub interrupts: u8,
}

impl Cpu {
    pub fn new() -> Self {
        let mut cpu = Cpu {
            op_functions: [Cpu::op_reserved; OPCODE_TABLE_SIZE],
            cp0: Cop0::new(),
            cop1: Cop1::new(),
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            pc: 0,
            next_pc: 4,
            prev_pc: 0,
            branch: false,
            exception: false,
            llbit: false,
            interrupts: 0,
        };

        cpu.init_op_functions();

        cpu
    }

    fn init_op_functions(&mut self) {
        use Opcode::*;
        self.op_functions[NOP as usize] = Cpu::op_nop;
        self.op_functions[CACHE as usize] = Cpu::op_nop;
        self.op_functions[LUI as usize] = Cpu::op_lui;
        // 32-bit shifts
        self.op_functions[SLL as usize] = Cpu::op_shift32::<true, false, true>;
        self.op_functions[SRL as usize] = Cpu::op_shift32::<false, false, true>;
        self.op_functions[SRA as usize] = Cpu::op_shift32::<false, true, true>;
        self.op_functions[SLLV as usize] = Cpu::op_shift32::<true, false, false>;
        self.op_functions[SRLV as usize] = Cpu::op_shift32::<false, false, false>;
        self.op_functions[SRAV as usize] = Cpu::op_shift32::<false, true, false>;
        // 64-bit shifts
        self.op_functions[DSLL as usize] = Cpu::op_shift64::<true, false, true, false>;
        self.op_functions[DSRL as usize] = Cpu::op_shift64::<false, false, true, false>;
        self.op_functions[DSRA as usize] = Cpu::op_shift64::<false, true, true, false>;
        self.op_functions[DSLL32 as usize] = Cpu::op_shift64::<true, false, true, true>;
        self.op_functions[DSRL32 as usize] = Cpu::op_shift64::<false, false, true, true>;
        self.op_functions[DSRA32 as usize] = Cpu::op_shift64::<false, true, true, true>;
        self.op_functions[DSLLV as usize] = Cpu::op_shift64::<true, false, false, false>;
        self.op_functions[DSRLV as usize] = Cpu::op_shift64::<false, false, false, false>;
        self.op_functions[DSRAV as usize] = Cpu::op_shift64::<false, true, false, false>;
        // jumps
        self.op_functions[J as usize] = Cpu::op_j::<false>;
        self.op_functions[JAL as usize] = Cpu::op_j::<true>;
        self.op_functions[JR as usize] = Cpu::op_jr;
        self.op_functions[JALR as usize] = Cpu::op_jalr;
        // syscall / break
        self.op_functions[SYSCALL as usize] = Cpu::op_syscall;
        self.op_functions[BREAK as usize] = Cpu::op_break;
        // hi / lo
        self.op_functions[MFHI as usize] = Cpu::op_mf_lohi::<false>;
        self.op_functions[MFLO as usize] = Cpu::op_mf_lohi::<true>;
        self.op_functions[MTHI as usize] = Cpu::op_mt_lohi::<false>;
        self.op_functions[MTLO as usize] = Cpu::op_mt_lohi::<true>;
        // multiply / divide
        self.op_functions[MULT as usize] = Cpu::op_mult::<true>;
        self.op_functions[MULTU as usize] = Cpu::op_mult::<false>;
        self.op_functions[DMULT as usize] = Cpu::op_dmult::<true>;
        self.op_functions[DMULTU as usize] = Cpu::op_dmult::<false>;
        self.op_functions[DIV as usize] = Cpu::op_div;
        self.op_functions[DIVU as usize] = Cpu::op_divu;
        self.op_functions[DDIV as usize] = Cpu::op_ddiv;
        self.op_functions[DDIVU as usize] = Cpu::op_ddivu;
        // 32-bit add / sub
        self.op_functions[ADD as usize] = Cpu::op_arithmetic32::<true, true, false>;
        self.op_functions[ADDU as usize] = Cpu::op_arithmetic32::<true, false, false>;
        self.op_functions[SUB as usize] = Cpu::op_arithmetic32::<false, true, false>;
        self.op_functions[SUBU as usize] = Cpu::op_arithmetic32::<false, false, false>;
        self.op_functions[ADDI as usize] = Cpu::op_arithmetic32::<true, true, true>;
        self.op_functions[ADDIU as usize] = Cpu::op_arithmetic32::<true, false, true>;
        // 64-bit add / sub
        self.op_functions[DADD as usize] = Cpu::op_arithmetic64::<true, true, false>;
        self.op_functions[DADDU as usize] = Cpu::op_arithmetic64::<true, false, false>;
        self.op_functions[DSUB as usize] = Cpu::op_arithmetic64::<false, true, false>;
        self.op_functions[DSUBU as usize] = Cpu::op_arithmetic64::<false, false, false>;
        self.op_functions[DADDI as usize] = Cpu::op_arithmetic64::<true, true, true>;
        self.op_functions[DADDIU as usize] = Cpu::op_arithmetic64::<true, false, true>;
        // logical
        self.op_functions[AND as usize] = Cpu::op_and;
        self.op_functions[OR as usize] = Cpu::op_or;
        self.op_functions[XOR as usize] = Cpu::op_xor;
        self.op_functions[NOR as usize] = Cpu::op_nor;
        self.op_functions[ANDI as usize] = Cpu::op_andi;
        self.op_functions[ORI as usize] = Cpu::op_ori;
        self.op_functions[XORI as usize] = Cpu::op_xori;
        // compare
        self.op_functions[SLT as usize] = Cpu::op_compare::<true, false>;
        self.op_functions[SLTU as usize] = Cpu::op_compare::<false, false>;
        self.op_functions[SLTI as usize] = Cpu::op_compare::<true, true>;
        self.op_functions[SLTIU as usize] = Cpu::op_compare::<false, true>;
        // branches
        self.op_functions[BEQ as usize] = Cpu::op_beq::<false>;
        self.op_functions[BEQL as usize] = Cpu::op_beq::<true>;
        self.op_functions[BNE as usize] = Cpu::op_bne::<false>;
        self.op_functions[BNEL as usize] = Cpu::op_bne::<true>;
        self.op_functions[BLEZ as usize] = Cpu::op_blez::<false>;
        self.op_functions[BLEZL as usize] = Cpu::op_blez::<true>;
        self.op_functions[BGTZ as usize] = Cpu::op_bgtz::<false>;
        self.op_functions[BGTZL as usize] = Cpu::op_bgtz::<true>;
        self.op_functions[BLTZ as usize] = Cpu::op_bltz::<false>;
        self.op_functions[BLTZL as usize] = Cpu::op_bltz::<true>;
        self.op_functions[BGEZ as usize] = Cpu::op_bgez::<false>;
        self.op_functions[BGEZL as usize] = Cpu::op_bgez::<true>;
        self.op_functions[BLTZAL as usize] = Cpu::op_bltzal;
        self.op_functions[BGEZAL as usize] = Cpu::op_bgezal;
        self.op_functions[BGEZALL as usize] = Cpu::op_bgezall;
        // traps
        self.op_functions[TGE as usize] = Cpu::op_tge::<false>;
        self.op_functions[TGEU as usize] = Cpu::op_tgeu::<false>;
        self.op_functions[TLT as usize] = Cpu::op_tlt::<false>;
        self.op_functions[TLTU as usize] = Cpu::op_tltu::<false>;
        self.op_functions[TEQ as usize] = Cpu::op_teq::<false>;
        self.op_functions[TNE as usize] = Cpu::op_tne::<false>;
        self.op_functions[TGEI as usize] = Cpu::op_tge::<true>;
        self.op_functions[TGEIU as usize] = Cpu::op_tgeu::<true>;
        self.op_functions[TLTI as usize] = Cpu::op_tlt::<true>;
        self.op_functions[TLTIU as usize] = Cpu::op_tltu::<true>;
        self.op_functions[TEQI as usize] = Cpu::op_teq::<true>;
        self.op_functions[TNEI as usize] = Cpu::op_tne::<true>;
        // loads
        self.op_functions[LB as usize] = Cpu::op_lb::<true>;
        self.op_functions[LBU as usize] = Cpu::op_lb::<false>;
        self.op_functions[LH as usize] = Cpu::op_lh::<true>;
        self.op_functions[LHU as usize] = Cpu::op_lh::<false>;
        self.op_functions[LW as usize] = Cpu::op_lw::<true>;
        self.op_functions[LWU as usize] = Cpu::op_lw::<false>;
        self.op_functions[LD as usize] = Cpu::op_ld;
        self.op_functions[LWL as usize] = Cpu::op_lwl;
        self.op_functions[LWR as usize] = Cpu::op_lwr;
        self.op_functions[LDL as usize] = Cpu::op_ldl;
        self.op_functions[LDR as usize] = Cpu::op_ldr;
        self.op_functions[LL as usize] = Cpu::op_ll;
        self.op_functions[LLD as usize] = Cpu::op_lld;
        // stores
        self.op_functions[SB as usize] = Cpu::op_sb;
        self.op_functions[SH as usize] = Cpu::op_sh;
        self.op_functions[SW as usize] = Cpu::op_sw;
        self.op_functions[SD as usize] = Cpu::op_sd;
        self.op_functions[SWL as usize] = Cpu::op_swl;
        self.op_functions[SWR as usize] = Cpu::op_swr;
        self.op_functions[SDL as usize] = Cpu::op_sdl;
        self.op_functions[SDR as usize] = Cpu::op_sdr;
        self.op_functions[SC as usize] = Cpu::op_sc;
        self.op_functions[SCD as usize] = Cpu::op_scd;
        // CP0
        self.op_functions[MFC0 as usize] = Cpu::op_mfc0;
        self.op_functions[DMFC0 as usize] = Cpu::op_dmfc0;
        self.op_functions[MTC0 as usize] = Cpu::op_mtc0;
        self.op_functions[DMTC0 as usize] = Cpu::op_dmtc0;
        self.op_functions[TLBR as usize] = Cpu::op_tlbr;
        self.op_functions[TLBWI as usize] = Cpu::op_tlbwi;
        self.op_functions[TLBWR as usize] = Cpu::op_tlbwr;
        self.op_functions[TLBP as usize] = Cpu::op_tlbp;
        self.op_functions[ERET as usize] = Cpu::op_eret;
        // CP1 (handlers live in cop1.rs)
        self.op_functions[MFC1 as usize] = Cpu::op_mfc1;
        self.op_functions[DMFC1 as usize] = Cpu::op_dmfc1;
        self.op_functions[MTC1 as usize] = Cpu::op_mtc1;
        self.op_functions[DMTC1 as usize] = Cpu::op_dmtc1;
        self.op_functions[CFC1 as usize] = Cpu::op_cfc1;
        self.op_functions[CTC1 as usize] = Cpu::op_ctc1;
        self.op_functions[BC1F as usize] = Cpu::op_bc1::<false, false>;
        self.op_functions[BC1T as usize] = Cpu::op_bc1::<true, false>;
        self.op_functions[BC1FL as usize] = Cpu::op_bc1::<false, true>;
        self.op_functions[BC1TL as usize] = Cpu::op_bc1::<true, true>;
        self.op_functions[LWC1 as usize] = Cpu::op_lwc1;
        self.op_functions[SWC1 as usize] = Cpu::op_swc1;
        self.op_functions[LDC1 as usize] = Cpu::op_ldc1;
        self.op_functions[SDC1 as usize] = Cpu::op_sdc1;
        self.op_functions[CP_ADD_S as usize] = Cpu::op_cp_add_s;
        self.op_functions[CP_ADD_D as usize] = Cpu::op_cp_add_d;
        self.op_functions[CP_SUB_S as usize] = Cpu::op_cp_sub_s;
        self.op_functions[CP_SUB_D as usize] = Cpu::op_cp_sub_d;
        self.op_functions[CP_MUL_S as usize] = Cpu::op_cp_mul_s;
        self.op_functions[CP_MUL_D as usize] = Cpu::op_cp_mul_d;
        self.op_functions[CP_DIV_S as usize] = Cpu::op_cp_div_s;
        self.op_functions[CP_DIV_D as usize] = Cpu::op_cp_div_d;
        self.op_functions[CP_SQRT_S as usize] = Cpu::op_cp_sqrt_s;
        self.op_functions[CP_SQRT_D as usize] = Cpu::op_cp_sqrt_d;
        self.op_functions[CP_ABS_S as usize] = Cpu::op_cp_abs_s;
        self.op_functions[CP_ABS_D as usize] = Cpu::op_cp_abs_d;
        self.op_functions[CP_MOV_S as usize] = Cpu::op_cp_mov_s;
        self.op_functions[CP_MOV_D as usize] = Cpu::op_cp_mov_d;
        self.op_functions[CP_NEG_S as usize] = Cpu::op_cp_neg_s;
        self.op_functions[CP_NEG_D as usize] = Cpu::op_cp_neg_d;
        self.op_functions[CP_TRUNC_L_S as usize] = Cpu::op_cp_trunc_l_s;
        self.op_functions[CP_TRUNC_L_D as usize] = Cpu::op_cp_trunc_l_d;
        self.op_functions[CP_TRUNC_W_S as usize] = Cpu::op_cp_trunc_w_s;
        self.op_functions[CP_TRUNC_W_D as usize] = Cpu::op_cp_trunc_w_d;
        self.op_functions[CP_CVT_S_D as usize] = Cpu::op_cp_cvt_s_d;
        self.op_functions[CP_CVT_S_W as usize] = Cpu::op_cp_cvt_s_w;
        self.op_functions[CP_CVT_S_L as usize] = Cpu::op_cp_cvt_s_l;
        self.op_functions[CP_CVT_D_S as usize] = Cpu::op_cp_cvt_d_s;
        self.op_functions[CP_CVT_D_W as usize] = Cpu::op_cp_cvt_d_w;
        self.op_functions[CP_CVT_D_L as usize] = Cpu::op_cp_cvt_d_l;
        self.op_functions[CP_CVT_W_S as usize] = Cpu::op_cp_cvt_w_s;
        self.op_functions[CP_CVT_W_D as usize] = Cpu::op_cp_cvt_w_d;
        self.op_functions[CP_CVT_L_S as usize] = Cpu::op_cp_cvt_l_s;
        self.op_functions[CP_CVT_L_D as usize] = Cpu::op_cp_cvt_l_d;
        self.op_functions[CP_C_UN_S as usize] = Cpu::op_cp_c_un_s;
        self.op_functions[CP_C_UN_D as usize] = Cpu::op_cp_c_un_d;
        self.op_functions[CP_C_EQ_S as usize] = Cpu::op_cp_c_eq_s;
        self.op_functions[CP_C_EQ_D as usize] = Cpu::op_cp_c_eq_d;
        self.op_functions[CP_C_LT_S as usize] = Cpu::op_cp_c_lt_s;
        self.op_functions[CP_C_LT_D as usize] = Cpu::op_cp_c_lt_d;
        self.op_functions[CP_C_LE_S as usize] = Cpu::op_cp_c_le_s;
        self.op_functions[CP_C_LE_D as usize] = Cpu::op_cp_c_le_d;
        self.op_functions[CP_C_ULE_S as usize] = Cpu::op_cp_c_ule_s;
        self.op_functions[CP_C_ULE_D as usize] = Cpu::op_cp_c_ule_d;
        // fallbacks
        self.op_functions[RESERVED as usize] = Cpu::op_reserved;
        self.op_functions[RESERVED_COP2 as usize] = Cpu::op_reserved_cop2;
        self.op_functions[UNSUPPORTED as usize] = Cpu::op_unsupported;
    }

    // ==========================================================================
    // register file

    #[inline(always)]
    pub(crate) fn reg(&self, register: usize) -> u64 {
        self.gpr[register]
    }

    #[inline(always)]
    pub(crate) fn write_reg(&mut self, register: usize, value: u64) {
        self.gpr[register] = value;
        // reg[0] is hard-wired to zero
        self.gpr[0] = 0;
    }

    /// All 32-bit results are architecturally sign-extended.
    #[inline(always)]
    pub(crate) fn write_reg32(&mut self, register: usize, value: u32) {
        self.write_reg(register, value as i32 as i64 as u64);
    }

    pub fn register(&self, register: usize) -> u64 {
        self.gpr[register]
    }

    pub fn set_register(&mut self, register: usize, value: u64) {
        self.write_reg(register, value);
    }

    pub fn registers(&self) -> &[u64; 32] {
        &self.gpr
    }

    pub fn hi(&self) -> u64 {
        self.hi
    }

    pub fn lo(&self) -> u64 {
        self.lo
    }

    pub fn llbit(&self) -> bool {
        self.llbit
    }

    /// Reset-time entry point, kseg1-mapped boot vector.
    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
        self.next_pc = pc.wrapping_add(4);
    }

    pub(crate) fn handler(&self, opcode: Opcode) -> OpHandler {
        self.op_functions[opcode as usize]
    }

    // ==========================================================================
    // stepping

    /// Count/Compare timer tick. Shared by the interpreter step and the
    /// dynarec dispatch path.
    pub fn update_count(&mut self) {
        self.cp0.count = (self.cp0.count + CYCLES_PER_INSTR) & COUNT_MASK;
        if self.cp0.count >> 1 == self.cp0.compare as u64 {
            self.cp0.cause.set_ip7(true);
            debug!("Compare interrupt");
            self.update_interrupts();
        }
    }

    /// True when an interrupt exception was delivered at the current PC.
    pub fn take_pending_interrupt(&mut self) -> bool {
        if self.interrupts > 0
            && self.cp0.status.ie()
            && !self.cp0.status.exl()
            && !self.cp0.status.erl()
        {
            self.handle_exception(self.pc, ExceptionCode::Interrupt, 0);
            return true;
        }
        false
    }

    #[inline(always)]
    pub(crate) fn advance_pc(&mut self) {
        self.prev_pc = self.pc;
        self.pc = self.next_pc;
        self.next_pc = self.pc.wrapping_add(4);
        self.branch = false;
    }

    /// One interpreted instruction. Returns the cycle count credited to the
    /// scheduler.
    pub fn step(&mut self, bus: &mut dyn Bus) -> u64 {
        self.update_count();

        if self.take_pending_interrupt() {
            return CYCLES_PER_INSTR;
        }

        let fetch_pc = self.pc;
        let word = match self.fetch(bus, fetch_pc) {
            Ok(word) => word,
            Err(ex) => {
                self.raise_at(fetch_pc, ex);
                self.exception = false;
                return CYCLES_PER_INSTR;
            }
        };

        self.advance_pc();

        let i = Instruction(word);
        let opcode = Opcode::from_instruction(&i);
        if let Err(ex) = self.op_functions[opcode as usize](self, bus, &i) {
            self.raise(ex);
        }
        self.exception = false; // only observed by the dynarec
        CYCLES_PER_INSTR
    }

    fn fetch(&mut self, bus: &mut dyn Bus, pc: u64) -> Result<u32, CpuException> {
        if self.check_address_error(0b11, pc) {
            return Err(CpuException::AddressErrorLoad(pc));
        }
        let physical = self.translate(pc, BusAccess::Load)?;
        Ok(bus.read_word(physical))
    }

    // ==========================================================================
    // exception engine

    pub fn update_interrupts(&mut self) {
        self.interrupts = self.cp0.pending_interrupts();
    }

    /// CP0 exception entry: delay-slot fixup, EXL/EPC, cause code, vector
    /// selection, interrupt summary refresh, dynarec abort flag.
    pub fn handle_exception(&mut self, pc: u64, code: ExceptionCode, coprocessor_error: u32) {
        debug!(
            "Exception {:?} (cop {}) at PC={:016X} [branch_delay={}]",
            code, coprocessor_error, pc, self.branch
        );
        // In a branch delay slot, EPC points at the branch PRECEDING the
        // slot so the handler can re-execute the branch on return.
        let mut pc = pc;
        if self.branch {
            self.cp0.cause.set_branch_delay(true);
            self.branch = false;
            pc = pc.wrapping_sub(4);
        } else {
            self.cp0.cause.set_branch_delay(false);
        }

        let was_exl = self.cp0.status.exl();
        if !was_exl {
            self.cp0.epc = pc;
            self.cp0.status.set_exl(true);
        }

        self.cp0.cause.set_exception_code(code as u32);
        if coprocessor_error > 0 {
            self.cp0.cause.set_coprocessor_error(coprocessor_error);
        }

        let base: u64 = if self.cp0.status.bev() {
            0xFFFF_FFFF_BFC0_0200
        } else {
            0xFFFF_FFFF_8000_0000
        };
        let refill = matches!(
            code,
            ExceptionCode::TlbMissLoad | ExceptionCode::TlbMissStore
        ) && self.cp0.tlb_refill
            && !was_exl;
        self.cp0.tlb_refill = false;
        let offset = if refill { 0x000 } else { 0x180 };
        self.set_pc(base + offset);

        self.update_interrupts();
        self.exception = true;
    }

    fn raise(&mut self, ex: CpuException) {
        self.raise_at(self.prev_pc, ex);
    }

    pub(crate) fn raise_at(&mut self, pc: u64, ex: CpuException) {
        use CpuException::*;
        match ex {
            AddressErrorLoad(vaddr) => {
                self.cp0.latch_tlb_exception(vaddr);
                self.handle_exception(pc, ExceptionCode::AddressErrorLoad, 0);
            }
            AddressErrorStore(vaddr) => {
                self.cp0.latch_tlb_exception(vaddr);
                self.handle_exception(pc, ExceptionCode::AddressErrorStore, 0);
            }
            Tlb(err) => {
                self.cp0.latch_tlb_exception(err.vaddr);
                self.cp0.tlb_refill = err.kind == TlbErrorKind::Refill;
                let code = match (err.kind, err.access) {
                    (TlbErrorKind::Modification, _) => ExceptionCode::TlbModification,
                    (_, BusAccess::Load) => ExceptionCode::TlbMissLoad,
                    (_, BusAccess::Store) => ExceptionCode::TlbMissStore,
                };
                self.handle_exception(pc, code, 0);
            }
            SysCall => self.handle_exception(pc, ExceptionCode::Syscall, 0),
            BreakPoint => self.handle_exception(pc, ExceptionCode::Breakpoint, 0),
            Trap => self.handle_exception(pc, ExceptionCode::Trap, 0),
            ReservedInstruction(cop) => {
                self.handle_exception(pc, ExceptionCode::ReservedInstruction, cop)
            }
            CoprocessorUnusable(cop) => {
                self.handle_exception(pc, ExceptionCode::CoprocessorUnusable, cop)
            }
            ArithmeticOverflow => self.handle_exception(pc, ExceptionCode::ArithmeticOverflow, 0),
        }
    }

    /// Shared with the dynarec's per-step exception check.
    pub(crate) fn dispatch_result(&mut self, result: OperationException) {
        if let Err(ex) = result {
            self.raise(ex);
        }
    }

    // ==========================================================================
    // memory access

    /// Address errors precede TLB resolution: sign-extension-invalid
    /// addresses (32-bit mode) and misalignment for the access width.
    #[inline(always)]
    fn check_address_error(&self, mask: u64, vaddr: u64) -> bool {
        (!self.cp0.is_64bit_addressing() && vaddr as i32 as i64 as u64 != vaddr)
            || vaddr & mask != 0
    }

    #[inline(always)]
    fn translate(&self, vaddr: u64, access: BusAccess) -> Result<u32, CpuException> {
        resolve_virtual_address(vaddr, access, &self.cp0).map_err(CpuException::Tlb)
    }

    #[inline(always)]
    fn mem_address(&self, instr: &Instruction) -> u64 {
        self.reg(instr.base()).wrapping_add(instr.signed_immediate16())
    }

    fn read_virtual_byte(&self, bus: &mut dyn Bus, vaddr: u64) -> Result<u8, CpuException> {
        if self.check_address_error(0, vaddr) {
            return Err(CpuException::AddressErrorLoad(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Load)?;
        Ok(bus.read_byte(physical))
    }

    fn read_virtual_half(&self, bus: &mut dyn Bus, vaddr: u64) -> Result<u16, CpuException> {
        if self.check_address_error(0b1, vaddr) {
            return Err(CpuException::AddressErrorLoad(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Load)?;
        Ok(bus.read_half(physical))
    }

    fn read_virtual_word(&self, bus: &mut dyn Bus, vaddr: u64) -> Result<u32, CpuException> {
        if self.check_address_error(0b11, vaddr) {
            return Err(CpuException::AddressErrorLoad(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Load)?;
        Ok(bus.read_word(physical))
    }

    fn read_virtual_dword(&self, bus: &mut dyn Bus, vaddr: u64) -> Result<u64, CpuException> {
        if self.check_address_error(0b111, vaddr) {
            return Err(CpuException::AddressErrorLoad(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Load)?;
        Ok(bus.read_dword(physical))
    }

    // Stores conservatively clear llbit so an SC after any intervening
    // store fails.
    fn write_virtual_byte(
        &mut self,
        bus: &mut dyn Bus,
        vaddr: u64,
        value: u8,
    ) -> OperationException {
        if self.check_address_error(0, vaddr) {
            return Err(CpuException::AddressErrorStore(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Store)?;
        self.llbit = false;
        bus.write_byte(physical, value);
        Ok(())
    }

    fn write_virtual_half(
        &mut self,
        bus: &mut dyn Bus,
        vaddr: u64,
        value: u16,
    ) -> OperationException {
        if self.check_address_error(0b1, vaddr) {
            return Err(CpuException::AddressErrorStore(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Store)?;
        self.llbit = false;
        bus.write_half(physical, value);
        Ok(())
    }

    fn write_virtual_word(
        &mut self,
        bus: &mut dyn Bus,
        vaddr: u64,
        value: u32,
    ) -> OperationException {
        if self.check_address_error(0b11, vaddr) {
            return Err(CpuException::AddressErrorStore(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Store)?;
        self.llbit = false;
        bus.write_word(physical, value);
        Ok(())
    }

    fn write_virtual_dword(
        &mut self,
        bus: &mut dyn Bus,
        vaddr: u64,
        value: u64,
    ) -> OperationException {
        if self.check_address_error(0b111, vaddr) {
            return Err(CpuException::AddressErrorStore(vaddr));
        }
        let physical = self.translate(vaddr, BusAccess::Store)?;
        self.llbit = false;
        bus.write_dword(physical, value);
        Ok(())
    }

    // ==========================================================================
    // branching

    /// Branch targets land after the delay slot; `pc` already points at the
    /// slot while the branch executes.
    #[inline(always)]
    fn branch_abs(&mut self, target: u64) {
        self.next_pc = target;
        self.branch = true;
    }

    #[inline(always)]
    fn conditional_branch(&mut self, instr: &Instruction, condition: bool) {
        if condition {
            let target = self.pc.wrapping_add(instr.signed_immediate16() << 2);
            self.branch_abs(target);
        }
    }

    #[inline(always)]
    fn conditional_branch_likely(&mut self, instr: &Instruction, condition: bool) {
        if condition {
            let target = self.pc.wrapping_add(instr.signed_immediate16() << 2);
            self.branch_abs(target);
        } else {
            // nullify: skip the instruction in the delay slot
            let pc = self.pc;
            self.set_pc(pc.wrapping_add(4));
        }
    }

    /// The return point skips the delay slot.
    #[inline(always)]
    fn link(&mut self, register: usize) {
        let value = self.pc.wrapping_add(4);
        self.write_reg(register, value);
    }

    // ==========================================================================
    // operations

    fn op_nop(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        Ok(())
    }

    fn op_lui(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let value = (instr.signed_immediate16() as i64) << 16;
        self.write_reg(instr.rt(), value as u64);
        Ok(())
    }

    #[inline(always)]
    fn op_logical<F, const IMMEDIATE: bool>(&mut self, instr: &Instruction, log: F)
    where
        F: Fn(u64, u64) -> u64,
    {
        let rs = self.reg(instr.rs());
        if IMMEDIATE {
            let imm = instr.unsigned_immediate16();
            self.write_reg(instr.rt(), log(rs, imm));
        } else {
            let rt = self.reg(instr.rt());
            self.write_reg(instr.rd(), log(rs, rt));
        }
    }

    fn op_and(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, false>(instr, |a, b| a & b);
        Ok(())
    }
    fn op_or(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, false>(instr, |a, b| a | b);
        Ok(())
    }
    fn op_xor(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, false>(instr, |a, b| a ^ b);
        Ok(())
    }
    fn op_nor(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, false>(instr, |a, b| !(a | b));
        Ok(())
    }
    fn op_andi(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, true>(instr, |a, b| a & b);
        Ok(())
    }
    fn op_ori(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, true>(instr, |a, b| a | b);
        Ok(())
    }
    fn op_xori(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        self.op_logical::<_, true>(instr, |a, b| a ^ b);
        Ok(())
    }

    fn op_shift32<const LEFT: bool, const ARITHMETIC: bool, const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        // 32-bit shifts use the low 5 bits of the count
        let amount = if IMMEDIATE {
            instr.shift_amount()
        } else {
            self.reg(instr.rs()) as u32 & 0x1F
        };
        let value = self.reg(instr.rt());

        let result = if LEFT {
            (value as u32) << amount
        } else if ARITHMETIC {
            // the 64-bit register value shifts, the result truncates to 32
            (value as i64 >> amount) as u32
        } else {
            value as u32 >> amount
        };
        self.write_reg32(instr.rd(), result);

        Ok(())
    }

    fn op_shift64<
        const LEFT: bool,
        const ARITHMETIC: bool,
        const IMMEDIATE: bool,
        const PLUS32: bool,
    >(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        // 64-bit shifts use the low 6 bits; the *32 forms add 32 to sa
        let mut amount = if IMMEDIATE {
            instr.shift_amount()
        } else {
            self.reg(instr.rs()) as u32 & 0x3F
        };
        if PLUS32 {
            amount += 32;
        }
        let value = self.reg(instr.rt());

        let result = if LEFT {
            value << amount
        } else if ARITHMETIC {
            (value as i64 >> amount) as u64
        } else {
            value >> amount
        };
        self.write_reg(instr.rd(), result);

        Ok(())
    }

    fn op_compare<const SIGNED: bool, const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let rs = self.reg(instr.rs());
        let rt = if IMMEDIATE {
            instr.signed_immediate16()
        } else {
            self.reg(instr.rt())
        };
        let result = if SIGNED {
            (rs as i64) < rt as i64
        } else {
            rs < rt
        };
        if IMMEDIATE {
            self.write_reg(instr.rt(), result as u64);
        } else {
            self.write_reg(instr.rd(), result as u64);
        }

        Ok(())
    }

    /// Signed overflow leaves the destination unchanged and traps. The MSB
    /// formula matches the hardware: add `(~(a^b) & (a^r))`, sub
    /// `((a^b) & (a^r))`, tested in the top bit.
    fn op_arithmetic32<const ADD: bool, const WITH_OVERFLOW: bool, const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let a = self.reg(instr.rs()) as u32;
        let b = if IMMEDIATE {
            instr.signed_immediate16() as u32
        } else {
            self.reg(instr.rt()) as u32
        };
        let result = if ADD { a.wrapping_add(b) } else { a.wrapping_sub(b) };

        if WITH_OVERFLOW {
            let overflow = if ADD {
                (!(a ^ b) & (a ^ result)) >> 31
            } else {
                ((a ^ b) & (a ^ result)) >> 31
            };
            if overflow & 1 != 0 {
                return Err(CpuException::ArithmeticOverflow);
            }
        }

        if IMMEDIATE {
            self.write_reg32(instr.rt(), result);
        } else {
            self.write_reg32(instr.rd(), result);
        }

        Ok(())
    }

    fn op_arithmetic64<const ADD: bool, const WITH_OVERFLOW: bool, const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let a = self.reg(instr.rs());
        let b = if IMMEDIATE {
            instr.signed_immediate16()
        } else {
            self.reg(instr.rt())
        };
        let result = if ADD { a.wrapping_add(b) } else { a.wrapping_sub(b) };

        if WITH_OVERFLOW {
            let overflow = if ADD {
                (!(a ^ b) & (a ^ result)) >> 63
            } else {
                ((a ^ b) & (a ^ result)) >> 63
            };
            if overflow & 1 != 0 {
                return Err(CpuException::ArithmeticOverflow);
            }
        }

        if IMMEDIATE {
            self.write_reg(instr.rt(), result);
        } else {
            self.write_reg(instr.rd(), result);
        }

        Ok(())
    }

    fn op_mult<const SIGNED: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let product = if SIGNED {
            (self.reg(instr.rs()) as i32 as i64 * self.reg(instr.rt()) as i32 as i64) as u64
        } else {
            (self.reg(instr.rs()) as u32 as u64) * (self.reg(instr.rt()) as u32 as u64)
        };
        // both halves are written sign-extended from bit 31
        self.lo = product as i32 as i64 as u64;
        self.hi = (product >> 32) as i32 as i64 as u64;
        Ok(())
    }

    fn op_dmult<const SIGNED: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let product = if SIGNED {
            (self.reg(instr.rs()) as i64 as i128 * self.reg(instr.rt()) as i64 as i128) as u128
        } else {
            self.reg(instr.rs()) as u128 * self.reg(instr.rt()) as u128
        };
        self.lo = product as u64;
        self.hi = (product >> 64) as u64;
        Ok(())
    }

    fn op_div(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let dividend = self.reg(instr.rs()) as i32 as i64;
        let divisor = self.reg(instr.rt()) as i32 as i64;

        if divisor == 0 {
            // no trap: HI takes the dividend, LO -1 or +1 by its sign
            self.hi = dividend as u64;
            self.lo = if dividend >= 0 { u64::MAX } else { 1 };
        } else {
            self.lo = (dividend / divisor) as i32 as i64 as u64;
            self.hi = (dividend % divisor) as i32 as i64 as u64;
        }
        Ok(())
    }

    fn op_divu(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let dividend = self.reg(instr.rs()) as u32;
        let divisor = self.reg(instr.rt()) as u32;

        if divisor == 0 {
            self.lo = u64::MAX;
            self.hi = dividend as i32 as i64 as u64;
        } else {
            self.lo = (dividend / divisor) as i32 as i64 as u64;
            self.hi = (dividend % divisor) as i32 as i64 as u64;
        }
        Ok(())
    }

    fn op_ddiv(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let dividend = self.reg(instr.rs()) as i64;
        let divisor = self.reg(instr.rt()) as i64;

        if divisor == 0 {
            self.hi = dividend as u64;
            self.lo = if dividend >= 0 { u64::MAX } else { 1 };
        } else if divisor == -1 && dividend == i64::MIN {
            self.lo = dividend as u64;
            self.hi = 0;
        } else {
            self.lo = (dividend / divisor) as u64;
            self.hi = (dividend % divisor) as u64;
        }
        Ok(())
    }

    fn op_ddivu(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let dividend = self.reg(instr.rs());
        let divisor = self.reg(instr.rt());

        if divisor == 0 {
            self.lo = u64::MAX;
            self.hi = dividend;
        } else {
            self.lo = dividend / divisor;
            self.hi = dividend % divisor;
        }
        Ok(())
    }

    fn op_mf_lohi<const LO: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let value = if LO { self.lo } else { self.hi };
        self.write_reg(instr.rd(), value);
        Ok(())
    }

    fn op_mt_lohi<const LO: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        if LO {
            self.lo = self.reg(instr.rs());
        } else {
            self.hi = self.reg(instr.rs());
        }
        Ok(())
    }

    // j      target<<2 combined with the upper bits of the delay slot PC
    // jal    same, ra=$+8
    fn op_j<const JAL: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        if JAL {
            self.link(REG_LINK);
        }
        let target = instr.imm26() << 2 | self.pc & 0xFFFF_FFFF_F000_0000;
        self.branch_abs(target);
        Ok(())
    }

    fn op_jr(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let target = self.reg(instr.rs());
        self.branch_abs(target);
        Ok(())
    }

    fn op_jalr(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let target = self.reg(instr.rs());
        self.branch_abs(target);
        self.link(instr.rd());
        Ok(())
    }

    fn op_beq<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = self.reg(instr.rs()) == self.reg(instr.rt());
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    fn op_bne<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = self.reg(instr.rs()) != self.reg(instr.rt());
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    fn op_blez<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = self.reg(instr.rs()) as i64 <= 0;
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    fn op_bgtz<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = self.reg(instr.rs()) as i64 > 0;
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    fn op_bltz<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = (self.reg(instr.rs()) as i64) < 0;
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    fn op_bgez<const LIKELY: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let condition = self.reg(instr.rs()) as i64 >= 0;
        if LIKELY {
            self.conditional_branch_likely(instr, condition);
        } else {
            self.conditional_branch(instr, condition);
        }
        Ok(())
    }

    // the link happens whether or not the branch is taken
    fn op_bltzal(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let condition = (self.reg(instr.rs()) as i64) < 0;
        self.conditional_branch(instr, condition);
        self.link(REG_LINK);
        Ok(())
    }

    fn op_bgezal(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let condition = self.reg(instr.rs()) as i64 >= 0;
        self.conditional_branch(instr, condition);
        self.link(REG_LINK);
        Ok(())
    }

    fn op_bgezall(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let condition = self.reg(instr.rs()) as i64 >= 0;
        self.link(REG_LINK);
        self.conditional_branch_likely(instr, condition);
        Ok(())
    }

    fn op_syscall(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        Err(CpuException::SysCall)
    }

    fn op_break(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        Err(CpuException::BreakPoint)
    }

    #[inline(always)]
    fn trap_operands<const IMMEDIATE: bool>(&self, instr: &Instruction) -> (u64, u64) {
        let rs = self.reg(instr.rs());
        let other = if IMMEDIATE {
            instr.signed_immediate16()
        } else {
            self.reg(instr.rt())
        };
        (rs, other)
    }

    fn op_tge<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if a as i64 >= b as i64 {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    fn op_tgeu<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if a >= b {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    fn op_tlt<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if (a as i64) < b as i64 {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    fn op_tltu<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if a < b {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    fn op_teq<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if a == b {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    fn op_tne<const IMMEDIATE: bool>(
        &mut self,
        _bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let (a, b) = self.trap_operands::<IMMEDIATE>(instr);
        if a != b {
            return Err(CpuException::Trap);
        }
        Ok(())
    }

    // ==========================================================================
    // loads and stores

    fn op_lb<const SIGNED: bool>(
        &mut self,
        bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.read_virtual_byte(bus, address)?;
        if SIGNED {
            self.write_reg(instr.rt(), value as i8 as i64 as u64);
        } else {
            self.write_reg(instr.rt(), value as u64); // zero extend
        }
        Ok(())
    }

    fn op_lh<const SIGNED: bool>(
        &mut self,
        bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.read_virtual_half(bus, address)?;
        if SIGNED {
            self.write_reg(instr.rt(), value as i16 as i64 as u64);
        } else {
            self.write_reg(instr.rt(), value as u64); // zero extend
        }
        Ok(())
    }

    fn op_lw<const SIGNED: bool>(
        &mut self,
        bus: &mut dyn Bus,
        instr: &Instruction,
    ) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.read_virtual_word(bus, address)?;
        if SIGNED {
            self.write_reg32(instr.rt(), value);
        } else {
            self.write_reg(instr.rt(), value as u64); // lwu zero extends
        }
        Ok(())
    }

    fn op_ld(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.read_virtual_dword(bus, address)?;
        self.write_reg(instr.rt(), value);
        Ok(())
    }

    fn op_sb(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.reg(instr.rt()) as u8;
        self.write_virtual_byte(bus, address, value)
    }

    fn op_sh(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.reg(instr.rt()) as u16;
        self.write_virtual_half(bus, address, value)
    }

    fn op_sw(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.reg(instr.rt()) as u32;
        self.write_virtual_word(bus, address, value)
    }

    fn op_sd(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let value = self.reg(instr.rt());
        self.write_virtual_dword(bus, address, value)
    }

    // The unaligned pseudo-ops merge memory into the register (or the other
    // way round) with a shift/mask pair derived from the low address bits.
    // The untouched bytes keep their prior value; there is a single read and
    // a single write per instruction.

    fn op_lwl(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Load)?;

        let shift = 8 * (address as u32 & 3);
        let mask = 0xFFFF_FFFFu32 << shift;
        let data = bus.read_word(physical & !3);
        let result = self.reg(instr.rt()) as u32 & !mask | data << shift;
        self.write_reg32(instr.rt(), result);
        Ok(())
    }

    fn op_lwr(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Load)?;

        let shift = 8 * ((address as u32 ^ 3) & 3);
        let mask = 0xFFFF_FFFFu32 >> shift;
        let data = bus.read_word(physical & !3);
        let result = self.reg(instr.rt()) as u32 & !mask | data >> shift;
        self.write_reg32(instr.rt(), result);
        Ok(())
    }

    fn op_swl(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Store)?;

        let shift = 8 * (address as u32 & 3);
        let mask = 0xFFFF_FFFFu32 >> shift;
        let data = bus.read_word(physical & !3);
        let oldreg = self.reg(instr.rt()) as u32;
        self.llbit = false;
        bus.write_word(physical & !3, data & !mask | oldreg >> shift);
        Ok(())
    }

    fn op_swr(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Store)?;

        let shift = 8 * ((address as u32 ^ 3) & 3);
        let mask = 0xFFFF_FFFFu32 << shift;
        let data = bus.read_word(physical & !3);
        let oldreg = self.reg(instr.rt()) as u32;
        self.llbit = false;
        bus.write_word(physical & !3, data & !mask | oldreg << shift);
        Ok(())
    }

    fn op_ldl(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Load)?;

        let shift = 8 * (address as u32 & 7);
        let mask = u64::MAX << shift;
        let data = bus.read_dword(physical & !7);
        let oldreg = self.reg(instr.rt());
        self.write_reg(instr.rt(), oldreg & !mask | data << shift);
        Ok(())
    }

    fn op_ldr(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Load)?;

        let shift = 8 * ((address as u32 ^ 7) & 7);
        let mask = u64::MAX >> shift;
        let data = bus.read_dword(physical & !7);
        let oldreg = self.reg(instr.rt());
        self.write_reg(instr.rt(), oldreg & !mask | data >> shift);
        Ok(())
    }

    fn op_sdl(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Store)?;

        let shift = 8 * (address as u32 & 7);
        let mask = u64::MAX >> shift;
        let data = bus.read_dword(physical & !7);
        let oldreg = self.reg(instr.rt());
        self.llbit = false;
        bus.write_dword(physical & !7, data & !mask | oldreg >> shift);
        Ok(())
    }

    fn op_sdr(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        let physical = self.translate(address, BusAccess::Store)?;

        let shift = 8 * ((address as u32 ^ 7) & 7);
        let mask = u64::MAX << shift;
        let data = bus.read_dword(physical & !7);
        let oldreg = self.reg(instr.rt());
        self.llbit = false;
        bus.write_dword(physical & !7, data & !mask | oldreg << shift);
        Ok(())
    }

    fn op_ll(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        if self.check_address_error(0b11, address) {
            return Err(CpuException::AddressErrorLoad(address));
        }
        let physical = self.translate(address, BusAccess::Load)?;
        let value = bus.read_word(physical);
        self.write_reg32(instr.rt(), value);

        self.cp0.lladdr = physical >> 4;
        self.llbit = true;
        Ok(())
    }

    fn op_lld(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        // undefined outside 64-bit mode and 32-bit kernel mode
        if !self.cp0.is_64bit_addressing() && !self.cp0.kernel_mode() {
            panic!("LLD executed in user mode at PC 0x{:016X}", self.prev_pc);
        }
        let address = self.mem_address(instr);
        if self.check_address_error(0b111, address) {
            return Err(CpuException::AddressErrorLoad(address));
        }
        let physical = self.translate(address, BusAccess::Load)?;
        let value = bus.read_dword(physical);
        self.write_reg(instr.rt(), value);

        self.cp0.lladdr = physical >> 4;
        self.llbit = true;
        Ok(())
    }

    fn op_sc(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let address = self.mem_address(instr);
        // the exception takes precedence over the instruction failing
        if self.check_address_error(0b11, address) {
            return Err(CpuException::AddressErrorStore(address));
        }

        if self.llbit {
            self.llbit = false;
            let physical = self.translate(address, BusAccess::Store)?;
            let value = self.reg(instr.rt()) as u32;
            bus.write_word(physical, value);
            self.write_reg(instr.rt(), 1);
        } else {
            self.write_reg(instr.rt(), 0);
        }
        Ok(())
    }

    fn op_scd(&mut self, bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        if !self.cp0.is_64bit_addressing() && !self.cp0.kernel_mode() {
            panic!("SCD executed in user mode at PC 0x{:016X}", self.prev_pc);
        }
        let address = self.mem_address(instr);
        if self.check_address_error(0b111, address) {
            return Err(CpuException::AddressErrorStore(address));
        }

        if self.llbit {
            self.llbit = false;
            let physical = self.translate(address, BusAccess::Store)?;
            let value = self.reg(instr.rt());
            bus.write_dword(physical, value);
            self.write_reg(instr.rt(), 1);
        } else {
            self.write_reg(instr.rt(), 0);
        }
        Ok(())
    }

    // ==========================================================================
    // CP0

    fn op_mfc0(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let value = self.cp0.read_word(instr.rd());
        self.write_reg32(instr.rt(), value);
        Ok(())
    }

    fn op_dmfc0(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let value = self.cp0.read_dword(instr.rd());
        self.write_reg(instr.rt(), value);
        Ok(())
    }

    fn op_mtc0(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let value = self.reg(instr.rt()) as u32;
        self.cp0.write_word(instr.rd(), value);
        self.update_interrupts();
        Ok(())
    }

    fn op_dmtc0(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let value = self.reg(instr.rt());
        self.cp0.write_dword(instr.rd(), value);
        self.update_interrupts();
        Ok(())
    }

    fn tlb_write_view(&self) -> crate::core::cpu::tlb::TlbWriteView {
        crate::core::cpu::tlb::TlbWriteView {
            entry_hi: self.cp0.entry_hi.raw,
            page_mask: self.cp0.page_mask,
            entry_lo0: self.cp0.entry_lo0.raw,
            entry_lo1: self.cp0.entry_lo1.raw,
        }
    }

    fn op_tlbwi(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        let view = self.tlb_write_view();
        self.cp0.tlb.write_entry(self.cp0.index as usize, view);
        Ok(())
    }

    fn op_tlbwr(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        let view = self.tlb_write_view();
        self.cp0.tlb.write_entry(self.cp0.random as usize, view);
        Ok(())
    }

    fn op_tlbr(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        let entry = *self.cp0.tlb.entry(self.cp0.index as usize);
        let global = entry.global as u32;
        self.cp0.entry_hi.raw = entry.entry_hi;
        self.cp0.page_mask = entry.page_mask;
        self.cp0.entry_lo0.raw = entry.entry_lo0 | global;
        self.cp0.entry_lo1.raw = entry.entry_lo1 | global;
        Ok(())
    }

    fn op_tlbp(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        match self.cp0.tlb.probe(self.cp0.entry_hi.raw) {
            Some(index) => self.cp0.index = index as u32,
            None => self.cp0.index = 1 << 31,
        }
        Ok(())
    }

    fn op_eret(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        if self.cp0.status.erl() {
            let target = self.cp0.error_epc;
            self.set_pc(target);
            self.cp0.status.set_erl(false);
        } else {
            let target = self.cp0.epc;
            self.set_pc(target);
            self.cp0.status.set_exl(false);
        }
        self.llbit = false;
        self.update_interrupts();
        Ok(())
    }

    // ==========================================================================

    fn op_reserved(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        Err(CpuException::ReservedInstruction(0))
    }

    fn op_reserved_cop2(&mut self, _bus: &mut dyn Bus, _instr: &Instruction) -> OperationException {
        Err(CpuException::ReservedInstruction(2))
    }

    fn op_unsupported(&mut self, _bus: &mut dyn Bus, instr: &Instruction) -> OperationException {
        let pc = self.prev_pc;
        panic!(
            "unsupported instruction 0x{:08X} at PC 0x{:016X} [{}]",
            instr.0,
            pc,
            disassembler::disassemble(pc, instr.0)
        );
    }
}
