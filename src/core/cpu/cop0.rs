use crate::core::cpu::tlb::Tlb;
use tracing::{debug, warn};

pub static CP0_REGISTER_NAMES: [&str; 32] = [
    "Index", "Random", "EntryLo0", "EntryLo1", "Context", "PageMask", "Wired", "7", "BadVAddr",
    "Count", "EntryHi", "Compare", "Status", "Cause", "EPC", "PRId", "Config", "LLAddr", "WatchLo",
    "WatchHi", "XContext", "21", "22", "23", "24", "25", "ParityError", "CacheError", "TagLo",
    "TagHi", "ErrorEPC", "31",
];

// R4300i PRId: implementation 0x0B, revision 2.2
const PRID_VALUE: u32 = 0x0B22;
const CONFIG_VALUE: u32 = 0x7006_E463;

pub const CP0_REG_INDEX: usize = 0;
pub const CP0_REG_RANDOM: usize = 1;
pub const CP0_REG_ENTRY_LO0: usize = 2;
pub const CP0_REG_ENTRY_LO1: usize = 3;
pub const CP0_REG_CONTEXT: usize = 4;
pub const CP0_REG_PAGE_MASK: usize = 5;
pub const CP0_REG_WIRED: usize = 6;
pub const CP0_REG_BAD_VADDR: usize = 8;
pub const CP0_REG_COUNT: usize = 9;
pub const CP0_REG_ENTRY_HI: usize = 10;
pub const CP0_REG_COMPARE: usize = 11;
pub const CP0_REG_STATUS: usize = 12;
pub const CP0_REG_CAUSE: usize = 13;
pub const CP0_REG_EPC: usize = 14;
pub const CP0_REG_PRID: usize = 15;
pub const CP0_REG_CONFIG: usize = 16;
pub const CP0_REG_LLADDR: usize = 17;
pub const CP0_REG_ERROR_EPC: usize = 30;

/// Architectural exception codes, as encoded in Cause.exception_code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExceptionCode {
    Interrupt = 0,
    TlbModification = 1,
    TlbMissLoad = 2,
    TlbMissStore = 3,
    AddressErrorLoad = 4,
    AddressErrorStore = 5,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    ArithmeticOverflow = 12,
    Trap = 13,
}

/*
Status register (SR), the bits this core models:
  0     IE   global interrupt enable
  1     EXL  exception level
  2     ERL  error level
  3-4   KSU  mode (0=kernel, 1=supervisor, 2=user)
  7     KX   64-bit addressing in kernel mode
  8-15  IM   interrupt mask
  22    BEV  bootstrap exception vectors
  28-31 CU0-CU3 coprocessor enables
*/
#[derive(Debug, Default, Clone, Copy)]
pub struct Status {
    pub raw: u32,
}

impl Status {
    #[inline(always)]
    pub fn ie(&self) -> bool {
        self.raw & 1 != 0
    }
    #[inline(always)]
    pub fn exl(&self) -> bool {
        self.raw & (1 << 1) != 0
    }
    #[inline(always)]
    pub fn set_exl(&mut self, v: bool) {
        self.raw = self.raw & !(1 << 1) | (v as u32) << 1;
    }
    #[inline(always)]
    pub fn erl(&self) -> bool {
        self.raw & (1 << 2) != 0
    }
    #[inline(always)]
    pub fn set_erl(&mut self, v: bool) {
        self.raw = self.raw & !(1 << 2) | (v as u32) << 2;
    }
    #[inline(always)]
    pub fn ksu(&self) -> u32 {
        (self.raw >> 3) & 3
    }
    #[inline(always)]
    pub fn kx(&self) -> bool {
        self.raw & (1 << 7) != 0
    }
    #[inline(always)]
    pub fn im(&self) -> u8 {
        (self.raw >> 8) as u8
    }
    #[inline(always)]
    pub fn bev(&self) -> bool {
        self.raw & (1 << 22) != 0
    }
    #[inline(always)]
    pub fn cu1(&self) -> bool {
        self.raw & (1 << 29) != 0
    }
}

/*
Cause register:
  2-6   exception code
  8-15  IP   interrupt pending (8-9 software, 10-15 hardware)
  28-29 CE   coprocessor number for CoprocessorUnusable/Reserved
  31    BD   exception happened in a branch delay slot
*/
#[derive(Debug, Default, Clone, Copy)]
pub struct Cause {
    pub raw: u32,
}

impl Cause {
    #[inline(always)]
    pub fn exception_code(&self) -> u32 {
        (self.raw >> 2) & 0x1F
    }
    #[inline(always)]
    pub fn set_exception_code(&mut self, code: u32) {
        self.raw = self.raw & !(0x1F << 2) | (code & 0x1F) << 2;
    }
    #[inline(always)]
    pub fn interrupt_pending(&self) -> u8 {
        (self.raw >> 8) as u8
    }
    #[inline(always)]
    pub fn set_ip2(&mut self, v: bool) {
        self.raw = self.raw & !(1 << 10) | (v as u32) << 10;
    }
    #[inline(always)]
    pub fn set_ip7(&mut self, v: bool) {
        self.raw = self.raw & !(1 << 15) | (v as u32) << 15;
    }
    #[inline(always)]
    pub fn set_coprocessor_error(&mut self, cop: u32) {
        self.raw = self.raw & !(3 << 28) | (cop & 3) << 28;
    }
    #[inline(always)]
    pub fn branch_delay(&self) -> bool {
        self.raw & (1 << 31) != 0
    }
    #[inline(always)]
    pub fn set_branch_delay(&mut self, v: bool) {
        self.raw = self.raw & !(1 << 31) | (v as u32) << 31;
    }
}

/*
EntryLo0/EntryLo1:
  0     G    global (effective only when set in both halves)
  1     V    valid
  2     D    dirty (writable)
  3-5   C    cache attribute
  6-25  PFN  page frame number, in 4K units
*/
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryLo {
    pub raw: u32,
}

impl EntryLo {
    #[inline(always)]
    pub fn global(&self) -> bool {
        self.raw & 1 != 0
    }
    #[inline(always)]
    pub fn valid(&self) -> bool {
        self.raw & (1 << 1) != 0
    }
    #[inline(always)]
    pub fn dirty(&self) -> bool {
        self.raw & (1 << 2) != 0
    }
    #[inline(always)]
    pub fn pfn(&self) -> u32 {
        (self.raw >> 6) & 0xF_FFFF
    }
}

/*
EntryHi:
  0-7    ASID
  13-39  VPN2 (virtual page number / 2)
*/
#[derive(Debug, Default, Clone, Copy)]
pub struct EntryHi {
    pub raw: u64,
}

impl EntryHi {
    #[inline(always)]
    pub fn asid(&self) -> u8 {
        self.raw as u8
    }
    #[inline(always)]
    pub fn vpn2(&self) -> u64 {
        (self.raw >> 13) & 0x7FF_FFFF
    }
}

pub struct Cop0 {
    pub index: u32,
    pub random: u32,
    pub entry_lo0: EntryLo,
    pub entry_lo1: EntryLo,
    pub context: u64,
    pub page_mask: u32,
    pub wired: u32,
    pub bad_vaddr: u64,
    // kept pre-shifted: advances by CYCLES_PER_INSTR per step, masked to
    // 33 bits; `count >> 1` is the architecturally visible register
    pub count: u64,
    pub entry_hi: EntryHi,
    pub compare: u32,
    pub status: Status,
    pub cause: Cause,
    pub epc: u64,
    pub error_epc: u64,
    pub lladdr: u32,
    pub tlb: Tlb,
    // set when the most recent TLB miss was a refill (no matching entry);
    // consumed by the vector selection in handle_exception
    pub tlb_refill: bool,
}

impl Cop0 {
    pub fn new() -> Self {
        Cop0 {
            index: 0,
            random: 31,
            entry_lo0: EntryLo::default(),
            entry_lo1: EntryLo::default(),
            context: 0,
            page_mask: 0,
            wired: 0,
            bad_vaddr: 0,
            count: 0,
            entry_hi: EntryHi::default(),
            compare: 0,
            status: Status { raw: 1 << 22 }, // BEV set at reset
            cause: Cause::default(),
            epc: 0,
            error_epc: 0,
            lladdr: 0,
            tlb: Tlb::new(),
            tlb_refill: false,
        }
    }

    pub fn is_64bit_addressing(&self) -> bool {
        self.status.kx()
    }

    pub fn kernel_mode(&self) -> bool {
        self.status.ksu() == 0 || self.status.exl() || self.status.erl()
    }

    pub fn read_word(&self, reg: usize) -> u32 {
        self.read_dword(reg) as u32
    }

    pub fn read_dword(&self, reg: usize) -> u64 {
        match reg {
            CP0_REG_INDEX => self.index as u64,
            CP0_REG_RANDOM => self.random as u64,
            CP0_REG_ENTRY_LO0 => self.entry_lo0.raw as u64,
            CP0_REG_ENTRY_LO1 => self.entry_lo1.raw as u64,
            CP0_REG_CONTEXT => self.context,
            CP0_REG_PAGE_MASK => self.page_mask as u64,
            CP0_REG_WIRED => self.wired as u64,
            CP0_REG_BAD_VADDR => self.bad_vaddr,
            CP0_REG_COUNT => (self.count >> 1) as u32 as u64,
            CP0_REG_ENTRY_HI => self.entry_hi.raw,
            CP0_REG_COMPARE => self.compare as u64,
            CP0_REG_STATUS => self.status.raw as u64,
            CP0_REG_CAUSE => self.cause.raw as u64,
            CP0_REG_EPC => self.epc,
            CP0_REG_PRID => PRID_VALUE as u64,
            CP0_REG_CONFIG => CONFIG_VALUE as u64,
            CP0_REG_LLADDR => self.lladdr as u64,
            CP0_REG_ERROR_EPC => self.error_epc,
            _ => {
                warn!("Reading unmodeled CP0 register {}", CP0_REGISTER_NAMES[reg & 31]);
                0
            }
        }
    }

    pub fn write_word(&mut self, reg: usize, value: u32) {
        // 32-bit moves sign-extend into the 64-bit CP0 registers
        self.write_dword(reg, value as i32 as i64 as u64);
    }

    pub fn write_dword(&mut self, reg: usize, value: u64) {
        debug!("CP0 write {} = {:016X}", CP0_REGISTER_NAMES[reg & 31], value);
        match reg {
            CP0_REG_INDEX => self.index = value as u32 & 0x8000_003F,
            CP0_REG_RANDOM => {} // read-only
            CP0_REG_ENTRY_LO0 => self.entry_lo0.raw = value as u32 & 0x3FFF_FFFF,
            CP0_REG_ENTRY_LO1 => self.entry_lo1.raw = value as u32 & 0x3FFF_FFFF,
            CP0_REG_CONTEXT => {
                // bad_vpn2 (bits 4-22) is hardware-maintained
                self.context = self.context & 0x7F_FFF0 | value & !0x7F_FFF0;
            }
            CP0_REG_PAGE_MASK => self.page_mask = value as u32 & 0x01FF_E000,
            CP0_REG_WIRED => {
                self.wired = value as u32 & 0x3F;
                self.random = 31;
            }
            CP0_REG_BAD_VADDR => {} // read-only
            CP0_REG_COUNT => self.count = (value as u32 as u64) << 1,
            CP0_REG_ENTRY_HI => self.entry_hi.raw = value & 0xC000_00FF_FFFF_E0FF,
            CP0_REG_COMPARE => {
                // writing Compare acknowledges the timer interrupt
                self.compare = value as u32;
                self.cause.set_ip7(false);
            }
            CP0_REG_STATUS => self.status.raw = value as u32,
            CP0_REG_CAUSE => {
                // only the software interrupt bits are writable
                self.cause.raw = self.cause.raw & !0x300 | value as u32 & 0x300;
            }
            CP0_REG_EPC => self.epc = value,
            CP0_REG_PRID | CP0_REG_CONFIG => {}
            CP0_REG_LLADDR => self.lladdr = value as u32,
            CP0_REG_ERROR_EPC => self.error_epc = value,
            _ => {
                warn!(
                    "Writing unmodeled CP0 register {} = {:016X}",
                    CP0_REGISTER_NAMES[reg & 31],
                    value
                );
            }
        }
    }

    /// Hardware side of a TLB exception: latch the faulting address into
    /// BadVAddr, Context.bad_vpn2 and EntryHi before the vector is taken.
    pub fn latch_tlb_exception(&mut self, vaddr: u64) {
        self.bad_vaddr = vaddr;
        self.context = self.context & !0x7F_FFF0 | (vaddr >> 13 & 0x7_FFFF) << 4;
        self.entry_hi.raw = self.entry_hi.raw & 0xFF | vaddr & 0xFF_FFFF_E000;
    }

    /// IM & IP summary, refreshed whenever Status or Cause change.
    pub fn pending_interrupts(&self) -> u8 {
        self.cause.interrupt_pending() & self.status.im()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_write_acknowledges_timer() {
        let mut cp0 = Cop0::new();
        cp0.cause.set_ip7(true);
        assert_ne!(cp0.cause.interrupt_pending() & 0x80, 0);
        cp0.write_word(CP0_REG_COMPARE, 1234);
        assert_eq!(cp0.cause.interrupt_pending() & 0x80, 0);
        assert_eq!(cp0.compare, 1234);
    }

    #[test]
    fn count_reads_back_halved() {
        let mut cp0 = Cop0::new();
        cp0.count = 200;
        assert_eq!(cp0.read_word(CP0_REG_COUNT), 100);
        cp0.write_word(CP0_REG_COUNT, 100);
        assert_eq!(cp0.count, 200);
    }

    #[test]
    fn cause_write_touches_only_software_bits() {
        let mut cp0 = Cop0::new();
        cp0.cause.raw = 0x8000_007C;
        cp0.write_word(CP0_REG_CAUSE, 0xFFFF_FFFF);
        assert_eq!(cp0.cause.raw, 0x8000_037C);
    }

    #[test]
    fn tlb_exception_latch() {
        let mut cp0 = Cop0::new();
        cp0.entry_hi.raw = 0x55; // current ASID
        cp0.latch_tlb_exception(0x0000_1000);
        assert_eq!(cp0.bad_vaddr, 0x1000);
        assert_eq!(cp0.entry_hi.vpn2(), 0);
        assert_eq!(cp0.entry_hi.asid(), 0x55);
    }
}
