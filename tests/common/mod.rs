#![allow(dead_code)]

use r_n64::core::config::{Config, ExecutionMode};
use r_n64::core::emu::System;
use r_n64::core::memory::Bus;

pub const KSEG0: u64 = 0xFFFF_FFFF_8000_0000;
pub const PROGRAM_BASE: u32 = 0x1000;

pub fn config(mode: ExecutionMode) -> Config {
    Config {
        mode,
        ..Config::default()
    }
}

/// Fresh machine in kernel mode with BEV clear and interrupts off, so the
/// exception vectors land at 0x80000000/0x80000180.
pub fn system(mode: ExecutionMode) -> System {
    let mut system = System::new(&config(mode));
    system.cpu.cp0.status.raw = 0;
    system
}

/// Place a program at a physical address and point the PC at its kseg0
/// mapping.
pub fn load_program(system: &mut System, physical: u32, words: &[u32]) {
    for (index, word) in words.iter().enumerate() {
        system.bus.write_word(physical + index as u32 * 4, *word);
    }
    system.cpu.set_pc(KSEG0 + physical as u64);
}

pub fn run(system: &mut System, steps: usize) {
    for _ in 0..steps {
        system.step();
    }
}

// ==========================================================================
// encoders

pub fn r_type(funct: u32, rs: u32, rt: u32, rd: u32, sa: u32) -> u32 {
    rs << 21 | rt << 16 | rd << 11 | sa << 6 | funct
}

pub fn i_type(op: u32, rs: u32, rt: u32, imm: u16) -> u32 {
    op << 26 | rs << 21 | rt << 16 | imm as u32
}

pub fn nop() -> u32 {
    0
}
pub fn lui(rt: u32, imm: u16) -> u32 {
    i_type(0x0F, 0, rt, imm)
}
pub fn ori(rt: u32, rs: u32, imm: u16) -> u32 {
    i_type(0x0D, rs, rt, imm)
}
pub fn andi(rt: u32, rs: u32, imm: u16) -> u32 {
    i_type(0x0C, rs, rt, imm)
}
pub fn addi(rt: u32, rs: u32, imm: i16) -> u32 {
    i_type(0x08, rs, rt, imm as u16)
}
pub fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
    i_type(0x09, rs, rt, imm as u16)
}
pub fn daddiu(rt: u32, rs: u32, imm: i16) -> u32 {
    i_type(0x19, rs, rt, imm as u16)
}
pub fn add(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x20, rs, rt, rd, 0)
}
pub fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x21, rs, rt, rd, 0)
}
pub fn sub(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x22, rs, rt, rd, 0)
}
pub fn subu(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x23, rs, rt, rd, 0)
}
pub fn and(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x24, rs, rt, rd, 0)
}
pub fn or(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x25, rs, rt, rd, 0)
}
pub fn xor(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x26, rs, rt, rd, 0)
}
pub fn nor(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x27, rs, rt, rd, 0)
}
pub fn slt(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x2A, rs, rt, rd, 0)
}
pub fn sltu(rd: u32, rs: u32, rt: u32) -> u32 {
    r_type(0x2B, rs, rt, rd, 0)
}
pub fn sll(rd: u32, rt: u32, sa: u32) -> u32 {
    r_type(0x00, 0, rt, rd, sa)
}
pub fn srl(rd: u32, rt: u32, sa: u32) -> u32 {
    r_type(0x02, 0, rt, rd, sa)
}
pub fn sra(rd: u32, rt: u32, sa: u32) -> u32 {
    r_type(0x03, 0, rt, rd, sa)
}
pub fn sllv(rd: u32, rt: u32, rs: u32) -> u32 {
    r_type(0x04, rs, rt, rd, 0)
}
pub fn dsllv(rd: u32, rt: u32, rs: u32) -> u32 {
    r_type(0x14, rs, rt, rd, 0)
}
pub fn dsll32(rd: u32, rt: u32, sa: u32) -> u32 {
    r_type(0x3C, 0, rt, rd, sa)
}
pub fn mult(rs: u32, rt: u32) -> u32 {
    r_type(0x18, rs, rt, 0, 0)
}
pub fn div(rs: u32, rt: u32) -> u32 {
    r_type(0x1A, rs, rt, 0, 0)
}
pub fn divu(rs: u32, rt: u32) -> u32 {
    r_type(0x1B, rs, rt, 0, 0)
}
pub fn ddiv(rs: u32, rt: u32) -> u32 {
    r_type(0x1E, rs, rt, 0, 0)
}
pub fn mfhi(rd: u32) -> u32 {
    r_type(0x10, 0, 0, rd, 0)
}
pub fn mflo(rd: u32) -> u32 {
    r_type(0x12, 0, 0, rd, 0)
}
pub fn teq(rs: u32, rt: u32) -> u32 {
    r_type(0x34, rs, rt, 0, 0)
}
pub fn syscall() -> u32 {
    0x0C
}
pub fn break_() -> u32 {
    0x0D
}
pub fn jr(rs: u32) -> u32 {
    r_type(0x08, rs, 0, 0, 0)
}

pub fn lb(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x20, base, rt, off as u16)
}
pub fn lbu(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x24, base, rt, off as u16)
}
pub fn lh(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x21, base, rt, off as u16)
}
pub fn lw(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x23, base, rt, off as u16)
}
pub fn lwl(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x22, base, rt, off as u16)
}
pub fn lwr(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x26, base, rt, off as u16)
}
pub fn sb(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x28, base, rt, off as u16)
}
pub fn sh(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x29, base, rt, off as u16)
}
pub fn sw(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x2B, base, rt, off as u16)
}
pub fn swl(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x2A, base, rt, off as u16)
}
pub fn swr(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x2E, base, rt, off as u16)
}
pub fn ll(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x30, base, rt, off as u16)
}
pub fn sc(rt: u32, base: u32, off: i16) -> u32 {
    i_type(0x38, base, rt, off as u16)
}

pub fn beq(rs: u32, rt: u32, off: i16) -> u32 {
    i_type(0x04, rs, rt, off as u16)
}
pub fn bne(rs: u32, rt: u32, off: i16) -> u32 {
    i_type(0x05, rs, rt, off as u16)
}
pub fn beql(rs: u32, rt: u32, off: i16) -> u32 {
    i_type(0x14, rs, rt, off as u16)
}
pub fn j_to(virtual_target: u64) -> u32 {
    0x02 << 26 | (virtual_target >> 2) as u32 & 0x3FF_FFFF
}
pub fn jal_to(virtual_target: u64) -> u32 {
    0x03 << 26 | (virtual_target >> 2) as u32 & 0x3FF_FFFF
}

pub fn eret() -> u32 {
    0x10 << 26 | 1 << 25 | 0x18
}
pub fn tlbwi() -> u32 {
    0x10 << 26 | 1 << 25 | 0x02
}
pub fn tlbp() -> u32 {
    0x10 << 26 | 1 << 25 | 0x08
}
pub fn mtc0(rt: u32, rd: u32) -> u32 {
    0x10 << 26 | 0x04 << 21 | rt << 16 | rd << 11
}
pub fn mfc0(rt: u32, rd: u32) -> u32 {
    0x10 << 26 | rt << 16 | rd << 11
}

pub fn mtc1(rt: u32, fs: u32) -> u32 {
    0x11 << 26 | 0x04 << 21 | rt << 16 | fs << 11
}
pub fn dmtc1(rt: u32, fs: u32) -> u32 {
    0x11 << 26 | 0x05 << 21 | rt << 16 | fs << 11
}
pub fn add_s(fd: u32, fs: u32, ft: u32) -> u32 {
    0x11 << 26 | 16 << 21 | ft << 16 | fs << 11 | fd << 6
}
pub fn c_lt_s(fs: u32, ft: u32) -> u32 {
    0x11 << 26 | 16 << 21 | ft << 16 | fs << 11 | 0x3C
}
pub fn bc1t(off: i16) -> u32 {
    0x11 << 26 | 0x08 << 21 | 0x01 << 16 | (off as u16) as u32
}
pub fn trunc_w_d(fd: u32, fs: u32) -> u32 {
    0x11 << 26 | 17 << 21 | fs << 11 | fd << 6 | 0x0D
}
pub fn lwc1(ft: u32, base: u32, off: i16) -> u32 {
    i_type(0x31, base, ft, off as u16)
}
