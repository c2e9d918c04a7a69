use crate::core::cpu::instruction::{Instruction, Opcode};

pub static REGISTER_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "s8",
    "ra",
];

/// One-line disassembly, used by fatal diagnostics and the debug log.
pub fn disassemble(pc: u64, raw: u32) -> String {
    use Opcode::*;
    let i = Instruction(raw);
    let op = Opcode::from_instruction(&i);
    let rs = REGISTER_NAMES[i.rs()];
    let rt = REGISTER_NAMES[i.rt()];
    let rd = REGISTER_NAMES[i.rd()];
    let imm = i.0 & 0xFFFF;
    let mnemonic = format!("{:?}", op).to_lowercase().replace('_', ".");

    match op {
        NOP | SYSCALL | BREAK | TLBR | TLBWI | TLBWR | TLBP | ERET | CACHE => mnemonic,
        J | JAL => {
            let target = i.imm26() << 2 | pc.wrapping_add(4) & 0xFFFF_FFFF_F000_0000;
            format!("{} 0x{:016X}", mnemonic, target)
        }
        JR => format!("jr {}", rs),
        JALR => format!("jalr {}, {}", rd, rs),
        SLL | SRL | SRA | DSLL | DSRL | DSRA | DSLL32 | DSRL32 | DSRA32 => {
            format!("{} {}, {}, {}", mnemonic, rd, rt, i.shift_amount())
        }
        SLLV | SRLV | SRAV | DSLLV | DSRLV | DSRAV => {
            format!("{} {}, {}, {}", mnemonic, rd, rt, rs)
        }
        MFHI | MFLO => format!("{} {}", mnemonic, rd),
        MTHI | MTLO => format!("{} {}", mnemonic, rs),
        MULT | MULTU | DIV | DIVU | DMULT | DMULTU | DDIV | DDIVU | TGE | TGEU | TLT | TLTU
        | TEQ | TNE => format!("{} {}, {}", mnemonic, rs, rt),
        ADD | ADDU | SUB | SUBU | AND | OR | XOR | NOR | SLT | SLTU | DADD | DADDU | DSUB
        | DSUBU => format!("{} {}, {}, {}", mnemonic, rd, rs, rt),
        ADDI | ADDIU | SLTI | SLTIU | ANDI | ORI | XORI | DADDI | DADDIU => {
            format!("{} {}, {}, 0x{:04X}", mnemonic, rt, rs, imm)
        }
        LUI => format!("lui {}, 0x{:04X}", rt, imm),
        BEQ | BNE | BEQL | BNEL => format!("{} {}, {}, 0x{:04X}", mnemonic, rs, rt, imm),
        BLEZ | BGTZ | BLTZ | BGEZ | BLEZL | BGTZL | BLTZL | BGEZL | BLTZAL | BGEZAL | BGEZALL
        | TGEI | TGEIU | TLTI | TLTIU | TEQI | TNEI => {
            format!("{} {}, 0x{:04X}", mnemonic, rs, imm)
        }
        LB | LBU | LH | LHU | LW | LWU | LD | LWL | LWR | LDL | LDR | LL | LLD | SB | SH | SW
        | SD | SWL | SWR | SDL | SDR | SC | SCD => {
            format!("{} {}, 0x{:04X}({})", mnemonic, rt, imm, rs)
        }
        LWC1 | LDC1 | SWC1 | SDC1 => format!("{} f{}, 0x{:04X}({})", mnemonic, i.ft(), imm, rs),
        MFC0 | DMFC0 | MTC0 | DMTC0 => format!("{} {}, cp0r{}", mnemonic, rt, i.rd()),
        MFC1 | DMFC1 | MTC1 | DMTC1 | CFC1 | CTC1 => format!("{} {}, f{}", mnemonic, rt, i.fs()),
        BC1F | BC1T | BC1FL | BC1TL => format!("{} 0x{:04X}", mnemonic, imm),
        RESERVED | RESERVED_COP2 | UNSUPPORTED => {
            format!("{} (raw 0x{:08X})", mnemonic, raw)
        }
        // fmt-qualified FPU op: mnemonic already carries the format
        _ => format!("{} f{}, f{}, f{}", mnemonic, i.fd(), i.fs(), i.ft()),
    }
}
