mod common;

use common::*;
use r_n64::core::config::ExecutionMode;
use r_n64::core::memory::Bus;

const GENERAL_VECTOR: u64 = 0xFFFF_FFFF_8000_0180;
const REFILL_VECTOR: u64 = 0xFFFF_FFFF_8000_0000;

#[test]
fn addi_overflow_traps_and_leaves_rd_unchanged() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[addi(2, 1, 1)]);
    sys.cpu.set_register(1, 0x7FFF_FFFF);
    sys.step();

    assert_eq!(sys.cpu.register(2), 0);
    assert_eq!(sys.cpu.cp0.cause.exception_code(), 12);
    assert_eq!(sys.cpu.cp0.epc, KSEG0 + PROGRAM_BASE as u64);
    assert_eq!(sys.cpu.pc, GENERAL_VECTOR);
    assert!(sys.cpu.cp0.status.exl());
}

#[test]
fn addiu_wraps_and_sign_extends() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[addiu(2, 1, 1)]);
    sys.cpu.set_register(1, 0x7FFF_FFFF);
    sys.step();

    assert_eq!(sys.cpu.register(2), 0xFFFF_FFFF_8000_0000);
    assert_eq!(sys.cpu.cp0.cause.exception_code(), 0);
}

#[test]
fn register_zero_is_always_zero() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[ori(0, 0, 0x1234), lui(0, 0xFFFF), addiu(0, 0, 1)],
    );
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(0), 0);
}

#[test]
fn thirty_two_bit_results_sign_extend() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[addu(3, 1, 2), sll(4, 2, 31), sra(5, 4, 31)],
    );
    sys.cpu.set_register(1, 0x7FFF_FFFF);
    sys.cpu.set_register(2, 1);
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(3), 0xFFFF_FFFF_8000_0000);
    assert_eq!(sys.cpu.register(4), 0xFFFF_FFFF_8000_0000);
    assert_eq!(sys.cpu.register(5), 0xFFFF_FFFF_FFFF_FFFF);
}

#[test]
fn shift_counts_are_masked() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[sllv(3, 1, 2), dsllv(4, 1, 2), dsll32(5, 1, 0)],
    );
    sys.cpu.set_register(1, 1);
    sys.cpu.set_register(2, 33); // 5-bit mask -> 1, 6-bit mask -> 33
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(3), 2);
    assert_eq!(sys.cpu.register(4), 1u64 << 33);
    assert_eq!(sys.cpu.register(5), 1u64 << 32);
}

#[test]
fn branch_taken_executes_delay_slot() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[
            beq(0, 0, 2),     // target = delay + 8 = base + 12
            addiu(2, 0, 1),   // delay slot, always runs
            addiu(3, 0, 99),  // skipped
            addiu(4, 0, 2),   // branch target
        ],
    );
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(2), 1);
    assert_eq!(sys.cpu.register(3), 0);
    assert_eq!(sys.cpu.register(4), 2);
}

#[test]
fn branch_likely_not_taken_nullifies_delay_slot() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[beql(0, 1, 2), addiu(2, 0, 0x1234), ori(3, 0, 0xBEEF)],
    );
    sys.cpu.set_register(1, 1);
    run(&mut sys, 2);

    assert_eq!(sys.cpu.register(2), 0, "delay slot must be nullified");
    assert_eq!(sys.cpu.register(3), 0xBEEF);
    assert_eq!(sys.cpu.pc, KSEG0 + PROGRAM_BASE as u64 + 12);
}

#[test]
fn branch_likely_taken_executes_delay_slot() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[
            beql(0, 0, 2),
            addiu(2, 0, 0x1234),
            addiu(3, 0, 99),
            addiu(4, 0, 7),
        ],
    );
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(2), 0x1234);
    assert_eq!(sys.cpu.register(3), 0);
    assert_eq!(sys.cpu.register(4), 7);
}

#[test]
fn jal_links_past_the_delay_slot() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[jal_to(0x8000_2000), addiu(2, 0, 5)]);
    sys.bus.write_word(0x2000, ori(3, 0, 7));
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(31), KSEG0 + PROGRAM_BASE as u64 + 8);
    assert_eq!(sys.cpu.register(2), 5);
    assert_eq!(sys.cpu.register(3), 7);
    assert_eq!(sys.cpu.pc, KSEG0 + 0x2004);
}

#[test]
fn lwl_lwr_pair_assembles_an_unaligned_word() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x100, 0x1122_3344);
    sys.bus.write_word(0x104, 0x5566_7788);
    load_program(&mut sys, PROGRAM_BASE, &[lwl(1, 4, 1), lwr(1, 4, 4)]);
    sys.cpu.set_register(4, KSEG0 + 0x100);
    sys.cpu.set_register(1, 0xAABB_CCDD);
    run(&mut sys, 2);

    // bytes 0x101..0x104: 22 33 44 55
    assert_eq!(sys.cpu.register(1), 0x2233_4455);
}

#[test]
fn lwl_keeps_untouched_register_bytes() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x100, 0x1122_3344);
    load_program(&mut sys, PROGRAM_BASE, &[lwl(1, 4, 1)]);
    sys.cpu.set_register(4, KSEG0 + 0x100);
    sys.cpu.set_register(1, 0xAABB_CCDD);
    sys.step();

    assert_eq!(sys.cpu.register(1) as u32, 0x2233_44DD);
}

#[test]
fn swl_swr_lwl_lwr_round_trip_every_alignment() {
    for k in 0..4i16 {
        let mut sys = system(ExecutionMode::Interpreter);
        sys.bus.write_word(0x200, 0x0102_0304);
        sys.bus.write_word(0x204, 0x0506_0708);
        load_program(
            &mut sys,
            PROGRAM_BASE,
            &[
                swl(1, 4, k),
                swr(1, 4, k + 3),
                lwl(2, 4, k),
                lwr(2, 4, k + 3),
            ],
        );
        sys.cpu.set_register(4, KSEG0 + 0x200);
        sys.cpu.set_register(1, 0xDEAD_BEEF);
        run(&mut sys, 4);

        assert_eq!(
            sys.cpu.register(2) as u32,
            0xDEAD_BEEF,
            "round trip broken at offset {}",
            k
        );
    }
}

#[test]
fn div_by_zero_does_not_trap() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[div(1, 2)]);
    sys.cpu.set_register(1, 0xFFFF_FFFF_8000_0000);
    sys.cpu.set_register(2, 0);
    sys.step();

    assert_eq!(sys.cpu.hi(), 0xFFFF_FFFF_8000_0000);
    assert_eq!(sys.cpu.lo(), 1); // dividend < 0
    assert_eq!(sys.cpu.cp0.cause.exception_code(), 0);
}

#[test]
fn divu_by_zero_yields_all_ones() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[divu(1, 2)]);
    sys.cpu.set_register(1, 5);
    sys.cpu.set_register(2, 0);
    sys.step();

    assert_eq!(sys.cpu.lo(), u64::MAX);
    assert_eq!(sys.cpu.hi(), 5);
}

#[test]
fn ddiv_min_by_minus_one() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[ddiv(1, 2)]);
    sys.cpu.set_register(1, i64::MIN as u64);
    sys.cpu.set_register(2, -1i64 as u64);
    sys.step();

    assert_eq!(sys.cpu.lo(), i64::MIN as u64);
    assert_eq!(sys.cpu.hi(), 0);
}

#[test]
fn mult_sign_extends_both_halves() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[mult(1, 2), mflo(3), mfhi(4)]);
    sys.cpu.set_register(1, 0x8000_0000);
    sys.cpu.set_register(2, 2);
    run(&mut sys, 3);

    // -2^31 * 2 = -2^32
    assert_eq!(sys.cpu.register(3), 0);
    assert_eq!(sys.cpu.register(4), 0xFFFF_FFFF_FFFF_FFFF);
}

#[test]
fn ll_sc_succeeds_without_intervening_store() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x300, 7);
    load_program(&mut sys, PROGRAM_BASE, &[ll(2, 4, 0), sc(3, 4, 0)]);
    sys.cpu.set_register(4, KSEG0 + 0x300);
    sys.cpu.set_register(3, 99);
    run(&mut sys, 2);

    assert_eq!(sys.cpu.register(2), 7);
    assert_eq!(sys.cpu.register(3), 1);
    assert_eq!(sys.bus.read_word(0x300), 99);
}

#[test]
fn sc_fails_after_intervening_store() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x300, 7);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[ll(2, 4, 0), sb(5, 4, 4), sc(3, 4, 0)],
    );
    sys.cpu.set_register(4, KSEG0 + 0x300);
    sys.cpu.set_register(3, 99);
    run(&mut sys, 3);

    assert_eq!(sys.cpu.register(3), 0, "SC must fail after a store");
    assert_eq!(sys.bus.read_word(0x300), 7);
}

#[test]
fn tlb_miss_on_load_takes_the_refill_vector() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[lw(1, 2, 0)]);
    sys.cpu.set_register(1, 0x5555);
    sys.cpu.set_register(2, 0x1000);
    sys.step();

    assert_eq!(sys.cpu.register(1), 0x5555, "rt must be unchanged");
    assert_eq!(sys.cpu.cp0.bad_vaddr, 0x1000);
    assert_eq!(sys.cpu.cp0.entry_hi.vpn2(), 0);
    assert_eq!(sys.cpu.cp0.cause.exception_code(), 2); // TLBL
    assert_eq!(sys.cpu.cp0.epc, KSEG0 + PROGRAM_BASE as u64);
    assert_eq!(sys.cpu.pc, REFILL_VECTOR);
}

#[test]
fn tlb_invalid_entry_takes_the_general_vector() {
    let mut sys = system(ExecutionMode::Interpreter);
    // entry for vaddr 0x0000 with the valid bit clear
    sys.cpu.cp0.entry_hi.raw = 0;
    sys.cpu.cp0.page_mask = 0;
    sys.cpu.cp0.entry_lo0.raw = 0x10 << 6 | 0b001; // global only
    sys.cpu.cp0.entry_lo1.raw = 0x11 << 6 | 0b001;
    sys.cpu.cp0.index = 0;
    load_program(&mut sys, PROGRAM_BASE, &[tlbwi(), lw(1, 2, 0)]);
    sys.cpu.set_register(2, 0x10);
    run(&mut sys, 2);

    assert_eq!(sys.cpu.cp0.cause.exception_code(), 2);
    assert_eq!(sys.cpu.pc, GENERAL_VECTOR);
}

#[test]
fn tlbwi_maps_a_page_for_loads() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x10_000, 0x1234_5678);
    // vaddr 0x4000 -> even page at pfn 0x10
    sys.cpu.cp0.entry_hi.raw = 0x4000;
    sys.cpu.cp0.page_mask = 0;
    sys.cpu.cp0.entry_lo0.raw = 0x10 << 6 | 0b111;
    sys.cpu.cp0.entry_lo1.raw = 0x11 << 6 | 0b111;
    sys.cpu.cp0.index = 3;
    load_program(&mut sys, PROGRAM_BASE, &[tlbwi(), lw(1, 2, 0)]);
    sys.cpu.set_register(2, 0x4000);
    run(&mut sys, 2);

    assert_eq!(sys.cpu.register(1), 0x1234_5678);
}

#[test]
fn tlbp_reports_probe_results_in_index() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.cpu.cp0.entry_hi.raw = 0x4000;
    sys.cpu.cp0.page_mask = 0;
    sys.cpu.cp0.entry_lo0.raw = 0x10 << 6 | 0b111;
    sys.cpu.cp0.entry_lo1.raw = 0x11 << 6 | 0b111;
    sys.cpu.cp0.index = 5;
    load_program(&mut sys, PROGRAM_BASE, &[tlbwi(), tlbp()]);
    run(&mut sys, 2);
    assert_eq!(sys.cpu.cp0.index, 5);

    let mut sys2 = system(ExecutionMode::Interpreter);
    load_program(&mut sys2, PROGRAM_BASE, &[tlbp()]);
    sys2.cpu.cp0.entry_hi.raw = 0x4000;
    sys2.step();
    assert_eq!(sys2.cpu.cp0.index, 1 << 31);
}

#[test]
fn unaligned_word_load_raises_address_error() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[lw(1, 2, 0)]);
    sys.cpu.set_register(2, KSEG0 + 0x102);
    sys.step();

    assert_eq!(sys.cpu.cp0.cause.exception_code(), 4); // AdEL
    assert_eq!(sys.cpu.cp0.bad_vaddr, KSEG0 + 0x102);
    assert_eq!(sys.cpu.pc, GENERAL_VECTOR);
}

#[test]
fn syscall_break_and_trap_codes() {
    for (word, code) in [(syscall(), 8), (break_(), 9), (teq(1, 1), 13)] {
        let mut sys = system(ExecutionMode::Interpreter);
        load_program(&mut sys, PROGRAM_BASE, &[word]);
        sys.cpu.set_register(1, 42);
        sys.step();

        assert_eq!(sys.cpu.cp0.cause.exception_code(), code);
        assert_eq!(sys.cpu.cp0.epc, KSEG0 + PROGRAM_BASE as u64);
        assert_eq!(sys.cpu.pc, GENERAL_VECTOR);
    }
}

#[test]
fn untaken_trap_does_not_fire() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[teq(1, 2)]);
    sys.cpu.set_register(1, 1);
    sys.cpu.set_register(2, 2);
    sys.step();

    assert_eq!(sys.cpu.cp0.cause.exception_code(), 0);
    assert!(!sys.cpu.cp0.status.exl());
}

#[test]
fn reserved_instruction_reports_coprocessor() {
    // opcode 0x3E is not in the MIPS III table
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[0x3E << 26]);
    sys.step();
    assert_eq!(sys.cpu.cp0.cause.exception_code(), 10);

    // COP2 encodings report coprocessor 2
    let mut sys2 = system(ExecutionMode::Interpreter);
    load_program(&mut sys2, PROGRAM_BASE, &[0x12 << 26]);
    sys2.step();
    assert_eq!(sys2.cpu.cp0.cause.exception_code(), 10);
    assert_eq!(sys2.cpu.cp0.cause.raw >> 28 & 3, 2);
}

#[test]
fn eret_restores_epc_and_clears_exl() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[eret()]);
    sys.cpu.cp0.epc = KSEG0 + 0x2000;
    sys.cpu.cp0.status.set_exl(true);
    sys.step();

    assert_eq!(sys.cpu.pc, KSEG0 + 0x2000);
    assert!(!sys.cpu.cp0.status.exl());
    assert!(!sys.cpu.llbit());
}

#[test]
fn byte_and_half_loads_extend_correctly() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.bus.write_word(0x400, 0x80FF_8001);
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[lb(1, 4, 0), lbu(2, 4, 0), lh(3, 4, 0), lh(5, 4, 2)],
    );
    sys.cpu.set_register(4, KSEG0 + 0x400);
    run(&mut sys, 4);

    assert_eq!(sys.cpu.register(1), 0xFFFF_FFFF_FFFF_FF80);
    assert_eq!(sys.cpu.register(2), 0x80);
    assert_eq!(sys.cpu.register(3), 0xFFFF_FFFF_FFFF_80FF);
    assert_eq!(sys.cpu.register(5), 0xFFFF_FFFF_FFFF_8001);
}

#[test]
fn fpu_unusable_without_cu1() {
    let mut sys = system(ExecutionMode::Interpreter);
    load_program(&mut sys, PROGRAM_BASE, &[mtc1(1, 0)]);
    sys.step();

    assert_eq!(sys.cpu.cp0.cause.exception_code(), 11);
    assert_eq!(sys.cpu.cp0.cause.raw >> 28 & 3, 1);
}

#[test]
fn fpu_add_compare_and_branch() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.cpu.cp0.status.raw = 1 << 29; // CU1
    load_program(
        &mut sys,
        PROGRAM_BASE,
        &[
            mtc1(1, 0),
            mtc1(2, 2),
            add_s(4, 0, 2),
            c_lt_s(0, 2),
            bc1t(2),
            addiu(5, 0, 1), // delay slot
            addiu(6, 0, 99),
            addiu(7, 0, 2), // branch target
        ],
    );
    sys.cpu.set_register(1, 1.5f32.to_bits() as u64);
    sys.cpu.set_register(2, 2.5f32.to_bits() as u64);
    run(&mut sys, 7);

    assert_eq!(sys.cpu.cop1.float(4), 4.0);
    assert!(sys.cpu.cop1.fcr31.compare());
    assert_eq!(sys.cpu.register(5), 1);
    assert_eq!(sys.cpu.register(6), 0);
    assert_eq!(sys.cpu.register(7), 2);
}

#[test]
fn fpu_truncation_rounds_toward_zero() {
    let mut sys = system(ExecutionMode::Interpreter);
    sys.cpu.cp0.status.raw = 1 << 29;
    load_program(&mut sys, PROGRAM_BASE, &[dmtc1(1, 0), trunc_w_d(2, 0)]);
    sys.cpu.set_register(1, (-2.7f64).to_bits());
    run(&mut sys, 2);

    assert_eq!(sys.cpu.cop1.word(2), -2i32 as u32);
}
