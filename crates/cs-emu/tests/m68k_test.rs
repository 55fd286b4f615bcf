//! 68000 execution tests: branch forms, subroutine calls, quick
//! arithmetic flags and the exception frame layout.

use cs_emu::bus::{Device, MemoryMap};
use cs_emu::cpu::{OpKind, M68000};
use cs_emu::EmuError;

const RAM_TOP: u32 = 0x0080_0000;

fn machine() -> (M68000, MemoryMap) {
    let mut bus = MemoryMap::new(0x00ff_ffff);
    bus.add_device(0, RAM_TOP, Device::Ram(vec![0; RAM_TOP as usize]));
    (M68000::new(), bus)
}

fn run_step(cpu: &mut M68000, bus: &mut MemoryMap) {
    let result = cpu.step(bus);
    assert!(result.valid_insn);
    assert!(!result.trap);
}

#[test]
fn branch_chain_all_three_encodings() {
    let (mut cpu, mut bus) = machine();
    bus.write_u16(0x000100, 0x6050).unwrap(); // bra.s +0x50
    bus.write_u16(0x000152, 0x6000).unwrap();
    bus.write_u16(0x000154, 0xfefc).unwrap(); // bra.w -0x104
    bus.write_u16(0x000050, 0x60ff).unwrap();
    bus.write_u32(0x000052, 0x000100ae).unwrap(); // bra.l +0x100ae
    bus.write_u16(0x010100, 0x4e75).unwrap(); // rts

    cpu.execute_from(0x000100, RAM_TOP, &mut bus).unwrap();
    assert_eq!(cpu.pc, 0x000100);
    assert_eq!(cpu.a[7], RAM_TOP - 4);
    assert_eq!(cpu.status(), 0x0000);

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x000152);
    assert_eq!(cpu.a[7], RAM_TOP - 4);
    assert_eq!(cpu.status(), 0x0000);

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x000050);

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x010100);

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0xffff_ffff);
    assert_eq!(cpu.a[7], RAM_TOP);
    assert_eq!(cpu.status(), 0x0000);
    assert!(cpu.returned());
}

#[test]
fn bsr_and_rts_round_trip() {
    let (mut cpu, mut bus) = machine();
    bus.write_u16(0x000200, 0x6150).unwrap(); // bsr.s +0x50
    bus.write_u16(0x000202, 0x6100).unwrap();
    bus.write_u16(0x000204, 0xfefc).unwrap(); // bsr.w -0x104
    bus.write_u16(0x000206, 0x61ff).unwrap();
    bus.write_u32(0x000208, 0x000100ae).unwrap(); // bsr.l
    bus.write_u16(0x00020c, 0x4e75).unwrap();
    // Subroutine bodies
    bus.write_u16(0x000252, 0x4e75).unwrap();
    bus.write_u16(0x000100, 0x4e75).unwrap();
    bus.write_u16(0x0102b6, 0x4e75).unwrap();

    cpu.execute_from(0x000200, RAM_TOP, &mut bus).unwrap();

    run_step(&mut cpu, &mut bus); // bsr.s
    assert_eq!(cpu.pc, 0x000252);
    assert_eq!(cpu.a[7], RAM_TOP - 8);
    run_step(&mut cpu, &mut bus); // rts
    assert_eq!(cpu.pc, 0x000202);
    assert_eq!(cpu.a[7], RAM_TOP - 4);

    run_step(&mut cpu, &mut bus); // bsr.w
    assert_eq!(cpu.pc, 0x000100);
    assert_eq!(cpu.a[7], RAM_TOP - 8);
    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x000206);

    run_step(&mut cpu, &mut bus); // bsr.l
    assert_eq!(cpu.pc, 0x0102b6);
    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.pc, 0x00020c);
    assert_eq!(cpu.a[7], RAM_TOP - 4);

    run_step(&mut cpu, &mut bus); // final rts
    assert_eq!(cpu.pc, 0xffff_ffff);
    assert_eq!(cpu.a[7], RAM_TOP);
}

#[test]
fn moveq_and_addq_flags() {
    let (mut cpu, mut bus) = machine();
    bus.write_u16(0x000000, 0x7005).unwrap(); // moveq #5,d0
    bus.write_u16(0x000002, 0x5a04).unwrap(); // addq.b #5,d4
    bus.write_u16(0x000004, 0x5848).unwrap(); // addq.w #4,a0
    bus.write_u16(0x000006, 0x5083).unwrap(); // addq.l #8,d3
    bus.write_u16(0x000008, 0x4e75).unwrap(); // rts

    cpu.execute_from(0x000000, RAM_TOP, &mut bus).unwrap();
    cpu.d[4] = 0xff;
    cpu.a[0] = 0xfc;
    cpu.d[3] = 0x7fff_fff8;

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.d[0], 5);
    assert_eq!(cpu.status(), 0x0000);

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.d[4], 0x04);
    assert_eq!(cpu.status(), 0x0011); // X and C from the byte carry

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.a[0], 0x100);
    assert_eq!(cpu.status(), 0x0011); // addq to An leaves flags alone

    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.d[3], 0x8000_0000);
    assert_eq!(cpu.status(), 0x000a); // N and V from the signed overflow

    run_step(&mut cpu, &mut bus);
    assert!(cpu.returned());
}

#[test]
fn exception_frame_shape_and_rte() {
    let (mut cpu, mut bus) = machine();
    // Illegal-instruction vector points at a handler holding rte
    bus.write_u32(4 * 4, 0x000400).unwrap();
    bus.write_u16(0x000400, 0x4e73).unwrap(); // rte
    bus.write_u16(0x000100, 0x4afc).unwrap(); // illegal

    cpu.set_status(0x2000);
    cpu.pc = 0x000100;
    cpu.a[7] = 0x4000;

    let result = cpu.step(&mut bus);
    assert!(result.trap);
    assert_eq!(result.cycles, 34);
    assert_eq!(cpu.pc, 0x000400);

    // Top of stack down: SR, PC high, PC low, format/vector word
    assert_eq!(cpu.a[7], 0x4000 - 8);
    assert_eq!(bus.read_u16(cpu.a[7]).unwrap(), 0x2000);
    assert_eq!(bus.read_u32(cpu.a[7] + 2).unwrap(), 0x000102);
    assert_eq!(bus.read_u16(cpu.a[7] + 6).unwrap(), 0x1000 | (4 << 2));

    // rte restores exactly
    let result = cpu.step(&mut bus);
    assert!(!result.trap);
    assert_eq!(cpu.pc, 0x000102);
    assert_eq!(cpu.a[7], 0x4000);
    assert_eq!(cpu.status(), 0x2000);
}

#[test]
fn trap_pushes_vector_32_frame() {
    let (mut cpu, mut bus) = machine();
    bus.write_u32((32 + 3) * 4, 0x000500).unwrap();
    bus.write_u16(0x000100, 0x4e43).unwrap(); // trap #3

    cpu.set_status(0x2000);
    cpu.pc = 0x000100;
    cpu.a[7] = 0x4000;

    let result = cpu.step(&mut bus);
    assert!(result.trap);
    assert_eq!(cpu.pc, 0x000500);
    assert_eq!(bus.read_u16(cpu.a[7] + 6).unwrap(), 0x1000 | (35 << 2));
}

#[test]
fn bus_error_raises_vector_two() {
    let (mut cpu, mut bus) = machine();
    bus.write_u32(2 * 4, 0x000600).unwrap();
    cpu.set_status(0x2000);
    cpu.a[7] = 0x4000;
    // Fetch from unmapped space
    cpu.pc = 0x00f0_0000;
    let result = cpu.step(&mut bus);
    assert!(result.trap);
    assert!(!result.valid_insn);
    assert_eq!(cpu.pc, 0x000600);
}

#[test]
fn dbra_counts_down_a_word() {
    let (mut cpu, mut bus) = machine();
    // moveq #3,d1 ; loop: dbra d1,loop ; rts
    bus.write_u16(0x000000, 0x7203).unwrap();
    bus.write_u16(0x000002, 0x51c9).unwrap();
    bus.write_u16(0x000004, 0xfffe).unwrap(); // back to the dbra itself
    bus.write_u16(0x000006, 0x4e75).unwrap();

    cpu.execute_from(0x000000, RAM_TOP, &mut bus).unwrap();
    run_step(&mut cpu, &mut bus);
    // Loop runs 4 times (3,2,1,0) before falling through
    for _ in 0..4 {
        run_step(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.pc, 0x000006);
    assert_eq!(cpu.d[1] as u16, 0xffff);
}

#[test]
fn movem_round_trips_registers() {
    let (mut cpu, mut bus) = machine();
    // movem.l d0-d1/a0,-(a7) ; movem.l (a7)+,d2-d3/a1 ; rts
    bus.write_u16(0x000000, 0x48e7).unwrap();
    bus.write_u16(0x000002, 0xc080).unwrap(); // predec mask: d0,d1,a0
    bus.write_u16(0x000004, 0x4cdf).unwrap();
    bus.write_u16(0x000006, 0x020c).unwrap(); // postinc mask: d2,d3,a1
    bus.write_u16(0x000008, 0x4e75).unwrap();

    cpu.execute_from(0x000000, RAM_TOP, &mut bus).unwrap();
    cpu.d[0] = 0x11111111;
    cpu.d[1] = 0x22222222;
    cpu.a[0] = 0x33333333;

    run_step(&mut cpu, &mut bus);
    run_step(&mut cpu, &mut bus);
    assert_eq!(cpu.d[2], 0x11111111);
    assert_eq!(cpu.d[3], 0x22222222);
    assert_eq!(cpu.a[1], 0x33333333);
    run_step(&mut cpu, &mut bus);
    assert!(cpu.returned());
}

#[test]
fn divide_by_zero_traps() {
    let (mut cpu, mut bus) = machine();
    bus.write_u32(5 * 4, 0x000700).unwrap();
    bus.write_u16(0x000000, 0x80c1).unwrap(); // divu d1,d0
    cpu.set_status(0x2000);
    cpu.pc = 0x000000;
    cpu.a[7] = 0x4000;
    cpu.d[0] = 100;
    cpu.d[1] = 0;
    let result = cpu.step(&mut bus);
    assert!(result.trap);
    assert_eq!(cpu.pc, 0x000700);
}

#[test]
fn illegal_patterns_decode_illegal() {
    let cpu = M68000::new();
    assert_eq!(cpu.decode_instruction(0x4afc).kind, OpKind::Illegal);
    assert_eq!(cpu.decode_instruction(0xa000).kind, OpKind::Illegal);
    assert_eq!(cpu.decode_instruction(0xffff).kind, OpKind::Illegal);
}

#[test]
fn interrupt_respects_priority_mask() {
    let (mut cpu, mut bus) = machine();
    bus.write_u32(69 * 4, 0x000800).unwrap(); // timer C system vector
    cpu.set_status(0x2600); // supervisor, mask level 6
    cpu.a[7] = 0x4000;
    cpu.pc = 0x000100;

    // Level 6 request against a level-6 mask is held off
    assert!(!cpu.request_interrupt(&mut bus, 6, 69));
    assert_eq!(cpu.pc, 0x000100);

    // Level 7 always goes through
    assert!(cpu.request_interrupt(&mut bus, 7, 69));
    assert_eq!(cpu.pc, 0x000800);
    assert_eq!(cpu.status() & 0x0700, 0x0700);
}

#[test]
fn runaway_routine_reports_device_error() {
    let (mut cpu, mut bus) = machine();
    // bra.s to itself
    bus.write_u16(0x000000, 0x60fe).unwrap();
    cpu.execute_from(0x000000, RAM_TOP, &mut bus).unwrap();
    let result = cpu.execute_to_return(&mut bus, 1000);
    assert!(matches!(result, Err(EmuError::Device { .. })));
}
