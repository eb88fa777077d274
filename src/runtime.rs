//! The fetch/decode/execute engine. [`Cpu`] owns the architectural
//! register state and drives one instruction per [`Cpu::step`] against a
//! borrowed [`Bus`]; attached devices are ticked once before each
//! instruction.

use colored::Colorize;

use crate::alu;
use crate::bus::Bus;
use crate::isa::{
    decode_operand, Flags, Opcode, OperandDescriptor, OperandType, StatusFlag, RESET_VECTOR,
    STACK_REGISTER, STACK_RESET,
};

/// Architectural registers. R7 and the stack pointer are one register with
/// two names; every write goes through [`RegisterFile::write`] so the two
/// views can never drift apart.
pub struct RegisterFile {
    gpr: [u16; 8],
    sp: u16,
    pub pc: u16,
    pub flags: Flags,
}

impl RegisterFile {
    pub fn new() -> Self {
        let mut registers = RegisterFile {
            gpr: [0; 8],
            sp: 0,
            pc: 0,
            flags: Flags::default(),
        };
        registers.reset();
        registers
    }

    pub fn reset(&mut self) {
        self.gpr = [0; 8];
        self.gpr[STACK_REGISTER as usize] = STACK_RESET;
        self.sp = STACK_RESET;
        self.pc = RESET_VECTOR;
        self.flags.clear();
    }

    pub fn read(&self, index: u8) -> u16 {
        if index as usize >= self.gpr.len() {
            return 0;
        }
        if index == STACK_REGISTER {
            return self.sp;
        }
        self.gpr[index as usize]
    }

    pub fn write(&mut self, index: u8, value: u16) {
        if index as usize >= self.gpr.len() {
            return;
        }
        if index == STACK_REGISTER {
            self.sp = value;
        }
        self.gpr[index as usize] = value;
    }

    pub fn sp(&self) -> u16 {
        self.sp
    }

    pub fn set_sp(&mut self, value: u16) {
        self.write(STACK_REGISTER, value);
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new()
    }
}

/// One operand after decoding, with any extra word already consumed.
#[derive(Clone, Copy, Default, Debug)]
pub struct Operand {
    pub ty: OperandType,
    pub reg: u8,
    pub value: u16,
    pub offset: i16,
}

/// An instruction pulled off the bus, ready to execute.
#[derive(Clone, Copy, Debug)]
pub struct DecodedInstruction {
    /// Raw opcode byte; validated against [`Opcode`] at dispatch.
    pub opcode: u8,
    pub operand_a: Operand,
    pub operand_b: Operand,
    /// Reserved byte. Emitted as zero, preserved on decode, never acted on.
    pub modifier: u8,
    pub size_bytes: u16,
    /// Address the instruction was fetched from.
    pub address: u16,
}

/// Translate a port id to its fixed bus address. Ids without a dedicated
/// mapping land in the I/O page at `0xFF00 + id`.
pub fn port_to_address(port: u16) -> u16 {
    match port {
        0 => 0xFF00, // console data
        1 => 0xFF01, // console status
        2 => 0xFF12, // timer control
        3 => 0xFF10, // timer counter
        4 => 0xFF20, // LEDs
        other => 0xFF00u16.wrapping_add(other),
    }
}

pub struct Cpu {
    registers: RegisterFile,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            registers: RegisterFile::new(),
        }
    }

    pub fn reset(&mut self) {
        self.registers.reset();
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Advance devices, then fetch and execute one instruction. Returns
    /// `false` once execution must stop (HALT or fault).
    pub fn step(&mut self, bus: &mut Bus, trace: bool) -> bool {
        bus.tick_devices();
        let instruction = self.fetch(bus);
        if trace {
            let name = match Opcode::from_byte(instruction.opcode) {
                Some(opcode) => opcode.to_string(),
                None => "?".to_string(),
            };
            println!("{:04X} {:<5}", instruction.address, name);
        }
        self.execute(bus, &instruction)
    }

    /// Read the 4-byte header plus any extra operand words, advancing PC
    /// past the whole instruction.
    fn fetch(&mut self, bus: &mut Bus) -> DecodedInstruction {
        let address = self.registers.pc;
        let mut cursor = address;
        let mut next = |bus: &mut Bus| {
            let byte = bus.read8(cursor);
            cursor = cursor.wrapping_add(1);
            byte
        };
        let opcode = next(bus);
        let raw_a = next(bus);
        let raw_b = next(bus);
        let modifier = next(bus);

        let operand_a = self.resolve_operand(bus, decode_operand(raw_a), &mut cursor);
        let operand_b = self.resolve_operand(bus, decode_operand(raw_b), &mut cursor);

        self.registers.pc = cursor;
        DecodedInstruction {
            opcode,
            operand_a,
            operand_b,
            modifier,
            size_bytes: cursor.wrapping_sub(address),
            address,
        }
    }

    fn resolve_operand(
        &mut self,
        bus: &mut Bus,
        descriptor: OperandDescriptor,
        cursor: &mut u16,
    ) -> Operand {
        let mut operand = Operand {
            ty: descriptor.ty,
            ..Operand::default()
        };
        match descriptor.ty {
            OperandType::Register | OperandType::RegisterIndirect => {
                operand.reg = descriptor.payload & 0x07;
            }
            OperandType::RegisterIndexed => {
                operand.reg = descriptor.payload & 0x07;
                operand.offset = bus.read16(*cursor) as i16;
                *cursor = cursor.wrapping_add(2);
            }
            OperandType::Immediate | OperandType::Absolute => {
                operand.value = bus.read16(*cursor);
                *cursor = cursor.wrapping_add(2);
            }
            OperandType::Port => {
                operand.value = descriptor.payload as u16;
            }
            OperandType::None => {}
        }
        operand
    }

    fn read_operand(&self, bus: &mut Bus, operand: &Operand) -> u16 {
        match operand.ty {
            OperandType::Register => self.registers.read(operand.reg),
            OperandType::Immediate => operand.value,
            OperandType::Absolute => bus.read16(operand.value),
            OperandType::RegisterIndirect => {
                let address = self.registers.read(operand.reg);
                bus.read16(address)
            }
            OperandType::RegisterIndexed => {
                let base = self.registers.read(operand.reg);
                bus.read16(base.wrapping_add(operand.offset as u16))
            }
            _ => operand.value,
        }
    }

    fn write_operand(&mut self, bus: &mut Bus, operand: &Operand, value: u16) {
        match operand.ty {
            OperandType::Register => self.registers.write(operand.reg, value),
            OperandType::Absolute => bus.write16(operand.value, value),
            OperandType::RegisterIndirect => {
                let address = self.registers.read(operand.reg);
                bus.write16(address, value);
            }
            OperandType::RegisterIndexed => {
                let base = self.registers.read(operand.reg);
                bus.write16(base.wrapping_add(operand.offset as u16), value);
            }
            _ => {}
        }
    }

    fn push(&mut self, bus: &mut Bus, value: u16) {
        let new_sp = self.registers.sp().wrapping_sub(2);
        bus.write16(new_sp, value);
        self.registers.set_sp(new_sp);
    }

    fn pop(&mut self, bus: &mut Bus) -> u16 {
        let value = bus.read16(self.registers.sp());
        self.registers.set_sp(self.registers.sp().wrapping_add(2));
        value
    }

    /// Result flags for the plain data moves that define Z and N only.
    fn load_flags(&mut self, value: u16) {
        let mut flags = Flags::default();
        flags.set(StatusFlag::Zero, value == 0);
        flags.set(StatusFlag::Negative, value & 0x8000 != 0);
        self.registers.flags = flags;
    }

    fn execute(&mut self, bus: &mut Bus, inst: &DecodedInstruction) -> bool {
        let opcode = match Opcode::from_byte(inst.opcode) {
            Some(opcode) => opcode,
            None => {
                eprintln!(
                    "{}",
                    format!("unknown opcode {:02X} at {:04X}", inst.opcode, inst.address).red()
                );
                return false;
            }
        };

        match opcode {
            Opcode::Nop => {}
            Opcode::Halt => return false,
            Opcode::Ldi => {
                let value = self.read_operand(bus, &inst.operand_b);
                self.write_operand(bus, &inst.operand_a, value);
                self.load_flags(value);
            }
            Opcode::Mov | Opcode::Load => {
                let value = self.read_operand(bus, &inst.operand_b);
                self.write_operand(bus, &inst.operand_a, value);
            }
            Opcode::Store => {
                let value = self.read_operand(bus, &inst.operand_a);
                self.write_operand(bus, &inst.operand_b, value);
            }
            Opcode::Add | Opcode::Addi => {
                self.binary_alu(bus, inst, |a, b| alu::add(a, b, false));
            }
            Opcode::Sub | Opcode::Subi => {
                self.binary_alu(bus, inst, alu::sub);
            }
            Opcode::Mul => self.binary_alu(bus, inst, alu::mul),
            Opcode::Div => self.binary_alu(bus, inst, alu::div),
            Opcode::And => self.binary_alu(bus, inst, alu::bit_and),
            Opcode::Or => self.binary_alu(bus, inst, alu::bit_or),
            Opcode::Xor => self.binary_alu(bus, inst, alu::bit_xor),
            Opcode::Shl => {
                self.binary_alu(bus, inst, |a, b| alu::shl(a, (b & 0xFF) as u8));
            }
            Opcode::Shr => {
                self.binary_alu(bus, inst, |a, b| alu::shr(a, (b & 0xFF) as u8));
            }
            Opcode::Not => {
                let value = self.read_operand(bus, &inst.operand_a);
                let result = alu::bit_not(value);
                self.write_operand(bus, &inst.operand_a, result.value);
                self.registers.flags = result.flags;
            }
            Opcode::Cmp => {
                let lhs = self.read_operand(bus, &inst.operand_a);
                let rhs = self.read_operand(bus, &inst.operand_b);
                self.registers.flags = alu::sub(lhs, rhs).flags;
            }
            Opcode::Jmp => {
                self.registers.pc = self.read_operand(bus, &inst.operand_a);
            }
            Opcode::Jz => self.jump_if(bus, inst, self.registers.flags.test(StatusFlag::Zero)),
            Opcode::Jnz => self.jump_if(bus, inst, !self.registers.flags.test(StatusFlag::Zero)),
            Opcode::Jn => self.jump_if(bus, inst, self.registers.flags.test(StatusFlag::Negative)),
            Opcode::Jc => self.jump_if(bus, inst, self.registers.flags.test(StatusFlag::Carry)),
            Opcode::Call => {
                let target = self.read_operand(bus, &inst.operand_a);
                let return_address = self.registers.pc;
                self.push(bus, return_address);
                self.registers.pc = target;
            }
            Opcode::Ret => {
                self.registers.pc = self.pop(bus);
            }
            Opcode::Push => {
                let value = self.read_operand(bus, &inst.operand_a);
                self.push(bus, value);
            }
            Opcode::Pop => {
                let value = self.pop(bus);
                self.write_operand(bus, &inst.operand_a, value);
            }
            Opcode::Out => {
                let address = port_to_address(inst.operand_a.value);
                let value = (self.read_operand(bus, &inst.operand_b) & 0xFF) as u8;
                bus.write8(address, value);
            }
            Opcode::In => {
                let address = port_to_address(inst.operand_b.value);
                let value = bus.read8(address) as u16;
                self.write_operand(bus, &inst.operand_a, value);
            }
            Opcode::Adjsp => {
                let delta = self.read_operand(bus, &inst.operand_a) as i16;
                let new_sp = self.registers.sp().wrapping_add(delta as u16);
                self.registers.set_sp(new_sp);
            }
            Opcode::Sys => {
                let code = self.read_operand(bus, &inst.operand_a);
                match code {
                    0 => {}
                    1 => println!(),
                    2 => println!("[R0={}]", self.registers.read(0)),
                    _ => {}
                }
            }
        }
        true
    }

    fn binary_alu(
        &mut self,
        bus: &mut Bus,
        inst: &DecodedInstruction,
        op: impl FnOnce(u16, u16) -> alu::AluResult,
    ) {
        let lhs = self.read_operand(bus, &inst.operand_a);
        let rhs = self.read_operand(bus, &inst.operand_b);
        let result = op(lhs, rhs);
        self.write_operand(bus, &inst.operand_a, result.value);
        self.registers.flags = result.flags;
    }

    fn jump_if(&mut self, bus: &mut Bus, inst: &DecodedInstruction, condition: bool) {
        if condition {
            self.registers.pc = self.read_operand(bus, &inst.operand_a);
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Cpu::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::{Console, Device, LedPanel, Timer};
    use crate::isa::encode_operand;
    use crate::memory::Memory;

    fn machine() -> (Cpu, Bus) {
        let mut bus = Bus::new(Memory::new());
        bus.attach_device(Device::Console(Console::new()));
        bus.attach_device(Device::Timer(Timer::new()));
        bus.attach_device(Device::Leds(LedPanel::new()));
        (Cpu::new(), bus)
    }

    /// Build one encoded instruction by hand.
    fn instruction(
        opcode: Opcode,
        a: (OperandType, u8),
        b: (OperandType, u8),
        words: &[u16],
    ) -> Vec<u8> {
        let mut bytes = vec![
            opcode.as_byte(),
            encode_operand(a.0, a.1),
            encode_operand(b.0, b.1),
            0,
        ];
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    fn load(bus: &mut Bus, programs: &[Vec<u8>]) {
        let mut addr = 0u16;
        for chunk in programs {
            for &byte in chunk {
                bus.write8(addr, byte);
                addr = addr.wrapping_add(1);
            }
        }
    }

    use crate::isa::OperandType::*;

    #[test]
    fn reset_state() {
        let registers = RegisterFile::new();
        assert_eq!(registers.pc, 0x0000);
        assert_eq!(registers.sp(), 0xFF00);
        assert_eq!(registers.read(7), 0xFF00);
        assert_eq!(registers.read(0), 0);
        assert_eq!(registers.flags.bits(), 0);
    }

    #[test]
    fn sp_and_r7_stay_aliased() {
        let mut registers = RegisterFile::new();
        registers.write(7, 0x1234);
        assert_eq!(registers.sp(), 0x1234);
        registers.set_sp(0x4321);
        assert_eq!(registers.read(7), 0x4321);
    }

    #[test]
    fn fetch_advances_past_extra_words() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x0042])],
        );
        assert!(cpu.step(&mut bus, false));
        assert_eq!(cpu.registers().pc, 6);
        assert_eq!(cpu.registers().read(0), 0x42);
    }

    #[test]
    fn ldi_sets_zero_and_negative_only() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x8000]),
                instruction(Opcode::Ldi, (Register, 1), (Immediate, 0), &[0x0000]),
            ],
        );
        cpu.step(&mut bus, false);
        assert!(cpu.registers().flags.test(StatusFlag::Negative));
        cpu.step(&mut bus, false);
        assert!(cpu.registers().flags.test(StatusFlag::Zero));
        assert!(!cpu.registers().flags.test(StatusFlag::Carry));
    }

    #[test]
    fn mov_leaves_flags_untouched() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x0000]),
                instruction(Opcode::Mov, (Register, 1), (Immediate, 0), &[0x1234]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().read(1), 0x1234);
        assert!(cpu.registers().flags.test(StatusFlag::Zero));
    }

    #[test]
    fn store_writes_through_absolute_operand() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0xBEEF]),
                instruction(Opcode::Store, (Register, 0), (Absolute, 0), &[0x4000]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(bus.read16(0x4000), 0xBEEF);
    }

    #[test]
    fn indexed_operand_adds_signed_offset() {
        let (mut cpu, mut bus) = machine();
        bus.write16(0x2000, 0xCAFE);
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 1), (Immediate, 0), &[0x2002]),
                instruction(
                    Opcode::Load,
                    (Register, 0),
                    (RegisterIndexed, 1),
                    &[(-2i16) as u16],
                ),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().read(0), 0xCAFE);
    }

    #[test]
    fn push_pop_round_trip_keeps_sp_alias() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x0001]),
                instruction(Opcode::Push, (Register, 0), (None, 0), &[]),
                instruction(Opcode::Pop, (Register, 1), (None, 0), &[]),
                instruction(Opcode::Halt, (None, 0), (None, 0), &[]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().sp(), 0xFEFE);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().read(1), 1);
        assert_eq!(cpu.registers().sp(), 0xFF00);
        assert_eq!(cpu.registers().read(7), cpu.registers().sp());
        assert!(!cpu.step(&mut bus, false));
    }

    #[test]
    fn call_ret_round_trip() {
        let (mut cpu, mut bus) = machine();
        // call 0x0100; halt -- at 0x0100: ret
        load(
            &mut bus,
            &[
                instruction(Opcode::Call, (Immediate, 0), (None, 0), &[0x0100]),
                instruction(Opcode::Halt, (None, 0), (None, 0), &[]),
            ],
        );
        let ret = instruction(Opcode::Ret, (None, 0), (None, 0), &[]);
        for (i, &byte) in ret.iter().enumerate() {
            bus.write8(0x0100 + i as u16, byte);
        }
        let sp_before = cpu.registers().sp();
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().pc, 0x0100);
        cpu.step(&mut bus, false);
        // Back at the instruction after CALL with the stack balanced.
        assert_eq!(cpu.registers().pc, 6);
        assert_eq!(cpu.registers().sp(), sp_before);
    }

    #[test]
    fn adjsp_moves_stack_by_signed_delta() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Adjsp, (Immediate, 0), (None, 0), &[(-4i16) as u16]),
                instruction(Opcode::Adjsp, (Immediate, 0), (None, 0), &[4]),
            ],
        );
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().sp(), 0xFEFC);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().sp(), 0xFF00);
        assert_eq!(cpu.registers().read(7), 0xFF00);
    }

    #[test]
    fn conditional_jump_taken_and_not_taken() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x0000]),
                instruction(Opcode::Jz, (Immediate, 0), (None, 0), &[0x0100]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().pc, 0x0100);

        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[0x0001]),
                instruction(Opcode::Jz, (Immediate, 0), (None, 0), &[0x0100]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().pc, 12);
    }

    #[test]
    fn out_writes_console_through_port_map() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[
                instruction(Opcode::Ldi, (Register, 0), (Immediate, 0), &[b'A' as u16]),
                instruction(Opcode::Out, (Port, 0), (Register, 0), &[]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        match &bus.devices()[0] {
            Device::Console(console) => assert_eq!(console.buffer(), b"A"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn in_reads_console_status() {
        let (mut cpu, mut bus) = machine();
        load(
            &mut bus,
            &[instruction(Opcode::In, (Register, 0), (Port, 1), &[])],
        );
        cpu.step(&mut bus, false);
        assert_eq!(cpu.registers().read(0), 0x01);
    }

    #[test]
    fn unmapped_port_lands_in_io_page() {
        assert_eq!(port_to_address(9), 0xFF09);
        assert_eq!(port_to_address(2), 0xFF12);
        assert_eq!(port_to_address(3), 0xFF10);
        assert_eq!(port_to_address(4), 0xFF20);
    }

    #[test]
    fn unknown_opcode_faults() {
        let (mut cpu, mut bus) = machine();
        bus.write8(0x0000, 0x7F);
        assert!(!cpu.step(&mut bus, false));
        // PC still advanced past the header.
        assert_eq!(cpu.registers().pc, 4);
    }

    #[test]
    fn devices_tick_once_per_step() {
        let (mut cpu, mut bus) = machine();
        bus.write8(0xFF13, 0xFF);
        bus.write8(0xFF12, 0x01);
        load(
            &mut bus,
            &[
                instruction(Opcode::Nop, (None, 0), (None, 0), &[]),
                instruction(Opcode::Nop, (None, 0), (None, 0), &[]),
            ],
        );
        cpu.step(&mut bus, false);
        cpu.step(&mut bus, false);
        assert_eq!(bus.read8(0xFF10), 2);
    }
}
