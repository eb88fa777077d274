//! Owns the whole machine: memory behind a bus, the CPU, and the three
//! stock peripherals. This is the entry point the CLI and tests drive.

use std::fmt::Write as _;

use miette::Result;

use crate::bus::Bus;
use crate::device::{Console, Device, LedPanel, Timer};
use crate::error;
use crate::isa::MEMORY_SIZE;
use crate::memory::Memory;
use crate::runtime::{Cpu, RegisterFile};

pub struct Emulator {
    bus: Bus,
    cpu: Cpu,
}

impl Emulator {
    /// A machine with console, timer and LED panel attached, in that order.
    pub fn new() -> Self {
        let mut bus = Bus::new(Memory::new());
        bus.attach_device(Device::Console(Console::new()));
        bus.attach_device(Device::Timer(Timer::new()));
        bus.attach_device(Device::Leds(LedPanel::new()));
        Emulator {
            bus,
            cpu: Cpu::new(),
        }
    }

    /// Clear memory and bring the CPU back to its reset state. Devices
    /// keep their identity and attachment order.
    pub fn reset(&mut self) {
        *self.bus.memory_mut() = Memory::new();
        self.cpu.reset();
    }

    pub fn load_image(&mut self, image: &[u8], origin: u16) -> Result<()> {
        self.bus.memory_mut().load_block(image, origin)
    }

    /// Step until HALT, a fault, or the cycle budget runs out. A budget of
    /// zero means unlimited. Running out of cycles is a normal exit, so
    /// the caller can always inspect the machine afterwards.
    pub fn run(&mut self, cycle_limit: u64, trace: bool) {
        let mut cycles = 0u64;
        while cycle_limit == 0 || cycles < cycle_limit {
            if !self.cpu.step(&mut self.bus, trace) {
                break;
            }
            cycles += 1;
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        self.cpu.registers()
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        self.cpu.registers_mut()
    }

    pub fn memory(&self) -> &Memory {
        self.bus.memory()
    }

    /// Bytes written to the console data port so far.
    pub fn console_buffer(&self) -> &[u8] {
        for device in self.bus.devices() {
            if let Device::Console(console) = device {
                return console.buffer();
            }
        }
        &[]
    }

    /// Render a memory window as rows of 16 hex bytes.
    pub fn dump(&self, start: u16, length: usize) -> Result<String> {
        if start as usize + length > MEMORY_SIZE {
            return Err(error::dump_out_of_range());
        }
        let bytes = self.memory().bytes();
        let mut out = String::new();
        for row in (0..length).step_by(16) {
            let addr = start as usize + row;
            write!(out, "{:04X}:", addr).unwrap();
            for col in 0..16 {
                if row + col >= length {
                    break;
                }
                write!(out, " {:02X}", bytes[addr + col]).unwrap();
            }
            out.push('\n');
        }
        Ok(out)
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Emulator::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loads_image_at_origin() {
        let mut emu = Emulator::new();
        emu.load_image(&[0xAA, 0xBB], 0x8000).unwrap();
        assert_eq!(emu.memory().read8(0x8000), 0xAA);
        assert_eq!(emu.memory().read8(0x8001), 0xBB);
    }

    #[test]
    fn rejects_image_past_end() {
        let mut emu = Emulator::new();
        assert!(emu.load_image(&[0; 4], 0xFFFE).is_err());
    }

    #[test]
    fn cycle_limit_stops_run() {
        let mut emu = Emulator::new();
        // All zeros decode as NOP, so this would spin forever without a budget.
        emu.run(10, false);
        assert_eq!(emu.registers().pc, 40);
    }

    #[test]
    fn halt_stops_run() {
        let mut emu = Emulator::new();
        emu.load_image(&[0x01, 0, 0, 0], 0).unwrap();
        emu.run(0, false);
        assert_eq!(emu.registers().pc, 4);
    }

    #[test]
    fn reset_clears_memory_and_registers() {
        let mut emu = Emulator::new();
        emu.load_image(&[0xFF], 0x1234).unwrap();
        emu.registers_mut().pc = 0x4444;
        emu.reset();
        assert_eq!(emu.memory().read8(0x1234), 0);
        assert_eq!(emu.registers().pc, 0);
    }

    #[test]
    fn dump_formats_rows() {
        let mut emu = Emulator::new();
        emu.load_image(&[0x01, 0x02, 0x03], 0x0010).unwrap();
        let text = emu.dump(0x0010, 3).unwrap();
        assert_eq!(text, "0010: 01 02 03\n");
    }

    #[test]
    fn dump_rejects_out_of_bounds_window() {
        let emu = Emulator::new();
        assert!(emu.dump(0xFFF0, 32).is_err());
        assert!(emu.dump(0xFFF0, 16).is_ok());
    }
}
