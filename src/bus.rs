use crate::device::Device;
use crate::memory::Memory;

/// Routes CPU accesses to either a mapped device or plain memory. Devices
/// are scanned in attachment order and the first window containing the
/// address wins; memory serves everything else.
///
/// A 16-bit access is two byte accesses, low byte first, each routed on
/// its own. An access straddling a window edge therefore splits between
/// handlers.
pub struct Bus {
    memory: Memory,
    devices: Vec<Device>,
}

impl Bus {
    pub fn new(memory: Memory) -> Self {
        Bus {
            memory,
            devices: Vec::new(),
        }
    }

    pub fn attach_device(&mut self, device: Device) {
        self.devices.push(device);
    }

    pub fn read8(&mut self, addr: u16) -> u8 {
        if let Some(dev) = self.devices.iter_mut().find(|dev| dev.handles(addr)) {
            let offset = addr - dev.base();
            return dev.read(offset);
        }
        self.memory.read8(addr)
    }

    pub fn write8(&mut self, addr: u16, value: u8) {
        if let Some(dev) = self.devices.iter_mut().find(|dev| dev.handles(addr)) {
            let offset = addr - dev.base();
            dev.write(offset, value);
            return;
        }
        self.memory.write8(addr, value);
    }

    pub fn read16(&mut self, addr: u16) -> u16 {
        let low = self.read8(addr) as u16;
        let high = self.read8(addr.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    pub fn write16(&mut self, addr: u16, value: u16) {
        self.write8(addr, (value & 0xFF) as u8);
        self.write8(addr.wrapping_add(1), (value >> 8) as u8);
    }

    pub fn tick_devices(&mut self) {
        for dev in &mut self.devices {
            dev.tick();
        }
    }

    /// Read-only view of attached devices, in attachment order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}
