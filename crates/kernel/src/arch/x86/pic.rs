//! Legacy 8259A PIC (cascaded master/slave pair).
//!
//! The PC wires two 8259As together: master on ports 0x20/0x21, slave on
//! 0xA0/0xA1, cascaded through master line 2. After remapping, IRQs 0-7
//! land on vectors 32-39 and IRQs 8-15 on vectors 40-47, clear of the CPU
//! exception range.
//!
//! The driver is generic over [`PortIo`] so the dispatch tests can run it
//! against a scripted bus; on hardware it is instantiated with the real
//! port backend.

use crate::hal::PortIo;

/// Master PIC command port
const PIC1_COMMAND: u16 = 0x20;
/// Master PIC data port (IMR)
const PIC1_DATA: u16 = 0x21;
/// Slave PIC command port
const PIC2_COMMAND: u16 = 0xA0;
/// Slave PIC data port (IMR)
const PIC2_DATA: u16 = 0xA1;

/// End of Interrupt command
const CMD_EOI: u8 = 0x20;

/// OCW3: read Interrupt Request Register
const CMD_READ_IRR: u8 = 0x0A;
/// OCW3: read In-Service Register
const CMD_READ_ISR: u8 = 0x0B;

/// ICW1: initialization, ICW4 follows
const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;

/// ICW4: 8086/8088 mode
const ICW4_8086: u8 = 0x01;

/// Cascaded PIC pair.
pub struct Pic8259<P: PortIo> {
    bus: P,
    master_offset: u8,
    slave_offset: u8,
}

impl<P: PortIo> Pic8259<P> {
    pub fn new(bus: P) -> Self {
        Self {
            bus,
            master_offset: 0,
            slave_offset: 0,
        }
    }

    pub fn bus(&self) -> &P {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut P {
        &mut self.bus
    }

    /// Remap both PICs to `offset1` (master) and `offset2` (slave).
    ///
    /// Issues the ICW1..ICW4 sequence with the standard cascade identities
    /// (master line 2 has the slave; slave id 2) and restores the mask
    /// registers that were programmed before the sequence started.
    pub fn remap(&mut self, offset1: u8, offset2: u8) {
        // Save current masks
        let mask1 = self.bus.inb(PIC1_DATA);
        let mask2 = self.bus.inb(PIC2_DATA);

        // Start initialization sequence (ICW1)
        self.bus.outb(PIC1_COMMAND, ICW1_INIT | ICW1_ICW4);
        self.io_wait();
        self.bus.outb(PIC2_COMMAND, ICW1_INIT | ICW1_ICW4);
        self.io_wait();

        // Vector offsets (ICW2)
        self.bus.outb(PIC1_DATA, offset1);
        self.io_wait();
        self.bus.outb(PIC2_DATA, offset2);
        self.io_wait();

        // Cascade wiring (ICW3): master bit 2, slave identity 2
        self.bus.outb(PIC1_DATA, 0x04);
        self.io_wait();
        self.bus.outb(PIC2_DATA, 0x02);
        self.io_wait();

        // Mode (ICW4)
        self.bus.outb(PIC1_DATA, ICW4_8086);
        self.io_wait();
        self.bus.outb(PIC2_DATA, ICW4_8086);
        self.io_wait();

        // Restore the saved masks
        self.bus.outb(PIC1_DATA, mask1);
        self.bus.outb(PIC2_DATA, mask2);

        self.master_offset = offset1;
        self.slave_offset = offset2;
    }

    /// Mask (disable) one IRQ line.
    pub fn set_mask(&mut self, irq: u8) {
        debug_assert!(irq < 16);
        if irq < 8 {
            let mask = self.bus.inb(PIC1_DATA);
            self.bus.outb(PIC1_DATA, mask | (1 << irq));
        } else {
            let line = irq - 8;
            let mask = self.bus.inb(PIC2_DATA);
            self.bus.outb(PIC2_DATA, mask | (1 << line));
        }
    }

    /// Unmask (enable) one IRQ line; slave lines also unmask the cascade.
    pub fn clear_mask(&mut self, irq: u8) {
        debug_assert!(irq < 16);
        if irq < 8 {
            let mask = self.bus.inb(PIC1_DATA);
            self.bus.outb(PIC1_DATA, mask & !(1 << irq));
        } else {
            let line = irq - 8;
            let mask = self.bus.inb(PIC2_DATA);
            self.bus.outb(PIC2_DATA, mask & !(1 << line));

            let master_mask = self.bus.inb(PIC1_DATA);
            self.bus.outb(PIC1_DATA, master_mask & !(1 << 2));
        }
    }

    /// Combined 16-bit interrupt mask register (slave in the high byte).
    pub fn get_mask(&mut self) -> u16 {
        let m = self.bus.inb(PIC1_DATA) as u16;
        let s = self.bus.inb(PIC2_DATA) as u16;
        (s << 8) | m
    }

    /// Acknowledge `irq`. Slave lines acknowledge both chips.
    pub fn send_eoi(&mut self, irq: u8) {
        debug_assert!(irq < 16);
        if irq >= 8 {
            self.bus.outb(PIC2_COMMAND, CMD_EOI);
        }
        self.bus.outb(PIC1_COMMAND, CMD_EOI);
    }

    /// Acknowledge the master only. Used for spurious IRQ 15, where the
    /// slave never latched anything but the cascade line did.
    pub fn send_eoi_master(&mut self) {
        self.bus.outb(PIC1_COMMAND, CMD_EOI);
    }

    /// Combined Interrupt Request Register (slave in the high byte).
    pub fn get_irr(&mut self) -> u16 {
        self.read_reg(CMD_READ_IRR)
    }

    /// Combined In-Service Register (slave in the high byte).
    pub fn get_isr(&mut self) -> u16 {
        self.read_reg(CMD_READ_ISR)
    }

    fn read_reg(&mut self, ocw3: u8) -> u16 {
        self.bus.outb(PIC1_COMMAND, ocw3);
        let m = self.bus.inb(PIC1_COMMAND) as u16;
        self.bus.outb(PIC2_COMMAND, ocw3);
        let s = self.bus.inb(PIC2_COMMAND) as u16;
        (s << 8) | m
    }

    /// Spurious-interrupt check for the lowest-priority lines 7 and 15.
    ///
    /// A spurious interrupt reports line 7 (or 15 on the slave) without
    /// the corresponding ISR bit set: the line deasserted before the
    /// acknowledge cycle. Any other line is never spurious.
    pub fn is_spurious(&mut self, irq: u8) -> bool {
        match irq {
            7 => {
                self.bus.outb(PIC1_COMMAND, CMD_READ_ISR);
                let isr = self.bus.inb(PIC1_COMMAND);
                isr & 0x80 == 0
            }
            15 => {
                self.bus.outb(PIC2_COMMAND, CMD_READ_ISR);
                let isr = self.bus.inb(PIC2_COMMAND);
                isr & 0x80 == 0
            }
            _ => false,
        }
    }

    /// Short delay between PIC commands: a write to the unused diagnostic
    /// port 0x80.
    fn io_wait(&mut self) {
        self.bus.outb(0x80, 0);
    }
}
