//! IRQ dispatch: vectors 32..47 to registered handlers.
//!
//! The dispatcher owns the 16-slot handler table and the unhandled /
//! spurious counters, and enforces the interrupt-entry protocol around a
//! handler invocation:
//!
//! mask line -> disable preemption -> push nesting -> EOI -> enable
//! interrupts -> handler -> disable interrupts -> pop -> enable
//! preemption -> unmask -> maybe schedule.
//!
//! The EOI is sent before interrupts are re-enabled; the other order
//! causes a storm of spurious interrupts on real hardware. The timer line
//! is the one line never masked during dispatch: timer ticks are allowed
//! to nest, and the timer handler is the only one permitted to request a
//! reschedule from interrupt context.

use crate::arch::x86::pic::Pic8259;
use crate::arch::TrapFrame;
use crate::hal::{IrqFlag, PortIo};
use crate::params::{IRQ_COUNT, IRQ_VECTOR_BASE, TIMER_IRQ};
use crate::sched::Scheduler;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// What a handler wants done after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqAction {
    /// No bottom-half work.
    Handled,
    /// Run the scheduler once the dispatch path unwinds.
    NeedResched,
}

pub type IrqHandler = fn(&TrapFrame) -> IrqAction;

pub struct IrqDispatcher {
    handlers: Mutex<[Option<IrqHandler>; IRQ_COUNT]>,
    unhandled: [AtomicU32; IRQ_COUNT],
    spurious: AtomicU32,
}

impl IrqDispatcher {
    pub const fn new() -> Self {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self {
            handlers: Mutex::new([None; IRQ_COUNT]),
            unhandled: [ZERO; IRQ_COUNT],
            spurious: AtomicU32::new(0),
        }
    }

    /// Record a handler for `irq` and unmask the line.
    ///
    /// Must be called from task context with interrupts disabled; an
    /// unmasked line always has a handler behind it.
    pub fn install_handler<P: PortIo>(&self, pic: &mut Pic8259<P>, irq: u8, handler: IrqHandler) {
        debug_assert!((irq as usize) < IRQ_COUNT);
        let mut slots = self.handlers.lock();
        assert!(slots[irq as usize].is_none(), "irq {} already claimed", irq);
        slots[irq as usize] = Some(handler);
        drop(slots);
        pic.clear_mask(irq);
        crate::info!("irq: handler installed on line {}", irq);
    }

    /// Clear the handler slot for `irq`.
    ///
    /// The line is masked and stays masked until a new handler installs.
    pub fn uninstall_handler<P: PortIo>(&self, pic: &mut Pic8259<P>, irq: u8) {
        debug_assert!((irq as usize) < IRQ_COUNT);
        pic.set_mask(irq);
        self.handlers.lock()[irq as usize] = None;
    }

    pub fn spurious_count(&self) -> u32 {
        self.spurious.load(Ordering::SeqCst)
    }

    pub fn unhandled_count(&self, irq: u8) -> u32 {
        self.unhandled[irq as usize].load(Ordering::SeqCst)
    }

    /// Entry point for a hardware interrupt on `vector` (32..48).
    ///
    /// Called from the assembly stubs with interrupts disabled and the
    /// saved register frame.
    pub fn dispatch<P: PortIo, F: IrqFlag>(
        &self,
        sched: &Scheduler,
        pic: &mut Pic8259<P>,
        irqflag: &mut F,
        frame: &TrapFrame,
        vector: u8,
    ) {
        assert!(
            (IRQ_VECTOR_BASE..IRQ_VECTOR_BASE + IRQ_COUNT as u8).contains(&vector),
            "vector {} outside the IRQ range",
            vector
        );
        let irq = vector - IRQ_VECTOR_BASE;

        // Lowest-priority lines can report without anything in service;
        // count and drop those. A spurious IRQ 15 still reached us through
        // the cascade, so the master gets its EOI.
        if (irq == 7 || irq == 15) && pic.is_spurious(irq) {
            self.spurious.fetch_add(1, Ordering::SeqCst);
            if irq == 15 {
                pic.send_eoi_master();
            }
            return;
        }

        // Keep the same line from re-entering its handler. The timer is
        // exempt: its ticks may nest, bounded by the nesting stack.
        let mask_line = irq != TIMER_IRQ;
        if mask_line {
            pic.set_mask(irq);
        }

        sched.disable_preemption();
        sched.push_nested_irq(vector);
        debug_assert!(!irqflag.interrupts_enabled());

        pic.send_eoi(irq);
        irqflag.enable_interrupts();

        let handler = self.handlers.lock()[irq as usize];
        let action = match handler {
            Some(h) => h(frame),
            None => {
                self.unhandled[irq as usize].fetch_add(1, Ordering::SeqCst);
                IrqAction::Handled
            }
        };

        irqflag.disable_interrupts();
        sched.pop_nested_irq();
        sched.enable_preemption();

        if mask_line {
            pic.clear_mask(irq);
        }

        if action == IrqAction::NeedResched {
            sched.disable_preemption();
            if sched.preempt_count() == 1 {
                sched.save_state(frame);
                sched.schedule();
            } else {
                // Interrupted code had preemption disabled on its own;
                // it is not safe to switch away from it.
                sched.enable_preemption();
            }
        }
    }
}

impl Default for IrqDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The system IRQ dispatcher.
pub static IRQS: IrqDispatcher = IrqDispatcher::new();
