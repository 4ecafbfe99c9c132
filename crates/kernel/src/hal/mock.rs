// Mock device implementations for testing without hardware

use super::{IrqFlag, PortIo};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// One observable hardware interaction, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoTraceEvent {
    Out { port: u16, val: u8 },
    In { port: u16 },
    IrqEnable,
    IrqDisable,
}

/// Shared event log so a test can assert cross-device ordering
/// (e.g. EOI byte written before interrupts are re-enabled).
#[derive(Default)]
pub struct IoTrace {
    events: Mutex<Vec<IoTraceEvent>>,
}

impl IoTrace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, ev: IoTraceEvent) {
        self.events.lock().push(ev);
    }

    pub fn events(&self) -> Vec<IoTraceEvent> {
        self.events.lock().clone()
    }

    /// Index of the first occurrence of `ev`, if any.
    pub fn position(&self, ev: IoTraceEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| *e == ev)
    }
}

/// Scripted port bus.
///
/// Writes are logged and latched per port; reads pop a scripted value if
/// one was queued, otherwise return the latched value (0 if never written).
pub struct MockPortBus {
    scripted: BTreeMap<u16, VecDeque<u8>>,
    latch: BTreeMap<u16, u8>,
    log: Vec<(u16, u8)>,
    trace: Option<Arc<IoTrace>>,
}

impl MockPortBus {
    pub fn new() -> Self {
        Self {
            scripted: BTreeMap::new(),
            latch: BTreeMap::new(),
            log: Vec::new(),
            trace: None,
        }
    }

    pub fn with_trace(trace: Arc<IoTrace>) -> Self {
        let mut bus = Self::new();
        bus.trace = Some(trace);
        bus
    }

    /// Queue a value for the next read of `port`.
    pub fn push_read(&mut self, port: u16, val: u8) {
        self.scripted.entry(port).or_default().push_back(val);
    }

    /// Pre-seed the latched value of `port` (e.g. a mask register).
    pub fn seed(&mut self, port: u16, val: u8) {
        self.latch.insert(port, val);
    }

    pub fn last_written(&self, port: u16) -> Option<u8> {
        self.latch.get(&port).copied()
    }

    /// All bytes written to `port`, in order.
    pub fn writes(&self, port: u16) -> Vec<u8> {
        self.log
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, v)| *v)
            .collect()
    }

    /// How many times `val` was written to `port`.
    pub fn writes_of(&self, port: u16, val: u8) -> usize {
        self.log.iter().filter(|(p, v)| *p == port && *v == val).count()
    }
}

impl Default for MockPortBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIo for MockPortBus {
    fn outb(&mut self, port: u16, val: u8) {
        self.log.push((port, val));
        self.latch.insert(port, val);
        if let Some(t) = &self.trace {
            t.record(IoTraceEvent::Out { port, val });
        }
    }

    fn inb(&mut self, port: u16) -> u8 {
        if let Some(t) = &self.trace {
            t.record(IoTraceEvent::In { port });
        }
        if let Some(q) = self.scripted.get_mut(&port) {
            if let Some(v) = q.pop_front() {
                return v;
            }
        }
        self.latch.get(&port).copied().unwrap_or(0)
    }
}

/// Interrupt-flag model: a bool, plus the shared trace.
pub struct MockIrqFlag {
    enabled: bool,
    trace: Option<Arc<IoTrace>>,
}

impl MockIrqFlag {
    /// Starts with interrupts disabled, as on IRQ entry.
    pub fn new() -> Self {
        Self {
            enabled: false,
            trace: None,
        }
    }

    pub fn with_trace(trace: Arc<IoTrace>) -> Self {
        let mut f = Self::new();
        f.trace = Some(trace);
        f
    }
}

impl Default for MockIrqFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqFlag for MockIrqFlag {
    fn interrupts_enabled(&self) -> bool {
        self.enabled
    }

    fn enable_interrupts(&mut self) {
        self.enabled = true;
        if let Some(t) = &self.trace {
            t.record(IoTraceEvent::IrqEnable);
        }
    }

    fn disable_interrupts(&mut self) {
        self.enabled = false;
        if let Some(t) = &self.trace {
            t.record(IoTraceEvent::IrqDisable);
        }
    }
}
