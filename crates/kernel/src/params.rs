// Compile-time kernel tunables

/// Page size used by the memory collaborators and by ramfs block storage.
pub const PAGE_SIZE: usize = 4096;

/// Number of legacy PIC interrupt lines.
pub const IRQ_COUNT: usize = 16;

/// Vector the master PIC is remapped to; slave follows at +8.
pub const IRQ_VECTOR_BASE: u8 = 32;

/// IRQ line of the PIT timer, the only line allowed to nest.
pub const TIMER_IRQ: u8 = 0;

/// Maximum depth of the nested-interrupt stack.
pub const MAX_NESTED_IRQS: usize = 8;

/// Maximum length of a single ramfs entry name, in bytes.
pub const RAMFS_NAME_MAX: usize = 230;

/// Maximum name length emitted through getdents64.
pub const DIRENT_NAME_MAX: usize = 255;

/// Capacity of the kernel log ring buffer, in entries.
pub const LOG_BUF_ENTRIES: usize = 512;

/// Maximum formatted length of one log message, in bytes.
pub const LOG_MSG_MAX: usize = 128;
