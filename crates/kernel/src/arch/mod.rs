// Architecture support. The core targets x86 (32-bit protected mode);
// the register-frame model and the PIC driver are architecture data and
// build everywhere, while the real port-I/O and interrupt-flag backends
// only build for x86 hosts.

pub mod x86;

pub use x86::TrapFrame;
