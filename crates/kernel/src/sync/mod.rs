// Kernel synchronization primitives built on task sleep/wake.

pub mod kmutex;

pub use kmutex::{KMutex, KMutexFlags};
