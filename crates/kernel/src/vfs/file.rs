//! Open-file handles.
//!
//! A handle pairs a back-pointer to its filesystem with the driver's
//! per-file operations object and the mutable cursor/flags state. Handles
//! are exclusively owned by the opener; `dup` produces an independent
//! handle over the same inode.

use super::dirent::VfsDirEntry;
use super::stat::Stat64;
use super::Filesystem;
use crate::error::{Errno, Result};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::{Mutex, RwLock};

bitflags::bitflags! {
    /// File open flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0o0;
        const O_WRONLY = 0o1;
        const O_RDWR = 0o2;
        const O_CREAT = 0o100;
        const O_EXCL = 0o200;
        const O_TRUNC = 0o1000;
        const O_APPEND = 0o2000;
        const O_DIRECTORY = 0o200000;
    }
}

impl OpenFlags {
    pub fn is_readable(&self) -> bool {
        (*self & OpenFlags::O_WRONLY).is_empty()
    }

    pub fn is_writable(&self) -> bool {
        self.intersects(OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(Errno::EINVAL),
        }
    }
}

/// Per-file operations implemented by the filesystem driver.
///
/// The implementing object is the driver's file payload (cached inode
/// reference, cluster cursor, ...); the shared handle state lives on
/// [`FileHandle`].
pub trait FileOps: Send + Sync {
    fn read(&self, file: &FileHandle, buf: &mut [u8]) -> Result<usize>;

    fn write(&self, file: &FileHandle, buf: &[u8]) -> Result<usize> {
        let _ = (file, buf);
        Err(Errno::EINVAL)
    }

    fn seek(&self, file: &FileHandle, off: i64, whence: Whence) -> Result<u64>;

    fn ioctl(&self, file: &FileHandle, cmd: u32, arg: usize) -> Result<isize> {
        let _ = (file, cmd, arg);
        Err(Errno::EINVAL)
    }

    fn fcntl(&self, file: &FileHandle, cmd: u32, arg: usize) -> Result<isize> {
        let _ = (file, cmd, arg);
        Err(Errno::EINVAL)
    }

    /// Iterate directory entries, feeding each to `emit` until it returns
    /// `Ok(false)` or fails. Directories only.
    fn list_dir(
        &self,
        file: &FileHandle,
        emit: &mut dyn FnMut(VfsDirEntry<'_>) -> Result<bool>,
    ) -> Result<()> {
        let _ = (file, emit);
        Err(Errno::ENOTDIR)
    }

    fn fstat(&self, file: &FileHandle) -> Result<Stat64>;

    /// Clone the payload for an independent handle over the same inode;
    /// the inode reference count goes up by one.
    fn dup(&self, file: &FileHandle) -> Result<Box<dyn FileOps>>;

    /// Release the payload's inode reference.
    fn close(&self, file: &FileHandle) -> Result<()> {
        let _ = file;
        Ok(())
    }
}

/// An open file.
pub struct FileHandle {
    fs: Arc<Filesystem>,
    flags: Mutex<OpenFlags>,
    /// Byte cursor for files, entry index for directories.
    pos: AtomicU64,
    /// Per-file shared/exclusive lock; a no-op on read-only filesystems.
    lock: RwLock<()>,
    ops: Box<dyn FileOps>,
    closed: AtomicBool,
}

impl FileHandle {
    pub fn new(fs: Arc<Filesystem>, flags: OpenFlags, ops: Box<dyn FileOps>) -> Self {
        Self {
            fs,
            flags: Mutex::new(flags),
            pos: AtomicU64::new(0),
            lock: RwLock::new(()),
            ops,
            closed: AtomicBool::new(false),
        }
    }

    pub fn fs(&self) -> &Arc<Filesystem> {
        &self.fs
    }

    pub fn flags(&self) -> OpenFlags {
        *self.flags.lock()
    }

    pub fn set_flags(&self, flags: OpenFlags) {
        *self.flags.lock() = flags;
    }

    pub fn pos(&self) -> u64 {
        self.pos.load(Ordering::Acquire)
    }

    pub fn set_pos(&self, pos: u64) {
        self.pos.store(pos, Ordering::Release);
    }

    fn with_file_shlock<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.fs.is_rw() {
            let _g = self.lock.read();
            f()
        } else {
            f()
        }
    }

    fn with_file_exlock<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.fs.is_rw() {
            let _g = self.lock.write();
            f()
        } else {
            f()
        }
    }

    /// Read at the cursor under the per-file shared lock.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags().is_readable() {
            return Err(Errno::EBADF);
        }
        self.with_file_shlock(|| self.ops.read(self, buf))
    }

    /// Write at the cursor under the per-file exclusive lock.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if !self.flags().is_writable() {
            return Err(Errno::EBADF);
        }
        self.with_file_exlock(|| self.ops.write(self, buf))
    }

    pub fn seek(&self, off: i64, whence: Whence) -> Result<u64> {
        self.ops.seek(self, off, whence)
    }

    pub fn ioctl(&self, cmd: u32, arg: usize) -> Result<isize> {
        self.ops.ioctl(self, cmd, arg)
    }

    pub fn fcntl(&self, cmd: u32, arg: usize) -> Result<isize> {
        self.ops.fcntl(self, cmd, arg)
    }

    pub(crate) fn list_dir(
        &self,
        emit: &mut dyn FnMut(VfsDirEntry<'_>) -> Result<bool>,
    ) -> Result<()> {
        self.ops.list_dir(self, emit)
    }

    /// Driver fstat under the filesystem shared lock.
    pub fn fstat(&self) -> Result<Stat64> {
        self.fs.with_shlock(|| self.ops.fstat(self))
    }

    /// Independent handle over the same inode; the cursor is copied.
    pub fn dup(&self) -> Result<FileHandle> {
        let ops = self.ops.dup(self)?;
        let h = FileHandle::new(self.fs.clone(), self.flags(), ops);
        h.set_pos(self.pos());
        Ok(h)
    }

    /// Release the handle's inode reference. Errors are reported but the
    /// handle is gone either way.
    pub fn close(self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.ops.close(&self)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.closed.store(true, Ordering::SeqCst);
            let _ = self.ops.close(self);
        }
    }
}

impl core::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileHandle")
            .field("fs", &self.fs.fstype)
            .field("pos", &self.pos())
            .field("flags", &self.flags())
            .finish()
    }
}
