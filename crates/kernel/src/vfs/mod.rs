//! Virtual File System layer.
//!
//! A mounted filesystem is an [`Filesystem`] record: type name, flags,
//! device id, and the driver's [`FsOps`] table. Path resolution walks one
//! component at a time through `get_entry`, handing drivers only opaque
//! entry tokens; open handles carry the driver's per-file ops object (see
//! [`file`]).
//!
//! Locking policy: reads take the per-file shared lock, writes the
//! per-file exclusive lock; namespace mutation (create, unlink, mkdir)
//! and mount/unmount take the per-filesystem exclusive lock, pure
//! metadata lookups the shared one. Every lock is a no-op on a read-only
//! filesystem.

pub mod dirent;
pub mod file;
pub mod stat;

pub use dirent::{getdents64, VfsDirEntry};
pub use file::{FileHandle, FileOps, OpenFlags, Whence};
pub use stat::Stat64;

use crate::error::{Errno, Result};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, RwLock};

/// File mode bits
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

bitflags::bitflags! {
    /// Per-filesystem capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FsFlags: u32 {
        /// Writable filesystem; locks are real.
        const RW = 1 << 0;
        /// Directory iteration restarts from entry zero on every
        /// getdents call; the VFS skips up to the cursor.
        const RQ_DE_SKIP = 1 << 1;
    }
}

/// Driver-opaque token naming one directory entry within a filesystem.
pub type EntryId = u64;

/// What a resolved path component refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// The name does not exist (the parent does).
    None,
    File,
    Dir,
    Symlink,
}

/// Result of resolving one path component.
#[derive(Debug, Clone, Copy)]
pub struct PathRef {
    pub entry: EntryId,
    pub parent: EntryId,
    pub kind: PathKind,
}

/// Filesystem-level operations implemented by a driver.
///
/// Mutators default to EROFS so read-only drivers leave them alone.
pub trait FsOps: Send + Sync {
    /// Resolve `name` within `dir`.
    ///
    /// With both `dir` and `name` absent, returns the root. A missing
    /// name resolves to `PathKind::None` (not an error); the caller
    /// decides between ENOENT and creation.
    fn get_entry(&self, dir: Option<EntryId>, name: Option<&str>) -> Result<PathRef>;

    /// Open `path` and build the per-file ops payload.
    fn open(&self, fs: &Arc<Filesystem>, path: &PathRef, flags: OpenFlags) -> Result<FileHandle>;

    fn create(&self, parent: EntryId, name: &str, mode: u32) -> Result<PathRef> {
        let _ = (parent, name, mode);
        Err(Errno::EROFS)
    }

    fn mkdir(&self, parent: EntryId, name: &str, mode: u32) -> Result<PathRef> {
        let _ = (parent, name, mode);
        Err(Errno::EROFS)
    }

    fn unlink(&self, parent: EntryId, name: &str) -> Result<()> {
        let _ = (parent, name);
        Err(Errno::EROFS)
    }

    fn rmdir(&self, parent: EntryId, name: &str) -> Result<()> {
        let _ = (parent, name);
        Err(Errno::EROFS)
    }

    fn symlink(&self, parent: EntryId, name: &str, target: &str) -> Result<PathRef> {
        let _ = (parent, name, target);
        Err(Errno::EROFS)
    }
}

/// A mounted filesystem.
pub struct Filesystem {
    pub fstype: &'static str,
    pub flags: FsFlags,
    pub device_id: u64,
    ops: Box<dyn FsOps>,
    /// Filesystem-wide shared/exclusive lock; no-op when read-only.
    lock: RwLock<()>,
}

impl Filesystem {
    pub fn new(
        fstype: &'static str,
        flags: FsFlags,
        device_id: u64,
        ops: Box<dyn FsOps>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fstype,
            flags,
            device_id,
            ops,
            lock: RwLock::new(()),
        })
    }

    pub fn is_rw(&self) -> bool {
        self.flags.contains(FsFlags::RW)
    }

    pub fn ops(&self) -> &dyn FsOps {
        &*self.ops
    }

    pub fn with_shlock<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_rw() {
            let _g = self.lock.read();
            f()
        } else {
            f()
        }
    }

    pub fn with_exlock<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_rw() {
            let _g = self.lock.write();
            f()
        } else {
            f()
        }
    }
}

/// Mount point record.
#[derive(Clone)]
pub struct Mount {
    pub fs: Arc<Filesystem>,
    pub mountpoint: String,
}

/// Path-resolution façade over the mount table.
pub struct Vfs {
    root: RwLock<Option<Arc<Filesystem>>>,
    mounts: Mutex<Vec<Mount>>,
}

impl Vfs {
    pub const fn new() -> Self {
        Self {
            root: RwLock::new(None),
            mounts: Mutex::new(Vec::new()),
        }
    }

    /// Mount `fs` at `mountpoint`. Mounting at "/" installs the root.
    pub fn mount(&self, fs: Arc<Filesystem>, mountpoint: &str) -> Result<()> {
        fs.with_exlock(|| {
            if mountpoint == "/" {
                *self.root.write() = Some(fs.clone());
            }
            self.mounts.lock().push(Mount {
                fs: fs.clone(),
                mountpoint: mountpoint.into(),
            });
            crate::info!("vfs: mounted {} at {}", fs.fstype, mountpoint);
            Ok(())
        })
    }

    /// Unmount whatever is mounted at `mountpoint`; the filesystem record
    /// is dropped with the last reference.
    pub fn unmount(&self, mountpoint: &str) -> Result<()> {
        let mut mounts = self.mounts.lock();
        let idx = mounts
            .iter()
            .position(|m| m.mountpoint == mountpoint)
            .ok_or(Errno::ENOENT)?;
        let m = mounts.remove(idx);
        drop(mounts);
        if mountpoint == "/" {
            *self.root.write() = None;
        }
        crate::info!("vfs: unmounted {} from {}", m.fs.fstype, mountpoint);
        Ok(())
    }

    pub fn mounts(&self) -> Vec<Mount> {
        self.mounts.lock().clone()
    }

    pub fn root_fs(&self) -> Result<Arc<Filesystem>> {
        self.root.read().clone().ok_or(Errno::ENODEV)
    }

    /// Resolve `path` to its final component. Returns the final
    /// `PathRef` plus the last component's name (None for "/").
    fn resolve(fs: &Filesystem, path: &str) -> Result<(PathRef, Option<String>)> {
        if !path.starts_with('/') {
            return Err(Errno::EINVAL);
        }

        let mut cur = fs.ops().get_entry(None, None)?;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Ok((cur, None));
        }

        let last = components.len() - 1;
        for (i, &comp) in components.iter().enumerate() {
            match cur.kind {
                PathKind::Dir => {}
                PathKind::None => return Err(Errno::ENOENT),
                _ => return Err(Errno::ENOTDIR),
            }
            cur = fs.ops().get_entry(Some(cur.entry), Some(comp))?;
            if cur.kind == PathKind::None && i < last {
                return Err(Errno::ENOENT);
            }
        }
        Ok((cur, Some(components[last].into())))
    }

    /// Open `path`. `mode` is used only with O_CREAT.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<FileHandle> {
        let fs = self.root_fs()?;
        let creating = flags.contains(OpenFlags::O_CREAT);

        let do_open = || -> Result<FileHandle> {
            let (p, name) = Self::resolve(&fs, path)?;
            match p.kind {
                PathKind::None => {
                    if !creating {
                        return Err(Errno::ENOENT);
                    }
                    if !fs.is_rw() {
                        return Err(Errno::EROFS);
                    }
                    let name = name.ok_or(Errno::EINVAL)?;
                    let created = fs.ops().create(p.parent, &name, mode)?;
                    fs.ops().open(&fs, &created, flags)
                }
                kind => {
                    if creating && flags.contains(OpenFlags::O_EXCL) {
                        return Err(Errno::EEXIST);
                    }
                    if flags.contains(OpenFlags::O_DIRECTORY) && kind != PathKind::Dir {
                        return Err(Errno::ENOTDIR);
                    }
                    if flags.is_writable() {
                        if kind == PathKind::Dir {
                            return Err(Errno::EISDIR);
                        }
                        if !fs.is_rw() {
                            return Err(Errno::EROFS);
                        }
                    }
                    fs.ops().open(&fs, &p, flags)
                }
            }
        };

        // Creation mutates the namespace; plain opens are lookups.
        if creating {
            fs.with_exlock(do_open)
        } else {
            fs.with_shlock(do_open)
        }
    }

    /// stat by path: open read-only, fstat, close.
    ///
    /// A close failure is logged and ignored; the stat result already in
    /// hand is returned regardless.
    pub fn stat64(&self, path: &str) -> Result<Stat64> {
        let h = self.open(path, OpenFlags::O_RDONLY, 0)?;
        let st = h.fstat()?;
        if h.close().is_err() {
            crate::debug!("vfs: close failed after stat");
        }
        Ok(st)
    }

    /// fstat on an open handle (filesystem shared lock held inside).
    pub fn fstat64(&self, h: &FileHandle) -> Result<Stat64> {
        h.fstat()
    }

    /// Remove a name. Directories are refused here; use `rmdir`.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let fs = self.root_fs()?;
        if !fs.is_rw() {
            return Err(Errno::EROFS);
        }
        fs.with_exlock(|| {
            let (p, name) = Self::resolve(&fs, path)?;
            match p.kind {
                PathKind::None => Err(Errno::ENOENT),
                PathKind::Dir => Err(Errno::EISDIR),
                _ => fs.ops().unlink(p.parent, &name.ok_or(Errno::EINVAL)?),
            }
        })
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let fs = self.root_fs()?;
        if !fs.is_rw() {
            return Err(Errno::EROFS);
        }
        fs.with_exlock(|| {
            let (p, name) = Self::resolve(&fs, path)?;
            if p.kind != PathKind::None {
                return Err(Errno::EEXIST);
            }
            fs.ops().mkdir(p.parent, &name.ok_or(Errno::EINVAL)?, mode)?;
            Ok(())
        })
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let fs = self.root_fs()?;
        if !fs.is_rw() {
            return Err(Errno::EROFS);
        }
        fs.with_exlock(|| {
            let (p, name) = Self::resolve(&fs, path)?;
            match p.kind {
                PathKind::None => Err(Errno::ENOENT),
                PathKind::Dir => fs.ops().rmdir(p.parent, &name.ok_or(Errno::EINVAL)?),
                _ => Err(Errno::ENOTDIR),
            }
        })
    }

    pub fn symlink(&self, target: &str, path: &str) -> Result<()> {
        let fs = self.root_fs()?;
        if !fs.is_rw() {
            return Err(Errno::EROFS);
        }
        fs.with_exlock(|| {
            let (p, name) = Self::resolve(&fs, path)?;
            if p.kind != PathKind::None {
                return Err(Errno::EEXIST);
            }
            fs.ops().symlink(p.parent, &name.ok_or(Errno::EINVAL)?, target)?;
            Ok(())
        })
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

/// The system VFS instance.
pub static VFS: Vfs = Vfs::new();
