//! Writable in-RAM filesystem.
//!
//! Directories keep their entries in a balanced tree keyed by name, so
//! lookup is O(log n) and iteration is lexicographic (which getdents
//! relies on). File bodies are page-sized blocks indexed by their
//! page-aligned offset in a second tree; unwritten ranges are holes and
//! read back as zeros. Symlinks store only their target path and own no
//! blocks.
//!
//! Every inode carries a reader/writer lock: directory mutation and file
//! writes take it exclusively, lookups and reads take it shared. The
//! inode is released once both its link count and its open-handle count
//! reach zero.
//!
//! Timestamps are a per-filesystem logical clock (the core has no wall
//! clock); each mutation ticks it.

use crate::error::{Errno, Result};
use crate::params::{PAGE_SIZE, RAMFS_NAME_MAX};
use crate::vfs::dirent::{DT_DIR, DT_LNK, DT_REG};
use crate::vfs::file::{FileHandle, FileOps, OpenFlags, Whence};
use crate::vfs::{
    EntryId, Filesystem, FsFlags, FsOps, PathKind, PathRef, Stat64, VfsDirEntry, S_IFDIR, S_IFLNK,
    S_IFREG,
};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::RwLock;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

const ROOT_INO: u64 = 1;

/// One page of file data; its offset is the key in the block tree.
struct Block {
    page: Box<[u8; PAGE_SIZE]>,
}

impl Block {
    fn zeroed() -> Self {
        Self {
            page: Box::new([0u8; PAGE_SIZE]),
        }
    }
}

enum NodeData {
    File {
        size: u64,
        blocks: BTreeMap<u64, Block>,
    },
    Dir {
        entries: BTreeMap<String, u64>,
    },
    Symlink {
        target: String,
    },
}

struct NodeState {
    data: NodeData,
    mtime: u64,
    ctime: u64,
}

pub struct RamfsInode {
    ino: u64,
    mode: u32,
    nlink: AtomicU32,
    /// Open handles referencing this inode.
    refcount: AtomicU32,
    /// Parent directory inode number ("..").
    parent: AtomicU64,
    state: RwLock<NodeState>,
}

impl RamfsInode {
    fn kind(&self) -> PathKind {
        match self.state.read().data {
            NodeData::File { .. } => PathKind::File,
            NodeData::Dir { .. } => PathKind::Dir,
            NodeData::Symlink { .. } => PathKind::Symlink,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.state.read().data, NodeData::Dir { .. })
    }
}

pub struct Ramfs {
    device_id: u64,
    next_ino: AtomicU64,
    clock: AtomicU64,
    inodes: RwLock<BTreeMap<u64, Arc<RamfsInode>>>,
}

impl Ramfs {
    pub fn new() -> Arc<Self> {
        let fs = Arc::new(Self {
            device_id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            clock: AtomicU64::new(1),
            inodes: RwLock::new(BTreeMap::new()),
        });
        let root = Arc::new(RamfsInode {
            ino: ROOT_INO,
            mode: 0o755,
            nlink: AtomicU32::new(2),
            refcount: AtomicU32::new(0),
            parent: AtomicU64::new(ROOT_INO),
            state: RwLock::new(NodeState {
                data: NodeData::Dir {
                    entries: BTreeMap::new(),
                },
                mtime: 0,
                ctime: 0,
            }),
        });
        fs.inodes.write().insert(ROOT_INO, root);
        fs
    }

    /// Wrap this ramfs into a mountable filesystem record.
    pub fn filesystem(self: &Arc<Self>) -> Arc<Filesystem> {
        crate::info!("ramfs: created (device {})", self.device_id);
        Filesystem::new(
            "ramfs",
            FsFlags::RW,
            self.device_id,
            Box::new(RamfsFsOps { fs: self.clone() }),
        )
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn inode(&self, ino: u64) -> Result<Arc<RamfsInode>> {
        self.inodes.read().get(&ino).cloned().ok_or(Errno::ENOENT)
    }

    /// Count of live inodes, the root included. Diagnostic accessor.
    pub fn inode_count(&self) -> usize {
        self.inodes.read().len()
    }

    fn alloc_inode(&self, mode: u32, parent: u64, data: NodeData, nlink: u32) -> Arc<RamfsInode> {
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        let now = self.tick();
        let node = Arc::new(RamfsInode {
            ino,
            mode,
            nlink: AtomicU32::new(nlink),
            refcount: AtomicU32::new(0),
            parent: AtomicU64::new(parent),
            state: RwLock::new(NodeState {
                data,
                mtime: now,
                ctime: now,
            }),
        });
        self.inodes.write().insert(ino, node.clone());
        node
    }

    /// Drop the inode from the registry once it is fully dead.
    fn release_if_dead(&self, node: &Arc<RamfsInode>) {
        if node.nlink.load(Ordering::SeqCst) == 0 && node.refcount.load(Ordering::SeqCst) == 0 {
            self.inodes.write().remove(&node.ino);
        }
    }

    fn insert_entry(&self, parent: u64, name: &str, child: &Arc<RamfsInode>) -> Result<()> {
        if name.len() > RAMFS_NAME_MAX {
            return Err(Errno::ENAMETOOLONG);
        }
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(Errno::EINVAL);
        }
        let dir = self.inode(parent)?;
        let mut st = dir.state.write();
        let now = self.tick();
        match &mut st.data {
            NodeData::Dir { entries } => {
                if entries.contains_key(name) {
                    return Err(Errno::EEXIST);
                }
                entries.insert(name.into(), child.ino);
                st.mtime = now;
                Ok(())
            }
            _ => Err(Errno::ENOTDIR),
        }
    }

    /// Truncate a file inode. Blocks past the new size are dropped; the
    /// block straddling it is zero-trimmed so a later extension reads
    /// zeros.
    pub fn truncate(&self, ino: u64, new_size: u64) -> Result<()> {
        let node = self.inode(ino)?;
        let mut st = node.state.write();
        let now = self.tick();
        match &mut st.data {
            NodeData::File { size, blocks } => {
                if new_size < *size {
                    let first_dropped = next_page_boundary(new_size);
                    blocks.split_off(&first_dropped);
                    let page = page_of(new_size);
                    if let Some(b) = blocks.get_mut(&page) {
                        b.page[(new_size - page) as usize..].fill(0);
                    }
                }
                *size = new_size;
                st.mtime = now;
                Ok(())
            }
            NodeData::Dir { .. } => Err(Errno::EISDIR),
            NodeData::Symlink { .. } => Err(Errno::EINVAL),
        }
    }

    /// Symlink target of `ino`.
    pub fn readlink(&self, ino: u64) -> Result<String> {
        let node = self.inode(ino)?;
        let st = node.state.read();
        match &st.data {
            NodeData::Symlink { target } => Ok(target.clone()),
            _ => Err(Errno::EINVAL),
        }
    }
}

fn page_of(off: u64) -> u64 {
    off & !(PAGE_SIZE as u64 - 1)
}

fn next_page_boundary(off: u64) -> u64 {
    (off + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

struct RamfsFsOps {
    fs: Arc<Ramfs>,
}

impl FsOps for RamfsFsOps {
    fn get_entry(&self, dir: Option<EntryId>, name: Option<&str>) -> Result<PathRef> {
        let root = PathRef {
            entry: ROOT_INO,
            parent: ROOT_INO,
            kind: PathKind::Dir,
        };
        let name = match name {
            None => return Ok(root),
            Some(n) => n,
        };
        let base_ino = dir.unwrap_or(ROOT_INO);
        let base = self.fs.inode(base_ino)?;
        if !base.is_dir() {
            return Err(Errno::ENOTDIR);
        }

        if name == "." {
            return Ok(PathRef {
                entry: base_ino,
                parent: base.parent.load(Ordering::SeqCst),
                kind: PathKind::Dir,
            });
        }
        if name == ".." {
            let up_ino = base.parent.load(Ordering::SeqCst);
            let up = self.fs.inode(up_ino)?;
            return Ok(PathRef {
                entry: up_ino,
                parent: up.parent.load(Ordering::SeqCst),
                kind: PathKind::Dir,
            });
        }

        // Lookup under the directory's shared lock.
        let st = base.state.read();
        let found = match &st.data {
            NodeData::Dir { entries } => entries.get(name).copied(),
            _ => return Err(Errno::ENOTDIR),
        };
        drop(st);

        match found {
            Some(ino) => {
                let node = self.fs.inode(ino)?;
                Ok(PathRef {
                    entry: ino,
                    parent: base_ino,
                    kind: node.kind(),
                })
            }
            None => Ok(PathRef {
                entry: 0,
                parent: base_ino,
                kind: PathKind::None,
            }),
        }
    }

    fn open(&self, fs: &Arc<Filesystem>, path: &PathRef, flags: OpenFlags) -> Result<FileHandle> {
        let node = self.fs.inode(path.entry)?;
        if flags.contains(OpenFlags::O_TRUNC) && flags.is_writable() {
            self.fs.truncate(node.ino, 0)?;
        }
        node.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(FileHandle::new(
            fs.clone(),
            flags,
            Box::new(RamfsFile {
                fs: self.fs.clone(),
                node,
            }),
        ))
    }

    fn create(&self, parent: EntryId, name: &str, mode: u32) -> Result<PathRef> {
        let node = self.fs.alloc_inode(
            mode & 0o777,
            parent,
            NodeData::File {
                size: 0,
                blocks: BTreeMap::new(),
            },
            1,
        );
        if let Err(e) = self.fs.insert_entry(parent, name, &node) {
            node.nlink.store(0, Ordering::SeqCst);
            self.fs.release_if_dead(&node);
            return Err(e);
        }
        Ok(PathRef {
            entry: node.ino,
            parent,
            kind: PathKind::File,
        })
    }

    fn mkdir(&self, parent: EntryId, name: &str, mode: u32) -> Result<PathRef> {
        let node = self.fs.alloc_inode(
            mode & 0o777,
            parent,
            NodeData::Dir {
                entries: BTreeMap::new(),
            },
            2,
        );
        if let Err(e) = self.fs.insert_entry(parent, name, &node) {
            node.nlink.store(0, Ordering::SeqCst);
            self.fs.release_if_dead(&node);
            return Err(e);
        }
        // The child's ".." adds a link to the parent.
        if let Ok(p) = self.fs.inode(parent) {
            p.nlink.fetch_add(1, Ordering::SeqCst);
        }
        Ok(PathRef {
            entry: node.ino,
            parent,
            kind: PathKind::Dir,
        })
    }

    fn symlink(&self, parent: EntryId, name: &str, target: &str) -> Result<PathRef> {
        let node = self.fs.alloc_inode(
            0o777,
            parent,
            NodeData::Symlink {
                target: target.into(),
            },
            1,
        );
        if let Err(e) = self.fs.insert_entry(parent, name, &node) {
            node.nlink.store(0, Ordering::SeqCst);
            self.fs.release_if_dead(&node);
            return Err(e);
        }
        Ok(PathRef {
            entry: node.ino,
            parent,
            kind: PathKind::Symlink,
        })
    }

    fn unlink(&self, parent: EntryId, name: &str) -> Result<()> {
        let dir = self.fs.inode(parent)?;
        let mut st = dir.state.write();
        let now = self.fs.tick();
        let child_ino = match &mut st.data {
            NodeData::Dir { entries } => {
                let ino = *entries.get(name).ok_or(Errno::ENOENT)?;
                let child = self.fs.inode(ino)?;
                if child.is_dir() {
                    return Err(Errno::EISDIR);
                }
                entries.remove(name);
                st.mtime = now;
                ino
            }
            _ => return Err(Errno::ENOTDIR),
        };
        drop(st);

        let child = self.fs.inode(child_ino)?;
        child.nlink.fetch_sub(1, Ordering::SeqCst);
        self.fs.release_if_dead(&child);
        Ok(())
    }

    fn rmdir(&self, parent: EntryId, name: &str) -> Result<()> {
        let dir = self.fs.inode(parent)?;
        let mut st = dir.state.write();
        let now = self.fs.tick();
        let child_ino = match &mut st.data {
            NodeData::Dir { entries } => {
                let ino = *entries.get(name).ok_or(Errno::ENOENT)?;
                let child = self.fs.inode(ino)?;
                let empty = match &child.state.read().data {
                    NodeData::Dir { entries } => entries.is_empty(),
                    _ => return Err(Errno::ENOTDIR),
                };
                if !empty {
                    return Err(Errno::ENOTEMPTY);
                }
                entries.remove(name);
                st.mtime = now;
                ino
            }
            _ => return Err(Errno::ENOTDIR),
        };
        drop(st);

        let child = self.fs.inode(child_ino)?;
        child.nlink.store(0, Ordering::SeqCst);
        dir.nlink.fetch_sub(1, Ordering::SeqCst);
        self.fs.release_if_dead(&child);
        Ok(())
    }
}

/// Per-handle payload: the cached inode reference.
struct RamfsFile {
    fs: Arc<Ramfs>,
    node: Arc<RamfsInode>,
}

impl FileOps for RamfsFile {
    fn read(&self, file: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        let st = self.node.state.read();
        let (size, blocks) = match &st.data {
            NodeData::File { size, blocks } => (*size, blocks),
            NodeData::Dir { .. } => return Err(Errno::EISDIR),
            NodeData::Symlink { .. } => return Err(Errno::EINVAL),
        };

        let mut pos = file.pos();
        if pos >= size || buf.is_empty() {
            return Ok(0);
        }
        let mut done = 0usize;
        while done < buf.len() && pos < size {
            let page = page_of(pos);
            let poff = (pos - page) as usize;
            let n = (PAGE_SIZE - poff)
                .min(buf.len() - done)
                .min((size - pos) as usize);
            match blocks.get(&page) {
                Some(b) => buf[done..done + n].copy_from_slice(&b.page[poff..poff + n]),
                // A hole: reads as zeros.
                None => buf[done..done + n].fill(0),
            }
            pos += n as u64;
            done += n;
        }
        drop(st);
        file.set_pos(pos);
        Ok(done)
    }

    fn write(&self, file: &FileHandle, buf: &[u8]) -> Result<usize> {
        let mut st = self.node.state.write();
        let now = self.fs.tick();

        let mut pos = if file.flags().contains(OpenFlags::O_APPEND) {
            match &st.data {
                NodeData::File { size, .. } => *size,
                _ => 0,
            }
        } else {
            file.pos()
        };

        let (size, blocks) = match &mut st.data {
            NodeData::File { size, blocks } => (size, blocks),
            NodeData::Dir { .. } => return Err(Errno::EISDIR),
            NodeData::Symlink { .. } => return Err(Errno::EINVAL),
        };

        let mut done = 0usize;
        while done < buf.len() {
            let page = page_of(pos);
            let poff = (pos - page) as usize;
            let n = (PAGE_SIZE - poff).min(buf.len() - done);
            let block = blocks.entry(page).or_insert_with(Block::zeroed);
            block.page[poff..poff + n].copy_from_slice(&buf[done..done + n]);
            pos += n as u64;
            done += n;
        }
        if pos > *size {
            *size = pos;
        }
        st.mtime = now;
        drop(st);
        file.set_pos(pos);
        Ok(done)
    }

    fn seek(&self, file: &FileHandle, off: i64, whence: Whence) -> Result<u64> {
        let st = self.node.state.read();
        match &st.data {
            NodeData::Dir { entries } => {
                // Entry-index cursor; "." and ".." are entries 0 and 1.
                if whence != Whence::Set {
                    return Err(Errno::EINVAL);
                }
                let count = entries.len() as i64 + 2;
                if off < 0 || off > count {
                    return Err(Errno::EINVAL);
                }
                drop(st);
                file.set_pos(off as u64);
                Ok(off as u64)
            }
            NodeData::File { size, .. } => {
                let size = *size as i64;
                drop(st);
                let abs = match whence {
                    Whence::Set => off,
                    Whence::Cur => file.pos() as i64 + off,
                    Whence::End => size + off,
                };
                if abs < 0 {
                    return Err(Errno::EINVAL);
                }
                file.set_pos(abs as u64);
                Ok(abs as u64)
            }
            NodeData::Symlink { .. } => Err(Errno::EINVAL),
        }
    }

    fn list_dir(
        &self,
        file: &FileHandle,
        emit: &mut dyn FnMut(VfsDirEntry<'_>) -> Result<bool>,
    ) -> Result<()> {
        let st = self.node.state.read();
        let entries = match &st.data {
            NodeData::Dir { entries } => entries,
            _ => return Err(Errno::ENOTDIR),
        };

        // This driver consumes the cursor itself: iteration starts at
        // the handle's entry index instead of replaying from zero.
        let skip = file.pos() as usize;
        let parent = self.node.parent.load(Ordering::SeqCst);

        let dot = [
            (self.node.ino, DT_DIR, "."),
            (parent, DT_DIR, ".."),
        ];
        let synthetic = dot.iter().map(|&(ino, dtype, name)| (ino, dtype, name));

        let names = entries.iter().map(|(name, &ino)| {
            let dtype = self
                .fs
                .inode(ino)
                .map(|n| match n.kind() {
                    PathKind::Dir => DT_DIR,
                    PathKind::Symlink => DT_LNK,
                    _ => DT_REG,
                })
                .unwrap_or(DT_REG);
            (ino, dtype, name.as_str())
        });

        for (ino, dtype, name) in synthetic.chain(names).skip(skip) {
            if !emit(VfsDirEntry { ino, dtype, name })? {
                return Ok(());
            }
        }
        Ok(())
    }

    fn fstat(&self, _file: &FileHandle) -> Result<Stat64> {
        let st = self.node.state.read();
        let (fmt, size, blocks) = match &st.data {
            NodeData::File { size, blocks } => (S_IFREG, *size as i64, blocks.len() as i64),
            NodeData::Dir { entries } => (S_IFDIR, entries.len() as i64 * 32, 0),
            NodeData::Symlink { target } => (S_IFLNK, target.len() as i64, 0),
        };
        Ok(Stat64 {
            st_dev: self.fs.device_id,
            st_ino: self.node.ino,
            st_mode: fmt | (self.node.mode & 0o777),
            st_nlink: self.node.nlink.load(Ordering::SeqCst),
            st_uid: 0,
            st_gid: 0,
            st_rdev: 0,
            st_size: size,
            st_blksize: PAGE_SIZE as i64,
            st_blocks: blocks * (PAGE_SIZE as i64 / 512),
            st_atime: st.mtime as i64,
            st_mtime: st.mtime as i64,
            st_ctime: st.ctime as i64,
        })
    }

    fn dup(&self, _file: &FileHandle) -> Result<Box<dyn FileOps>> {
        self.node.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RamfsFile {
            fs: self.fs.clone(),
            node: self.node.clone(),
        }))
    }

    fn close(&self, _file: &FileHandle) -> Result<()> {
        self.node.refcount.fetch_sub(1, Ordering::SeqCst);
        self.fs.release_if_dead(&self.node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uaccess::UserSlice;
    use crate::vfs::dirent::{getdents64, parse_dirents};
    use crate::vfs::Vfs;
    use alloc::vec::Vec;

    fn mounted() -> (Vfs, Arc<Ramfs>) {
        let ramfs = Ramfs::new();
        let vfs = Vfs::new();
        vfs.mount(ramfs.filesystem(), "/").unwrap();
        (vfs, ramfs)
    }

    #[test]
    fn test_create_write_read_roundtrip() {
        let (vfs, _fs) = mounted();
        let h = vfs
            .open("/a.txt", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        assert_eq!(h.write(b"hello ramfs").unwrap(), 11);
        h.seek(0, Whence::Set).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(h.read(&mut buf).unwrap(), 11);
        assert_eq!(&buf[..11], b"hello ramfs");

        // A second open sees the same inode.
        let h2 = vfs.open("/a.txt", OpenFlags::O_RDONLY, 0).unwrap();
        assert_eq!(h2.read(&mut buf).unwrap(), 11);
    }

    #[test]
    fn test_duplicate_name_is_eexist() {
        let (vfs, _fs) = mounted();
        vfs.open("/a", OpenFlags::O_CREAT, 0o644).unwrap();
        assert_eq!(
            vfs.open("/a", OpenFlags::O_CREAT | OpenFlags::O_EXCL, 0o644)
                .err(),
            Some(Errno::EEXIST)
        );
        vfs.mkdir("/d", 0o755).unwrap();
        assert_eq!(vfs.mkdir("/d", 0o755).err(), Some(Errno::EEXIST));
    }

    #[test]
    fn test_name_length_cap() {
        let (vfs, _fs) = mounted();
        let long = alloc::format!("/{}", "x".repeat(RAMFS_NAME_MAX + 1));
        assert_eq!(
            vfs.open(&long, OpenFlags::O_CREAT, 0o644).err(),
            Some(Errno::ENAMETOOLONG)
        );
        let ok = alloc::format!("/{}", "x".repeat(RAMFS_NAME_MAX));
        assert!(vfs.open(&ok, OpenFlags::O_CREAT, 0o644).is_ok());
    }

    #[test]
    fn test_write_crosses_pages_and_holes_read_zero() {
        let (vfs, _fs) = mounted();
        let h = vfs
            .open("/sparse", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();

        // Write a page-and-a-half starting inside the first page.
        let data: Vec<u8> = (0..PAGE_SIZE + PAGE_SIZE / 2).map(|i| (i % 251) as u8).collect();
        h.seek(100, Whence::Set).unwrap();
        assert_eq!(h.write(&data).unwrap(), data.len());

        // Then a far block, leaving a hole.
        let far = (10 * PAGE_SIZE) as i64;
        h.seek(far, Whence::Set).unwrap();
        h.write(b"end").unwrap();

        let st = vfs.stat64("/sparse").unwrap();
        assert_eq!(st.st_size, far + 3);
        // Only the touched pages hold blocks: pages 0 and 1, plus page 10.
        assert_eq!(st.st_blocks, 3 * (PAGE_SIZE as i64 / 512));

        // The hole reads back as zeros.
        h.seek(0, Whence::Set).unwrap();
        let mut all = alloc::vec![0xAAu8; (far + 3) as usize];
        assert_eq!(h.read(&mut all).unwrap(), (far + 3) as usize);
        assert!(all[..100].iter().all(|&b| b == 0));
        assert_eq!(&all[100..100 + data.len()], &data[..]);
        let hole = &all[100 + data.len()..far as usize];
        assert!(hole.iter().all(|&b| b == 0));
        assert_eq!(&all[far as usize..], b"end");
    }

    #[test]
    fn test_truncate_drops_and_trims_blocks() {
        let (vfs, fs) = mounted();
        let h = vfs
            .open("/t", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        let data: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (1 + i % 250) as u8).collect();
        h.write(&data).unwrap();

        let ino = vfs.stat64("/t").unwrap().st_ino;
        fs.truncate(ino, PAGE_SIZE as u64 + 10).unwrap();

        let st = vfs.stat64("/t").unwrap();
        assert_eq!(st.st_size, PAGE_SIZE as i64 + 10);
        // Block 2 dropped; blocks 0 and 1 remain.
        assert_eq!(st.st_blocks, 2 * (PAGE_SIZE as i64 / 512));

        // Extending again exposes zeros past the old cut, not stale data.
        fs.truncate(ino, 2 * PAGE_SIZE as u64).unwrap();
        h.seek(0, Whence::Set).unwrap();
        let mut buf = alloc::vec![0u8; 2 * PAGE_SIZE];
        assert_eq!(h.read(&mut buf).unwrap(), 2 * PAGE_SIZE);
        assert_eq!(&buf[..PAGE_SIZE + 10], &data[..PAGE_SIZE + 10]);
        assert!(buf[PAGE_SIZE + 10..].iter().all(|&b| b == 0));

        // Truncating a directory is refused.
        vfs.mkdir("/dir", 0o755).unwrap();
        let dino = vfs.stat64("/dir").unwrap().st_ino;
        assert_eq!(fs.truncate(dino, 0).err(), Some(Errno::EISDIR));
    }

    #[test]
    fn test_o_trunc_and_o_append() {
        let (vfs, _fs) = mounted();
        let h = vfs
            .open("/log", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        h.write(b"0123456789").unwrap();
        drop(h);

        let h = vfs
            .open("/log", OpenFlags::O_WRONLY | OpenFlags::O_TRUNC, 0)
            .unwrap();
        assert_eq!(vfs.stat64("/log").unwrap().st_size, 0);
        h.write(b"ab").unwrap();
        drop(h);

        let h = vfs
            .open("/log", OpenFlags::O_WRONLY | OpenFlags::O_APPEND, 0)
            .unwrap();
        h.write(b"cd").unwrap();
        drop(h);

        let h = vfs.open("/log", OpenFlags::O_RDONLY, 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(h.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn test_unlink_releases_only_when_handles_close() {
        let (vfs, fs) = mounted();
        let h = vfs
            .open("/gone", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        h.write(b"data").unwrap();
        let live = fs.inode_count();

        vfs.unlink("/gone").unwrap();
        // Name is gone immediately...
        assert_eq!(
            vfs.open("/gone", OpenFlags::O_RDONLY, 0).err(),
            Some(Errno::ENOENT)
        );
        // ...but the open handle still reads the data.
        h.seek(0, Whence::Set).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(h.read(&mut buf).unwrap(), 4);
        assert_eq!(fs.inode_count(), live, "inode pinned by the open handle");

        h.close().unwrap();
        assert_eq!(fs.inode_count(), live - 1, "last close frees the inode");
    }

    #[test]
    fn test_unlink_errors() {
        let (vfs, _fs) = mounted();
        vfs.mkdir("/d", 0o755).unwrap();
        assert_eq!(vfs.unlink("/d").err(), Some(Errno::EISDIR));
        assert_eq!(vfs.unlink("/missing").err(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_rmdir_requires_empty() {
        let (vfs, fs) = mounted();
        vfs.mkdir("/d", 0o755).unwrap();
        vfs.open("/d/f", OpenFlags::O_CREAT, 0o644).unwrap();
        assert_eq!(vfs.rmdir("/d").err(), Some(Errno::ENOTEMPTY));
        vfs.unlink("/d/f").unwrap();
        let live = fs.inode_count();
        vfs.rmdir("/d").unwrap();
        assert_eq!(fs.inode_count(), live - 1);
        assert_eq!(vfs.rmdir("/d").err(), Some(Errno::ENOENT));
    }

    #[test]
    fn test_symlink_stores_path_and_no_blocks() {
        let (vfs, fs) = mounted();
        vfs.symlink("/target/elsewhere", "/link").unwrap();
        let st = vfs.stat64("/link").unwrap();
        assert_eq!(st.st_mode & crate::vfs::S_IFMT, S_IFLNK);
        assert_eq!(st.st_size, "/target/elsewhere".len() as i64);
        assert_eq!(st.st_blocks, 0);
        assert_eq!(fs.readlink(st.st_ino).unwrap(), "/target/elsewhere");
        assert_eq!(vfs.symlink("/x", "/link").err(), Some(Errno::EEXIST));
    }

    #[test]
    fn test_getdents_lexicographic_with_dot_entries() {
        let (vfs, _fs) = mounted();
        for name in ["/zeta", "/alpha", "/mid"] {
            vfs.open(name, OpenFlags::O_CREAT, 0o644).unwrap();
        }
        vfs.mkdir("/dir", 0o755).unwrap();

        let d = vfs
            .open("/", OpenFlags::O_RDONLY | OpenFlags::O_DIRECTORY, 0)
            .unwrap();
        let mut raw = [0u8; 512];
        let mut user = UserSlice::new(&mut raw);
        let n = getdents64(&d, &mut user).unwrap();
        let ents = parse_dirents(&raw[..n]);
        let names: Vec<_> = ents.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "alpha", "dir", "mid", "zeta"]);
        assert_eq!(ents[3].dtype, DT_DIR);
        assert_eq!(ents[2].dtype, DT_REG);

        // Root's "." and ".." share the root inode.
        assert_eq!(ents[0].ino, ents[1].ino);
    }

    #[test]
    fn test_getdents_resumes_via_cursor() {
        let (vfs, _fs) = mounted();
        for name in ["/a", "/b", "/c"] {
            vfs.open(name, OpenFlags::O_CREAT, 0o644).unwrap();
        }
        let d = vfs
            .open("/", OpenFlags::O_RDONLY | OpenFlags::O_DIRECTORY, 0)
            .unwrap();

        let mut seen = Vec::new();
        loop {
            // Room for roughly one record at a time.
            let mut raw = [0u8; 24];
            let mut user = UserSlice::new(&mut raw);
            let n = getdents64(&d, &mut user).unwrap();
            if n == 0 {
                break;
            }
            for e in parse_dirents(&raw[..n]) {
                seen.push(e.name);
            }
        }
        assert_eq!(seen, [".", "..", "a", "b", "c"]);
        assert_eq!(d.pos(), 5);
    }

    #[test]
    fn test_stat_nlink_accounting() {
        let (vfs, _fs) = mounted();
        assert_eq!(vfs.stat64("/").unwrap().st_nlink, 2);
        vfs.mkdir("/d", 0o755).unwrap();
        assert_eq!(vfs.stat64("/").unwrap().st_nlink, 3);
        assert_eq!(vfs.stat64("/d").unwrap().st_nlink, 2);
        vfs.rmdir("/d").unwrap();
        assert_eq!(vfs.stat64("/").unwrap().st_nlink, 2);
    }

    #[test]
    fn test_mtime_advances_on_writes() {
        let (vfs, _fs) = mounted();
        let h = vfs
            .open("/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        let t0 = vfs.stat64("/f").unwrap().st_mtime;
        h.write(b"x").unwrap();
        let t1 = vfs.stat64("/f").unwrap().st_mtime;
        assert!(t1 > t0);
    }

    #[test]
    fn test_dup_pins_inode() {
        let (vfs, fs) = mounted();
        let h = vfs
            .open("/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT, 0o644)
            .unwrap();
        h.write(b"xy").unwrap();
        let d = h.dup().unwrap();
        vfs.unlink("/f").unwrap();
        let live = fs.inode_count();

        h.close().unwrap();
        assert_eq!(fs.inode_count(), live, "dup still pins the inode");
        d.close().unwrap();
        assert_eq!(fs.inode_count(), live - 1);
    }
}
