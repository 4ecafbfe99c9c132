//! Read-only FAT12/16/32 driver over a RAM-resident image.
//!
//! The volume is a byte slice (a ramdisk loaded by the boot path); all
//! structures are decoded in place. Directory entries are named by their
//! byte offset within the image, which doubles as the inode number; the
//! root directory has no on-disk entry and uses a synthetic one.
//!
//! Everything is immutable: open never counts references, close never
//! releases anything, and the mutating [`FsOps`] defaults (EROFS) stay in
//! place.

pub mod chain;
pub mod dir;
pub mod hdr;
pub mod time;

#[cfg(test)]
pub mod testimg;

use self::chain::{fat_next, ClusterWalk, FatEntry};
use self::dir::RawDirEntry;
use self::hdr::{FatHeader, FatKind, DIRENT_SIZE};
use self::time::fat_time_to_unix;
use crate::error::{Errno, Result};
use crate::vfs::dirent::{DT_DIR, DT_REG};
use crate::vfs::file::{FileHandle, FileOps, OpenFlags, Whence};
use crate::vfs::{
    EntryId, Filesystem, FsFlags, FsOps, PathKind, PathRef, Stat64, VfsDirEntry, S_IFDIR, S_IFREG,
};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Entry token of the synthetic root directory.
pub const ROOT_ENTRY: EntryId = u64::MAX;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// A named directory entry produced by iteration.
struct FatDirItem {
    /// Byte offset of the short entry within the image (the inode).
    offset: u64,
    entry: RawDirEntry,
    name: String,
}

pub struct FatVolume {
    img: Arc<[u8]>,
    hdr: FatHeader,
    root_entry: RawDirEntry,
    device_id: u64,
}

impl FatVolume {
    /// Mount a read-only FAT volume over `img`.
    ///
    /// Only read-only mounts exist; asking for a writable one is refused.
    pub fn mount_ramdisk(img: Arc<[u8]>, flags: FsFlags) -> Result<Arc<Filesystem>> {
        if flags.contains(FsFlags::RW) {
            return Err(Errno::EROFS);
        }
        let hdr = FatHeader::parse(&img)?;
        let vol = Arc::new(FatVolume {
            root_entry: RawDirEntry::synthetic_root(hdr.root_cluster),
            device_id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            img,
            hdr,
        });
        crate::info!(
            "fat: mounted {:?} volume, {} clusters of {} bytes",
            vol.hdr.kind,
            vol.hdr.cluster_count,
            vol.hdr.cluster_size()
        );
        Ok(Filesystem::new(
            "fat",
            FsFlags::RQ_DE_SKIP,
            vol.device_id,
            Box::new(FatFsOps { vol }),
        ))
    }

    pub fn kind(&self) -> FatKind {
        self.hdr.kind
    }

    pub fn cluster_size(&self) -> u32 {
        self.hdr.cluster_size()
    }

    fn entry_at(&self, entry: EntryId) -> RawDirEntry {
        if entry == ROOT_ENTRY {
            self.root_entry
        } else {
            RawDirEntry::from_slice(&self.img[entry as usize..entry as usize + DIRENT_SIZE])
        }
    }

    fn cluster_bytes(&self, c: u32) -> &[u8] {
        let off = self.hdr.cluster_offset(c);
        &self.img[off..off + self.cluster_size() as usize]
    }

    fn next_in_chain(&self, c: u32) -> FatEntry {
        fat_next(&self.img, &self.hdr, c)
    }

    /// Does this entry denote the root directory (directly or via a ".."
    /// slot carrying cluster 0 / the stored root cluster)?
    fn is_root_dir_ref(&self, e: &RawDirEntry) -> bool {
        if !e.is_dir() {
            return false;
        }
        let fc = e.first_cluster(self.kind());
        fc == 0 || (self.hdr.root_cluster != 0 && fc == self.hdr.root_cluster)
    }

    /// Iterate the raw slots of the directory named by `dir`, in layout
    /// order, stopping at the end-of-directory slot.
    fn for_each_slot(
        &self,
        dir: EntryId,
        f: &mut dyn FnMut(usize, RawDirEntry) -> Result<bool>,
    ) -> Result<()> {
        let e = self.entry_at(dir);
        if !e.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let first = e.first_cluster(self.kind());

        if first == 0 && self.hdr.root_cluster == 0 {
            // FAT12/16 root: a flat region, not a cluster chain.
            let base = self.hdr.root_region_offset();
            for i in 0..self.hdr.root_ent_cnt as usize {
                let off = base + i * DIRENT_SIZE;
                let slot = RawDirEntry::from_slice(&self.img[off..off + DIRENT_SIZE]);
                if slot.is_end() {
                    return Ok(());
                }
                if !f(off, slot)? {
                    return Ok(());
                }
            }
            return Ok(());
        }

        let start = if first == 0 { self.hdr.root_cluster } else { first };
        for c in ClusterWalk::new(&self.img, &self.hdr, start) {
            let base = self.hdr.cluster_offset(c);
            let per_cluster = self.cluster_size() as usize / DIRENT_SIZE;
            for i in 0..per_cluster {
                let off = base + i * DIRENT_SIZE;
                let slot = RawDirEntry::from_slice(&self.img[off..off + DIRENT_SIZE]);
                if slot.is_end() {
                    return Ok(());
                }
                if !f(off, slot)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Iterate named entries of `dir`: free and long-name slots are
    /// folded away, each short entry surfaces once with its long name
    /// when a valid LFN chain precedes it.
    fn for_each_entry(
        &self,
        dir: EntryId,
        f: &mut dyn FnMut(&FatDirItem) -> Result<bool>,
    ) -> Result<()> {
        let mut lfn = dir::LfnCollector::new();
        self.for_each_slot(dir, &mut |off, slot| {
            if slot.is_free() {
                lfn.reset();
                return Ok(true);
            }
            if slot.is_lfn() {
                lfn.push_slot(&slot);
                return Ok(true);
            }
            let name = lfn.take(&slot).unwrap_or_else(|| slot.short_name());
            f(&FatDirItem {
                offset: off as u64,
                entry: slot,
                name,
            })
        })
    }

    fn count_entries(&self, dir: EntryId) -> Result<u64> {
        let mut n = 0u64;
        self.for_each_entry(dir, &mut |_| {
            n += 1;
            Ok(true)
        })?;
        Ok(n)
    }

    fn root_ref(&self) -> PathRef {
        PathRef {
            entry: ROOT_ENTRY,
            parent: ROOT_ENTRY,
            kind: PathKind::Dir,
        }
    }
}

struct FatFsOps {
    vol: Arc<FatVolume>,
}

impl FsOps for FatFsOps {
    fn get_entry(&self, dir: Option<EntryId>, name: Option<&str>) -> Result<PathRef> {
        let vol = &self.vol;
        let name = match name {
            None => return Ok(vol.root_ref()),
            Some(n) => n,
        };
        let base = dir.unwrap_or(ROOT_ENTRY);

        // "." and ".." at the root stay at the root.
        if base == ROOT_ENTRY && (name == "." || name == "..") {
            return Ok(vol.root_ref());
        }

        let mut found: Option<PathRef> = None;
        vol.for_each_entry(base, &mut |item| {
            // Case-sensitive component match.
            if item.name == name {
                let p = if vol.is_root_dir_ref(&item.entry) {
                    vol.root_ref()
                } else {
                    PathRef {
                        entry: item.offset,
                        parent: base,
                        kind: if item.entry.is_dir() {
                            PathKind::Dir
                        } else {
                            PathKind::File
                        },
                    }
                };
                found = Some(p);
                return Ok(false);
            }
            Ok(true)
        })?;

        Ok(found.unwrap_or(PathRef {
            entry: 0,
            parent: base,
            kind: PathKind::None,
        }))
    }

    fn open(&self, fs: &Arc<Filesystem>, path: &PathRef, flags: OpenFlags) -> Result<FileHandle> {
        if flags.is_writable() {
            return Err(Errno::EROFS);
        }
        let vol = self.vol.clone();
        let e = vol.entry_at(path.entry);
        let first = e.first_cluster(vol.kind());
        let cur = if first >= 2 { Some(first) } else { None };
        Ok(FileHandle::new(
            fs.clone(),
            flags,
            Box::new(FatFile {
                vol,
                entry: path.entry,
                cur: Mutex::new(cur),
            }),
        ))
    }
}

/// Per-handle payload: the entry plus the cached cluster holding the
/// cursor (`None` once the cursor has been pushed past the file's data).
struct FatFile {
    vol: Arc<FatVolume>,
    entry: EntryId,
    cur: Mutex<Option<u32>>,
}

impl FatFile {
    fn raw(&self) -> RawDirEntry {
        self.vol.entry_at(self.entry)
    }

    fn first_cluster(&self) -> Option<u32> {
        let c = self.raw().first_cluster(self.vol.kind());
        if c >= 2 {
            Some(c)
        } else {
            None
        }
    }

    /// Walk forward to the cluster with index `target` in the chain,
    /// starting from cluster `c` at index `idx`.
    fn walk_to(&self, mut c: u32, mut idx: u64, target: u64, file_end: bool) -> Option<u32> {
        while idx < target {
            match self.vol.next_in_chain(c) {
                FatEntry::Next(n) => {
                    c = n;
                    idx += 1;
                }
                FatEntry::EndOfChain => {
                    // Only reachable when the position sits exactly at
                    // the end of the file on a cluster boundary.
                    assert!(file_end, "FAT chain ended before the target cluster");
                    return None;
                }
                bad => panic!("corrupt FAT chain at cluster {}: {:?}", c, bad),
            }
        }
        Some(c)
    }
}

impl FileOps for FatFile {
    fn read(&self, file: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        let e = self.raw();
        if e.is_dir() {
            return Err(Errno::EISDIR);
        }

        let size = e.file_size() as u64;
        let mut pos = file.pos();
        if pos >= size || buf.is_empty() {
            return Ok(0);
        }

        let csize = self.vol.cluster_size() as u64;
        let mut cur = self.cur.lock();
        let mut c = cur.expect("file cursor lost its cluster");
        let mut done = 0usize;

        while done < buf.len() && pos < size {
            let coff = (pos % csize) as usize;
            let rem = csize as usize - coff;
            let n = rem
                .min(buf.len() - done)
                .min((size - pos) as usize);

            let data = self.vol.cluster_bytes(c);
            buf[done..done + n].copy_from_slice(&data[coff..coff + n]);
            pos += n as u64;
            done += n;

            if n < rem {
                // Buffer or file exhausted inside this cluster.
                break;
            }
            match self.vol.next_in_chain(c) {
                FatEntry::Next(nc) => c = nc,
                FatEntry::EndOfChain => {
                    assert_eq!(pos, size, "FAT chain shorter than the file");
                    break;
                }
                bad => panic!("corrupt FAT chain at cluster {}: {:?}", c, bad),
            }
        }

        *cur = Some(c);
        file.set_pos(pos);
        Ok(done)
    }

    fn write(&self, _file: &FileHandle, _buf: &[u8]) -> Result<usize> {
        Err(Errno::EBADF)
    }

    fn seek(&self, file: &FileHandle, off: i64, whence: Whence) -> Result<u64> {
        let e = self.raw();

        if e.is_dir() {
            // Directory cursors are entry indices; only absolute seeks
            // within [0, entry_count] make sense. The count is walked
            // fresh on every call.
            if whence != Whence::Set {
                return Err(Errno::EINVAL);
            }
            let count = self.vol.count_entries(self.entry)? as i64;
            if off < 0 || off > count {
                return Err(Errno::EINVAL);
            }
            file.set_pos(off as u64);
            return Ok(off as u64);
        }

        let size = e.file_size() as i64;
        let cur_pos = file.pos() as i64;
        let abs = match whence {
            Whence::Set => off,
            Whence::Cur => cur_pos + off,
            Whence::End => size + off,
        };
        if abs < 0 {
            return Err(Errno::EINVAL);
        }
        let abs = abs as u64;

        let mut cur = self.cur.lock();
        if abs > size as u64 {
            // Past the end: legal, but there is no cluster to cache.
            *cur = None;
            file.set_pos(abs);
            return Ok(abs);
        }

        let csize = self.vol.cluster_size() as u64;
        let target = abs / csize;
        let new_cluster = match self.first_cluster() {
            None => None,
            Some(first) => {
                // Rewind to the first cluster when moving backwards; the
                // chain only links forward.
                let (start, start_idx) = match *cur {
                    Some(c) if abs >= file.pos() => (c, file.pos() / csize),
                    _ => (first, 0),
                };
                self.walk_to(start, start_idx, target, abs == size as u64)
            }
        };

        *cur = new_cluster;
        file.set_pos(abs);
        Ok(abs)
    }

    fn list_dir(
        &self,
        _file: &FileHandle,
        emit: &mut dyn FnMut(VfsDirEntry<'_>) -> Result<bool>,
    ) -> Result<()> {
        self.vol.for_each_entry(self.entry, &mut |item| {
            let dtype = if item.entry.is_dir() || item.entry.is_volume_id() {
                DT_DIR
            } else {
                DT_REG
            };
            emit(VfsDirEntry {
                ino: item.offset,
                dtype,
                name: &item.name,
            })
        })
    }

    fn fstat(&self, _file: &FileHandle) -> Result<Stat64> {
        let e = self.raw();
        let size = e.file_size() as i64;
        // Volume labels list as directories.
        let fmt = if e.is_dir() || e.is_volume_id() {
            S_IFDIR
        } else {
            S_IFREG
        };
        let mtime = fat_time_to_unix(e.wrt_date(), e.wrt_time(), 0);
        let ctime = fat_time_to_unix(e.crt_date(), e.crt_time(), e.crt_time_tenth());
        Ok(Stat64 {
            st_dev: self.vol.device_id,
            st_ino: if self.entry == ROOT_ENTRY { 0 } else { self.entry },
            st_mode: 0o555 | fmt,
            st_nlink: 1,
            st_uid: 0,
            st_gid: 0,
            st_rdev: 0,
            st_size: size,
            st_blksize: 4096,
            st_blocks: size / 512,
            st_atime: mtime,
            st_mtime: mtime,
            st_ctime: ctime,
        })
    }

    fn dup(&self, _file: &FileHandle) -> Result<Box<dyn FileOps>> {
        Ok(Box::new(FatFile {
            vol: self.vol.clone(),
            entry: self.entry,
            cur: Mutex::new(*self.cur.lock()),
        }))
    }
}

/// Rewind a FAT file handle to the start of its data.
pub fn fat_rewind(file: &FileHandle) -> Result<u64> {
    file.seek(0, Whence::Set)
}
