//! getdents64: format directory listings into a user buffer.
//!
//! Wire layout per record: `{u64 d_ino, s64 d_off, u16 d_reclen,
//! u8 d_type}` followed by the NUL-terminated name, records packed with no
//! alignment padding. `d_off` is the absolute offset just past the record
//! within the returned buffer.

use super::file::FileHandle;
use super::FsFlags;
use crate::error::{Errno, Result};
use crate::uaccess::UserSlice;

/// Size of the fixed dirent64 header preceding the name.
pub const DIRENT_HDR: usize = 8 + 8 + 2 + 1;

/// d_type values (subset the drivers produce).
pub const DT_UNKNOWN: u8 = 0;
pub const DT_DIR: u8 = 4;
pub const DT_REG: u8 = 8;
pub const DT_LNK: u8 = 10;

/// One directory entry as reported by a driver's iteration callback.
#[derive(Debug, Clone, Copy)]
pub struct VfsDirEntry<'a> {
    pub ino: u64,
    pub dtype: u8,
    pub name: &'a str,
}

/// Fill `user` with as many whole records as fit, resuming from the
/// handle's entry-index cursor.
///
/// Returns the bytes written; the cursor advances past the emitted
/// entries. A buffer too small for even the first record fails with
/// EINVAL and no state change; a user-copy fault aborts the call with
/// EFAULT and the cursor untouched.
///
/// The cursor is a plain entry index: entries inserted or removed ahead
/// of it between calls can surface as a duplicate or a skip.
pub fn getdents64(file: &FileHandle, user: &mut UserSlice<'_>) -> Result<usize> {
    let fs = file.fs().clone();
    fs.with_shlock(|| {
        let start = file.pos();
        // Drivers flagged RQ_DE_SKIP restart iteration from entry zero
        // and rely on this callback to skip up to the cursor; the others
        // consume the cursor themselves.
        let skip_here = fs.flags.contains(FsFlags::RQ_DE_SKIP);

        let mut seen: u64 = 0;
        let mut emitted: u64 = 0;
        let mut written: usize = 0;

        file.list_dir(&mut |ent| {
            if skip_here && seen < start {
                seen += 1;
                return Ok(true);
            }
            seen += 1;

            let reclen = DIRENT_HDR + ent.name.len() + 1;
            if written + reclen > user.len() {
                if emitted == 0 {
                    return Err(Errno::EINVAL);
                }
                return Ok(false);
            }

            let d_off = (written + reclen) as i64;
            let mut hdr = [0u8; DIRENT_HDR];
            hdr[0..8].copy_from_slice(&ent.ino.to_ne_bytes());
            hdr[8..16].copy_from_slice(&d_off.to_ne_bytes());
            hdr[16..18].copy_from_slice(&(reclen as u16).to_ne_bytes());
            hdr[18] = ent.dtype;

            user.write(written, &hdr)?;
            user.write(written + DIRENT_HDR, ent.name.as_bytes())?;
            user.write(written + DIRENT_HDR + ent.name.len(), &[0])?;

            written += reclen;
            emitted += 1;
            Ok(true)
        })?;

        file.set_pos(start + emitted);
        Ok(written)
    })
}

/// Parsed view of one packed record, for tests and in-kernel consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent64 {
    pub ino: u64,
    pub off: i64,
    pub dtype: u8,
    pub name: alloc::string::String,
}

/// Split a getdents64 result buffer back into records.
pub fn parse_dirents(buf: &[u8]) -> alloc::vec::Vec<Dirent64> {
    let mut out = alloc::vec::Vec::new();
    let mut at = 0usize;
    while at + DIRENT_HDR <= buf.len() {
        let ino = u64::from_ne_bytes(buf[at..at + 8].try_into().unwrap());
        let off = i64::from_ne_bytes(buf[at + 8..at + 16].try_into().unwrap());
        let reclen = u16::from_ne_bytes(buf[at + 16..at + 18].try_into().unwrap()) as usize;
        let dtype = buf[at + 18];
        if reclen < DIRENT_HDR + 1 || at + reclen > buf.len() {
            break;
        }
        let name_bytes = &buf[at + DIRENT_HDR..at + reclen - 1];
        let name = core::str::from_utf8(name_bytes).unwrap_or("").into();
        out.push(Dirent64 {
            ino,
            off,
            dtype,
            name,
        });
        at += reclen;
    }
    out
}
