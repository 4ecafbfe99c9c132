//! FAT directory entries: 32-byte slots, attributes, 8.3 short names and
//! long-file-name (LFN) chains.

use super::hdr::{FatKind, DIRENT_SIZE};
use alloc::string::String;
use alloc::vec::Vec;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
/// All four low bits set marks a long-name slot.
pub const ATTR_LFN: u8 = 0x0F;

/// NT reserved-byte case hints for short names.
const NT_LOWER_BASE: u8 = 0x08;
const NT_LOWER_EXT: u8 = 0x10;

const DELETED_MARK: u8 = 0xE5;

// Field offsets within a 32-byte entry.
const OFF_NAME: usize = 0;
const OFF_ATTR: usize = 11;
const OFF_NTRES: usize = 12;
const OFF_CRT_TENTH: usize = 13;
const OFF_CRT_TIME: usize = 14;
const OFF_CRT_DATE: usize = 16;
const OFF_FST_CLUS_HI: usize = 20;
const OFF_WRT_TIME: usize = 22;
const OFF_WRT_DATE: usize = 24;
const OFF_FST_CLUS_LO: usize = 26;
const OFF_FILE_SIZE: usize = 28;

/// Owned copy of one directory entry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDirEntry(pub [u8; DIRENT_SIZE]);

impl RawDirEntry {
    pub fn from_slice(b: &[u8]) -> Self {
        let mut raw = [0u8; DIRENT_SIZE];
        raw.copy_from_slice(&b[..DIRENT_SIZE]);
        Self(raw)
    }

    /// Synthetic root-directory entry. The root has no on-disk slot of
    /// its own; this stands in for it (FAT32 points it at the root
    /// cluster chain).
    pub fn synthetic_root(root_cluster: u32) -> Self {
        let mut raw = [0u8; DIRENT_SIZE];
        raw[OFF_NAME] = b'/';
        raw[OFF_NAME + 1..OFF_NAME + 11].fill(b' ');
        raw[OFF_ATTR] = ATTR_DIRECTORY;
        raw[OFF_FST_CLUS_LO..OFF_FST_CLUS_LO + 2]
            .copy_from_slice(&((root_cluster & 0xFFFF) as u16).to_le_bytes());
        raw[OFF_FST_CLUS_HI..OFF_FST_CLUS_HI + 2]
            .copy_from_slice(&((root_cluster >> 16) as u16).to_le_bytes());
        Self(raw)
    }

    fn le16(&self, off: usize) -> u16 {
        u16::from_le_bytes([self.0[off], self.0[off + 1]])
    }

    /// Slot never used; terminates directory iteration.
    pub fn is_end(&self) -> bool {
        self.0[0] == 0x00
    }

    /// Deleted slot.
    pub fn is_free(&self) -> bool {
        self.0[0] == DELETED_MARK
    }

    pub fn attr(&self) -> u8 {
        self.0[OFF_ATTR]
    }

    pub fn is_lfn(&self) -> bool {
        self.attr() & ATTR_LFN == ATTR_LFN
    }

    pub fn is_dir(&self) -> bool {
        self.attr() & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_id(&self) -> bool {
        !self.is_lfn() && self.attr() & ATTR_VOLUME_ID != 0
    }

    pub fn file_size(&self) -> u32 {
        u32::from_le_bytes([
            self.0[OFF_FILE_SIZE],
            self.0[OFF_FILE_SIZE + 1],
            self.0[OFF_FILE_SIZE + 2],
            self.0[OFF_FILE_SIZE + 3],
        ])
    }

    /// First data cluster. FAT12/16 ignore the high half (it may carry
    /// garbage on badly written images).
    pub fn first_cluster(&self, kind: FatKind) -> u32 {
        let lo = self.le16(OFF_FST_CLUS_LO) as u32;
        match kind {
            FatKind::Fat32 => ((self.le16(OFF_FST_CLUS_HI) as u32) << 16) | lo,
            _ => lo,
        }
    }

    pub fn wrt_date(&self) -> u16 {
        self.le16(OFF_WRT_DATE)
    }

    pub fn wrt_time(&self) -> u16 {
        self.le16(OFF_WRT_TIME)
    }

    pub fn crt_date(&self) -> u16 {
        self.le16(OFF_CRT_DATE)
    }

    pub fn crt_time(&self) -> u16 {
        self.le16(OFF_CRT_TIME)
    }

    pub fn crt_time_tenth(&self) -> u8 {
        self.0[OFF_CRT_TENTH]
    }

    /// 8.3 name rendered with the dot restored and the NT case hints
    /// applied (base and extension each all-lowercase when flagged).
    pub fn short_name(&self) -> String {
        let raw = &self.0[OFF_NAME..OFF_NAME + 11];
        let nt = self.0[OFF_NTRES];

        let base_end = raw[..8].iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
        let ext_end = raw[8..].iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);

        let mut name = String::new();
        for &c in &raw[..base_end] {
            // 0x05 in slot 0 escapes a real 0xE5 first byte.
            let c = if name.is_empty() && c == 0x05 { DELETED_MARK } else { c };
            let c = if nt & NT_LOWER_BASE != 0 {
                c.to_ascii_lowercase()
            } else {
                c
            };
            name.push(c as char);
        }
        if ext_end > 0 {
            name.push('.');
            for &c in &raw[8..8 + ext_end] {
                let c = if nt & NT_LOWER_EXT != 0 {
                    c.to_ascii_lowercase()
                } else {
                    c
                };
                name.push(c as char);
            }
        }
        name
    }

    /// Checksum over the 11 raw name bytes, as stored in LFN slots.
    pub fn short_name_checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for &c in &self.0[OFF_NAME..OFF_NAME + 11] {
            sum = (sum >> 1).wrapping_add((sum & 1) << 7).wrapping_add(c);
        }
        sum
    }
}

/// Accumulates a long name from the LFN slots preceding a short entry.
///
/// Slots arrive on disk in reverse order (highest ordinal first, flagged
/// 0x40); each carries 13 UTF-16 units. The collector prepends each slot
/// and resolves against the short entry's checksum.
pub struct LfnCollector {
    units: Vec<u16>,
    checksum: u8,
    active: bool,
}

impl LfnCollector {
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            checksum: 0,
            active: false,
        }
    }

    pub fn reset(&mut self) {
        self.units.clear();
        self.active = false;
    }

    /// Feed one LFN slot.
    pub fn push_slot(&mut self, e: &RawDirEntry) {
        debug_assert!(e.is_lfn());
        let ord = e.0[0];
        if ord & 0x40 != 0 {
            // Start of a fresh chain.
            self.units.clear();
            self.checksum = e.0[13];
            self.active = true;
        } else if !self.active || e.0[13] != self.checksum {
            // Orphan slot; drop any partial state.
            self.reset();
            return;
        }

        let mut chunk = [0u16; 13];
        let mut n = 0;
        for &(off, cnt) in &[(1usize, 5usize), (14, 6), (28, 2)] {
            for i in 0..cnt {
                chunk[n] = u16::from_le_bytes([e.0[off + i * 2], e.0[off + i * 2 + 1]]);
                n += 1;
            }
        }
        // Prepend: slots run from the tail of the name to the head.
        let mut combined = chunk.to_vec();
        combined.extend_from_slice(&self.units);
        self.units = combined;
    }

    /// Resolve the collected chain against the short entry that follows
    /// it. Returns the long name if the chain is complete and matches.
    pub fn take(&mut self, short: &RawDirEntry) -> Option<String> {
        if !self.active || self.units.is_empty() {
            self.reset();
            return None;
        }
        if self.checksum != short.short_name_checksum() {
            self.reset();
            return None;
        }
        let end = self
            .units
            .iter()
            .position(|&u| u == 0x0000)
            .unwrap_or(self.units.len());
        let name: String = core::char::decode_utf16(self.units[..end].iter().copied())
            .map(|r| r.unwrap_or(core::char::REPLACEMENT_CHARACTER))
            .collect();
        self.reset();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

impl Default for LfnCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the on-disk LFN chain for `long` over alias `short`, last slot
/// first, ready to be written directly before the short entry. Used by
/// image tooling and tests.
pub fn build_lfn_slots(long: &str, short: &RawDirEntry) -> Vec<RawDirEntry> {
    let units: Vec<u16> = long.encode_utf16().collect();
    let nslots = (units.len() + 12) / 13;
    let checksum = short.short_name_checksum();

    let mut slots = Vec::new();
    for slot in (0..nslots).rev() {
        let mut raw = [0u8; DIRENT_SIZE];
        raw[0] = (slot + 1) as u8 | if slot == nslots - 1 { 0x40 } else { 0 };
        raw[OFF_ATTR] = ATTR_LFN;
        raw[13] = checksum;

        let base = slot * 13;
        let mut n = 0;
        for &(off, cnt) in &[(1usize, 5usize), (14, 6), (28, 2)] {
            for i in 0..cnt {
                let u = match base + n {
                    k if k < units.len() => units[k],
                    k if k == units.len() => 0x0000,
                    _ => 0xFFFF,
                };
                raw[off + i * 2..off + i * 2 + 2].copy_from_slice(&u.to_le_bytes());
                n += 1;
            }
        }
        slots.push(RawDirEntry(raw));
    }
    slots
}
