//! Synthetic FAT image builder for the test suite.
//!
//! Produces well-formed FAT12/16/32 volumes in memory: boot sector, one
//! FAT, a root directory (flat region or cluster 2), subdirectories with
//! "." / ".." slots, LFN chains for names that do not fit 8.3, and fixed
//! timestamps so stat results are predictable.

use super::dir::{build_lfn_slots, RawDirEntry, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_VOLUME_ID};
use super::hdr::{FatKind, DIRENT_SIZE};
use super::time::{pack_fat_date, pack_fat_time};
use alloc::string::String;
use alloc::vec::Vec;

/// Fixed timestamps stamped on every entry.
pub const WRT_DATE: u16 = pack_fat_date(2023, 6, 15);
pub const WRT_TIME: u16 = pack_fat_time(12, 30, 20);
pub const CRT_DATE: u16 = pack_fat_date(2021, 3, 4);
pub const CRT_TIME: u16 = pack_fat_time(5, 6, 8);
pub const CRT_TENTH: u8 = 150;

pub enum Node {
    File { name: String, data: Vec<u8> },
    Dir { name: String, children: Vec<Node> },
}

pub fn file(name: &str, data: &[u8]) -> Node {
    Node::File {
        name: name.into(),
        data: data.into(),
    }
}

pub fn dir(name: &str, children: Vec<Node>) -> Node {
    Node::Dir {
        name: name.into(),
        children,
    }
}

pub struct FatImageBuilder {
    kind: FatKind,
    sec_per_clus: u8,
    volume_label: Option<String>,
    root: Vec<Node>,
}

impl FatImageBuilder {
    pub fn new(kind: FatKind) -> Self {
        Self {
            kind,
            sec_per_clus: match kind {
                FatKind::Fat12 => 8,
                _ => 1,
            },
            volume_label: None,
            root: Vec::new(),
        }
    }

    pub fn sec_per_clus(mut self, spc: u8) -> Self {
        self.sec_per_clus = spc;
        self
    }

    pub fn volume_label(mut self, label: &str) -> Self {
        self.volume_label = Some(label.into());
        self
    }

    pub fn node(mut self, n: Node) -> Self {
        self.root.push(n);
        self
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.node(file(name, data))
    }

    pub fn build(self) -> Vec<u8> {
        Builder::run(self)
    }
}

const BPS: usize = 512;

struct Builder {
    kind: FatKind,
    spc: usize,
    img: Vec<u8>,
    fat_off: usize,
    next_free: u32,
}

impl Builder {
    fn run(cfg: FatImageBuilder) -> Vec<u8> {
        let kind = cfg.kind;
        let spc = cfg.sec_per_clus as usize;
        let csize = BPS * spc;

        fn clusters_for(nodes: &[Node], csize: usize) -> usize {
            let mut n = 0;
            for node in nodes {
                match node {
                    Node::File { data, .. } => n += (data.len() + csize - 1) / csize,
                    Node::Dir { children, .. } => n += 1 + clusters_for(children, csize),
                }
            }
            n
        }

        let needed = clusters_for(&cfg.root, csize) + 2; // root cluster + slack
        let min_clusters = match kind {
            FatKind::Fat12 => 64,
            FatKind::Fat16 => 4085,
            FatKind::Fat32 => 65525,
        };
        let cluster_count = needed.max(min_clusters);

        let (rsvd, root_ents) = match kind {
            FatKind::Fat32 => (32usize, 0usize),
            _ => (1, 64),
        };
        let fat_entries = cluster_count + 2;
        let fat_bytes = match kind {
            FatKind::Fat12 => (fat_entries * 3 + 1) / 2,
            FatKind::Fat16 => fat_entries * 2,
            FatKind::Fat32 => fat_entries * 4,
        };
        let fat_sz = (fat_bytes + BPS - 1) / BPS;
        let root_dir_secs = root_ents * DIRENT_SIZE / BPS;
        let tot_sec = rsvd + fat_sz + root_dir_secs + cluster_count * spc;

        let mut img = alloc::vec![0u8; tot_sec * BPS];

        // Boot sector / BPB.
        img[0] = 0xEB;
        img[1] = 0x3C;
        img[2] = 0x90;
        img[3..11].copy_from_slice(b"VESPER  ");
        img[11..13].copy_from_slice(&(BPS as u16).to_le_bytes());
        img[13] = spc as u8;
        img[14..16].copy_from_slice(&(rsvd as u16).to_le_bytes());
        img[16] = 1; // one FAT
        img[17..19].copy_from_slice(&(root_ents as u16).to_le_bytes());
        img[21] = 0xF8; // media descriptor
        if tot_sec <= u16::MAX as usize && kind != FatKind::Fat32 {
            img[19..21].copy_from_slice(&(tot_sec as u16).to_le_bytes());
        } else {
            img[32..36].copy_from_slice(&(tot_sec as u32).to_le_bytes());
        }
        match kind {
            FatKind::Fat32 => {
                img[36..40].copy_from_slice(&(fat_sz as u32).to_le_bytes());
                img[44..48].copy_from_slice(&2u32.to_le_bytes());
            }
            _ => {
                img[22..24].copy_from_slice(&(fat_sz as u16).to_le_bytes());
            }
        }
        img[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());

        let mut b = Builder {
            kind,
            spc,
            img,
            fat_off: rsvd * BPS,
            next_free: 2,
        };

        // Reserved FAT entries 0 and 1.
        b.set_fat(0, b.eoc());
        b.set_fat(1, b.eoc());

        // FAT32 keeps the root directory in a chain of its own.
        let root_cluster = match kind {
            FatKind::Fat32 => Some(b.alloc_chain(1)[0]),
            _ => None,
        };

        let mut slots: Vec<RawDirEntry> = Vec::new();
        if let Some(label) = &cfg.volume_label {
            let mut name11 = [b' '; 11];
            for (i, c) in label.bytes().take(11).enumerate() {
                name11[i] = c.to_ascii_uppercase();
            }
            slots.push(short_entry(&name11, ATTR_VOLUME_ID, 0, 0));
        }
        let parent_for_dotdot = root_cluster.unwrap_or(0);
        for node in &cfg.root {
            slots.extend(b.place_node(node, parent_for_dotdot));
        }

        match root_cluster {
            Some(c) => b.write_dir_cluster(c, &slots),
            None => {
                assert!(slots.len() <= root_ents, "root directory overflow");
                let base = b.root_region_off(fat_sz, rsvd);
                for (i, s) in slots.iter().enumerate() {
                    let off = base + i * DIRENT_SIZE;
                    b.img[off..off + DIRENT_SIZE].copy_from_slice(&s.0);
                }
            }
        }

        b.img
    }

    fn root_region_off(&self, fat_sz: usize, rsvd: usize) -> usize {
        (rsvd + fat_sz) * BPS
    }

    fn eoc(&self) -> u32 {
        match self.kind {
            FatKind::Fat12 => 0xFFF,
            FatKind::Fat16 => 0xFFFF,
            FatKind::Fat32 => 0x0FFF_FFFF,
        }
    }

    fn set_fat(&mut self, idx: u32, val: u32) {
        let fat = &mut self.img[self.fat_off..];
        match self.kind {
            FatKind::Fat12 => {
                let off = idx as usize + idx as usize / 2;
                if idx & 1 == 0 {
                    fat[off] = (val & 0xFF) as u8;
                    fat[off + 1] = (fat[off + 1] & 0xF0) | ((val >> 8) & 0x0F) as u8;
                } else {
                    fat[off] = (fat[off] & 0x0F) | ((val & 0x0F) << 4) as u8;
                    fat[off + 1] = (val >> 4) as u8;
                }
            }
            FatKind::Fat16 => {
                let off = idx as usize * 2;
                fat[off..off + 2].copy_from_slice(&(val as u16).to_le_bytes());
            }
            FatKind::Fat32 => {
                let off = idx as usize * 4;
                fat[off..off + 4].copy_from_slice(&val.to_le_bytes());
            }
        }
    }

    /// Allocate `n` consecutive clusters, linked into one chain.
    fn alloc_chain(&mut self, n: usize) -> Vec<u32> {
        assert!(n > 0);
        let first = self.next_free;
        self.next_free += n as u32;
        let chain: Vec<u32> = (first..self.next_free).collect();
        for w in chain.windows(2) {
            self.set_fat(w[0], w[1]);
        }
        let eoc = self.eoc();
        self.set_fat(*chain.last().unwrap(), eoc);
        chain
    }

    fn cluster_off(&self, c: u32) -> usize {
        // Mirror of the driver's layout math, derived from the BPB we
        // just wrote.
        let rsvd = u16::from_le_bytes([self.img[14], self.img[15]]) as usize;
        let fat_sz = {
            let f16 = u16::from_le_bytes([self.img[22], self.img[23]]) as usize;
            if f16 != 0 {
                f16
            } else {
                u32::from_le_bytes([self.img[36], self.img[37], self.img[38], self.img[39]])
                    as usize
            }
        };
        let root_ents = u16::from_le_bytes([self.img[17], self.img[18]]) as usize;
        let first_data = rsvd + fat_sz + root_ents * DIRENT_SIZE / BPS;
        (first_data + (c as usize - 2) * self.spc) * BPS
    }

    fn write_dir_cluster(&mut self, c: u32, slots: &[RawDirEntry]) {
        let csize = BPS * self.spc;
        assert!(slots.len() * DIRENT_SIZE <= csize, "directory overflow");
        let base = self.cluster_off(c);
        for (i, s) in slots.iter().enumerate() {
            let off = base + i * DIRENT_SIZE;
            self.img[off..off + DIRENT_SIZE].copy_from_slice(&s.0);
        }
    }

    /// Place one node's data and return the slots (LFN chain + short
    /// entry) for its parent's table.
    fn place_node(&mut self, node: &Node, parent_cluster: u32) -> Vec<RawDirEntry> {
        match node {
            Node::File { name, data } => {
                let csize = BPS * self.spc;
                let first = if data.is_empty() {
                    0
                } else {
                    let chain = self.alloc_chain((data.len() + csize - 1) / csize);
                    for (i, chunk) in data.chunks(csize).enumerate() {
                        let off = self.cluster_off(chain[i]);
                        self.img[off..off + chunk.len()].copy_from_slice(chunk);
                    }
                    chain[0]
                };
                named_slots(name, ATTR_ARCHIVE, first, data.len() as u32)
            }
            Node::Dir { name, children } => {
                let own = self.alloc_chain(1)[0];
                let mut slots = Vec::new();
                slots.push(short_entry(b".          ", ATTR_DIRECTORY, own, 0));
                slots.push(short_entry(b"..         ", ATTR_DIRECTORY, parent_cluster, 0));
                for child in children {
                    slots.extend(self.place_node(child, own));
                }
                self.write_dir_cluster(own, &slots);
                named_slots(name, ATTR_DIRECTORY, own, 0)
            }
        }
    }
}

fn short_entry(name11: &[u8; 11], attr: u8, first: u32, size: u32) -> RawDirEntry {
    let mut raw = [0u8; DIRENT_SIZE];
    raw[..11].copy_from_slice(name11);
    raw[11] = attr;
    raw[13] = CRT_TENTH;
    raw[14..16].copy_from_slice(&CRT_TIME.to_le_bytes());
    raw[16..18].copy_from_slice(&CRT_DATE.to_le_bytes());
    raw[20..22].copy_from_slice(&((first >> 16) as u16).to_le_bytes());
    raw[22..24].copy_from_slice(&WRT_TIME.to_le_bytes());
    raw[24..26].copy_from_slice(&WRT_DATE.to_le_bytes());
    raw[26..28].copy_from_slice(&((first & 0xFFFF) as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    RawDirEntry(raw)
}

/// Does `name` store directly as an 8.3 short entry?
fn fits_short(name: &str) -> Option<[u8; 11]> {
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }
    let ok = |s: &str| {
        s.bytes()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_' || c == b'-')
    };
    if !ok(base) || !ok(ext) {
        return None;
    }
    let mut name11 = [b' '; 11];
    name11[..base.len()].copy_from_slice(base.as_bytes());
    name11[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    Some(name11)
}

/// Short alias for a long name ("Long File Name.txt" -> "LONGFI~1TXT").
fn alias_for(name: &str) -> [u8; 11] {
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    let mut name11 = [b' '; 11];
    let mut i = 0;
    for c in base.chars() {
        if i >= 6 {
            break;
        }
        if c.is_ascii_alphanumeric() {
            name11[i] = (c as u8).to_ascii_uppercase();
            i += 1;
        }
    }
    name11[i] = b'~';
    name11[i + 1] = b'1';
    let mut j = 8;
    for c in ext.chars().take(3) {
        if c.is_ascii_alphanumeric() {
            name11[j] = (c as u8).to_ascii_uppercase();
            j += 1;
        }
    }
    name11
}

fn named_slots(name: &str, attr: u8, first: u32, size: u32) -> Vec<RawDirEntry> {
    match fits_short(name) {
        Some(name11) => alloc::vec![short_entry(&name11, attr, first, size)],
        None => {
            let short = short_entry(&alias_for(name), attr, first, size);
            let mut slots = build_lfn_slots(name, &short);
            slots.push(short);
            slots
        }
    }
}
