//! FAT boot-sector (BPB) parsing and volume geometry.

use crate::error::{Errno, Result};

/// FAT variant, decided purely by the data-region cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatKind {
    Fat12,
    Fat16,
    Fat32,
}

// BPB field offsets within sector 0.
const BPB_BYTS_PER_SEC: usize = 11;
const BPB_SEC_PER_CLUS: usize = 13;
const BPB_RSVD_SEC_CNT: usize = 14;
const BPB_NUM_FATS: usize = 16;
const BPB_ROOT_ENT_CNT: usize = 17;
const BPB_TOT_SEC16: usize = 19;
const BPB_FAT_SZ16: usize = 22;
const BPB_TOT_SEC32: usize = 32;
const BPB_FAT_SZ32: usize = 36;
const BPB_ROOT_CLUS: usize = 44;
const BOOT_SIG_OFF: usize = 510;

const BOOT_SIG: u16 = 0xAA55;

/// Size of one directory entry slot.
pub const DIRENT_SIZE: usize = 32;

fn le16(img: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([img[off], img[off + 1]])
}

fn le32(img: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([img[off], img[off + 1], img[off + 2], img[off + 3]])
}

/// Decoded boot-sector fields plus the derived layout.
#[derive(Debug, Clone, Copy)]
pub struct FatHeader {
    pub bytes_per_sec: u16,
    pub sec_per_clus: u8,
    pub rsvd_sec_cnt: u16,
    pub num_fats: u8,
    pub root_ent_cnt: u16,
    pub tot_sec: u32,
    /// Sectors per FAT (16-bit field, or the FAT32 field when zero).
    pub fat_sz: u32,
    /// FAT32 root directory cluster; zero on FAT12/16.
    pub root_cluster: u32,
    pub kind: FatKind,
    pub cluster_count: u32,
}

impl FatHeader {
    pub fn parse(img: &[u8]) -> Result<Self> {
        if img.len() < 512 || le16(img, BOOT_SIG_OFF) != BOOT_SIG {
            return Err(Errno::EINVAL);
        }

        let bytes_per_sec = le16(img, BPB_BYTS_PER_SEC);
        let sec_per_clus = img[BPB_SEC_PER_CLUS];
        if !(512..=4096).contains(&bytes_per_sec)
            || !bytes_per_sec.is_power_of_two()
            || sec_per_clus == 0
            || !sec_per_clus.is_power_of_two()
        {
            return Err(Errno::EINVAL);
        }

        let rsvd_sec_cnt = le16(img, BPB_RSVD_SEC_CNT);
        let num_fats = img[BPB_NUM_FATS];
        let root_ent_cnt = le16(img, BPB_ROOT_ENT_CNT);
        if rsvd_sec_cnt == 0 || num_fats == 0 {
            return Err(Errno::EINVAL);
        }

        let tot_sec16 = le16(img, BPB_TOT_SEC16) as u32;
        let tot_sec = if tot_sec16 != 0 {
            tot_sec16
        } else {
            le32(img, BPB_TOT_SEC32)
        };

        let fat_sz16 = le16(img, BPB_FAT_SZ16) as u32;
        let fat_sz = if fat_sz16 != 0 {
            fat_sz16
        } else {
            le32(img, BPB_FAT_SZ32)
        };
        if tot_sec == 0 || fat_sz == 0 {
            return Err(Errno::EINVAL);
        }

        let mut hdr = Self {
            bytes_per_sec,
            sec_per_clus,
            rsvd_sec_cnt,
            num_fats,
            root_ent_cnt,
            tot_sec,
            fat_sz,
            root_cluster: 0,
            kind: FatKind::Fat12,
            cluster_count: 0,
        };

        let data_sec = tot_sec
            .checked_sub(hdr.first_data_sector())
            .ok_or(Errno::EINVAL)?;
        hdr.cluster_count = data_sec / sec_per_clus as u32;

        // Type detection by cluster count, per the FAT specification.
        hdr.kind = if hdr.cluster_count < 4085 {
            FatKind::Fat12
        } else if hdr.cluster_count < 65525 {
            FatKind::Fat16
        } else {
            FatKind::Fat32
        };
        if hdr.kind == FatKind::Fat32 {
            hdr.root_cluster = le32(img, BPB_ROOT_CLUS);
        }

        // The whole volume must be backed by the RAM image.
        let vol_bytes = tot_sec as usize * bytes_per_sec as usize;
        if vol_bytes > img.len() {
            return Err(Errno::EINVAL);
        }

        Ok(hdr)
    }

    /// Allocation-unit size in bytes.
    pub fn cluster_size(&self) -> u32 {
        self.sec_per_clus as u32 * self.bytes_per_sec as u32
    }

    /// Sectors occupied by the flat FAT12/16 root directory region.
    pub fn root_dir_sectors(&self) -> u32 {
        let bps = self.bytes_per_sec as u32;
        (self.root_ent_cnt as u32 * DIRENT_SIZE as u32 + bps - 1) / bps
    }

    /// First sector of the data region (cluster 2).
    pub fn first_data_sector(&self) -> u32 {
        self.rsvd_sec_cnt as u32 + self.num_fats as u32 * self.fat_sz + self.root_dir_sectors()
    }

    /// Byte offset of the first FAT.
    pub fn fat_offset(&self) -> usize {
        self.rsvd_sec_cnt as usize * self.bytes_per_sec as usize
    }

    /// Byte offset of the FAT12/16 root directory region.
    pub fn root_region_offset(&self) -> usize {
        (self.rsvd_sec_cnt as u32 + self.num_fats as u32 * self.fat_sz) as usize
            * self.bytes_per_sec as usize
    }

    /// Byte offset of data cluster `c` (c >= 2).
    pub fn cluster_offset(&self, c: u32) -> usize {
        debug_assert!(c >= 2);
        (self.first_data_sector() + (c - 2) * self.sec_per_clus as u32) as usize
            * self.bytes_per_sec as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_bpb(tot_sec: u32, fat_sz16: u16, root_ents: u16, spc: u8) -> alloc::vec::Vec<u8> {
        let mut img = alloc::vec![0u8; 1024];
        img[BPB_BYTS_PER_SEC..BPB_BYTS_PER_SEC + 2].copy_from_slice(&512u16.to_le_bytes());
        img[BPB_SEC_PER_CLUS] = spc;
        img[BPB_RSVD_SEC_CNT..BPB_RSVD_SEC_CNT + 2].copy_from_slice(&1u16.to_le_bytes());
        img[BPB_NUM_FATS] = 1;
        img[BPB_ROOT_ENT_CNT..BPB_ROOT_ENT_CNT + 2].copy_from_slice(&root_ents.to_le_bytes());
        img[BPB_FAT_SZ16..BPB_FAT_SZ16 + 2].copy_from_slice(&fat_sz16.to_le_bytes());
        if tot_sec <= u16::MAX as u32 {
            img[BPB_TOT_SEC16..BPB_TOT_SEC16 + 2]
                .copy_from_slice(&(tot_sec as u16).to_le_bytes());
        } else {
            img[BPB_TOT_SEC32..BPB_TOT_SEC32 + 4].copy_from_slice(&tot_sec.to_le_bytes());
        }
        img[BOOT_SIG_OFF..BOOT_SIG_OFF + 2].copy_from_slice(&BOOT_SIG.to_le_bytes());
        let vol = tot_sec as usize * 512;
        if img.len() < vol {
            img.resize(vol, 0);
        }
        img
    }

    #[test]
    fn test_rejects_missing_signature() {
        let mut img = minimal_bpb(64, 1, 16, 1);
        img[BOOT_SIG_OFF] = 0;
        assert_eq!(FatHeader::parse(&img).err(), Some(Errno::EINVAL));
    }

    #[test]
    fn test_kind_detection_by_cluster_count() {
        // 64 data sectors, 1 sec/cluster: tiny, FAT12.
        let img = minimal_bpb(64, 1, 16, 1);
        let h = FatHeader::parse(&img).unwrap();
        assert_eq!(h.kind, FatKind::Fat12);
        // root dir: 16 entries = 1 sector; data = 64 - (1 + 1 + 1) = 61
        assert_eq!(h.cluster_count, 61);
        assert_eq!(h.cluster_size(), 512);

        // Enough clusters for FAT16.
        let img = minimal_bpb(4085 + 20, 17, 16, 1);
        let h = FatHeader::parse(&img).unwrap();
        assert_eq!(h.kind, FatKind::Fat16);
    }

    #[test]
    fn test_geometry_offsets() {
        let img = minimal_bpb(64, 1, 16, 1);
        let h = FatHeader::parse(&img).unwrap();
        assert_eq!(h.fat_offset(), 512);
        assert_eq!(h.root_region_offset(), 1024);
        assert_eq!(h.first_data_sector(), 3);
        assert_eq!(h.cluster_offset(2), 3 * 512);
        assert_eq!(h.cluster_offset(3), 4 * 512);
    }

    #[test]
    fn test_rejects_truncated_volume() {
        let mut img = minimal_bpb(64, 1, 16, 1);
        img.truncate(2048);
        assert!(FatHeader::parse(&img).is_err());
    }
}
