//! Builds small FAT32 card images for the host tests.
//!
//! One sector per cluster keeps images tiny; cluster `c` is filled with the
//! byte `c as u8` so reads can be checked.

#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

pub const RESERVED: u32 = 32;
pub const FAT_SECTORS: u32 = 2;
pub const CLUSTERS: u32 = 200;
pub const DATA_START: u32 = RESERVED + FAT_SECTORS;
pub const ROOT: u32 = 2;
pub const TOTAL_SECTORS: u32 = DATA_START + CLUSTERS;
const EOC: u32 = 0x0FFF_FFFF;

/// `DISK_A.ST` in the root of [`FatImage::card`].
pub const DISK_A: [u32; 3] = [3, 4, 5];
/// `/GAMES/DISK_B.ST`, fragmented.
pub const DISK_B: [u32; 6] = [10, 11, 40, 41, 42, 90];
pub const DISK_B_SIZE: u32 = 6 * 512 - 100;
pub const GAMES: u32 = 6;

/// Card sector of the first sector of `cluster`, without partition offset.
pub fn cluster_sector(cluster: u32) -> u32 {
    DATA_START + cluster - 2
}

pub struct FatImage {
    bytes: Vec<u8>,
}

impl FatImage {
    pub fn new() -> Self {
        let mut img = Self {
            bytes: vec![0; TOTAL_SECTORS as usize * 512],
        };
        let boot = &mut img.bytes[..512];
        boot[..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
        boot[16] = 1;
        boot[21] = 0xF8;
        boot[32..36].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
        boot[36..40].copy_from_slice(&FAT_SECTORS.to_le_bytes());
        boot[44..48].copy_from_slice(&ROOT.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;

        img.set_fat(0, 0x0FFF_FFF8);
        img.set_fat(1, EOC);
        img.set_fat(ROOT, EOC);
        img
    }

    fn set_fat(&mut self, cluster: u32, value: u32) {
        let at = (RESERVED * 512 + cluster * 4) as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn cluster_mut(&mut self, cluster: u32) -> &mut [u8] {
        let at = cluster_sector(cluster) as usize * 512;
        &mut self.bytes[at..at + 512]
    }

    /// Append a raw entry to a one-cluster directory.
    pub fn add_raw(&mut self, dir: u32, raw: [u8; 32]) {
        let data = self.cluster_mut(dir);
        let slot = data
            .chunks_exact_mut(32)
            .find(|e| e[0] == 0)
            .expect("directory full");
        slot.copy_from_slice(&raw);
    }

    pub fn mkdir(&mut self, parent: u32, name: &[u8; 11], attr: u8, cluster: u32) {
        self.set_fat(cluster, EOC);
        self.add_raw(cluster, entry(b".          ", 0x10, 0, cluster, 0));
        let up = if parent == ROOT { 0 } else { parent };
        self.add_raw(cluster, entry(b"..         ", 0x10, 0, up, 0));
        self.add_raw(parent, entry(name, 0x10 | attr, 0, cluster, 0));
    }

    pub fn add_file(&mut self, dir: u32, name: &[u8; 11], nt: u8, clusters: &[u32], size: u32) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        for &c in clusters {
            self.cluster_mut(c).fill(c as u8);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, EOC);
        }
        let first = clusters.first().copied().unwrap_or(0);
        self.add_raw(dir, entry(name, 0x20, nt, first, size));
    }

    /// The standard test card:
    ///
    /// * volume label, a long name entry and a deleted entry in the root
    /// * `/DISK_A.ST`, `/GAMES/DISK_B.ST`, `/GAMES/zeta.st` (empty)
    /// * `/SYSTEM~1`: system directory
    pub fn card() -> Self {
        let mut img = Self::new();
        img.add_raw(ROOT, entry(b"CARD       ", 0x08, 0, 0, 0));
        let mut lfn = entry(b"Adisk_a.st ", 0x0F, 0, 0, 0);
        lfn[0] = 0x41;
        img.add_raw(ROOT, lfn);
        img.add_file(ROOT, b"DISK_A  ST ", 0, &DISK_A, 3 * 512);
        let mut deleted = entry(b"OLD     ST ", 0x20, 0, 0, 0);
        deleted[0] = 0xE5;
        img.add_raw(ROOT, deleted);
        img.mkdir(ROOT, b"GAMES      ", 0, GAMES);
        img.mkdir(ROOT, b"SYSTEM~1   ", 0x04, 7);
        img.add_file(GAMES, b"DISK_B  ST ", 0, &DISK_B, DISK_B_SIZE);
        img.add_file(GAMES, b"ZETA    ST ", 0x18, &[], 0);
        img
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The image behind an MBR whose first partition starts at `start`.
    pub fn partitioned(&self, start: u32) -> Vec<u8> {
        let mut out = vec![0u8; start as usize * 512];
        let entry = &mut out[446..462];
        entry[4] = 0x0C;
        entry[8..12].copy_from_slice(&start.to_le_bytes());
        entry[12..16].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
        out[510] = 0x55;
        out[511] = 0xAA;
        out.extend_from_slice(&self.bytes);
        out
    }
}

pub fn entry(name: &[u8; 11], attr: u8, nt: u8, cluster: u32, size: u32) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[..11].copy_from_slice(name);
    raw[11] = attr;
    raw[12] = nt;
    raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    raw
}

/// Write `bytes` to a temporary image file.
pub fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp image");
    file.write_all(bytes).expect("write temp image");
    file.flush().expect("flush temp image");
    file
}

/// The standard card as a temporary file.
pub fn card_file() -> NamedTempFile {
    write_image(FatImage::card().bytes())
}
