//! Read-only FAT32 access to an SD card image.
//!
//! Only what the bridge needs: geometry, FAT entries, 8.3 directory entries
//! and path lookup. Long file name entries are skipped, so paths use the
//! short names.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use fpga_bridge_core::protocol::SECTOR_SIZE;
use fpga_bridge_hal::{DirEntry, ImageFile, ImageFs, Volume};

use crate::error::{Result, SimError};

const FIRST_DATA_CLUSTER: u32 = 2;
const ENTRY_SIZE: usize = 32;
const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;

const ATTR_HIDDEN: u8 = 0x02;
const ATTR_SYSTEM: u8 = 0x04;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LONG_NAME: u8 = 0x0F;

/// NT reserved byte flags: base name / extension stored in lower case.
const NT_LOWER_BASE: u8 = 0x08;
const NT_LOWER_EXT: u8 = 0x10;

fn le_u16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

fn le_u32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

/// Read one 512 byte sector of a card image.
pub fn read_card_sector<D: Read + Seek>(
    dev: &mut D,
    lba: u64,
    buf: &mut [u8; SECTOR_SIZE],
) -> Result<()> {
    dev.seek(SeekFrom::Start(lba * SECTOR_SIZE as u64))?;
    dev.read_exact(buf)?;
    Ok(())
}

/// Geometry from the boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub partition_start: u32,
    pub sectors_per_cluster: u32,
    pub fat_start: u32,
    pub data_start: u32,
    pub root_cluster: u32,
    /// Highest cluster number + 1.
    pub fat_entries: u32,
}

impl Geometry {
    /// Parse the BPB of a FAT32 volume starting at `partition_start`.
    fn parse(boot: &[u8; SECTOR_SIZE], partition_start: u32) -> Result<Self> {
        if boot[510] != 0x55 || boot[511] != 0xAA {
            return Err(SimError::InvalidVolume("missing boot signature"));
        }

        let bytes_per_sector = le_u16(&boot[11..13]);
        let sectors_per_cluster = boot[13];
        let reserved_sectors = le_u16(&boot[14..16]);
        let num_fats = boot[16];
        let root_entry_count = le_u16(&boot[17..19]);
        let total_sectors_16 = le_u16(&boot[19..21]);
        let fat_size_16 = le_u16(&boot[22..24]);
        let total_sectors_32 = le_u32(&boot[32..36]);
        let fat_size_32 = le_u32(&boot[36..40]);
        let root_cluster = le_u32(&boot[44..48]);

        if usize::from(bytes_per_sector) != SECTOR_SIZE {
            return Err(SimError::InvalidVolume("sector size is not 512"));
        }
        if root_entry_count != 0 || fat_size_16 != 0 || fat_size_32 == 0 {
            return Err(SimError::InvalidVolume("FAT12/16 volume"));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(SimError::InvalidVolume("bad sectors per cluster"));
        }
        if reserved_sectors == 0 || num_fats == 0 || root_cluster < FIRST_DATA_CLUSTER {
            return Err(SimError::InvalidVolume("bad BPB"));
        }

        let total_sectors = if total_sectors_16 != 0 {
            u32::from(total_sectors_16)
        } else {
            total_sectors_32
        };
        let spc = u32::from(sectors_per_cluster);
        let fat_start = partition_start + u32::from(reserved_sectors);
        let data_offset = u32::from(reserved_sectors) + u32::from(num_fats) * fat_size_32;
        let clusters = total_sectors
            .checked_sub(data_offset)
            .ok_or(SimError::InvalidVolume("data region outside volume"))?
            / spc;
        // A FAT sector holds 128 entries; never trust more than fit.
        let fat_entries = (clusters + FIRST_DATA_CLUSTER).min(fat_size_32.saturating_mul(128));

        Ok(Self {
            partition_start,
            sectors_per_cluster: spc,
            fat_start,
            data_start: partition_start + data_offset,
            root_cluster,
            fat_entries,
        })
    }

    pub fn cluster_sector(&self, cluster: u32) -> u64 {
        u64::from(self.data_start)
            + u64::from(cluster - FIRST_DATA_CLUSTER) * u64::from(self.sectors_per_cluster)
    }

    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        (FIRST_DATA_CLUSTER..self.fat_entries).contains(&cluster)
    }
}

/// A short directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatEntry {
    pub name: String,
    pub attr: u8,
    pub first_cluster: u32,
    pub size: u32,
}

impl FatEntry {
    fn parse(raw: &[u8]) -> Self {
        let nt = raw[12];
        let mut base = trim_name(&raw[0..8]);
        if base.starts_with('\u{5}') {
            base.replace_range(..1, "\u{E5}");
        }
        if nt & NT_LOWER_BASE != 0 {
            base.make_ascii_lowercase();
        }
        let mut ext = trim_name(&raw[8..11]);
        if nt & NT_LOWER_EXT != 0 {
            ext.make_ascii_lowercase();
        }
        let name = if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        };

        let hi = u32::from(le_u16(&raw[20..22]));
        let lo = u32::from(le_u16(&raw[26..28]));
        Self {
            name,
            attr: raw[11],
            first_cluster: (hi << 16) | lo,
            size: le_u32(&raw[28..32]),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.attr & (ATTR_HIDDEN | ATTR_SYSTEM) != 0
    }
}

fn trim_name(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    bytes[..end].iter().map(|&b| char::from(b)).collect()
}

/// An open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatFile {
    pub size: u32,
    pub first_cluster: u32,
}

impl ImageFile for FatFile {
    fn size(&self) -> u32 {
        self.size
    }

    fn first_cluster(&self) -> u32 {
        self.first_cluster
    }
}

/// A FAT32 volume inside a card image.
pub struct FatVolume<D = File> {
    dev: D,
    geometry: Geometry,
}

impl FatVolume<File> {
    /// Open a card image file.
    pub fn open_image(path: &Path) -> Result<Self> {
        Self::mount(File::open(path)?)
    }
}

impl<D: Read + Seek> FatVolume<D> {
    /// Find the volume: either sector 0 is the boot sector, or the first MBR
    /// partition is a FAT32 partition.
    pub fn mount(mut dev: D) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        read_card_sector(&mut dev, 0, &mut sector)?;
        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(SimError::InvalidVolume("missing boot signature"));
        }

        let bps = le_u16(&sector[11..13]);
        let part_type = sector[446 + 4];
        let is_vbr = matches!(bps, 512 | 1024 | 2048 | 4096);
        let partition_start = if !is_vbr && matches!(part_type, 0x0B | 0x0C) {
            let start = le_u32(&sector[446 + 8..446 + 12]);
            read_card_sector(&mut dev, u64::from(start), &mut sector)?;
            start
        } else {
            0
        };

        let geometry = Geometry::parse(&sector, partition_start)?;
        log::info!(
            "FAT32 volume at sector {}: {} sectors/cluster, data at {}, {} FAT entries",
            geometry.partition_start,
            geometry.sectors_per_cluster,
            geometry.data_start,
            geometry.fat_entries
        );
        Ok(Self { dev, geometry })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        read_card_sector(&mut self.dev, lba, buf)
    }

    /// Raw FAT entry of `cluster`.
    pub fn fat_entry(&mut self, cluster: u32) -> Result<u32> {
        if cluster >= self.geometry.fat_entries {
            return Err(SimError::BadCluster(cluster));
        }
        let offset = cluster * 4;
        let lba = self.geometry.fat_start + offset / SECTOR_SIZE as u32;
        let at = (offset % SECTOR_SIZE as u32) as usize;
        let mut sector = [0u8; SECTOR_SIZE];
        self.read_sector(u64::from(lba), &mut sector)?;
        Ok(le_u32(&sector[at..at + 4]) & FAT_ENTRY_MASK)
    }

    /// Visit the entries of the directory starting at `cluster` until `visit`
    /// returns `false` or the directory ends.
    pub fn scan_dir<V>(&mut self, cluster: u32, mut visit: V) -> Result<()>
    where
        V: FnMut(FatEntry) -> bool,
    {
        let mut cluster = cluster;
        let mut budget = self.geometry.fat_entries;
        let mut sector = [0u8; SECTOR_SIZE];

        while self.geometry.is_data_cluster(cluster) && budget > 0 {
            budget -= 1;
            let lba = self.geometry.cluster_sector(cluster);
            for s in 0..u64::from(self.geometry.sectors_per_cluster) {
                self.read_sector(lba + s, &mut sector)?;
                for raw in sector.chunks_exact(ENTRY_SIZE) {
                    match raw[0] {
                        0x00 => return Ok(()),
                        0xE5 => continue,
                        _ => {}
                    }
                    let attr = raw[11];
                    if attr & ATTR_LONG_NAME == ATTR_LONG_NAME || attr & ATTR_VOLUME_ID != 0 {
                        continue;
                    }
                    if !visit(FatEntry::parse(raw)) {
                        return Ok(());
                    }
                }
            }
            cluster = self.fat_entry(cluster)?;
        }
        Ok(())
    }

    /// Look up `name` in the directory at `cluster`, ignoring case.
    pub fn find(&mut self, cluster: u32, name: &str) -> Result<Option<FatEntry>> {
        let mut found = None;
        self.scan_dir(cluster, |entry| {
            if entry.name.eq_ignore_ascii_case(name) {
                found = Some(entry);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    /// Resolve a `/`-separated path. The empty path and `/` are the root.
    ///
    /// Returns the directory entry, `None` for the root.
    pub fn lookup(&mut self, path: &str) -> Result<Option<FatEntry>> {
        let mut dir = self.geometry.root_cluster;
        let mut current: Option<FatEntry> = None;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if current.as_ref().is_some_and(|e| !e.is_dir()) {
                return Err(SimError::NotADirectory(path.to_string()));
            }
            let entry = self
                .find(dir, part)?
                .ok_or_else(|| SimError::NotFound(path.to_string()))?;
            // ".." back to the root is stored as cluster 0.
            dir = if entry.first_cluster == 0 {
                self.geometry.root_cluster
            } else {
                entry.first_cluster
            };
            current = Some(entry);
        }
        Ok(current)
    }

    fn dir_cluster(&mut self, path: &str) -> Result<u32> {
        match self.lookup(path)? {
            None => Ok(self.geometry.root_cluster),
            Some(entry) if !entry.is_dir() => Err(SimError::NotADirectory(path.to_string())),
            Some(entry) if entry.first_cluster == 0 => Ok(self.geometry.root_cluster),
            Some(entry) => Ok(entry.first_cluster),
        }
    }
}

impl<D: Read + Seek> ImageFs for FatVolume<D> {
    type File = FatFile;
    type Error = SimError;

    fn open(&mut self, path: &str) -> Result<FatFile> {
        match self.lookup(path)? {
            Some(entry) if !entry.is_dir() => Ok(FatFile {
                size: entry.size,
                first_cluster: entry.first_cluster,
            }),
            _ => Err(SimError::IsADirectory(path.to_string())),
        }
    }

    fn volume(&self) -> Volume {
        Volume {
            data_start: self.geometry.data_start,
            sectors_per_cluster: self.geometry.sectors_per_cluster,
            fat_entries: self.geometry.fat_entries,
        }
    }

    fn next_cluster(&mut self, cluster: u32) -> Result<u32> {
        self.fat_entry(cluster)
    }

    fn read_dir(&mut self, path: &str, visit: &mut dyn FnMut(DirEntry<'_>)) -> Result<()> {
        let cluster = self.dir_cluster(path)?;
        self.scan_dir(cluster, |entry| {
            visit(DirEntry {
                name: &entry.name,
                size: entry.size,
                is_dir: entry.is_dir(),
                hidden: entry.is_hidden(),
            });
            true
        })
    }
}
