//! Virtual drives backed by disk image files on the SD card.
//!
//! The FPGA core reads and writes the SD card itself. For every request it
//! only needs to know which physical sector holds a given sector of the
//! mounted image, which is what this module computes.

pub mod link;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;

use fpga_bridge_hal::{DirEntry, ImageFile, ImageFs, RawLock, SpiPort};

pub use link::{ClusterRun, LinkError, LinkTable};

use crate::bus::Bus;
use crate::config::{BridgeConfig, MAX_DRIVES};
use crate::error::BridgeError;
use crate::protocol::{SdcCommand, SECTOR_SIZE};

/// How an open image resolves clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMap {
    /// Fast path: the whole chain is in memory.
    Linked(LinkTable),
    /// The chain did not fit any allowed table; every lookup walks the FAT.
    ChainWalk,
}

/// A mounted image.
#[derive(Debug)]
pub struct OpenImage<Fl> {
    file: Fl,
    pub size: u32,
    pub first_cluster: u32,
    pub map: ClusterMap,
}

impl<Fl> OpenImage<Fl> {
    pub fn file(&self) -> &Fl {
        &self.file
    }
}

/// One virtual drive slot.
#[derive(Debug)]
pub struct DriveState<Fl> {
    pub image: Option<OpenImage<Fl>>,
    /// Name of the image last mounted or selected, for the menu.
    pub image_name: Option<String>,
    /// Directory the menu is browsing for this drive.
    pub cwd: String,
}

impl<Fl> Default for DriveState<Fl> {
    fn default() -> Self {
        Self {
            image: None,
            image_name: None,
            cwd: String::new(),
        }
    }
}

/// A directory entry as shown by the menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirItem {
    pub name: String,
    pub size: u32,
    pub is_dir: bool,
}

/// Errors from drive table operations that don't touch the bus.
#[derive(Debug, PartialEq, Eq)]
pub enum DriveError<E> {
    InvalidDrive(usize),
    Fs(E),
}

impl<E: core::fmt::Debug> DriveError<E> {
    pub fn into_bridge<T: core::fmt::Debug>(self) -> BridgeError<T, E> {
        match self {
            DriveError::InvalidDrive(d) => BridgeError::InvalidDrive(d),
            DriveError::Fs(e) => BridgeError::Filesystem(e),
        }
    }
}

/// The filesystem driver and all drive slots.
///
/// Drive slots are indexed 0..[`MAX_DRIVES`]: floppy A, floppy B, ACSI 0,
/// ACSI 1. The root directory of the card is the empty path; subdirectories
/// are `/NAME/...`.
pub struct Drives<F: ImageFs> {
    fs: F,
    drives: [DriveState<F::File>; MAX_DRIVES],
    link_table_runs: usize,
    link_table_max_runs: usize,
}

impl<F: ImageFs> Drives<F> {
    pub fn new(fs: F, config: &BridgeConfig) -> Self {
        Self {
            fs,
            drives: core::array::from_fn(|_| DriveState::default()),
            link_table_runs: config.link_table_runs,
            link_table_max_runs: config.link_table_max_runs,
        }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn drive(&self, drive: usize) -> Result<&DriveState<F::File>, DriveError<F::Error>> {
        self.drives.get(drive).ok_or(DriveError::InvalidDrive(drive))
    }

    fn drive_mut(
        &mut self,
        drive: usize,
    ) -> Result<&mut DriveState<F::File>, DriveError<F::Error>> {
        self.drives
            .get_mut(drive)
            .ok_or(DriveError::InvalidDrive(drive))
    }

    pub fn is_open(&self, drive: usize) -> bool {
        self.drives.get(drive).is_some_and(|d| d.image.is_some())
    }

    pub fn image_name(&self, drive: usize) -> Option<&str> {
        self.drives.get(drive)?.image_name.as_deref()
    }

    pub fn cwd(&self, drive: usize) -> Option<&str> {
        self.drives.get(drive).map(|d| d.cwd.as_str())
    }

    /// Remember an image to mount later, e.g. from saved settings.
    ///
    /// `path` is split into the browsing directory and the image name.
    pub fn set_default(&mut self, drive: usize, path: &str) -> Result<(), DriveError<F::Error>> {
        let state = self.drive_mut(drive)?;
        let (dir, name) = split_path(path);
        state.cwd = dir.to_string();
        state.image_name = (!name.is_empty()).then(|| name.to_string());
        Ok(())
    }

    /// Full path of the remembered or mounted image.
    pub fn image_path(&self, drive: usize) -> Option<String> {
        let state = self.drives.get(drive)?;
        let name = state.image_name.as_deref()?;
        Some(join(&state.cwd, name))
    }

    /// Close the drive's image and free its link table.
    ///
    /// Returns whether an image was mounted.
    pub fn eject(&mut self, drive: usize) -> Result<bool, DriveError<F::Error>> {
        let state = self.drive_mut(drive)?;
        state.image_name = None;
        Ok(match state.image.take() {
            Some(image) => {
                log::info!("drive {}: ejected {} byte image", drive, image.size);
                true
            }
            None => false,
        })
    }

    /// Open `name` (relative to the drive's directory unless it starts with
    /// `/`) as the drive's image and return its size.
    ///
    /// The previous image must have been ejected. A link table is built with
    /// the configured capacity, resized once to the exact requirement if that
    /// is within the allowed maximum. Otherwise the image is still mounted
    /// and lookups walk the FAT.
    pub fn open(&mut self, drive: usize, name: &str) -> Result<u32, DriveError<F::Error>> {
        let path = {
            let state = self.drive(drive)?;
            if name.starts_with('/') {
                name.to_string()
            } else {
                join(&state.cwd, name)
            }
        };

        let file = self.fs.open(&path).map_err(DriveError::Fs)?;
        let size = file.size();
        let first_cluster = file.first_cluster();
        let map = self.build_map(drive, first_cluster)?;

        log::info!(
            "drive {}: mounted {} ({} bytes, cluster {}, {})",
            drive,
            path,
            size,
            first_cluster,
            match &map {
                ClusterMap::Linked(table) => format!("{} runs", table.runs().len()),
                ClusterMap::ChainWalk => "chain walk".to_string(),
            }
        );

        let state = self.drive_mut(drive)?;
        state.image = Some(OpenImage {
            file,
            size,
            first_cluster,
            map,
        });
        let (dir, file_name) = split_path(&path);
        state.cwd = dir.to_string();
        state.image_name = Some(file_name.to_string());
        Ok(size)
    }

    fn build_map(
        &mut self,
        drive: usize,
        first_cluster: u32,
    ) -> Result<ClusterMap, DriveError<F::Error>> {
        let required = match link::build(&mut self.fs, first_cluster, self.link_table_runs) {
            Ok(table) => return Ok(ClusterMap::Linked(table)),
            Err(LinkError::Fs(e)) => return Err(DriveError::Fs(e)),
            Err(LinkError::TooSmall { required }) => required,
        };

        if required <= self.link_table_max_runs {
            match link::build(&mut self.fs, first_cluster, required) {
                Ok(table) => return Ok(ClusterMap::Linked(table)),
                Err(LinkError::Fs(e)) => return Err(DriveError::Fs(e)),
                Err(LinkError::TooSmall { .. }) => {}
            }
        }

        log::warn!(
            "drive {}: link table needs {} runs, falling back to chain walk",
            drive,
            required
        );
        Ok(ClusterMap::ChainWalk)
    }

    /// Physical SD sector holding sector `sector` of the drive's image.
    ///
    /// Returns `None` when no image is mounted. The lookup resolves the
    /// cluster of byte offset `(sector + 1) * 512`, clamped to the image
    /// size, and adds the sector's offset within a cluster. A cluster outside
    /// the volume yields sector 0.
    pub fn translate(
        &mut self,
        drive: usize,
        sector: u32,
    ) -> Result<Option<u32>, DriveError<F::Error>> {
        let volume = self.fs.volume();
        let state = self
            .drives
            .get(drive)
            .ok_or(DriveError::InvalidDrive(drive))?;
        let Some(image) = &state.image else {
            return Ok(None);
        };

        let spc = volume.sectors_per_cluster.max(1);
        let cluster_bytes = u64::from(spc) * SECTOR_SIZE as u64;
        let offset = ((u64::from(sector) + 1) * SECTOR_SIZE as u64).min(u64::from(image.size));

        let cluster = if offset == 0 {
            image.first_cluster
        } else {
            let index = ((offset - 1) / cluster_bytes) as u32;
            match &image.map {
                ClusterMap::Linked(table) => table.cluster_at(index).unwrap_or(0),
                ClusterMap::ChainWalk => {
                    let first = image.first_cluster;
                    link::walk(&mut self.fs, first, index).map_err(DriveError::Fs)?
                }
            }
        };

        let physical = match cluster.wrapping_sub(2) {
            c if c >= volume.fat_entries.saturating_sub(2) => 0,
            c => volume.data_start + spc * c + sector % spc,
        };
        log::trace!(
            "drive {}: sector {} -> cluster {} -> {}",
            drive,
            sector,
            cluster,
            physical
        );
        Ok(Some(physical))
    }

    /// List the drive's directory for the menu.
    ///
    /// `enter` moves into a subdirectory first, `..` moves up but never above
    /// the card root. Hidden and system entries are skipped. Directories come
    /// first, then names in case-insensitive order, with a `..` entry leading
    /// anywhere below the root. On error the directory is left unchanged.
    pub fn list_dir(
        &mut self,
        drive: usize,
        enter: Option<&str>,
    ) -> Result<Vec<DirItem>, DriveError<F::Error>> {
        let current = self.drive(drive)?.cwd.clone();
        let cwd = match enter {
            Some("..") => match current.rfind('/') {
                Some(pos) => current[..pos].to_string(),
                None => current,
            },
            Some(name) => join(&current, name),
            None => current,
        };

        let mut items = Vec::new();
        if !cwd.is_empty() {
            items.push(DirItem {
                name: "..".to_string(),
                size: 0,
                is_dir: true,
            });
        }

        let path = if cwd.is_empty() { "/" } else { cwd.as_str() };
        self.fs
            .read_dir(path, &mut |entry: DirEntry<'_>| {
                if entry.hidden || entry.name == "." || entry.name == ".." {
                    return;
                }
                items.push(DirItem {
                    name: entry.name.to_string(),
                    size: entry.size,
                    is_dir: entry.is_dir,
                });
            })
            .map_err(DriveError::Fs)?;

        items.sort_by(dir_order);
        self.drive_mut(drive)?.cwd = cwd;
        Ok(items)
    }
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir, name)
}

/// Directory and file name of a path.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

fn dir_order(a: &DirItem, b: &DirItem) -> Ordering {
    b.is_dir.cmp(&a.is_dir).then_with(|| {
        a.name
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.name.bytes().map(|c| c.to_ascii_lowercase()))
    })
}

/// Read one raw SD sector through the FPGA.
///
/// The FPGA answers 0 once the sector is ready; up to `timeout` polls are
/// made before giving up.
pub fn read_sector<R: RawLock, P: SpiPort>(
    bus: &Bus<R, P>,
    sector: u32,
    buf: &mut [u8; SECTOR_SIZE],
    timeout: u32,
) -> Result<(), BridgeError<P::Error>> {
    use crate::protocol::Command;

    let cmd = SdcCommand::McuRead(sector);
    let mut txn = bus.begin(cmd.target())?;
    txn.send(&cmd.encode())?;

    let mut polls = 0;
    while txn.send_recv(0x00)? != 0 {
        polls += 1;
        if polls >= timeout {
            log::warn!("sector {} not ready after {} polls", sector, polls);
            return Err(BridgeError::Timeout);
        }
    }

    txn.recv(buf)?;
    txn.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, is_dir: bool) -> DirItem {
        DirItem {
            name: name.to_string(),
            size: 0,
            is_dir,
        }
    }

    #[test]
    fn directories_sort_first_then_by_name() {
        let mut items = std::vec![
            item("zork.st", false),
            item("Games", true),
            item("apps", true),
            item("Alpha.st", false),
        ];
        items.sort_by(dir_order);
        let names: std::vec::Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["apps", "Games", "Alpha.st", "zork.st"]);
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "DISK.ST"), "/DISK.ST");
        assert_eq!(join("/GAMES", "DISK.ST"), "/GAMES/DISK.ST");
        assert_eq!(split_path("/GAMES/DISK.ST"), ("/GAMES", "DISK.ST"));
        assert_eq!(split_path("/DISK.ST"), ("", "DISK.ST"));
        assert_eq!(split_path("DISK.ST"), ("", "DISK.ST"));
    }
}
