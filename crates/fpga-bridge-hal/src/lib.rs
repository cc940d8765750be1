#![cfg_attr(not(feature = "std"), no_std)]

//! Platform seams for the FPGA bridge.
//!
//! Everything the bridge consumes from the board, the realtime kernel or the
//! filesystem driver is expressed here as a trait, so the core logic can run
//! on the MCU and on a PC host alike.

pub mod spi;

#[cfg(feature = "std")]
pub mod host;

pub use spi::{EmbeddedSpi, EmbeddedSpiError};

/// Raw byte access to the shared SPI bus.
///
/// Implementations only drive the wires. Framing and exclusive ownership of
/// the bus are handled one level up by the bridge core.
pub trait SpiPort {
    type Error: core::fmt::Debug;

    /// Assert chip select.
    fn select(&mut self) -> Result<(), Self::Error>;

    /// Deassert chip select.
    fn deselect(&mut self) -> Result<(), Self::Error>;

    /// Clock one byte out and return the byte clocked in at the same time.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error>;
}

/// Mutex primitive supplied by the realtime kernel.
///
/// `lock` blocks the calling task until the lock is available. There is no
/// timeout.
///
/// # Safety
///
/// Implementations must guarantee mutual exclusion: between a `lock` call
/// returning and the matching `unlock`, no other caller's `lock` may return.
pub unsafe trait RawLock {
    /// Acquire the lock, blocking forever if needed.
    fn lock(&self);

    /// Release the lock.
    ///
    /// # Safety
    ///
    /// Must only be called by the holder of the lock.
    unsafe fn unlock(&self);
}

/// The FPGA interrupt request line.
///
/// The interrupt handler only masks the line and posts a notification; all
/// bus traffic happens in task context after `wait` returns.
pub trait IrqLine {
    /// Block until the line has been signalled.
    ///
    /// With `Some(timeout_ms)` the wait gives up after the timeout, which is
    /// how the polling fallback is driven. Returns `true` if the line fired.
    fn wait(&mut self, timeout_ms: Option<u32>) -> bool;

    /// Unmask the line interrupt again.
    fn enable(&mut self);
}

/// Forced MCU reset, normally via the watchdog.
pub trait ResetControl {
    /// Arm the watchdog so the MCU resets shortly afterwards.
    fn force_reset(&mut self);
}

/// FAT volume geometry needed to turn a cluster into a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Volume {
    /// First sector of the data region (cluster 2).
    pub data_start: u32,
    /// Sectors per cluster.
    pub sectors_per_cluster: u32,
    /// Number of FAT entries, i.e. highest valid cluster number + 1.
    pub fat_entries: u32,
}

/// One entry produced while listing a directory.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    pub name: &'a str,
    pub size: u32,
    pub is_dir: bool,
    /// Hidden or system attribute set.
    pub hidden: bool,
}

/// An open file on the SD card.
pub trait ImageFile {
    /// File length in bytes.
    fn size(&self) -> u32;

    /// First cluster of the file's chain, 0 for an empty file.
    fn first_cluster(&self) -> u32;
}

/// The filesystem driver on the MCU side.
///
/// Only the primitives needed to locate a file's clusters are exposed. Cluster
/// chain walking and the link table live in the bridge core.
pub trait ImageFs {
    type File: ImageFile;
    type Error: core::fmt::Debug;

    /// Open an existing file for reading.
    fn open(&mut self, path: &str) -> Result<Self::File, Self::Error>;

    /// Geometry of the mounted volume.
    fn volume(&self) -> Volume;

    /// Look up the FAT entry for `cluster`.
    ///
    /// Returns the raw entry; values outside `2..fat_entries` mark the end of
    /// the chain.
    fn next_cluster(&mut self, cluster: u32) -> Result<u32, Self::Error>;

    /// Call `visit` for every entry of the directory at `path`.
    fn read_dir(
        &mut self,
        path: &str,
        visit: &mut dyn FnMut(DirEntry<'_>),
    ) -> Result<(), Self::Error>;
}
