//! The bridge context owning the bus and the drive table.

use fpga_bridge_hal::{ImageFs, RawLock, ResetControl, SpiPort};

use crate::bus::Bus;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::hid::host::poll_db9;
use crate::irq::Pending;
use crate::protocol::{SdcCommand, SdcStatus, SECTOR_SIZE};
use crate::sdc::{self, Drives};
use crate::sync::{Lock, LockGuard};
use crate::sys::{self, CoreStatus};

/// Error of a bridge operation for port `P` and filesystem `F`.
pub type Error<P, F> = BridgeError<<P as SpiPort>::Error, <F as ImageFs>::Error>;

/// A sector request served for the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectorRequest {
    pub drive: usize,
    pub sector: u32,
    pub physical: u32,
}

/// Shared state of the bridge.
///
/// The bus lock and the drive lock are never held at the same time: drive
/// operations finish and release their lock before any resulting bus
/// transaction starts.
pub struct Bridge<R: RawLock, P: SpiPort, F: ImageFs> {
    bus: Bus<R, P>,
    drives: Lock<R, Drives<F>>,
    config: BridgeConfig,
}

impl<R: RawLock, P: SpiPort, F: ImageFs> Bridge<R, P, F> {
    pub fn new(bus_lock: R, port: P, drive_lock: R, fs: F, config: BridgeConfig) -> Self {
        Self {
            bus: Bus::new(bus_lock, port),
            drives: Lock::new(drive_lock, Drives::new(fs, &config)),
            config,
        }
    }

    pub fn bus(&self) -> &Bus<R, P> {
        &self.bus
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Lock the drive table, e.g. for the menu to browse directories.
    ///
    /// No bus traffic may be started while the guard is alive.
    pub fn drives(&self) -> LockGuard<'_, R, Drives<F>> {
        self.drives.lock()
    }

    pub fn core_status(&self) -> Result<CoreStatus, P::Error> {
        sys::core_status(&self.bus)
    }

    /// Mount `name` on `drive`, or eject it with `None`.
    ///
    /// The core is told size 0 whenever a previous image goes away or the
    /// open fails, then the new size on success.
    pub fn open_image(&self, drive: usize, name: Option<&str>) -> Result<u32, Error<P, F>> {
        let (had_image, opened) = {
            let mut drives = self.drives.lock();
            let had_image = drives
                .eject(drive)
                .map_err(sdc::DriveError::into_bridge::<P::Error>)?;
            let opened = match name {
                Some(name) => drives.open(drive, name).map(Some),
                None => Ok(None),
            };
            (had_image, opened)
        };

        let opened = opened.map_err(|e| {
            log::warn!("drive {}: cannot open {:?}: {:?}", drive, name, e);
            e
        });

        let drive_byte = drive as u8;
        if had_image || !matches!(opened, Ok(Some(_))) {
            self.bus.send(&SdcCommand::Inserted {
                drive: drive_byte,
                size: 0,
            })?;
        }

        match opened.map_err(sdc::DriveError::into_bridge::<P::Error>)? {
            Some(size) => {
                self.bus.send(&SdcCommand::Inserted {
                    drive: drive_byte,
                    size,
                })?;
                Ok(size)
            }
            None => Ok(0),
        }
    }

    /// Physical sector for `sector` of the image on `drive`, `None` when the
    /// drive is empty.
    pub fn translate(&self, drive: usize, sector: u32) -> Result<Option<u32>, Error<P, F>> {
        self.drives
            .lock()
            .translate(drive, sector)
            .map_err(sdc::DriveError::into_bridge::<P::Error>)
    }

    /// Serve the core's pending sector request, if any.
    ///
    /// The requested sector is translated under the drive lock; the answer
    /// goes out after the lock is released. Requests for empty drives are
    /// not answered.
    pub fn handle_sd_request(&self) -> Result<Option<SectorRequest>, Error<P, F>> {
        let mut reply = [0u8; SdcStatus::LEN];
        self.bus.request(&SdcCommand::Status, &mut reply)?;
        let status = SdcStatus::from_bytes(&reply);

        let Some(drive) = status.requesting_drive() else {
            log::trace!("SD interrupt without request, status {:02x}", status.card);
            return Ok(None);
        };

        let Some(physical) = self.translate(drive, status.sector)? else {
            log::warn!(
                "drive {}: sector {} requested with no image mounted",
                drive,
                status.sector
            );
            return Ok(None);
        };

        log::debug!(
            "drive {}: request sector {} -> {}",
            drive,
            status.sector,
            physical
        );
        self.bus.send(&SdcCommand::CoreRw(physical))?;

        Ok(Some(SectorRequest {
            drive,
            sector: status.sector,
            physical,
        }))
    }

    /// Read a raw SD sector into `buf` through the FPGA.
    pub fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Error<P, F>> {
        sdc::read_sector(&self.bus, sector, buf, self.config.mcu_read_timeout).map_err(widen)
    }

    /// Read and acknowledge all pending interrupt sources.
    pub fn fetch_pending(&self) -> Result<Pending, P::Error> {
        sys::irq_ctrl(&self.bus, 0xFF).map(Pending)
    }

    /// Run the handler of each pending source.
    ///
    /// A reconfigured core resets the MCU so every piece of state is rebuilt
    /// against the new core. Unknown sources are ignored.
    pub fn dispatch<Z: ResetControl>(
        &self,
        pending: Pending,
        reset: &mut Z,
    ) -> Result<(), Error<P, F>> {
        if pending.sys() {
            log::warn!("core reconfigured, resetting");
            reset.force_reset();
        }
        if pending.hid() {
            poll_db9(&self.bus)?;
        }
        if pending.sdc() {
            self.handle_sd_request()?;
        }
        if pending.unknown() != 0 {
            log::trace!("ignoring IRQ sources {:02x}", pending.unknown());
        }
        Ok(())
    }

    /// Fetch, acknowledge and dispatch in one go.
    pub fn service_interrupts<Z: ResetControl>(
        &self,
        reset: &mut Z,
    ) -> Result<Pending, Error<P, F>> {
        let pending = self.fetch_pending()?;
        self.dispatch(pending, reset)?;
        Ok(pending)
    }

    pub fn into_parts(self) -> (P, Drives<F>) {
        (self.bus.into_port(), self.drives.into_inner())
    }
}

fn widen<T: core::fmt::Debug, F: core::fmt::Debug>(
    e: BridgeError<T, core::convert::Infallible>,
) -> BridgeError<T, F> {
    match e {
        BridgeError::Transport(e) => BridgeError::Transport(e),
        BridgeError::Filesystem(never) => match never {},
        BridgeError::InvalidDrive(d) => BridgeError::InvalidDrive(d),
        BridgeError::InvalidSlot(s) => BridgeError::InvalidSlot(s),
        BridgeError::Timeout => BridgeError::Timeout,
    }
}
