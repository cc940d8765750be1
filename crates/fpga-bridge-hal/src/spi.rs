//! `SpiPort` on top of `embedded-hal` 1.0 bus and pin traits.
//!
//! Chip select is driven manually so that a single CS assertion spans a whole
//! bridge transaction, however many bytes it exchanges.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::SpiPort;

/// Error from either the SPI peripheral or the chip-select pin.
#[derive(Debug)]
pub enum EmbeddedSpiError<S, P> {
    Spi(S),
    Pin(P),
}

/// An `embedded-hal` SPI bus plus a GPIO used as active-low chip select.
pub struct EmbeddedSpi<SPI, CS> {
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> EmbeddedSpi<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Wrap a configured bus. The CS pin is driven high (idle) immediately.
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, EmbeddedSpiError<SPI::Error, CS::Error>> {
        cs.set_high().map_err(EmbeddedSpiError::Pin)?;
        Ok(Self { spi, cs })
    }

    /// Give the bus and pin back.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> SpiPort for EmbeddedSpi<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    type Error = EmbeddedSpiError<SPI::Error, CS::Error>;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(EmbeddedSpiError::Pin)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        // The last byte must be fully clocked out before CS rises.
        self.spi.flush().map_err(EmbeddedSpiError::Spi)?;
        self.cs.set_high().map_err(EmbeddedSpiError::Pin)
    }

    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(EmbeddedSpiError::Spi)?;
        Ok(buf[0])
    }
}
