#![cfg_attr(not(test), no_std)]

//! Control-plane bridge between USB HID devices, an SD card and an FPGA core.
//!
//! The MCU talks to the FPGA over one shared SPI bus carrying several logical
//! targets. This crate holds the platform-agnostic parts:
//!
//! * [`bits`] and [`hid`]: report descriptor parsing and report decoding.
//! * [`protocol`] and [`bus`]: the wire commands and exclusive transactions.
//! * [`irq`]: pending-interrupt fetch and dispatch.
//! * [`sdc`]: virtual drives mapping image sectors to SD card sectors.
//! * [`Bridge`]: the context tying bus and drives together.

extern crate alloc;

pub mod bits;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod hid;
pub mod irq;
pub mod protocol;
pub mod sdc;
pub mod sync;
pub mod sys;

pub use bridge::Bridge;
pub use bus::{Bus, Transaction};
pub use config::{BridgeConfig, IrqMode};
pub use error::BridgeError;
pub use protocol::Target;
