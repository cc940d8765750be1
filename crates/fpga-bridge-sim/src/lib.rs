//! PC host for the FPGA bridge.
//!
//! Runs the platform-agnostic bridge against a simulated FPGA and a FAT32
//! SD card image, with host threads standing in for the kernel tasks.

pub mod demo;
pub mod error;
pub mod fat;
pub mod fpga;
pub mod kernel;
pub mod sim;

pub use error::{Result, SimError};
pub use fat::FatVolume;
pub use fpga::SimFpga;
pub use sim::{Options, Simulator};
