//! The bridge wired to the simulated far side.

use std::fs::File;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use fpga_bridge_core::hid::MenuEvent;
use fpga_bridge_core::irq::IrqTask;
use fpga_bridge_core::sys::CoreStatus;
use fpga_bridge_core::{Bridge, BridgeConfig, IrqMode};
use fpga_bridge_hal::host::BlockingLock;

use crate::demo;
use crate::error::{Result, SimError};
use crate::fat::FatVolume;
use crate::fpga::SimFpga;
use crate::kernel::{ChannelIrq, SimReset};

pub type SimBridge = Bridge<BlockingLock, SimFpga, FatVolume>;

/// Host side settings.
#[derive(Debug, Clone)]
pub struct Options {
    /// Core id the simulated FPGA reports.
    pub core_id: u8,
    /// Poll the pending mask at this interval instead of waiting on the IRQ.
    pub poll_ms: Option<u32>,
    pub link_table_runs: usize,
    /// How long a sector request may take to be answered.
    pub answer_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            core_id: 1,
            poll_ms: None,
            link_table_runs: BridgeConfig::default().link_table_runs,
            answer_timeout: Duration::from_secs(2),
        }
    }
}

impl Options {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            irq_mode: match self.poll_ms {
                Some(interval_ms) => IrqMode::Polling { interval_ms },
                None => IrqMode::Interrupt,
            },
            link_table_runs: self.link_table_runs,
            ..BridgeConfig::default()
        }
    }
}

/// A running bridge plus handles on the far side.
pub struct Simulator {
    bridge: Arc<SimBridge>,
    fpga: SimFpga,
    reset: SimReset,
    line: Option<ChannelIrq>,
    core: CoreStatus,
    answer_timeout: Duration,
}

impl Simulator {
    /// Mount the card image and probe the simulated core.
    pub fn new(image: &Path, options: &Options) -> Result<Self> {
        let fs = FatVolume::open_image(image)?;
        let (tx, rx) = mpsc::channel();
        let fpga = SimFpga::new(options.core_id)
            .with_card(File::open(image)?)
            .with_irq(tx);

        let bridge = Bridge::new(
            BlockingLock::new(),
            fpga.clone(),
            BlockingLock::new(),
            fs,
            options.bridge_config(),
        );
        let core = bridge.core_status()?;
        if !core.is_valid() {
            return Err(SimError::NoCore([
                core.magic[0],
                core.magic[1],
                core.core_id,
                core.coldboot,
            ]));
        }

        Ok(Self {
            bridge: Arc::new(bridge),
            fpga,
            reset: SimReset::new(),
            line: Some(ChannelIrq::new(rx)),
            core,
            answer_timeout: options.answer_timeout,
        })
    }

    pub fn bridge(&self) -> &SimBridge {
        &self.bridge
    }

    pub fn fpga(&self) -> &SimFpga {
        &self.fpga
    }

    pub fn core(&self) -> CoreStatus {
        self.core
    }

    /// MCU resets requested so far.
    pub fn resets(&self) -> usize {
        self.reset.count()
    }

    /// Mount `path` on `drive` and return the image size.
    pub fn mount(&self, drive: usize, path: &str) -> Result<u32> {
        Ok(self.bridge.open_image(drive, Some(path))?)
    }

    pub fn eject(&self, drive: usize) -> Result<()> {
        self.bridge.open_image(drive, None)?;
        Ok(())
    }

    /// Start the IRQ task on its own thread. It runs until the process ends.
    pub fn start_irq_task(&mut self) -> Result<()> {
        let Some(line) = self.line.take() else {
            return Ok(());
        };
        let bridge = Arc::clone(&self.bridge);
        let reset = self.reset.clone();
        thread::Builder::new()
            .name("irq".to_string())
            .spawn(move || {
                IrqTask::new(&*bridge, line, reset).run();
            })?;
        log::info!("IRQ task started ({:?})", self.bridge.config().irq_mode);
        Ok(())
    }

    /// Let the core request `sector` of `drive` and wait for the physical
    /// sector the bridge answers with.
    ///
    /// Needs the IRQ task; requests for empty drives time out.
    pub fn request_sector(&self, drive: usize, sector: u32) -> Result<u32> {
        self.fpga.request_sector(drive, sector);
        self.fpga
            .wait_answer(self.answer_timeout)
            .ok_or(SimError::Timeout)
    }

    /// Replay the scripted HID session.
    pub fn demo_hid(&self) -> Result<Vec<MenuEvent>> {
        demo::run(self.bridge.bus())
    }
}
