//! Runtime configuration and fixed capacities.

/// Virtual drive slots: two floppies and two ACSI hard disks.
pub const MAX_DRIVES: usize = 4;

/// HID device slots, indexed by the host stack's class instance number.
pub const MAX_HID_DEVICES: usize = 4;

/// Joystick indices handed out to attached game controllers.
pub const MAX_JOYSTICKS: usize = 8;

/// How the IRQ task learns about pending FPGA events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqMode {
    /// Sleep until the IRQ line fires.
    Interrupt,
    /// No usable interrupt: fetch the pending mask every `interval_ms`.
    Polling { interval_ms: u32 },
}

impl IrqMode {
    pub const DEFAULT_POLL_INTERVAL_MS: u32 = 100;

    /// Timeout to pass to `IrqLine::wait`.
    pub fn wait_timeout(&self) -> Option<u32> {
        match *self {
            IrqMode::Interrupt => None,
            IrqMode::Polling { interval_ms } => Some(interval_ms),
        }
    }
}

/// Tunables for the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub irq_mode: IrqMode,
    /// Cluster runs the link table is first sized for.
    pub link_table_runs: usize,
    /// Largest link table the single resize may ask for.
    pub link_table_max_runs: usize,
    /// Ready polls before an MCU sector read gives up.
    pub mcu_read_timeout: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            irq_mode: IrqMode::Interrupt,
            link_table_runs: 8,
            link_table_max_runs: 1024,
            mcu_read_timeout: 100_000,
        }
    }
}
