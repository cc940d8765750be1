use fpga_bridge_core::BridgeError;

/// Errors of the simulated host.
///
/// The same type serves as the SPI port error and the filesystem error, so a
/// bridge error flattens back into it.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// I/O error on the card image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The card image does not hold a usable FAT32 volume.
    #[error("not a FAT32 volume: {0}")]
    InvalidVolume(&'static str),

    /// A path component does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A cluster number outside the volume showed up in a chain.
    #[error("bad cluster {0}")]
    BadCluster(u32),

    /// The bridge talked to the far side outside the framing rules.
    #[error("bus protocol violation: {0}")]
    Bus(&'static str),

    /// SYS STATUS did not return the expected magic.
    #[error("no compatible core (status {0:02x?})")]
    NoCore([u8; 4]),

    #[error("invalid drive {0}")]
    InvalidDrive(usize),

    #[error("invalid HID slot {0}")]
    InvalidSlot(usize),

    /// A device descriptor could not be turned into a report plan.
    #[error("unsupported HID descriptor in slot {0}")]
    UnsupportedDevice(usize),

    #[error("timed out waiting for the far side")]
    Timeout,

    /// Command line value that failed to parse.
    #[error("invalid argument: {0}")]
    Argument(String),
}

impl From<BridgeError<SimError, SimError>> for SimError {
    fn from(e: BridgeError<SimError, SimError>) -> Self {
        match e {
            BridgeError::Transport(e) | BridgeError::Filesystem(e) => e,
            BridgeError::InvalidDrive(d) => SimError::InvalidDrive(d),
            BridgeError::InvalidSlot(s) => SimError::InvalidSlot(s),
            BridgeError::Timeout => SimError::Timeout,
        }
    }
}

impl From<BridgeError<SimError>> for SimError {
    fn from(e: BridgeError<SimError>) -> Self {
        match e {
            BridgeError::Transport(e) => e,
            BridgeError::Filesystem(never) => match never {},
            BridgeError::InvalidDrive(d) => SimError::InvalidDrive(d),
            BridgeError::InvalidSlot(s) => SimError::InvalidSlot(s),
            BridgeError::Timeout => SimError::Timeout,
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
