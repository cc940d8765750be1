//! Mock collaborators shared by the integration tests.
//!
//! `MockPort` records every chip-select framed transaction and answers from
//! per-command reply scripts. `MemFs` is a tiny in-memory FAT volume.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fpga_bridge_core::protocol::Target;
use fpga_bridge_core::{Bridge, BridgeConfig};
use fpga_bridge_hal::host::BlockingLock;
use fpga_bridge_hal::{DirEntry, ImageFile, ImageFs, ResetControl, SpiPort, Volume};

// ============================================================================
// SPI port
// ============================================================================

#[derive(Default)]
struct PortState {
    transactions: Vec<Vec<u8>>,
    current: Option<Vec<u8>>,
    /// MISO stream per (target, opcode), aligned with the whole transaction.
    replies: HashMap<(u8, u8), Vec<u8>>,
}

#[derive(Debug)]
pub struct MockError;

/// SPI port that records transactions. Clones share the same log.
#[derive(Clone, Default)]
pub struct MockPort {
    state: Arc<Mutex<PortState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the bytes clocked in during every `target`/`opcode`
    /// transaction, starting with the target byte.
    pub fn reply(&self, target: Target, opcode: u8, miso: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert((target as u8, opcode), miso.to_vec());
    }

    /// Completed transactions, target byte first.
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().transactions.clone()
    }

    /// Completed transactions addressed to `target`, without the target byte.
    pub fn frames(&self, target: Target) -> Vec<Vec<u8>> {
        self.transactions()
            .into_iter()
            .filter(|t| t.first() == Some(&(target as u8)))
            .map(|t| t[1..].to_vec())
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().transactions.clear();
    }

    pub fn is_selected(&self) -> bool {
        self.state.lock().unwrap().current.is_some()
    }
}

impl SpiPort for MockPort {
    type Error = MockError;

    fn select(&mut self) -> Result<(), MockError> {
        let mut state = self.state.lock().unwrap();
        assert!(state.current.is_none(), "chip select asserted twice");
        state.current = Some(Vec::new());
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), MockError> {
        let mut state = self.state.lock().unwrap();
        let txn = state.current.take().expect("deselect without select");
        state.transactions.push(txn);
        Ok(())
    }

    fn exchange(&mut self, byte: u8) -> Result<u8, MockError> {
        let mut state = self.state.lock().unwrap();
        let txn = state.current.as_mut().expect("exchange outside a transaction");
        let index = txn.len();
        txn.push(byte);
        if index < 2 {
            return Ok(0);
        }
        let key = (txn[0], txn[1]);
        Ok(state
            .replies
            .get(&key)
            .and_then(|miso| miso.get(index).copied())
            .unwrap_or(0))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

pub const DATA_START: u32 = 1000;
pub const SECTORS_PER_CLUSTER: u32 = 4;
pub const FAT_ENTRIES: u32 = 64;
pub const CLUSTER_BYTES: u32 = SECTORS_PER_CLUSTER * 512;
const EOC: u32 = 0x0FFF_FFFF;

#[derive(Debug, Clone)]
struct MemEntry {
    dir: String,
    name: String,
    size: u32,
    first_cluster: u32,
    is_dir: bool,
    hidden: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MemFile {
    size: u32,
    first_cluster: u32,
}

impl ImageFile for MemFile {
    fn size(&self) -> u32 {
        self.size
    }

    fn first_cluster(&self) -> u32 {
        self.first_cluster
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    BadCluster(u32),
}

/// In-memory FAT volume. Directories are named `""` (root) or `/NAME`.
#[derive(Debug, Clone)]
pub struct MemFs {
    fat: Vec<u32>,
    entries: Vec<MemEntry>,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            fat: vec![0; FAT_ENTRIES as usize],
            entries: Vec::new(),
        }
    }

    /// Add a file stored in `clusters`, in chain order.
    pub fn add_file(&mut self, dir: &str, name: &str, size: u32, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.fat[pair[0] as usize] = pair[1];
        }
        if let Some(&last) = clusters.last() {
            self.fat[last as usize] = EOC;
        }
        self.entries.push(MemEntry {
            dir: dir.to_string(),
            name: name.to_string(),
            size,
            first_cluster: clusters.first().copied().unwrap_or(0),
            is_dir: false,
            hidden: false,
        });
    }

    pub fn add_dir(&mut self, dir: &str, name: &str, hidden: bool) {
        self.entries.push(MemEntry {
            dir: dir.to_string(),
            name: name.to_string(),
            size: 0,
            first_cluster: 0,
            is_dir: true,
            hidden,
        });
    }

    /// The standard test card:
    ///
    /// * `/DISK_A.ST`: 3 clusters, contiguous from 5.
    /// * `/GAMES/DISK_B.ST`: 4 clusters 10, 11, 20, 30.
    /// * `/GAMES/zeta.st`: empty.
    /// * `/SYSTEM~1`: hidden directory.
    pub fn card() -> Self {
        let mut fs = Self::new();
        fs.add_file("", "DISK_A.ST", 3 * CLUSTER_BYTES, &[5, 6, 7]);
        fs.add_dir("", "GAMES", false);
        fs.add_dir("", "SYSTEM~1", true);
        fs.add_file("/GAMES", "DISK_B.ST", 4 * CLUSTER_BYTES, &[10, 11, 20, 30]);
        fs.add_file("/GAMES", "zeta.st", 0, &[]);
        fs
    }
}

/// First sector of `cluster` on the test volume.
pub fn cluster_sector(cluster: u32) -> u32 {
    DATA_START + SECTORS_PER_CLUSTER * (cluster - 2)
}

fn normalize_dir(path: &str) -> &str {
    if path == "/" {
        ""
    } else {
        path
    }
}

impl ImageFs for MemFs {
    type File = MemFile;
    type Error = FsError;

    fn open(&mut self, path: &str) -> Result<MemFile, FsError> {
        let (dir, name) = path.rsplit_once('/').ok_or(FsError::NotFound)?;
        self.entries
            .iter()
            .find(|e| !e.is_dir && e.dir == dir && e.name.eq_ignore_ascii_case(name))
            .map(|e| MemFile {
                size: e.size,
                first_cluster: e.first_cluster,
            })
            .ok_or(FsError::NotFound)
    }

    fn volume(&self) -> Volume {
        Volume {
            data_start: DATA_START,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            fat_entries: FAT_ENTRIES,
        }
    }

    fn next_cluster(&mut self, cluster: u32) -> Result<u32, FsError> {
        self.fat
            .get(cluster as usize)
            .copied()
            .ok_or(FsError::BadCluster(cluster))
    }

    fn read_dir(
        &mut self,
        path: &str,
        visit: &mut dyn FnMut(DirEntry<'_>),
    ) -> Result<(), FsError> {
        let dir = normalize_dir(path);
        let exists = dir.is_empty()
            || self.entries.iter().any(|e| {
                e.is_dir && format!("{}/{}", e.dir, e.name).eq_ignore_ascii_case(dir)
            });
        if !exists {
            return Err(FsError::NotFound);
        }
        for e in self.entries.iter().filter(|e| e.dir == dir) {
            visit(DirEntry {
                name: &e.name,
                size: e.size,
                is_dir: e.is_dir,
                hidden: e.hidden,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Kernel glue
// ============================================================================

#[derive(Debug, Default)]
pub struct MockReset {
    pub resets: usize,
}

impl ResetControl for MockReset {
    fn force_reset(&mut self) {
        self.resets += 1;
    }
}

pub type TestBridge = Bridge<BlockingLock, MockPort, MemFs>;

/// Bridge over the standard test card. Returns a handle on the port log.
pub fn make_bridge(config: BridgeConfig) -> (TestBridge, MockPort) {
    let port = MockPort::new();
    let bridge = Bridge::new(
        BlockingLock::new(),
        port.clone(),
        BlockingLock::new(),
        MemFs::card(),
        config,
    );
    (bridge, port)
}
