//! Cluster link tables.
//!
//! A link table stores a file's cluster chain as runs of consecutive
//! clusters, so a byte offset can be turned into a cluster without reading
//! the FAT. Fragmented images need one run per fragment.

use alloc::vec::Vec;

use fpga_bridge_hal::ImageFs;

/// `len` consecutive clusters starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClusterRun {
    pub len: u32,
    pub start: u32,
}

/// A file's complete cluster chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkTable {
    runs: Vec<ClusterRun>,
}

impl LinkTable {
    pub fn runs(&self) -> &[ClusterRun] {
        &self.runs
    }

    /// Cluster number of the `index`th cluster of the file.
    pub fn cluster_at(&self, mut index: u32) -> Option<u32> {
        for run in &self.runs {
            if index < run.len {
                return Some(run.start + index);
            }
            index -= run.len;
        }
        None
    }
}

/// Why a link table could not be built.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkError<E> {
    /// The chain has more runs than the table was allowed to hold.
    TooSmall { required: usize },
    Fs(E),
}

/// Walk the chain from `first_cluster` and build its link table, holding at
/// most `capacity` runs.
///
/// When the chain needs more runs the walk still completes, so the error
/// reports the exact number of runs required.
pub fn build<F: ImageFs>(
    fs: &mut F,
    first_cluster: u32,
    capacity: usize,
) -> Result<LinkTable, LinkError<F::Error>> {
    let fat_entries = fs.volume().fat_entries;
    let mut runs: Vec<ClusterRun> = Vec::with_capacity(capacity);
    let mut required = 0usize;
    let mut prev: Option<u32> = None;

    let mut cluster = first_cluster;
    // A corrupt FAT may loop. No chain is longer than the FAT itself.
    let mut budget = fat_entries;

    while in_chain(cluster, fat_entries) && budget > 0 {
        budget -= 1;
        if prev.map_or(true, |p| p + 1 != cluster) {
            required += 1;
            if required <= capacity {
                runs.push(ClusterRun {
                    len: 0,
                    start: cluster,
                });
            }
        }
        if required <= capacity {
            if let Some(run) = runs.last_mut() {
                run.len += 1;
            }
        }
        prev = Some(cluster);
        cluster = fs.next_cluster(cluster).map_err(LinkError::Fs)?;
    }

    if required > capacity {
        return Err(LinkError::TooSmall { required });
    }

    Ok(LinkTable { runs })
}

/// Follow the chain from `first_cluster` for `index` links.
///
/// Returns the cluster reached, or the end-of-chain marker when the chain is
/// shorter.
pub fn walk<F: ImageFs>(fs: &mut F, first_cluster: u32, index: u32) -> Result<u32, F::Error> {
    let fat_entries = fs.volume().fat_entries;
    let mut cluster = first_cluster;
    for _ in 0..index {
        if !in_chain(cluster, fat_entries) {
            break;
        }
        cluster = fs.next_cluster(cluster)?;
    }
    Ok(cluster)
}

fn in_chain(cluster: u32, fat_entries: u32) -> bool {
    (2..fat_entries).contains(&cluster)
}
