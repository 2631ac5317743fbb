//! PartitionValidator (C8): a prioritized skimmer chain that filters and
//! enriches candidate partitions. See `SPEC_FULL.md §4.8`.

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{ValidatorError, ValidatorResult};

use super::partition::{Partition, TaskGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkimResult {
    Ok,
    NoPartition,
    Error,
}

/// An object that may filter and enrich a candidate partition list, and
/// commit/rollback platform-side state once one partition is chosen.
pub trait Skimmer: Send + Sync {
    fn skim(&self, tg: &TaskGraph, partitions: &mut Vec<Partition>, cluster: u32) -> SkimResult;
    fn set(&self, tg: &TaskGraph, partition: &Partition) -> ValidatorResult<()>;
    fn unset(&self, tg: &TaskGraph, partition: &Partition) -> ValidatorResult<()>;
    fn skimmer_type(&self) -> &'static str;
}

struct Registered {
    priority: i32,
    skimmer: Box<dyn Skimmer>,
}

/// The chain itself. Its own lock is held only across lookups of the
/// registered list; each skimmer's internal concurrency is its own business
/// (`§4.8`).
pub struct PartitionValidator {
    chain: Mutex<Vec<Registered>>,
    last_failed: Mutex<Option<&'static str>>,
}

impl PartitionValidator {
    pub fn new() -> Self {
        PartitionValidator {
            chain: Mutex::new(Vec::new()),
            last_failed: Mutex::new(None),
        }
    }

    /// Registers `skimmer`, keeping the chain sorted by descending priority.
    pub fn register(&self, priority: i32, skimmer: Box<dyn Skimmer>) {
        let mut chain = self.chain.lock();
        chain.push(Registered { priority, skimmer });
        chain.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn last_failed(&self) -> Option<&'static str> {
        *self.last_failed.lock()
    }

    /// Visits the chain in descending priority; each skimmer may filter
    /// and/or enrich `partitions` in place.
    pub fn load_partitions(
        &self,
        tg: &TaskGraph,
        mut partitions: Vec<Partition>,
        cluster: u32,
    ) -> ValidatorResult<Vec<Partition>> {
        if partitions.is_empty() {
            return Err(ValidatorError::NoPartition);
        }
        *self.last_failed.lock() = None;
        let chain = self.chain.lock();
        for entry in chain.iter() {
            match entry.skimmer.skim(tg, &mut partitions, cluster) {
                SkimResult::Ok => {}
                SkimResult::NoPartition => {
                    *self.last_failed.lock() = Some(entry.skimmer.skimmer_type());
                    return Err(ValidatorError::NoPartition);
                }
                SkimResult::Error => {
                    *self.last_failed.lock() = Some(entry.skimmer.skimmer_type());
                    error!(skimmer = entry.skimmer.skimmer_type(), "skimmer reported an error, aborting validation");
                    return Err(ValidatorError::GenericError);
                }
            }
            // A skimmer may also veto every remaining candidate without
            // reporting NO_PARTITION itself (e.g. a capacity filter that
            // simply drains the list); the chain attributes the failure to
            // whichever skimmer left it empty.
            if partitions.is_empty() {
                *self.last_failed.lock() = Some(entry.skimmer.skimmer_type());
                return Err(ValidatorError::NoPartition);
            }
        }
        Ok(partitions)
    }

    /// Calls `set` on every registered skimmer, descending priority. Any
    /// failure is critical — skimmers are expected to commit.
    pub fn propagate(&self, tg: &TaskGraph, partition: &Partition) -> ValidatorResult<()> {
        let chain = self.chain.lock();
        for entry in chain.iter() {
            if let Err(e) = entry.skimmer.set(tg, partition) {
                error!(skimmer = entry.skimmer.skimmer_type(), error = %e, "skimmer failed to commit partition state");
                return Err(ValidatorError::SkimmerFail);
            }
        }
        Ok(())
    }

    /// Symmetric `unset` traversal for rollback or termination.
    pub fn remove(&self, tg: &TaskGraph, partition: &Partition) -> ValidatorResult<()> {
        let chain = self.chain.lock();
        for entry in chain.iter() {
            if let Err(e) = entry.skimmer.unset(tg, partition) {
                warn!(skimmer = entry.skimmer.skimmer_type(), error = %e, "skimmer failed to roll back partition state");
                return Err(ValidatorError::SkimmerFail);
            }
        }
        Ok(())
    }
}

impl Default for PartitionValidator {
    fn default() -> Self {
        Self::new()
    }
}
