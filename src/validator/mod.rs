//! Partition validation subsystem (C8): candidate partitions and the
//! prioritized skimmer chain that filters/enriches them.

pub mod partition;
pub mod skimmer;

pub use partition::{Partition, TaskGraph};
pub use skimmer::{PartitionValidator, SkimResult, Skimmer};
