mod partition;

pub use partition::{EpochSampler, PartitionErr, Partitioner, iterate, partition};
