use comms::Rank;

use crate::data::{PartitionErr, Partitioner};

/// The rank the scheduler assigned to this worker and the size of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRegistry {
    rank: Rank,
    num_workers: usize,
}

impl RankRegistry {
    /// Creates a new `RankRegistry`.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank, in `[0, num_workers)`.
    /// * `num_workers` - The expected amount of workers of the run.
    ///
    /// # Returns
    /// A new `RankRegistry` instance.
    pub fn new(rank: Rank, num_workers: usize) -> Self {
        Self { rank, num_workers }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The amount of workers of the run.
    pub fn cluster_size(&self) -> usize {
        self.num_workers
    }

    /// Selects this worker's partition of a dataset of `length` samples.
    pub fn partition(&self, length: usize) -> Result<Partitioner, PartitionErr> {
        Partitioner::new(length, self.num_workers, self.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_select_consecutive_partitions() {
        let ranges: Vec<_> = (0..3)
            .map(|rank| RankRegistry::new(rank, 3).partition(30).unwrap().range())
            .collect();

        assert_eq!(ranges, [0..10, 10..20, 20..30]);
    }

    #[test]
    fn a_rank_outside_the_cluster_has_no_partition() {
        let registry = RankRegistry::new(4, 2);
        assert_eq!(registry.cluster_size(), 2);
        assert!(registry.partition(100).is_err());
    }
}
