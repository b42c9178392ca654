use std::{error::Error, fmt, ops::Range};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Invalid arguments to the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionErr {
    NoParts,
    IndexOutOfRange { index: usize, num_parts: usize },
}

impl fmt::Display for PartitionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionErr::NoParts => f.write_str("can't split a dataset in zero parts"),
            PartitionErr::IndexOutOfRange { index, num_parts } => {
                write!(f, "partition {index} is out of range for {num_parts} parts")
            }
        }
    }
}

impl Error for PartitionErr {}

/// Returns the index range of partition `part_index` out of `num_parts`.
///
/// Every partition holds `length / num_parts` indices, the remainder of the
/// division is left out so that all the workers run the same amount of steps.
///
/// # Arguments
/// * `length` - The length of the dataset.
/// * `num_parts` - The amount of partitions.
/// * `part_index` - Which partition to return.
///
/// # Returns
/// The half open range of the partition or a `PartitionErr`.
pub fn partition(
    length: usize,
    num_parts: usize,
    part_index: usize,
) -> Result<Range<usize>, PartitionErr> {
    if num_parts == 0 {
        return Err(PartitionErr::NoParts);
    }

    if part_index >= num_parts {
        return Err(PartitionErr::IndexOutOfRange {
            index: part_index,
            num_parts,
        });
    }

    let part_len = length / num_parts;
    let start = part_len * part_index;
    Ok(start..start + part_len)
}

/// Yields every index of `range` once, in a random order drawn from `rng`.
pub fn iterate<R: Rng + ?Sized>(range: Range<usize>, rng: &mut R) -> impl Iterator<Item = usize> {
    let mut order: Vec<_> = range.collect();
    order.shuffle(rng);
    order.into_iter()
}

/// One worker's slice of the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitioner {
    range: Range<usize>,
}

impl Partitioner {
    /// Creates a new `Partitioner` over partition `part_index` of `num_parts`.
    ///
    /// # Returns
    /// A new `Partitioner` instance or a `PartitionErr`.
    pub fn new(length: usize, num_parts: usize, part_index: usize) -> Result<Self, PartitionErr> {
        Ok(Self {
            range: partition(length, num_parts, part_index)?,
        })
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// The length of every partition.
    pub fn length(&self) -> usize {
        self.range.len()
    }
}

/// Draws a fresh shuffle of a partition for every epoch.
#[derive(Debug)]
pub struct EpochSampler {
    range: Range<usize>,
    rng: StdRng,
}

impl EpochSampler {
    /// Creates a new `EpochSampler`.
    ///
    /// # Arguments
    /// * `range` - The partition to sample.
    /// * `seed` - Makes the sequence of shuffles reproducible.
    ///
    /// # Returns
    /// A new `EpochSampler` instance.
    pub fn new(range: Range<usize>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self { range, rng }
    }

    /// The visiting order of the next epoch.
    pub fn epoch(&mut self) -> Vec<usize> {
        iterate(self.range.clone(), &mut self.rng).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_of_sixty_thousand() {
        assert_eq!(partition(60000, 2, 0), Ok(0..30000));
        assert_eq!(partition(60000, 2, 1), Ok(30000..60000));
    }

    #[test]
    fn partitions_are_disjoint_and_drop_the_remainder() {
        let (length, num_parts) = (103, 7);
        let parts: Vec<_> = (0..num_parts)
            .map(|i| partition(length, num_parts, i).unwrap())
            .collect();

        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }

        let covered: usize = parts.iter().map(ExactSizeIterator::len).sum();
        assert_eq!(covered, num_parts * (length / num_parts));
        assert!(covered <= length);
        assert!(parts.iter().all(|p| p.len() == 14));
    }

    #[test]
    fn every_split_is_disjoint_equal_and_within_bounds() {
        for length in 0..=64 {
            for num_parts in 1..=length + 2 {
                let parts: Vec<_> = (0..num_parts)
                    .map(|i| partition(length, num_parts, i).unwrap())
                    .collect();

                assert_eq!(parts[0].start, 0);
                for pair in parts.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start, "{length} in {num_parts}");
                }

                let part_len = length / num_parts;
                assert!(parts.iter().all(|p| p.len() == part_len));
                assert!(parts[num_parts - 1].end <= length);
                assert!(length - parts[num_parts - 1].end < num_parts);
            }
        }
    }

    #[test]
    fn invalid_arguments_are_errors() {
        assert_eq!(partition(10, 0, 0), Err(PartitionErr::NoParts));
        assert_eq!(
            partition(10, 3, 3),
            Err(PartitionErr::IndexOutOfRange {
                index: 3,
                num_parts: 3
            })
        );
        assert!(Partitioner::new(10, 2, 5).is_err());
    }

    #[test]
    fn fewer_samples_than_parts_leaves_them_empty() {
        let partitioner = Partitioner::new(3, 4, 2).unwrap();
        assert_eq!(partitioner.length(), 0);
        assert_eq!(partitioner.range(), 0..0);
    }

    #[test]
    fn every_epoch_is_a_fresh_permutation() {
        let partitioner = Partitioner::new(1000, 4, 1).unwrap();
        let mut sampler = EpochSampler::new(partitioner.range(), Some(7));

        let first = sampler.epoch();
        let second = sampler.epoch();
        assert_ne!(first, second);

        for order in [first, second] {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, partitioner.range().collect::<Vec<_>>());
        }
    }

    #[test]
    fn seeded_samplers_agree() {
        let mut a = EpochSampler::new(0..50, Some(42));
        let mut b = EpochSampler::new(0..50, Some(42));
        assert_eq!(a.epoch(), b.epoch());
    }
}
