use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};
use crate::similarity::{CompareContext, Similarity};

/// Below this neighborhood size an allocation failure is no longer retried.
pub const MIN_ITEM_NEIGHBORHOOD_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor<V> {
    pub item: usize,
    pub value: V,
}

/// True when `first` ranks strictly before `second` among the neighbors of `item`.
/// Values the similarity considers equal are ordered by the smaller neighbor index.
pub(crate) fn ranks_before<S: Similarity>(
    similarity: &S,
    final_item_data: &[S::FinalItemData],
    item: usize,
    first: &Neighbor<S::FinalInteraction>,
    second: &Neighbor<S::FinalInteraction>,
) -> bool {
    let context = |a: usize, b: usize| CompareContext {
        item: &final_item_data[item],
        first: &final_item_data[a],
        second: &final_item_data[b],
    };
    if similarity.compare(&first.value, &second.value, context(first.item, second.item)) {
        true
    } else if similarity.compare(&second.value, &first.value, context(second.item, first.item)) {
        false
    } else {
        first.item < second.item
    }
}

/// The per-item bounded candidate lists filled while training.
///
/// Each item owns a mutex around a buffer of at most `capacity` candidates. While the buffer
/// has room candidates are appended; once it is full it is kept as a heap with the worst
/// candidate at the root, which is replaced whenever something better arrives. The export
/// score of the current root is mirrored into an atomic so that hopeless candidates are
/// rejected without taking the lock.
pub(crate) struct NeighborTable<'a, S: Similarity> {
    similarity: &'a S,
    final_item_data: &'a [S::FinalItemData],
    capacity: usize,
    buckets: Vec<Mutex<Vec<Neighbor<S::FinalInteraction>>>>,
    worst_scores: Vec<AtomicU64>,
}

impl<'a, S: Similarity> NeighborTable<'a, S> {
    /// Reserves `capacity` slots per item, halving the capacity after each failed allocation
    /// while it stays at or above [`MIN_ITEM_NEIGHBORHOOD_SIZE`].
    pub fn allocate(
        similarity: &'a S,
        final_item_data: &'a [S::FinalItemData],
        capacity: usize,
    ) -> Result<Self> {
        let num_items = final_item_data.len();
        let mut capacity = capacity;
        loop {
            if let Some(buckets) = Self::try_allocate_buckets(num_items, capacity) {
                let worst_scores = (0..num_items)
                    .map(|_| AtomicU64::new(f64::NEG_INFINITY.to_bits()))
                    .collect();
                return Ok(NeighborTable {
                    similarity,
                    final_item_data,
                    capacity,
                    buckets,
                    worst_scores,
                });
            }

            let bytes = num_items
                .saturating_mul(capacity)
                .saturating_mul(mem::size_of::<Neighbor<S::FinalInteraction>>());
            if capacity / 2 < MIN_ITEM_NEIGHBORHOOD_SIZE {
                return Err(SimilarityError::LookupAllocation {
                    max_item_neighborhood_size: capacity,
                    num_items,
                    bytes,
                });
            }
            warn!(
                "Out of memory allocating {} bytes of lookup tables with max_item_neighborhood_size = {}; \
                 retrying with max_item_neighborhood_size = {}",
                bytes,
                capacity,
                capacity / 2
            );
            capacity /= 2;
        }
    }

    fn try_allocate_buckets(
        num_items: usize,
        capacity: usize,
    ) -> Option<Vec<Mutex<Vec<Neighbor<S::FinalInteraction>>>>> {
        num_items
            .checked_mul(capacity)?
            .checked_mul(mem::size_of::<Neighbor<S::FinalInteraction>>())?;

        let mut buckets = Vec::new();
        buckets.try_reserve_exact(num_items).ok()?;
        for _ in 0..num_items {
            let mut bucket = Vec::new();
            bucket.try_reserve_exact(capacity).ok()?;
            buckets.push(Mutex::new(bucket));
        }
        Some(buckets)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_items(&self) -> usize {
        self.buckets.len()
    }

    /// Offers `neighbor` as a candidate neighbor of `item`. Self pairs are ignored.
    pub fn insert(&self, item: usize, neighbor: usize, value: S::FinalInteraction) {
        if item == neighbor {
            return;
        }

        let score = self.similarity.export_score(&value);
        let worst = f64::from_bits(self.worst_scores[item].load(Ordering::Relaxed));
        if score < worst {
            return;
        }

        let candidate = Neighbor {
            item: neighbor,
            value,
        };
        let mut bucket = self.buckets[item].lock();

        if bucket.len() < self.capacity {
            bucket.push(candidate);
            if bucket.len() == self.capacity {
                self.heapify(item, &mut bucket);
                self.publish_worst(item, &bucket);
            }
            return;
        }

        if self.is_worse(item, &bucket[0], &candidate) {
            bucket[0] = candidate;
            self.sift_down(item, &mut bucket, 0);
            self.publish_worst(item, &bucket);
        }
    }

    fn is_worse(
        &self,
        item: usize,
        first: &Neighbor<S::FinalInteraction>,
        second: &Neighbor<S::FinalInteraction>,
    ) -> bool {
        ranks_before(self.similarity, self.final_item_data, item, second, first)
    }

    fn publish_worst(&self, item: usize, bucket: &[Neighbor<S::FinalInteraction>]) {
        if let Some(root) = bucket.first() {
            let score = self.similarity.export_score(&root.value);
            self.worst_scores[item].store(score.to_bits(), Ordering::Relaxed);
        }
    }

    fn heapify(&self, item: usize, heap: &mut [Neighbor<S::FinalInteraction>]) {
        for position in (0..heap.len() / 2).rev() {
            self.sift_down(item, heap, position);
        }
    }

    // Restores the worst-at-root property below `position`.
    fn sift_down(&self, item: usize, heap: &mut [Neighbor<S::FinalInteraction>], mut position: usize) {
        loop {
            let left = 2 * position + 1;
            let right = left + 1;
            let mut worst = position;
            if left < heap.len() && self.is_worse(item, &heap[left], &heap[worst]) {
                worst = left;
            }
            if right < heap.len() && self.is_worse(item, &heap[right], &heap[worst]) {
                worst = right;
            }
            if worst == position {
                return;
            }
            heap.swap(position, worst);
            position = worst;
        }
    }

    /// Drops everything scoring at or below `threshold`, sorts each item's neighbors by index
    /// and flattens the table into `(boundaries, entries)`.
    pub fn finalize(self, threshold: f64) -> (Vec<usize>, Vec<Neighbor<S::FinalInteraction>>) {
        let similarity = self.similarity;
        let per_item: Vec<Vec<Neighbor<S::FinalInteraction>>> = self
            .buckets
            .into_par_iter()
            .map(|bucket| {
                let mut neighbors = bucket.into_inner();
                neighbors.retain(|n| similarity.export_score(&n.value) > threshold);
                neighbors.sort_unstable_by_key(|n| n.item);
                neighbors.shrink_to_fit();
                neighbors
            })
            .collect();

        let mut boundaries = Vec::with_capacity(per_item.len() + 1);
        boundaries.push(0);
        let total: usize = per_item.iter().map(Vec::len).sum();
        let mut entries = Vec::with_capacity(total);
        for neighbors in per_item {
            entries.extend(neighbors);
            boundaries.push(entries.len());
        }
        (boundaries, entries)
    }
}

#[cfg(test)]
mod neighbor_table_test {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::*;
    use crate::similarity::CoOccurrence;

    #[test]
    fn should_keep_best_candidates() {
        let final_item_data = vec![(); 10];
        let table = NeighborTable::allocate(&CoOccurrence, &final_item_data, 3).unwrap();
        for neighbor in 1..10 {
            table.insert(0, neighbor, neighbor as f64);
        }
        let (boundaries, entries) = table.finalize(0.0);
        assert_eq!(0, boundaries[0]);
        assert_eq!(3, boundaries[1]);
        assert_eq!(3, boundaries[10]);
        let kept: Vec<usize> = entries.iter().map(|n| n.item).collect();
        assert_eq!(vec![7, 8, 9], kept);
    }

    #[test]
    fn should_ignore_self_pairs_and_apply_threshold() {
        let final_item_data = vec![(); 3];
        let table = NeighborTable::allocate(&CoOccurrence, &final_item_data, 4).unwrap();
        table.insert(1, 1, 10.0);
        table.insert(1, 0, 0.5);
        table.insert(1, 2, 2.0);
        let (boundaries, entries) = table.finalize(1.0);
        assert_eq!(vec![0, 0, 1, 1], boundaries);
        assert_eq!(Neighbor { item: 2, value: 2.0 }, entries[0]);
    }

    #[test]
    fn should_break_ties_by_smaller_index() {
        let final_item_data = vec![(); 6];
        let table = NeighborTable::allocate(&CoOccurrence, &final_item_data, 2).unwrap();
        for neighbor in [5, 3, 1, 4, 2] {
            table.insert(0, neighbor, 1.0);
        }
        let (_, entries) = table.finalize(0.0);
        let kept: Vec<usize> = entries.iter().map(|n| n.item).collect();
        assert_eq!(vec![1, 2], kept);
    }

    #[test]
    fn should_halve_capacity_until_allocation_succeeds() {
        let final_item_data = vec![(); 1];
        let requested = 1_usize << 44;
        let table = NeighborTable::allocate(&CoOccurrence, &final_item_data, requested).unwrap();
        let capacity = table.capacity();
        assert!(capacity < requested);
        assert!(capacity >= MIN_ITEM_NEIGHBORHOOD_SIZE);
        assert!(capacity.is_power_of_two());
    }

    #[test]
    fn should_not_depend_on_insertion_order() {
        let num_items = 50;
        let final_item_data = vec![(); num_items];
        let mut candidates: Vec<(usize, usize, f64)> = (0..num_items)
            .flat_map(|a| (0..num_items).map(move |b| (a, b, ((a * 7 + b * 13) % 11) as f64)))
            .collect();

        let mut results = Vec::new();
        for seed in 0..3 {
            candidates.shuffle(&mut Pcg64::seed_from_u64(seed));
            let table = NeighborTable::allocate(&CoOccurrence, &final_item_data, 5).unwrap();
            candidates
                .par_iter()
                .for_each(|&(a, b, v)| table.insert(a, b, v));
            results.push(table.finalize(0.0));
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }
}
