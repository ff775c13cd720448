use std::cmp::Ordering;
use std::time::Duration;

use crate::similarity::Similarity;

pub mod density;
pub mod item_stats;
pub mod options;
pub mod progress;
pub mod scoring;
pub mod slicing;

mod accumulate;
mod index_mapper;
mod matrix;
mod nearest_neighbors;
mod neighbor_table;
mod persist;
mod train;

#[cfg(test)]
mod test_support;

pub use item_stats::ItemStatistics;
pub use neighbor_table::{Neighbor, MIN_ITEM_NEIGHBORHOOD_SIZE};
pub use options::{SimilarityOptions, TrainingMethod};
pub use persist::LOOKUP_VERSION;
pub use scoring::{ScoreScratch, SharedScoreScratch};

/// Item-item similarity lookup: for every item, its most similar items together with the
/// finalized similarity values.
///
/// Neighbors of item `i` are stored in `entries[boundaries[i]..boundaries[i + 1]]`, sorted by
/// neighbor index, each with an exported score above the configured threshold. The lookup is
/// read-only once built.
pub struct SimilarityLookup<S: Similarity> {
    similarity: S,
    options: SimilarityOptions,
    num_items: usize,
    final_item_data: Vec<S::FinalItemData>,
    boundaries: Vec<usize>,
    entries: Vec<Neighbor<S::FinalInteraction>>,
}

/// What training actually did.
#[derive(Clone, Debug)]
pub struct TrainingSummary {
    /// The strategy that produced the lookup, never `Auto`.
    pub training_method: TrainingMethod,
    pub num_passes: usize,
    pub nearest_neighbor_items: usize,
    pub estimated_density: Option<f64>,
    pub degree_approximation_threshold: usize,
    pub max_item_neighborhood_size: usize,
    pub interaction_updates: usize,
    pub training_time: Duration,
}

impl<S: Similarity> SimilarityLookup<S> {
    pub fn similarity(&self) -> &S {
        &self.similarity
    }

    pub fn options(&self) -> &SimilarityOptions {
        &self.options
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn final_item_data(&self) -> &[S::FinalItemData] {
        &self.final_item_data
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Stored neighbors of `item`, sorted by neighbor index. Empty for unknown items.
    pub fn neighbors(&self, item: usize) -> &[Neighbor<S::FinalInteraction>] {
        if item >= self.num_items {
            return &[];
        }
        &self.entries[self.boundaries[item]..self.boundaries[item + 1]]
    }

    /// Stored similarity between `item` and `neighbor`, if `neighbor` was retained.
    pub fn interaction(&self, item: usize, neighbor: usize) -> Option<&S::FinalInteraction> {
        let neighbors = self.neighbors(item);
        neighbors
            .binary_search_by_key(&neighbor, |n| n.item)
            .ok()
            .map(|position| &neighbors[position].value)
    }

    /// The `top_k` most similar items to `item`, best first, as exported scores.
    pub fn similar_items(&self, item: usize, top_k: usize) -> Vec<(usize, f64)> {
        if item >= self.num_items || top_k == 0 {
            return Vec::new();
        }

        let mut candidates = self.neighbors(item).to_vec();
        let order = |a: &Neighbor<S::FinalInteraction>, b: &Neighbor<S::FinalInteraction>| {
            if neighbor_table::ranks_before(&self.similarity, &self.final_item_data, item, a, b) {
                Ordering::Less
            } else if neighbor_table::ranks_before(&self.similarity, &self.final_item_data, item, b, a) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        };

        if candidates.len() > top_k {
            candidates.select_nth_unstable_by(top_k - 1, order);
            candidates.truncate(top_k);
        }
        candidates.sort_unstable_by(order);

        candidates
            .into_iter()
            .map(|n| (n.item, self.similarity.export_score(&n.value)))
            .collect()
    }

    /// Differences between two lookups over the same items.
    pub fn diff(&self, other: &SimilarityLookup<S>) -> LookupDiff {
        let mut diff = LookupDiff::default();
        for item in 0..self.num_items.max(other.num_items) {
            let mine = self.neighbors(item);
            let theirs = other.neighbors(item);
            let (mut i, mut j) = (0, 0);
            while i < mine.len() || j < theirs.len() {
                match (mine.get(i), theirs.get(j)) {
                    (Some(a), Some(b)) if a.item == b.item => {
                        let score_a = self.similarity.export_score(&a.value);
                        let score_b = other.similarity.export_score(&b.value);
                        if (score_a - score_b).abs() > DIFF_TOLERANCE {
                            diff.different_scores.push((item, a.item, score_a, score_b));
                        }
                        i += 1;
                        j += 1;
                    }
                    (Some(a), Some(b)) if a.item < b.item => {
                        diff.only_in_first.push((item, a.item));
                        i += 1;
                    }
                    (Some(a), None) => {
                        diff.only_in_first.push((item, a.item));
                        i += 1;
                    }
                    (_, Some(b)) => {
                        diff.only_in_second.push((item, b.item));
                        j += 1;
                    }
                    (None, None) => break,
                }
            }
        }
        diff
    }
}

const DIFF_TOLERANCE: f64 = 1e-6;

/// Edges `(item, neighbor)` present in only one of two lookups, and shared edges whose scores
/// differ.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LookupDiff {
    pub only_in_first: Vec<(usize, usize)>,
    pub only_in_second: Vec<(usize, usize)>,
    pub different_scores: Vec<(usize, usize, f64, f64)>,
}

impl LookupDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_first.is_empty()
            && self.only_in_second.is_empty()
            && self.different_scores.is_empty()
    }
}

/// Stateless 64 bit mixing of two values, used for sampling and lock striping.
pub(crate) fn hash64(a: u64, b: u64) -> u64 {
    let mut h = a
        .rotate_left(23)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ b.wrapping_add(0xD6E8_FEB8_6659_FD93);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h = h.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    h ^= h >> 33;
    h
}

#[derive(PartialEq, Debug)]
pub(crate) struct ItemScore {
    pub id: usize,
    pub score: f64,
}

impl ItemScore {
    pub(crate) fn new(id: usize, score: f64) -> Self {
        ItemScore { id, score }
    }
}

impl Eq for ItemScore {}

impl Ord for ItemScore {
    fn cmp(&self, other: &Self) -> Ordering {
        // reverse order by score, ties by item id
        match self.score.partial_cmp(&other.score) {
            Some(Ordering::Less) => Ordering::Greater,
            Some(Ordering::Greater) => Ordering::Less,
            _ => self.id.cmp(&other.id),
        }
    }
}

impl PartialOrd for ItemScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
