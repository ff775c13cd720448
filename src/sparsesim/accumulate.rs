use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use log::debug;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::rows::SparseRows;
use crate::similarity::Similarity;
use crate::sparsesim::hash64;
use crate::sparsesim::index_mapper::IndexMapper;
use crate::sparsesim::item_stats::ItemStatistics;
use crate::sparsesim::matrix::InteractionMatrix;
use crate::sparsesim::neighbor_table::NeighborTable;
use crate::sparsesim::progress::ProgressTracker;

/// Streams the rows once per slice, accumulating the upper triangle of the item × item
/// interactions whose first item falls into the slice, and drains every slice into the
/// neighbor table.
///
/// Rows and statistics use the compacted item indices of the index mapper; the neighbor table
/// uses data indices.
pub(crate) struct SliceAccumulator<'a, S: Similarity> {
    pub similarity: &'a S,
    pub stats: &'a ItemStatistics<S>,
    pub rows: &'a SparseRows,
    pub mapper: &'a IndexMapper,
    pub progress: &'a ProgressTracker,
    pub degree_approximation_threshold: usize,
    pub random_seed: u64,
    // per row, the largest (num_users, item) key still accepted as first item of a pair
    incoming_limits: Mutex<HashMap<usize, (usize, usize)>>,
    interaction_updates: AtomicUsize,
}

impl<'a, S: Similarity> SliceAccumulator<'a, S> {
    pub fn new(
        similarity: &'a S,
        stats: &'a ItemStatistics<S>,
        rows: &'a SparseRows,
        mapper: &'a IndexMapper,
        progress: &'a ProgressTracker,
        degree_approximation_threshold: usize,
        random_seed: u64,
    ) -> Self {
        SliceAccumulator {
            similarity,
            stats,
            rows,
            mapper,
            progress,
            degree_approximation_threshold,
            random_seed,
            incoming_limits: Mutex::new(HashMap::new()),
            interaction_updates: AtomicUsize::new(0),
        }
    }

    /// Work units reported to the progress tracker for one pass over the rows.
    pub fn work_per_pass(rows: &SparseRows, degree_approximation_threshold: usize) -> usize {
        rows.iter()
            .map(|row| row.len().min(degree_approximation_threshold) * row.len())
            .sum()
    }

    pub fn interaction_updates(&self) -> usize {
        self.interaction_updates.load(Ordering::Relaxed)
    }

    /// Runs every slice, strictly one after the other.
    pub fn run<M: InteractionMatrix<S::Interaction>>(
        &self,
        matrix: &mut M,
        slice_boundaries: &[usize],
        table: &NeighborTable<S>,
    ) {
        for (slice_index, slice) in slice_boundaries.windows(2).enumerate() {
            let (start, end) = (slice[0], slice[1]);
            if slice_index > 0 {
                self.progress.print_break();
            }
            debug!(
                "Accumulating slice {} of {} (items {}..{})",
                slice_index + 1,
                slice_boundaries.len() - 1,
                start,
                end
            );
            self.accumulate_slice(matrix, start, end);
            self.drain_slice(matrix, start, table);
        }
    }

    pub(crate) fn accumulate_slice<M: InteractionMatrix<S::Interaction>>(
        &self,
        matrix: &mut M,
        start: usize,
        end: usize,
    ) {
        let num_items = self.stats.num_items();
        matrix.reset(end - start, num_items - start);
        let matrix: &M = matrix;
        self.rows
            .par_rows()
            .for_each(|(row_index, row)| self.process_row(matrix, row_index, row, start, end));
    }

    fn process_row<M: InteractionMatrix<S::Interaction>>(
        &self,
        matrix: &M,
        row_index: usize,
        row: &[(usize, f64)],
        start: usize,
        end: usize,
    ) {
        let num_row_items = row.len();
        self.progress
            .increment(num_row_items.min(self.degree_approximation_threshold) * num_row_items);
        if num_row_items < 2 {
            return;
        }

        let first = row.partition_point(|(item, _)| *item < start);
        let last = row.partition_point(|(item, _)| *item < end);
        if first == last {
            return;
        }

        // Long rows are pruned: only the items with the fewest users act as first member of
        // a pair, and the partners are subsampled with a hash seeded by the row.
        let approximate = num_row_items > self.degree_approximation_threshold;
        let incoming_limit = if approximate {
            Some(self.incoming_limit(row_index, row))
        } else {
            None
        };
        let row_seed = hash64(self.random_seed, row_index as u64);
        let sample_threshold = if approximate {
            (u64::MAX / num_row_items as u64) * self.degree_approximation_threshold as u64
        } else {
            u64::MAX
        };

        let item_data = &self.stats.item_data;
        let num_users = &self.stats.num_users;
        let mut updates = 0;

        for index_a in first..last {
            let (item_a, value_a) = row[index_a];
            if let Some(limit) = incoming_limit {
                if (num_users[item_a], item_a) > limit {
                    continue;
                }
            }

            for (index_b, &(item_b, value_b)) in row.iter().enumerate().skip(index_a + 1) {
                if approximate && hash64(row_seed, index_b as u64) >= sample_threshold {
                    continue;
                }
                matrix.apply(item_a - start, item_b - start, |interaction| {
                    self.similarity.update_interaction(
                        interaction,
                        &item_data[item_a],
                        &item_data[item_b],
                        value_a,
                        value_b,
                    )
                });
                updates += 1;
            }
        }

        self.interaction_updates.fetch_add(updates, Ordering::Relaxed);
    }

    fn incoming_limit(&self, row_index: usize, row: &[(usize, f64)]) -> (usize, usize) {
        if let Some(limit) = self.incoming_limits.lock().get(&row_index) {
            return *limit;
        }

        let num_users = &self.stats.num_users;
        let mut keys: Vec<(usize, usize)> = row.iter().map(|&(item, _)| (num_users[item], item)).collect();
        let nth = self.degree_approximation_threshold.min(keys.len()) - 1;
        let (_, limit, _) = keys.select_nth_unstable(nth);
        let limit = *limit;

        self.incoming_limits.lock().insert(row_index, limit);
        limit
    }

    fn drain_slice<M: InteractionMatrix<S::Interaction>>(
        &self,
        matrix: &mut M,
        start: usize,
        table: &NeighborTable<S>,
    ) {
        let stats = self.stats;
        let similarity = self.similarity;
        let mapper = self.mapper;
        matrix.for_each_populated(|row, col, interaction| {
            let item_a = start + row;
            let item_b = start + col;
            let value = similarity.finalize_interaction(
                interaction,
                &stats.item_data[item_a],
                &stats.item_data[item_b],
                &stats.final_item_data[item_a],
                &stats.final_item_data[item_b],
            );
            let data_a = mapper.to_data(item_a);
            let data_b = mapper.to_data(item_b);
            table.insert(data_a, data_b, value);
            table.insert(data_b, data_a, value);
        });
    }
}
