use std::mem;
use std::time::Instant;

use log::{debug, info, warn};
use num_format::{Locale, ToFormattedString};
use rayon::prelude::*;

use crate::error::{Result, SimilarityError};
use crate::rows::SparseRows;
use crate::similarity::Similarity;
use crate::sparsesim::accumulate::SliceAccumulator;
use crate::sparsesim::density::estimate_density;
use crate::sparsesim::index_mapper::IndexMapper;
use crate::sparsesim::item_stats::ItemStatistics;
use crate::sparsesim::matrix::{DenseTriangularMatrix, InteractionMatrix, SparseMatrix};
use crate::sparsesim::nearest_neighbors;
use crate::sparsesim::neighbor_table::NeighborTable;
use crate::sparsesim::options::{SimilarityOptions, TrainingMethod};
use crate::sparsesim::progress::ProgressTracker;
use crate::sparsesim::slicing::plan_slices;
use crate::sparsesim::{SimilarityLookup, TrainingSummary};

/// Pass budget for the first, optimistic dense attempt in `auto` mode.
const AUTO_DENSE_PASS_LIMIT: usize = 4;
/// Dense slicing is preferred while it needs at most this many times the sparse passes.
const DENSE_PASS_FACTOR: usize = 8;
/// Memory overhead per element of the hash map behind sparse slices.
const SPARSE_OVERHEAD_FACTOR: f64 = 1.7;
const MIN_DEGREE_APPROXIMATION_THRESHOLD: usize = 8;
const MAX_APPROXIMATION_ATTEMPTS: usize = 16;

struct Outcome {
    training_method: TrainingMethod,
    num_passes: usize,
    nearest_neighbor_items: usize,
    estimated_density: Option<f64>,
}

/// The items still to be processed, in compacted indices.
struct Workset<'a, S: Similarity> {
    rows: &'a SparseRows,
    stats: &'a ItemStatistics<S>,
    mapper: &'a IndexMapper,
}

impl<'a, S: Similarity> Workset<'a, S> {
    fn num_items(&self) -> usize {
        self.stats.num_items()
    }
}

struct Trainer<'a, S: Similarity> {
    similarity: &'a S,
    options: &'a SimilarityOptions,
    table: &'a NeighborTable<'a, S>,
    degree_approximation_threshold: usize,
    interaction_updates: usize,
}

impl<'a, S: Similarity> Trainer<'a, S> {
    fn run(&mut self, rows: &SparseRows, by_item: &SparseRows, stats: &ItemStatistics<S>) -> Result<Outcome> {
        let method = self.options.training_method;
        let max_passes = self.options.max_data_passes;
        let num_items = stats.num_items();

        let identity = IndexMapper::identity(num_items);
        let everything = Workset {
            rows,
            stats,
            mapper: &identity,
        };

        match method {
            TrainingMethod::Auto => {
                if let Some(num_passes) = self.try_dense(&everything, AUTO_DENSE_PASS_LIMIT) {
                    return Ok(Outcome::sliced(TrainingMethod::Dense, num_passes, 0, None));
                }
            }
            TrainingMethod::Dense => {
                return match self.try_dense(&everything, max_passes) {
                    Some(num_passes) => Ok(Outcome::sliced(TrainingMethod::Dense, num_passes, 0, None)),
                    None => Err(self.dense_infeasible(method)),
                };
            }
            _ => {}
        }

        // Handle the most common items by brute force first.
        let mut nearest_neighbor_items = 0;
        let mut remaining = None;
        if method == TrainingMethod::Auto || method.uses_nearest_neighbors() {
            let (selected, num_selected) =
                nearest_neighbors::select_items(&stats.num_users, rows.num_rows(), method);

            if num_selected > 0 {
                let progress = ProgressTracker::new(num_selected);
                progress.print_header();
                self.interaction_updates += nearest_neighbors::search(
                    self.similarity,
                    stats,
                    rows,
                    by_item,
                    &selected,
                    self.table,
                    &progress,
                );
                progress.print_footer();
            }
            nearest_neighbor_items = num_selected;

            if num_selected == num_items {
                info!("Brute force search resolved all items.");
                return Ok(Outcome::sliced(TrainingMethod::NearestNeighbors, 1, num_items, None));
            }
            if num_selected > 0 {
                let keep: Vec<bool> = selected.iter().map(|s| !s).collect();
                let mapper = IndexMapper::from_mask(&keep);
                let remaining_rows = mapper.remap_rows(rows);
                let remaining_stats = stats.retain_mask(&keep);
                info!(
                    "Continuing with the remaining {} items.",
                    mapper.num_internal().to_formatted_string(&Locale::en)
                );
                remaining = Some((mapper, remaining_rows, remaining_stats));
            }
        }

        let nearest_neighbors_run = remaining.is_some();
        let work = match &remaining {
            Some((mapper, rows, stats)) => Workset { rows, stats, mapper },
            None => everything,
        };
        let dense_method = if nearest_neighbors_run {
            TrainingMethod::NearestNeighborsDense
        } else {
            TrainingMethod::Dense
        };
        let sparse_method = if nearest_neighbors_run {
            TrainingMethod::NearestNeighborsSparse
        } else {
            TrainingMethod::Sparse
        };

        if method == TrainingMethod::NearestNeighborsDense {
            return match self.try_dense(&work, max_passes) {
                Some(num_passes) => Ok(Outcome::sliced(dense_method, num_passes, nearest_neighbor_items, None)),
                None => Err(self.dense_infeasible(method)),
            };
        }

        let disable_dense =
            method == TrainingMethod::Sparse || method == TrainingMethod::NearestNeighborsSparse;

        for _ in 0..MAX_APPROXIMATION_ATTEMPTS {
            let density = estimate_density(
                &work.stats.num_users,
                &stats.items_per_user,
                self.degree_approximation_threshold,
                self.options.sparse_density_estimation_sample_size,
                self.options.random_seed,
            );
            let bytes_per_cell = density
                * SPARSE_OVERHEAD_FACTOR
                * (mem::size_of::<(usize, usize)>() + mem::size_of::<S::Interaction>()) as f64;
            info!("Estimated sparse matrix density at {:.6}.", density);
            debug!("Bytes per item in sparse matrix = {:.3}", bytes_per_cell);

            let sparse_plan = plan_slices(
                work.num_items(),
                max_passes,
                bytes_per_cell,
                self.options.target_memory_usage,
            );
            match &sparse_plan {
                Some(plan) => debug!("Estimated {} passes needed for sparse matrix.", plan.len() - 1),
                None => debug!("Number of data passes too high for sparse matrix."),
            }

            if !disable_dense {
                // dense has the lower overhead per cell, favor it
                let allowed_passes = match &sparse_plan {
                    Some(plan) => (DENSE_PASS_FACTOR * (plan.len() - 1)).min(max_passes),
                    None => max_passes,
                };
                if let Some(num_passes) = self.try_dense(&work, allowed_passes) {
                    return Ok(Outcome::sliced(dense_method, num_passes, nearest_neighbor_items, None));
                }
            }

            if let Some(plan) = sparse_plan {
                let num_passes = plan.len() - 1;
                info!(
                    "Processing data in {} pass(es) using sparse lookup tables.",
                    num_passes
                );
                self.accumulate(&work, SparseMatrix::new(), &plan);
                return Ok(Outcome::sliced(
                    sparse_method,
                    num_passes,
                    nearest_neighbor_items,
                    Some(density),
                ));
            }

            if self.degree_approximation_threshold <= MIN_DEGREE_APPROXIMATION_THRESHOLD {
                break;
            }
            warn!(
                "Unable to fit dataset processing into limit of max_data_passes = {} and target_memory_usage = {} bytes. \
                 Employing more aggressive approximations; increase target_memory_usage or max_data_passes to avoid this.",
                max_passes, self.options.target_memory_usage
            );
            self.degree_approximation_threshold /= 2;
            warn!(
                "  Setting degree_approximation_threshold = {}",
                self.degree_approximation_threshold
            );
        }

        Err(SimilarityError::InfeasibleBudget(String::from(
            "Unable to determine reasonable way to run item similarity given constrained running parameters. \
             To fix, try: (1) increasing target_memory_usage, (2) increasing max_data_passes, \
             or (3) forcing nearest neighbors mode with training_method = nn.",
        )))
    }

    fn try_dense(&mut self, work: &Workset<S>, pass_limit: usize) -> Option<usize> {
        let bytes_per_cell = mem::size_of::<S::Interaction>() as f64;
        let plan = plan_slices(
            work.num_items(),
            pass_limit,
            bytes_per_cell,
            self.options.target_memory_usage,
        )?;
        let num_passes = plan.len() - 1;
        info!(
            "Processing data in {} pass(es) using dense lookup tables.",
            num_passes
        );
        self.accumulate(work, DenseTriangularMatrix::new(), &plan);
        Some(num_passes)
    }

    fn accumulate<M: InteractionMatrix<S::Interaction>>(
        &mut self,
        work: &Workset<S>,
        mut matrix: M,
        slice_boundaries: &[usize],
    ) {
        let num_passes = slice_boundaries.len() - 1;
        let work_per_pass = SliceAccumulator::<S>::work_per_pass(work.rows, self.degree_approximation_threshold);
        let progress = ProgressTracker::new(work_per_pass.saturating_mul(num_passes));
        progress.print_header();

        let accumulator = SliceAccumulator::new(
            self.similarity,
            work.stats,
            work.rows,
            work.mapper,
            &progress,
            self.degree_approximation_threshold,
            self.options.random_seed,
        );
        accumulator.run(&mut matrix, slice_boundaries, self.table);
        self.interaction_updates += accumulator.interaction_updates();

        progress.print_footer();
    }

    fn dense_infeasible(&self, method: TrainingMethod) -> SimilarityError {
        SimilarityError::InfeasibleBudget(format!(
            "Not enough allowed memory to use training_method = \"{}\" with max_data_passes = {}; \
             consider increasing target_memory_usage or max_data_passes.",
            method, self.options.max_data_passes
        ))
    }
}

impl Outcome {
    fn sliced(
        training_method: TrainingMethod,
        num_passes: usize,
        nearest_neighbor_items: usize,
        estimated_density: Option<f64>,
    ) -> Self {
        Outcome {
            training_method,
            num_passes,
            nearest_neighbor_items,
            estimated_density,
        }
    }
}

impl<S: Similarity> SimilarityLookup<S> {
    /// Builds the lookup from `rows` of `(item, value)` pairs over `num_items` items.
    pub fn train(
        similarity: S,
        options: SimilarityOptions,
        rows: &SparseRows,
        num_items: usize,
    ) -> Result<(Self, TrainingSummary)> {
        options.validate()?;
        let start_time = Instant::now();

        let by_item = rows.transpose(num_items)?;
        let stats = ItemStatistics::from_transposed(&similarity, &by_item, rows.row_lengths());
        info!(
            "Training {} similarity over {} users and {} items using training_method = {}.",
            similarity.name(),
            rows.num_rows().to_formatted_string(&Locale::en),
            num_items.to_formatted_string(&Locale::en),
            options.training_method
        );

        info!("Setting up lookup tables.");
        let table = NeighborTable::allocate(
            &similarity,
            &stats.final_item_data,
            options.max_item_neighborhood_size,
        )?;
        let max_item_neighborhood_size = table.capacity();

        let mut trainer = Trainer {
            similarity: &similarity,
            options: &options,
            table: &table,
            degree_approximation_threshold: options.degree_approximation_threshold,
            interaction_updates: 0,
        };
        let outcome = trainer.run(rows, &by_item, &stats)?;
        let degree_approximation_threshold = trainer.degree_approximation_threshold;
        let interaction_updates = trainer.interaction_updates;

        info!("Finalizing lookup tables.");
        let (boundaries, entries) = table.finalize(options.threshold);

        let summary = TrainingSummary {
            training_method: outcome.training_method,
            num_passes: outcome.num_passes,
            nearest_neighbor_items: outcome.nearest_neighbor_items,
            estimated_density: outcome.estimated_density,
            degree_approximation_threshold,
            max_item_neighborhood_size,
            interaction_updates,
            training_time: start_time.elapsed(),
        };
        info!(
            "Trained with training_method = {} in {} pass(es), {} interaction updates, {:.2}s.",
            summary.training_method,
            summary.num_passes,
            summary.interaction_updates.to_formatted_string(&Locale::en),
            summary.training_time.as_secs_f64()
        );

        let options = SimilarityOptions {
            max_item_neighborhood_size,
            degree_approximation_threshold,
            ..options
        };
        let final_item_data = stats.final_item_data;
        let lookup = SimilarityLookup {
            similarity,
            options,
            num_items,
            final_item_data,
            boundaries,
            entries,
        };
        Ok((lookup, summary))
    }

    /// Builds the lookup from externally computed `(item, similar_item, score)` triples.
    /// Self pairs are skipped; with `add_reverse` every pair is also inserted the other way.
    pub fn from_raw_similarities(
        similarity: S,
        options: SimilarityOptions,
        num_items: usize,
        final_item_data: Vec<S::FinalItemData>,
        triples: &[(usize, usize, f64)],
        add_reverse: bool,
    ) -> Result<Self> {
        options.validate()?;
        if final_item_data.len() != num_items {
            return Err(SimilarityError::invalid_option(
                "final_item_data",
                format!("{} values for {} items", final_item_data.len(), num_items),
            ));
        }

        if let Some((row, &(item, similar, _))) = triples
            .iter()
            .enumerate()
            .find(|(_, (item, similar, _))| *item >= num_items || *similar >= num_items)
        {
            return Err(SimilarityError::ItemOutOfRange {
                row,
                item: item.max(similar),
                num_items,
            });
        }

        let (boundaries, entries, max_item_neighborhood_size) = {
            let table = NeighborTable::allocate(
                &similarity,
                &final_item_data,
                options.max_item_neighborhood_size,
            )?;
            triples.par_iter().for_each(|&(item, similar, score)| {
                let value = similarity.import_interaction_value(score);
                table.insert(item, similar, value);
                if add_reverse {
                    table.insert(similar, item, value);
                }
            });
            let capacity = table.capacity();
            let (boundaries, entries) = table.finalize(options.threshold);
            (boundaries, entries, capacity)
        };

        Ok(SimilarityLookup {
            similarity,
            options: SimilarityOptions {
                max_item_neighborhood_size,
                ..options
            },
            num_items,
            final_item_data,
            boundaries,
            entries,
        })
    }
}

#[cfg(test)]
mod train_test {
    use float_cmp::approx_eq;

    use super::*;
    use crate::similarity::{CoOccurrence, Cosine, Jaccard, Pearson};
    use crate::sparsesim::test_support::{five_item_rows, init, random_rows, shuffled};

    fn options(training_method: TrainingMethod) -> SimilarityOptions {
        SimilarityOptions {
            training_method,
            ..SimilarityOptions::default()
        }
    }

    fn neighbor_ids<S: Similarity>(lookup: &SimilarityLookup<S>, item: usize) -> Vec<usize> {
        lookup.similar_items(item, usize::MAX).into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn should_rank_most_frequent_cooccurrences_first() {
        init();
        let options = SimilarityOptions {
            max_item_neighborhood_size: 2,
            threshold: 0.0,
            ..options(TrainingMethod::Dense)
        };
        let (lookup, summary) = SimilarityLookup::train(CoOccurrence, options, &five_item_rows(), 5).unwrap();
        assert_eq!(TrainingMethod::Dense, summary.training_method);
        assert_eq!(1, summary.num_passes);

        assert_eq!(vec![1, 2], neighbor_ids(&lookup, 0));
        assert_eq!(vec![0, 2], neighbor_ids(&lookup, 1));
        assert_eq!(vec![1, 0], neighbor_ids(&lookup, 2));
        assert_eq!(vec![1, 2], neighbor_ids(&lookup, 3));
        assert_eq!(vec![3], neighbor_ids(&lookup, 4));
        assert_eq!(vec![(1, 2.0), (2, 1.0)], lookup.similar_items(0, 5));
    }

    #[test]
    fn should_keep_invariants_on_random_data() {
        init();
        let rows = SparseRows::from_rows(random_rows(300, 120, 12, 3));
        let options = SimilarityOptions {
            max_item_neighborhood_size: 8,
            threshold: 0.05,
            ..options(TrainingMethod::Auto)
        };
        let (lookup, _) = SimilarityLookup::train(Jaccard, options, &rows, 120).unwrap();

        for window in lookup.boundaries().windows(2) {
            assert!(window[0] <= window[1]);
        }
        for item in 0..120 {
            let neighbors = lookup.neighbors(item);
            assert!(neighbors.len() <= 8);
            for pair in neighbors.windows(2) {
                assert!(pair[0].item < pair[1].item);
            }
            for neighbor in neighbors {
                assert_ne!(item, neighbor.item);
                assert!(neighbor.value > 0.05);
            }
        }
    }

    #[test]
    fn should_store_symmetric_values() {
        init();
        let rows = SparseRows::from_rows(random_rows(200, 60, 10, 5));
        let options = SimilarityOptions {
            // large enough to never evict
            max_item_neighborhood_size: 64,
            threshold: 0.0,
            ..options(TrainingMethod::Auto)
        };
        let (lookup, _) = SimilarityLookup::train(Cosine, options, &rows, 60).unwrap();
        for item in 0..60 {
            for neighbor in lookup.neighbors(item) {
                let reverse = lookup.interaction(neighbor.item, item).unwrap();
                assert!(approx_eq!(f64, neighbor.value, *reverse, epsilon = 1e-9));
            }
        }
    }

    #[test]
    fn should_not_depend_on_row_order_or_thread_count() {
        init();
        let raw = random_rows(400, 150, 15, 11);
        let options = SimilarityOptions {
            max_item_neighborhood_size: 6,
            threshold: 0.0,
            ..options(TrainingMethod::Auto)
        };

        let mut lookups = Vec::new();
        for (seed, num_threads) in [(1, 1), (2, 3), (3, 8)] {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
                .unwrap();
            let rows = shuffled(&raw, seed);
            let (lookup, _) = pool
                .install(|| SimilarityLookup::train(CoOccurrence, options.clone(), &rows, 150))
                .unwrap();
            lookups.push(lookup);
        }
        assert!(lookups[0].diff(&lookups[1]).is_empty());
        assert!(lookups[0].diff(&lookups[2]).is_empty());
    }

    #[test]
    fn should_match_dense_result_with_tiny_sparse_budget() {
        init();
        let rows = SparseRows::from_rows(random_rows(300, 100, 10, 21));
        let base = SimilarityOptions {
            max_item_neighborhood_size: 10,
            threshold: 0.0,
            ..SimilarityOptions::default()
        };

        let (dense, dense_summary) = SimilarityLookup::train(
            Jaccard,
            SimilarityOptions {
                training_method: TrainingMethod::Dense,
                ..base.clone()
            },
            &rows,
            100,
        )
        .unwrap();
        assert_eq!(1, dense_summary.num_passes);

        let (sparse, sparse_summary) = SimilarityLookup::train(
            Jaccard,
            SimilarityOptions {
                training_method: TrainingMethod::Sparse,
                target_memory_usage: 1024,
                ..base
            },
            &rows,
            100,
        )
        .unwrap();
        assert_eq!(TrainingMethod::Sparse, sparse_summary.training_method);
        assert!(sparse_summary.num_passes > 1, "passes {}", sparse_summary.num_passes);

        let diff = dense.diff(&sparse);
        assert!(diff.is_empty(), "{:?}", diff);
    }

    #[test]
    fn should_match_dense_result_with_nearest_neighbors() {
        init();
        let rows = SparseRows::from_rows(random_rows(300, 100, 10, 8));
        let base = SimilarityOptions {
            max_item_neighborhood_size: 100,
            // keep uncorrelated pairs, their sign depends on summation order
            threshold: -2.0,
            ..SimilarityOptions::default()
        };

        let (dense, _) = SimilarityLookup::train(
            Pearson,
            SimilarityOptions {
                training_method: TrainingMethod::Dense,
                ..base.clone()
            },
            &rows,
            100,
        )
        .unwrap();

        for method in [
            TrainingMethod::NearestNeighbors,
            TrainingMethod::NearestNeighborsDense,
            TrainingMethod::NearestNeighborsSparse,
        ] {
            let (other, summary) = SimilarityLookup::train(
                Pearson,
                SimilarityOptions {
                    training_method: method,
                    ..base.clone()
                },
                &rows,
                100,
            )
            .unwrap();
            assert_eq!(method, summary.training_method);
            assert!(summary.nearest_neighbor_items > 0);
            let diff = dense.diff(&other);
            assert!(diff.is_empty(), "{}: {:?}", method, diff);
        }
    }

    #[test]
    fn should_fail_when_forced_dense_does_not_fit() {
        let rows = SparseRows::from_rows(random_rows(50, 1000, 5, 1));
        let options = SimilarityOptions {
            target_memory_usage: 64,
            max_data_passes: 2,
            ..options(TrainingMethod::Dense)
        };
        match SimilarityLookup::train(Jaccard, options, &rows, 1000) {
            Err(SimilarityError::InfeasibleBudget(message)) => assert!(message.contains("dense")),
            _ => panic!("expected an infeasible budget"),
        }
    }

    #[test]
    fn should_fail_after_exhausting_approximations() {
        let rows = SparseRows::from_rows(random_rows(50, 1000, 5, 1));
        let options = SimilarityOptions {
            target_memory_usage: 1,
            max_data_passes: 1,
            ..options(TrainingMethod::Sparse)
        };
        assert!(matches!(
            SimilarityLookup::train(Jaccard, options, &rows, 1000),
            Err(SimilarityError::InfeasibleBudget(_))
        ));
    }

    #[test]
    fn should_reject_out_of_range_items() {
        let rows = SparseRows::from_rows(vec![vec![(0, 1.0), (5, 1.0)]]);
        assert!(matches!(
            SimilarityLookup::train(Jaccard, SimilarityOptions::default(), &rows, 3),
            Err(SimilarityError::ItemOutOfRange { row: 0, item: 5, num_items: 3 })
        ));
    }

    #[test]
    fn should_import_raw_similarities() {
        let triples = vec![(0, 1, 0.5), (0, 2, 0.25), (2, 2, 1.0), (3, 1, 0.75)];
        let lookup = SimilarityLookup::from_raw_similarities(
            Cosine,
            SimilarityOptions::default(),
            4,
            vec![(); 4],
            &triples,
            true,
        )
        .unwrap();
        assert_eq!(vec![(1, 0.5), (2, 0.25)], lookup.similar_items(0, 10));
        assert_eq!(vec![(3, 0.75), (0, 0.5)], lookup.similar_items(1, 10));
        assert_eq!(vec![(0, 0.25)], lookup.similar_items(2, 10));

        let out_of_range = SimilarityLookup::from_raw_similarities(
            Cosine,
            SimilarityOptions::default(),
            4,
            vec![(); 4],
            &[(0, 9, 1.0)],
            false,
        );
        assert!(out_of_range.is_err());
    }
}
