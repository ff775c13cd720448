use std::cmp::Reverse;

use log::info;
use num_format::{Locale, ToFormattedString};
use rayon::prelude::*;

use crate::rows::SparseRows;
use crate::similarity::Similarity;
use crate::sparsesim::item_stats::ItemStatistics;
use crate::sparsesim::neighbor_table::NeighborTable;
use crate::sparsesim::options::TrainingMethod;
use crate::sparsesim::progress::ProgressTracker;

/// Items referenced by more than `num_users / USER_COUNT_RATIO` users are searched directly.
const USER_COUNT_RATIO: usize = 32;
/// The transpose only pays off for a minimum number of items.
const MIN_ITEMS: usize = 32;

const NOT_OCCUPIED: isize = -1;
const NO_HEAD: isize = -2;

/// Picks the items resolved by brute force search. Returns the selection mask and its size.
pub(crate) fn select_items(
    num_users_per_item: &[usize],
    num_users: usize,
    training_method: TrainingMethod,
) -> (Vec<bool>, usize) {
    let num_items = num_users_per_item.len();
    let mut min_items = MIN_ITEMS.min(num_items);
    let user_count_threshold = num_users / USER_COUNT_RATIO;

    let mut selected: Vec<bool> = num_users_per_item
        .iter()
        .map(|&count| count > user_count_threshold)
        .collect();
    let mut num_selected = selected.iter().filter(|&&s| s).count();

    match training_method {
        TrainingMethod::NearestNeighbors => return (vec![true; num_items], num_items),
        TrainingMethod::Auto => {
            if num_selected == 0 {
                return (selected, 0);
            }
            // few enough items to handle all of them
            if min_items == num_items {
                return (vec![true; num_items], num_items);
            }
        }
        _ => {
            // leave some items for the slicing stage
            if min_items == num_items {
                min_items /= 2;
            }
            if num_selected == num_items {
                num_selected = 0;
            }
        }
    }

    if min_items == 0 {
        return (vec![false; num_items], 0);
    }

    if num_selected < min_items {
        let mut by_popularity: Vec<(Reverse<usize>, usize)> = num_users_per_item
            .iter()
            .enumerate()
            .map(|(item, &count)| (Reverse(count), item))
            .collect();
        by_popularity.select_nth_unstable(min_items - 1);

        selected = vec![false; num_items];
        for &(_, item) in &by_popularity[..min_items] {
            selected[item] = true;
        }
        num_selected = min_items;
    }

    (selected, num_selected)
}

/// Dense accumulator for the interactions of one query item, threading the touched cells
/// through a linked list so clearing costs only what was touched.
struct RowAccumulator<T> {
    cells: Vec<T>,
    next: Vec<isize>,
    head: isize,
}

impl<T: Clone + Default> RowAccumulator<T> {
    fn new(num_items: usize) -> Self {
        RowAccumulator {
            cells: vec![T::default(); num_items],
            next: vec![NOT_OCCUPIED; num_items],
            head: NO_HEAD,
        }
    }

    fn cell(&mut self, column: usize) -> &mut T {
        if self.next[column] == NOT_OCCUPIED {
            self.next[column] = self.head;
            self.head = column as isize;
        }
        &mut self.cells[column]
    }

    fn drain<F: FnMut(usize, &T)>(&mut self, mut visit: F) {
        while self.head != NO_HEAD {
            let column = self.head as usize;
            visit(column, &self.cells[column]);
            self.head = self.next[column];
            self.cells[column] = T::default();
            self.next[column] = NOT_OCCUPIED;
        }
    }
}

/// Resolves the full neighbor lists of the selected items by brute force search over the
/// item → users view, inserting both orderings of every pair into the table.
///
/// A pair of two selected items is computed once, by the smaller of the two.
pub(crate) fn search<S: Similarity>(
    similarity: &S,
    stats: &ItemStatistics<S>,
    rows: &SparseRows,
    by_item: &SparseRows,
    selected: &[bool],
    table: &NeighborTable<S>,
    progress: &ProgressTracker,
) -> usize {
    let num_items = stats.num_items();
    let query_items: Vec<usize> = (0..num_items).filter(|&item| selected[item]).collect();
    info!(
        "Processing the {} most common items by brute force search.",
        query_items.len().to_formatted_string(&Locale::en)
    );

    let skip_pair = |query: usize, reference: usize| {
        query == reference || (query < reference && selected[reference])
    };

    query_items
        .par_iter()
        .map_init(
            || RowAccumulator::<S::Interaction>::new(num_items),
            |accumulator, &query| {
                let mut updates = 0;
                for &(user, query_value) in by_item.row(query) {
                    for &(reference, reference_value) in rows.row(user) {
                        if skip_pair(query, reference) {
                            continue;
                        }
                        let interaction = accumulator.cell(reference);
                        if query < reference {
                            similarity.update_interaction(
                                interaction,
                                &stats.item_data[query],
                                &stats.item_data[reference],
                                query_value,
                                reference_value,
                            );
                        } else {
                            similarity.update_interaction(
                                interaction,
                                &stats.item_data[reference],
                                &stats.item_data[query],
                                reference_value,
                                query_value,
                            );
                        }
                        updates += 1;
                    }
                }

                accumulator.drain(|reference, interaction| {
                    let (a, b) = (query.min(reference), query.max(reference));
                    let value = similarity.finalize_interaction(
                        interaction,
                        &stats.item_data[a],
                        &stats.item_data[b],
                        &stats.final_item_data[a],
                        &stats.final_item_data[b],
                    );
                    table.insert(a, b, value);
                    table.insert(b, a, value);
                });

                progress.increment(1);
                updates
            },
        )
        .sum()
}

#[cfg(test)]
mod nearest_neighbors_test {
    use super::*;
    use crate::similarity::Jaccard;
    use crate::sparsesim::accumulate::SliceAccumulator;
    use crate::sparsesim::index_mapper::IndexMapper;
    use crate::sparsesim::matrix::DenseTriangularMatrix;

    #[test]
    fn should_select_everything_for_forced_nn() {
        let (selected, count) = select_items(&[1, 2, 3], 3, TrainingMethod::NearestNeighbors);
        assert_eq!(vec![true; 3], selected);
        assert_eq!(3, count);
    }

    #[test]
    fn should_skip_when_no_item_is_popular() {
        let counts = vec![1; 100];
        let (selected, count) = select_items(&counts, 64 * 32, TrainingMethod::Auto);
        assert_eq!(0, count);
        assert!(selected.iter().all(|s| !s));
    }

    #[test]
    fn should_top_up_to_the_most_popular_items() {
        let mut counts = vec![1; 100];
        counts[17] = 1000;
        for item in 50..80 {
            counts[item] = 10 + item;
        }
        let (selected, count) = select_items(&counts, 3200, TrainingMethod::Auto);
        assert_eq!(MIN_ITEMS, count);
        assert!(selected[17]);
        assert!((50..80).all(|item| selected[item]));
        assert_eq!(MIN_ITEMS, selected.iter().filter(|&&s| s).count());
    }

    #[test]
    fn should_leave_items_for_slicing_when_forced_partially() {
        let counts = vec![5; 10];
        let (selected, count) = select_items(&counts, 10, TrainingMethod::NearestNeighborsDense);
        assert_eq!(5, count);
        assert_eq!(5, selected.iter().filter(|&&s| s).count());
    }

    #[test]
    fn should_match_slice_accumulation() {
        let rows = SparseRows::from_rows(vec![
            vec![(0, 1.0), (1, 1.0), (2, 1.0), (5, 1.0)],
            vec![(1, 1.0), (2, 1.0), (4, 1.0)],
            vec![(0, 1.0), (3, 1.0), (4, 1.0), (5, 1.0)],
            vec![(2, 1.0), (3, 1.0)],
            vec![(1, 1.0), (5, 1.0)],
        ]);
        let num_items = 6;
        let stats = ItemStatistics::compute(&Jaccard, &rows, num_items).unwrap();
        let by_item = rows.transpose(num_items).unwrap();
        let progress = ProgressTracker::new(1);

        let brute_force = NeighborTable::allocate(&Jaccard, &stats.final_item_data, 16).unwrap();
        let selected = vec![true, false, true, false, false, true];
        search(&Jaccard, &stats, &rows, &by_item, &selected, &brute_force, &progress);

        // the remaining items go through the slicing path
        let mapper = IndexMapper::from_mask(&selected.iter().map(|s| !s).collect::<Vec<_>>());
        let remaining_rows = mapper.remap_rows(&rows);
        let keep: Vec<bool> = selected.iter().map(|s| !s).collect();
        let remaining_stats = stats.retain_mask(&keep);
        let accumulator = SliceAccumulator::new(
            &Jaccard,
            &remaining_stats,
            &remaining_rows,
            &mapper,
            &progress,
            4096,
            0,
        );
        accumulator.run(&mut DenseTriangularMatrix::new(), &[0, 3], &brute_force);

        let reference = NeighborTable::allocate(&Jaccard, &stats.final_item_data, 16).unwrap();
        let full_mapper = IndexMapper::identity(num_items);
        let full = SliceAccumulator::new(&Jaccard, &stats, &rows, &full_mapper, &progress, 4096, 0);
        full.run(&mut DenseTriangularMatrix::new(), &[0, num_items], &reference);

        assert_eq!(reference.finalize(0.0), brute_force.finalize(0.0));
    }
}
