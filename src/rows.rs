use rayon::prelude::*;
use tdigest::TDigest;

use crate::error::{Result, SimilarityError};

/// Compressed sparse row store of `(item, value)` pairs, one row per user.
///
/// Every row is sorted by item index and holds each item at most once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseRows {
    offsets: Vec<usize>,
    entries: Vec<(usize, f64)>,
}

impl SparseRows {
    /// Builds the store from arbitrary rows. Rows are sorted by item; if an item occurs more
    /// than once in a row, the last value wins.
    pub fn from_rows<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (usize, f64)>,
    {
        let mut offsets = vec![0];
        let mut entries = Vec::new();
        let mut row_buffer: Vec<(usize, f64)> = Vec::new();

        for row in rows {
            row_buffer.clear();
            row_buffer.extend(row);
            // stable, so duplicates keep their input order
            row_buffer.sort_by_key(|(item, _)| *item);

            let row_start = entries.len();
            for &(item, value) in &row_buffer {
                let duplicate = entries.len() > row_start
                    && entries.last().map(|(last_item, _)| *last_item) == Some(item);
                match entries.last_mut() {
                    Some(last) if duplicate => last.1 = value,
                    _ => entries.push((item, value)),
                }
            }
            offsets.push(entries.len());
        }

        SparseRows { offsets, entries }
    }

    pub fn num_rows(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn row(&self, row: usize) -> &[(usize, f64)] {
        &self.entries[self.offsets[row]..self.offsets[row + 1]]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[(usize, f64)]> + '_ {
        (0..self.num_rows()).map(move |row| self.row(row))
    }

    /// Parallel iterator over `(row_index, row)`.
    pub fn par_rows(&self) -> impl IndexedParallelIterator<Item = (usize, &[(usize, f64)])> + '_ {
        (0..self.num_rows())
            .into_par_iter()
            .map(move |row| (row, self.row(row)))
    }

    /// One past the largest item index referenced, or zero for an empty store.
    pub fn num_items(&self) -> usize {
        self.entries
            .par_iter()
            .map(|(item, _)| item + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn row_lengths(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Fails on the first row referencing an item outside `[0, num_items)`.
    pub fn validate(&self, num_items: usize) -> Result<()> {
        let offending = self
            .par_rows()
            .filter_map(|(row, entries)| {
                // rows are sorted, the last entry holds the largest index
                entries
                    .last()
                    .filter(|(item, _)| *item >= num_items)
                    .map(|(item, _)| (row, *item))
            })
            .min();

        match offending {
            Some((row, item)) => Err(SimilarityError::ItemOutOfRange {
                row,
                item,
                num_items,
            }),
            None => Ok(()),
        }
    }

    /// The item → users view. Row `i` of the result lists `(user, value)` for item `i`,
    /// sorted by user.
    pub fn transpose(&self, num_items: usize) -> Result<SparseRows> {
        self.validate(num_items)?;

        let mut offsets = vec![0_usize; num_items + 1];
        for (item, _) in &self.entries {
            offsets[item + 1] += 1;
        }
        for i in 0..num_items {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut entries = vec![(0_usize, 0.0_f64); self.entries.len()];
        for (user, row) in self.iter().enumerate() {
            for &(item, value) in row {
                entries[cursor[item]] = (user, value);
                cursor[item] += 1;
            }
        }

        Ok(SparseRows { offsets, entries })
    }

    pub fn stats(&self) -> InteractionStats {
        let lengths: Vec<f64> = self.row_lengths().into_iter().map(|l| l as f64).collect();
        let no_rows = lengths.is_empty();
        let digest = TDigest::new_with_size(100).merge_unsorted(lengths);
        let percentile = |q: f64| {
            if no_rows {
                0
            } else {
                digest.estimate_quantile(q).round() as usize
            }
        };

        InteractionStats {
            num_rows: self.num_rows(),
            num_items: self.num_items(),
            num_entries: self.num_entries(),
            items_per_row_p50: percentile(0.5),
            items_per_row_p90: percentile(0.9),
            items_per_row_p99: percentile(0.99),
            items_per_row_max: self.row_lengths().into_iter().max().unwrap_or(0),
        }
    }
}

pub struct InteractionStats {
    pub num_rows: usize,
    pub num_items: usize,
    pub num_entries: usize,
    pub items_per_row_p50: usize,
    pub items_per_row_p90: usize,
    pub items_per_row_p99: usize,
    pub items_per_row_max: usize,
}

#[cfg(test)]
mod rows_test {
    use super::*;

    #[test]
    fn should_sort_rows_and_keep_last_duplicate() {
        let rows = SparseRows::from_rows(vec![vec![(3, 1.0), (1, 2.0), (3, 5.0)], vec![], vec![(0, 1.0)]]);
        assert_eq!(3, rows.num_rows());
        assert_eq!(&[(1, 2.0), (3, 5.0)], rows.row(0));
        assert!(rows.row(1).is_empty());
        assert_eq!(vec![2, 0, 1], rows.row_lengths());
        assert_eq!(4, rows.num_items());
    }

    #[test]
    fn should_report_first_out_of_range_row() {
        let rows = SparseRows::from_rows(vec![vec![(0, 1.0)], vec![(7, 1.0)], vec![(9, 1.0)]]);
        match rows.validate(5) {
            Err(SimilarityError::ItemOutOfRange { row, item, num_items }) => {
                assert_eq!((1, 7, 5), (row, item, num_items));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(rows.validate(10).is_ok());
    }

    #[test]
    fn should_transpose_to_items_by_user() {
        let rows = SparseRows::from_rows(vec![vec![(0, 1.0), (2, 3.0)], vec![(2, 4.0)]]);
        let by_item = rows.transpose(3).unwrap();
        assert_eq!(3, by_item.num_rows());
        assert_eq!(&[(0, 1.0)], by_item.row(0));
        assert!(by_item.row(1).is_empty());
        assert_eq!(&[(0, 3.0), (1, 4.0)], by_item.row(2));
    }

    #[test]
    fn should_summarize_row_lengths() {
        let rows = SparseRows::from_rows((0..10).map(|n| (0..n).map(|i| (i, 1.0)).collect::<Vec<_>>()));
        let stats = rows.stats();
        assert_eq!(10, stats.num_rows);
        assert_eq!(9, stats.num_items);
        assert_eq!(45, stats.num_entries);
        assert_eq!(9, stats.items_per_row_max);
    }
}
