use hashbrown::HashMap;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::sparsesim::hash64;

const NUM_SHARDS: usize = 1024;

/// The upper-triangular accumulator of one slice.
///
/// Coordinates are relative to the first item of the slice: `row` is in `[0, height)` and
/// `col` in `(row, width)`. Cells are updated concurrently through `apply`; both containers
/// synchronize internally.
pub(crate) trait InteractionMatrix<T>: Sync {
    /// Clears all cells and resizes for a new slice.
    fn reset(&mut self, height: usize, width: usize);

    fn apply<F: FnOnce(&mut T)>(&self, row: usize, col: usize, update: F);

    /// Visits every cell that differs from the default value, in parallel.
    fn for_each_populated<F>(&mut self, visit: F)
    where
        F: Fn(usize, usize, &T) + Sync + Send;
}

/// Row-major storage of the whole triangle of a slice. Row `r` holds the cells `(r, r + 1)`
/// up to `(r, width - 1)` behind its own lock.
pub(crate) struct DenseTriangularMatrix<T> {
    rows: Vec<Mutex<Vec<T>>>,
}

impl<T> DenseTriangularMatrix<T> {
    pub fn new() -> Self {
        DenseTriangularMatrix { rows: Vec::new() }
    }
}

impl<T: Clone + Default + PartialEq + Send + Sync> InteractionMatrix<T> for DenseTriangularMatrix<T> {
    fn reset(&mut self, height: usize, width: usize) {
        self.rows.truncate(height);
        for (row, cells) in self.rows.iter_mut().enumerate() {
            let cells = cells.get_mut();
            cells.clear();
            cells.resize(width.saturating_sub(row + 1), T::default());
        }
        for row in self.rows.len()..height {
            self.rows
                .push(Mutex::new(vec![T::default(); width.saturating_sub(row + 1)]));
        }
    }

    fn apply<F: FnOnce(&mut T)>(&self, row: usize, col: usize, update: F) {
        let mut cells = self.rows[row].lock();
        update(&mut cells[col - row - 1]);
    }

    fn for_each_populated<F>(&mut self, visit: F)
    where
        F: Fn(usize, usize, &T) + Sync + Send,
    {
        let empty = T::default();
        self.rows
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, cells)| {
                for (offset, cell) in cells.get_mut().iter().enumerate() {
                    if *cell != empty {
                        visit(row, row + 1 + offset, cell);
                    }
                }
            });
    }
}

/// Hash map storage for sparse slices, striped over a fixed number of locked shards.
pub(crate) struct SparseMatrix<T> {
    shards: Vec<Mutex<HashMap<(usize, usize), T>>>,
}

impl<T> SparseMatrix<T> {
    pub fn new() -> Self {
        SparseMatrix {
            shards: (0..NUM_SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, row: usize, col: usize) -> &Mutex<HashMap<(usize, usize), T>> {
        &self.shards[hash64(row as u64, col as u64) as usize % NUM_SHARDS]
    }
}

impl<T: Clone + Default + PartialEq + Send + Sync> InteractionMatrix<T> for SparseMatrix<T> {
    fn reset(&mut self, _height: usize, _width: usize) {
        for shard in self.shards.iter_mut() {
            shard.get_mut().clear();
        }
    }

    fn apply<F: FnOnce(&mut T)>(&self, row: usize, col: usize, update: F) {
        let mut shard = self.shard(row, col).lock();
        update(shard.entry((row, col)).or_default());
    }

    fn for_each_populated<F>(&mut self, visit: F)
    where
        F: Fn(usize, usize, &T) + Sync + Send,
    {
        let empty = T::default();
        self.shards.par_iter_mut().for_each(|shard| {
            shard
                .get_mut()
                .par_iter()
                .filter(|(_, cell)| **cell != empty)
                .for_each(|(&(row, col), cell)| visit(row, col, cell));
        });
    }
}

#[cfg(test)]
mod matrix_test {
    use parking_lot::Mutex;

    use super::*;

    fn populated<M: InteractionMatrix<u64>>(matrix: &mut M) -> Vec<(usize, usize, u64)> {
        let cells = Mutex::new(Vec::new());
        matrix.for_each_populated(|row, col, value| cells.lock().push((row, col, *value)));
        let mut cells = cells.into_inner();
        cells.sort_unstable();
        cells
    }

    fn exercise<M: InteractionMatrix<u64>>(mut matrix: M) {
        matrix.reset(3, 5);
        (0..100).into_par_iter().for_each(|_| matrix.apply(0, 4, |cell| *cell += 1));
        matrix.apply(2, 3, |cell| *cell += 5);
        matrix.apply(1, 2, |_| {});
        assert_eq!(vec![(0, 4, 100), (2, 3, 5)], populated(&mut matrix));

        matrix.reset(2, 2);
        matrix.apply(0, 1, |cell| *cell = 7);
        assert_eq!(vec![(0, 1, 7)], populated(&mut matrix));
    }

    #[test]
    fn should_accumulate_dense_cells() {
        exercise(DenseTriangularMatrix::new());
    }

    #[test]
    fn should_accumulate_sparse_cells() {
        exercise(SparseMatrix::new());
    }
}
