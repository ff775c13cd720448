use crate::rows::SparseRows;

/// Translates between the item indices of the input data and the compacted indices of the
/// items still left to process.
pub(crate) struct IndexMapper {
    internal_to_data: Vec<usize>,
    data_to_internal: Vec<Option<usize>>,
}

impl IndexMapper {
    pub fn identity(num_items: usize) -> Self {
        IndexMapper {
            internal_to_data: (0..num_items).collect(),
            data_to_internal: (0..num_items).map(Some).collect(),
        }
    }

    /// Keeps the items whose flag is set, preserving their relative order.
    pub fn from_mask(keep: &[bool]) -> Self {
        let mut internal_to_data = Vec::new();
        let data_to_internal = keep
            .iter()
            .enumerate()
            .map(|(item, &kept)| {
                if kept {
                    internal_to_data.push(item);
                    Some(internal_to_data.len() - 1)
                } else {
                    None
                }
            })
            .collect();

        IndexMapper {
            internal_to_data,
            data_to_internal,
        }
    }

    pub fn num_internal(&self) -> usize {
        self.internal_to_data.len()
    }

    pub fn to_data(&self, internal: usize) -> usize {
        self.internal_to_data[internal]
    }

    pub fn to_internal(&self, data: usize) -> Option<usize> {
        self.data_to_internal.get(data).copied().flatten()
    }

    /// Rewrites every row to internal indices, dropping the items that are not kept.
    pub fn remap_rows(&self, rows: &SparseRows) -> SparseRows {
        SparseRows::from_rows(rows.iter().map(|row| {
            row.iter()
                .filter_map(|&(item, value)| self.to_internal(item).map(|internal| (internal, value)))
                .collect::<Vec<_>>()
        }))
    }
}

#[cfg(test)]
mod index_mapper_test {
    use super::*;

    #[test]
    fn should_map_both_ways() {
        let mapper = IndexMapper::from_mask(&[false, true, true, false, true]);
        assert_eq!(3, mapper.num_internal());
        assert_eq!(vec![1, 2, 4], (0..3).map(|i| mapper.to_data(i)).collect::<Vec<_>>());
        assert_eq!(None, mapper.to_internal(0));
        assert_eq!(Some(2), mapper.to_internal(4));
        assert_eq!(None, mapper.to_internal(17));
    }

    #[test]
    fn should_remap_rows() {
        let mapper = IndexMapper::from_mask(&[false, true, true]);
        let rows = SparseRows::from_rows(vec![vec![(0, 1.0), (2, 3.0)], vec![(0, 1.0)]]);
        let remapped = mapper.remap_rows(&rows);
        assert_eq!(2, remapped.num_rows());
        assert_eq!(&[(1, 3.0)], remapped.row(0));
        assert!(remapped.row(1).is_empty());
        assert_eq!(Some(4), IndexMapper::identity(5).to_internal(4));
    }
}
