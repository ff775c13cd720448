use rayon::prelude::*;

use crate::error::Result;
use crate::rows::SparseRows;
use crate::similarity::Similarity;

/// Per-item statistics computed once before training and never mutated afterwards.
pub struct ItemStatistics<S: Similarity> {
    /// Number of users referencing each item.
    pub num_users: Vec<usize>,
    pub item_data: Vec<S::ItemData>,
    pub final_item_data: Vec<S::FinalItemData>,
    /// Number of items referenced by each user, indexed by row.
    pub items_per_user: Vec<usize>,
}

impl<S: Similarity> ItemStatistics<S> {
    pub fn compute(similarity: &S, rows: &SparseRows, num_items: usize) -> Result<Self> {
        let by_item = rows.transpose(num_items)?;
        Ok(Self::from_transposed(similarity, &by_item, rows.row_lengths()))
    }

    /// Computes the statistics from the item → users view.
    pub fn from_transposed(similarity: &S, by_item: &SparseRows, items_per_user: Vec<usize>) -> Self {
        let num_rows = items_per_user.len();

        let per_item: Vec<(usize, S::ItemData, S::FinalItemData)> = by_item
            .par_rows()
            .map(|(_, users)| {
                let mut data = S::ItemData::default();
                for &(_, value) in users {
                    similarity.import_item_value(&mut data, value);
                }
                let final_data = similarity.finalize_item_data(&data, num_rows);
                (users.len(), data, final_data)
            })
            .collect();

        let mut num_users = Vec::with_capacity(per_item.len());
        let mut item_data = Vec::with_capacity(per_item.len());
        let mut final_item_data = Vec::with_capacity(per_item.len());
        for (count, data, final_data) in per_item {
            num_users.push(count);
            item_data.push(data);
            final_item_data.push(final_data);
        }

        ItemStatistics {
            num_users,
            item_data,
            final_item_data,
            items_per_user,
        }
    }

    pub fn num_items(&self) -> usize {
        self.num_users.len()
    }

    pub fn total_references(&self) -> usize {
        self.num_users.iter().sum()
    }

    /// Keeps only the items for which `keep` is set, in order.
    pub(crate) fn retain_mask(&self, keep: &[bool]) -> Self {
        let pick = |i: &usize| keep[*i];
        let kept: Vec<usize> = (0..self.num_items()).filter(pick).collect();
        ItemStatistics {
            num_users: kept.iter().map(|&i| self.num_users[i]).collect(),
            item_data: kept.iter().map(|&i| self.item_data[i].clone()).collect(),
            final_item_data: kept.iter().map(|&i| self.final_item_data[i].clone()).collect(),
            items_per_user: self.items_per_user.clone(),
        }
    }
}
