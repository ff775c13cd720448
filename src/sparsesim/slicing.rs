/// Partitions the upper triangle of an `num_items × num_items` matrix into horizontal slices
/// of consecutive rows, each holding roughly `memory_budget / bytes_per_cell` cells.
///
/// Returns the slice boundaries `[0, .., num_items]`, or `None` when more than `max_passes`
/// slices would be needed. Row `a` of the triangle holds the cells `(a, b)` with `b > a`.
/// Every slice holds at least one row, so a slice is never smaller than the budget allows
/// for a single full row.
pub fn plan_slices(
    num_items: usize,
    max_passes: usize,
    bytes_per_cell: f64,
    memory_budget: usize,
) -> Option<Vec<usize>> {
    if num_items == 0 {
        return Some(vec![0, 0]);
    }

    let target_cells_per_slice = if bytes_per_cell > 0.0 {
        let cells = (memory_budget as f64 / bytes_per_cell).ceil();
        // at least one full row per slice
        if cells >= usize::MAX as f64 {
            usize::MAX
        } else {
            (cells as usize).max(num_items)
        }
    } else {
        usize::MAX
    };

    let mut boundaries = vec![0];
    let mut cells_in_slice = 0_usize;
    for row in 0..num_items {
        let row_cells = num_items - row - 1;
        let slice_start = *boundaries.last().unwrap_or(&0);
        if row > slice_start && cells_in_slice.saturating_add(row_cells) > target_cells_per_slice {
            boundaries.push(row);
            cells_in_slice = 0;
            if boundaries.len() - 1 >= max_passes {
                return None;
            }
        }
        cells_in_slice += row_cells;
    }
    boundaries.push(num_items);

    if boundaries.len() - 1 > max_passes {
        None
    } else {
        Some(boundaries)
    }
}

#[cfg(test)]
mod slicing_test {
    use super::*;

    #[test]
    fn should_use_one_slice_when_everything_fits() {
        assert_eq!(Some(vec![0, 100]), plan_slices(100, 4, 8.0, 1 << 20));
    }

    #[test]
    fn should_split_into_balanced_slices() {
        // 10 items hold 45 cells; 10 cells per slice
        let boundaries = plan_slices(10, 100, 1.0, 10).unwrap();
        assert_eq!(0, boundaries[0]);
        assert_eq!(10, *boundaries.last().unwrap());
        assert!(boundaries.len() > 3);
        for slice in boundaries.windows(2) {
            assert!(slice[0] < slice[1]);
            let cells: usize = (slice[0]..slice[1]).map(|row| 10 - row - 1).sum();
            // a single row may exceed the budget
            assert!(cells <= 10 || slice[1] - slice[0] == 1);
        }
    }

    #[test]
    fn should_report_infeasible_pass_budget() {
        assert_eq!(None, plan_slices(1000, 2, 1.0, 1000));
        assert!(plan_slices(1000, 1000, 1.0, 1000).is_some());
    }

    #[test]
    fn should_treat_free_cells_as_one_slice() {
        assert_eq!(Some(vec![0, 5]), plan_slices(5, 1, 0.0, 1));
    }

    #[test]
    fn should_handle_no_items() {
        assert_eq!(Some(vec![0, 0]), plan_slices(0, 1, 8.0, 1));
    }
}
