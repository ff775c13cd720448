use std::sync::Once;

use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::rows::SparseRows;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or("debug");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}

/// Random rows with a skewed item popularity: low item indices are referenced far more often.
pub fn random_rows(num_users: usize, num_items: usize, max_items_per_user: usize, seed: u64) -> Vec<Vec<(usize, f64)>> {
    let mut rng = Pcg64::seed_from_u64(seed);
    (0..num_users)
        .map(|_| {
            let length = rng.gen_range(1..=max_items_per_user);
            let mut row: Vec<(usize, f64)> = (0..length)
                .map(|_| {
                    let u: f64 = rng.gen();
                    let item = ((u * u) * num_items as f64) as usize;
                    (item.min(num_items - 1), rng.gen_range(1..=5) as f64)
                })
                .collect();
            // shuffled copies must not depend on which duplicate comes last
            row.sort_by_key(|(item, _)| *item);
            row.dedup_by_key(|(item, _)| *item);
            row
        })
        .collect()
}

pub fn shuffled(rows: &[Vec<(usize, f64)>], seed: u64) -> SparseRows {
    let mut rows = rows.to_vec();
    let mut rng = Pcg64::seed_from_u64(seed);
    rows.shuffle(&mut rng);
    for row in rows.iter_mut() {
        row.shuffle(&mut rng);
    }
    SparseRows::from_rows(rows)
}

/// Five items, four users; the co-occurrence counts are
/// (0,1) = 2, (0,2) = 1, (1,2) = 2, (1,3) = 1, (2,3) = 1, (3,4) = 1.
pub fn five_item_rows() -> SparseRows {
    SparseRows::from_rows(vec![
        vec![(0, 1.0), (1, 1.0), (2, 1.0)],
        vec![(0, 1.0), (1, 1.0)],
        vec![(1, 1.0), (2, 1.0), (3, 1.0)],
        vec![(3, 1.0), (4, 1.0)],
    ])
}
