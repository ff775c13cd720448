use std::f64::consts::LN_2;

use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::prelude::*;

/// Above this many users the per-user item counts are subsampled.
const USER_COUNT_SAMPLE_SIZE: usize = 5000;

// Samples handled per seeded generator.
const SAMPLES_PER_CHUNK: usize = 256;

/// `ln(1 - exp(x))` for `x <= 0`, accurate near both ends of the range.
pub(crate) fn log1me(x: f64) -> f64 {
    if x > -LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

/// Estimates the fraction of item pairs that at least one user references together.
///
/// Each user is modelled as drawing its items independently, with replacement, according to
/// the marginal item frequencies; a user referencing more items than the degree approximation
/// threshold is clipped to that threshold, matching the pruning applied while accumulating.
/// For a sample of pairs `(i, j)` the probability that no user hits both is accumulated in
/// log space and the hit probabilities are averaged over the sampled pairs.
pub fn estimate_density(
    num_users_per_item: &[usize],
    items_per_user: &[usize],
    degree_approximation_threshold: usize,
    sample_size: usize,
    random_seed: u64,
) -> f64 {
    let num_items = num_users_per_item.len();
    let total: usize = num_users_per_item.iter().sum();
    if num_items == 0 || total == 0 || items_per_user.is_empty() {
        return 0.0;
    }

    // ln(1 - p_i)
    let item_log1mp: Vec<f64> = num_users_per_item
        .par_iter()
        .map(|&count| (-(count as f64 / total as f64)).ln_1p())
        .collect();

    let mut rng = Pcg64::seed_from_u64(random_seed);
    let (user_item_counts, mult_factor) = if items_per_user.len() > USER_COUNT_SAMPLE_SIZE {
        let sampled: Vec<usize> = (0..USER_COUNT_SAMPLE_SIZE)
            .map(|_| items_per_user[rng.gen_range(0..items_per_user.len())])
            .collect();
        let factor = items_per_user.len() as f64 / USER_COUNT_SAMPLE_SIZE as f64;
        (sampled, factor)
    } else {
        (items_per_user.to_vec(), 1.0)
    };

    let num_samples = sample_size.min(num_items.saturating_mul(num_items)).max(1);
    let chunk_seeds: Vec<u64> = (0..(num_samples + SAMPLES_PER_CHUNK - 1) / SAMPLES_PER_CHUNK)
        .map(|chunk| random_seed.wrapping_add(1 + chunk as u64))
        .collect();

    let chunk_probabilities: Vec<f64> = chunk_seeds
        .par_iter()
        .enumerate()
        .map(|(chunk, &seed)| {
            let mut rng = Pcg64::seed_from_u64(seed);
            let start = chunk * SAMPLES_PER_CHUNK;
            let end = (start + SAMPLES_PER_CHUNK).min(num_samples);
            (start..end)
                .map(|_| {
                    let i = rng.gen_range(0..num_items);
                    let j = rng.gen_range(0..num_items);
                    let log_miss: f64 = user_item_counts
                        .iter()
                        .map(|&count| {
                            let clipped = count.min(degree_approximation_threshold) as f64;
                            let log_hit = log1me((-1e-16_f64).min(clipped * item_log1mp[i]))
                                + log1me((-1e-16_f64).min(clipped * item_log1mp[j]));
                            mult_factor * log1me(log_hit.min(-1e-16))
                        })
                        .sum();
                    -log_miss.exp_m1()
                })
                .sum::<f64>()
        })
        .collect();
    // summed in chunk order, so a seed always gives the same estimate
    let total_probability: f64 = chunk_probabilities.iter().sum();

    (total_probability / num_samples as f64).clamp(0.0, 1.0)
}
