#[macro_use]
extern crate bencher;

use bencher::Bencher;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use itemsim::similarity::Jaccard;
use itemsim::{SimilarityLookup, SimilarityOptions, SparseRows, TrainingMethod};

benchmark_group!(
    benches,
    bench_train_dense,
    bench_train_sparse,
    bench_train_nearest_neighbors,
    bench_recommend
);
benchmark_main!(benches);

const NUM_USERS: usize = 5_000;
const NUM_ITEMS: usize = 2_000;
const MAX_ITEMS_PER_USER: usize = 40;

fn random_rows() -> SparseRows {
    let mut rng = Pcg64::seed_from_u64(42);
    let rows: Vec<Vec<(usize, f64)>> = (0..NUM_USERS)
        .map(|_| {
            let length = rng.gen_range(1..MAX_ITEMS_PER_USER);
            (0..length)
                .map(|_| {
                    // popular items first
                    let u: f64 = rng.gen();
                    (((u * u) * NUM_ITEMS as f64) as usize, 1.0)
                })
                .collect()
        })
        .collect();
    SparseRows::from_rows(rows)
}

fn train_with(bench: &mut Bencher, training_method: TrainingMethod) {
    let rows = random_rows();
    let options = SimilarityOptions {
        training_method,
        target_memory_usage: 4 * 1024 * 1024,
        ..SimilarityOptions::default()
    };
    bench.iter(|| {
        let trained = SimilarityLookup::train(Jaccard, options.clone(), &rows, NUM_ITEMS);
        bencher::black_box(trained.map(|(lookup, _)| lookup.num_entries()).unwrap_or(0));
    });
}

fn bench_train_dense(bench: &mut Bencher) {
    train_with(bench, TrainingMethod::Dense);
}

fn bench_train_sparse(bench: &mut Bencher) {
    train_with(bench, TrainingMethod::Sparse);
}

fn bench_train_nearest_neighbors(bench: &mut Bencher) {
    train_with(bench, TrainingMethod::NearestNeighborsDense);
}

fn bench_recommend(bench: &mut Bencher) {
    let rows = random_rows();
    let (lookup, _) = match SimilarityLookup::train(Jaccard, SimilarityOptions::default(), &rows, NUM_ITEMS) {
        Ok(trained) => trained,
        Err(e) => panic!("training failed: {}", e),
    };
    let mut scratch = lookup.new_scratch();
    let mut user = 0;
    bench.iter(|| {
        user = (user + 1) % rows.num_rows();
        bencher::black_box(lookup.recommend(&mut scratch, rows.row(user), 21, true));
    });
}
