use std::fs::File;
use std::io::BufReader;

use anyhow::{bail, Context};
use csv::WriterBuilder;
use hashbrown::HashMap;
use log::info;

use itemsim::config::AppConfig;
use itemsim::io;
use itemsim::similarity::{CoOccurrence, Cosine, Jaccard, Pearson, Similarity};
use itemsim::stopwatch::Stopwatch;
use itemsim::{SimilarityLookup, SimilarityOptions};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_default();
    let config = AppConfig::new(&config_path)?;

    let env = env_logger::Env::default().default_filter_or(config.log.level.as_str());
    env_logger::Builder::from_env(env).init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.server.num_workers)
        .build_global()?;

    if config.query.test_data_path.is_empty() {
        bail!("No test data configured, set query.test_data_path");
    }
    let options = config.similarity.to_options()?;

    match config.similarity.measure.as_str() {
        "jaccard" => query(Jaccard, options, &config),
        "cosine" => query(Cosine, options, &config),
        "pearson" => query(Pearson, options, &config),
        "cooccurrence" => query(CoOccurrence, options, &config),
        other => bail!("Unknown similarity measure: {}", other),
    }
}

fn query<S: Similarity>(
    similarity: S,
    options: SimilarityOptions,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let lookup_path = &config.data.lookup_path;
    let lookup = SimilarityLookup::load_from_file(similarity, options, lookup_path)
        .with_context(|| format!("Loading lookup from {}", lookup_path))?;
    let item_ids = io::read_item_ids(format!("{}.items", lookup_path))?;
    if item_ids.len() != lookup.num_items() {
        bail!(
            "Found {} item ids for a lookup over {} items",
            item_ids.len(),
            lookup.num_items()
        );
    }
    let item_index: HashMap<String, usize> = item_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (id.clone(), index))
        .collect();

    let test_file = File::open(&config.query.test_data_path)
        .with_context(|| format!("Opening test data {}", config.query.test_data_path))?;
    let users = io::read_user_items(BufReader::new(test_file), &item_index)?;
    info!("Scoring recommendations for {} users", users.len());

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(std::io::stdout());
    writer.write_record(["user", "item", "score", "rank"])?;

    let mut scratch = lookup.new_scratch();
    let mut stopwatch = Stopwatch::new();
    for (user, user_items) in &users {
        stopwatch.start();
        let recommendations = lookup.recommend(
            &mut scratch,
            user_items,
            config.query.num_recommendations,
            config.query.exclude_known,
        );
        stopwatch.stop();

        for (rank, (item, score)) in recommendations.into_iter().enumerate() {
            let score = score.to_string();
            let rank = (rank + 1).to_string();
            writer.write_record([user.as_str(), item_ids[item].as_str(), score.as_str(), rank.as_str()])?;
        }
    }
    writer.flush()?;

    eprintln!("Queries: {}", stopwatch.num_measurements());
    eprintln!("Latency p90 (μs): {:.1}", stopwatch.percentile_in_micros(0.90));
    eprintln!("Latency p99 (μs): {:.1}", stopwatch.percentile_in_micros(0.99));
    eprintln!("Latency p99.5 (μs): {:.1}", stopwatch.percentile_in_micros(0.995));
    Ok(())
}
