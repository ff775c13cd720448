use std::fs::File;
use std::io::BufWriter;

use anyhow::{bail, Context};
use indicatif::ProgressBar;
use log::info;
use num_format::{Locale, ToFormattedString};

use itemsim::config::AppConfig;
use itemsim::io::{self, Interactions};
use itemsim::similarity::{CoOccurrence, Cosine, Jaccard, Pearson, Similarity};
use itemsim::{SimilarityLookup, SimilarityOptions};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_default();
    let config = AppConfig::new(&config_path)?;

    let env = env_logger::Env::default().default_filter_or(config.log.level.as_str());
    env_logger::Builder::from_env(env).init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.server.num_workers)
        .build_global()?;

    let options = config.similarity.to_options()?;
    let interactions = io::read_interactions(&config.data.training_data_path)
        .with_context(|| format!("Reading training data from {}", config.data.training_data_path))?;

    let stats = interactions.rows.stats();
    info!(
        "Items per user: p50 = {}, p90 = {}, p99 = {}, max = {}",
        stats.items_per_row_p50,
        stats.items_per_row_p90,
        stats.items_per_row_p99,
        stats.items_per_row_max
    );

    match config.similarity.measure.as_str() {
        "jaccard" => build(Jaccard, options, &config, &interactions),
        "cosine" => build(Cosine, options, &config, &interactions),
        "pearson" => build(Pearson, options, &config, &interactions),
        "cooccurrence" => build(CoOccurrence, options, &config, &interactions),
        other => bail!("Unknown similarity measure: {}", other),
    }
}

fn build<S: Similarity>(
    similarity: S,
    options: SimilarityOptions,
    config: &AppConfig,
    interactions: &Interactions,
) -> anyhow::Result<()> {
    let num_items = interactions.num_items();
    let (lookup, summary) =
        SimilarityLookup::train(similarity, options, &interactions.rows, num_items)?;

    println!("training_method: {}", summary.training_method);
    println!("num_passes: {}", summary.num_passes);
    println!("nearest_neighbor_items: {}", summary.nearest_neighbor_items);
    if let Some(density) = summary.estimated_density {
        println!("estimated_density: {:.6}", density);
    }
    println!(
        "degree_approximation_threshold: {}",
        summary.degree_approximation_threshold
    );
    println!(
        "max_item_neighborhood_size: {}",
        summary.max_item_neighborhood_size
    );
    println!(
        "interaction_updates: {}",
        summary.interaction_updates.to_formatted_string(&Locale::en)
    );
    println!(
        "lookup_entries: {}",
        lookup.num_entries().to_formatted_string(&Locale::en)
    );
    println!("training_time_secs: {:.2}", summary.training_time.as_secs_f64());

    let lookup_path = &config.data.lookup_path;
    lookup
        .save_to_file(lookup_path)
        .with_context(|| format!("Saving lookup to {}", lookup_path))?;
    io::write_item_ids(format!("{}.items", lookup_path), &interactions.item_ids)?;

    if let Some(path) = &config.data.similar_items_path {
        info!("Exporting similar items to {}", path);
        let progress = ProgressBar::new(num_items as u64);
        let writer = BufWriter::new(File::create(path)?);
        let num_lines = io::write_similar_items(
            &lookup,
            &interactions.item_ids,
            progress.wrap_iter(0..num_items),
            config.query.top_k,
            writer,
        )?;
        progress.finish();
        info!(
            "Wrote {} similar items",
            num_lines.to_formatted_string(&Locale::en)
        );
    }
    Ok(())
}
