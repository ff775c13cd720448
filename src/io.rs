use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use hashbrown::HashMap;
use itertools::Itertools;
use log::info;
use num_format::{Locale, ToFormattedString};

use crate::error::{Result, SimilarityError};
use crate::rows::SparseRows;
use crate::similarity::Similarity;
use crate::sparsesim::SimilarityLookup;

/// User-item interactions with the external ids mapped to dense indices, in order of first
/// appearance.
pub struct Interactions {
    pub user_ids: Vec<String>,
    pub item_ids: Vec<String>,
    pub rows: SparseRows,
}

impl Interactions {
    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn item_index(&self) -> HashMap<String, usize> {
        index_of(&self.item_ids)
    }
}

/// Reads a tab separated `user item [value]` file with a header line. A missing value counts
/// as 1.
pub fn read_interactions<P: AsRef<Path>>(path: P) -> Result<Interactions> {
    let path = path.as_ref();
    let interactions = read_interactions_from(BufReader::new(File::open(path)?))?;
    info!(
        "Read {} interactions of {} users with {} items from {}",
        interactions.rows.num_entries().to_formatted_string(&Locale::en),
        interactions.user_ids.len().to_formatted_string(&Locale::en),
        interactions.item_ids.len().to_formatted_string(&Locale::en),
        path.display()
    );
    Ok(interactions)
}

pub fn read_interactions_from<R: Read>(reader: R) -> Result<Interactions> {
    let mut user_index: HashMap<String, usize> = HashMap::new();
    let mut item_index: HashMap<String, usize> = HashMap::new();
    let mut user_ids = Vec::new();
    let mut item_ids = Vec::new();
    let mut rows: Vec<Vec<(usize, f64)>> = Vec::new();

    let mut csv_reader = tab_separated_reader(reader);
    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let (user, item, value) = parse_record(&record, line)?;

        let user = *user_index.entry(user.to_owned()).or_insert_with(|| {
            user_ids.push(user.to_owned());
            rows.push(Vec::new());
            user_ids.len() - 1
        });
        let item = *item_index.entry(item.to_owned()).or_insert_with(|| {
            item_ids.push(item.to_owned());
            item_ids.len() - 1
        });
        rows[user].push((item, value));
    }

    Ok(Interactions {
        user_ids,
        item_ids,
        rows: SparseRows::from_rows(rows),
    })
}

/// Reads `user item [value]` records for items of an existing lookup. Records of unknown items
/// are skipped; returns the users sorted by id, each with their known items.
pub fn read_user_items<R: Read>(
    reader: R,
    item_index: &HashMap<String, usize>,
) -> Result<Vec<(String, Vec<(usize, f64)>)>> {
    let mut csv_reader = tab_separated_reader(reader);
    let mut records = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let (user, item, value) = parse_record(&record, line)?;
        if let Some(&item) = item_index.get(item) {
            records.push((user.to_owned(), (item, value)));
        }
    }

    let users = records
        .into_iter()
        .into_group_map_by(|(user, _)| user.clone());
    let mut by_user: Vec<(String, Vec<(usize, f64)>)> = users
        .into_iter()
        .map(|(user, items)| (user, items.into_iter().map(|(_, item)| item).collect()))
        .collect();
    by_user.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
    Ok(by_user)
}

fn tab_separated_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn parse_record(record: &csv::StringRecord, line: u64) -> Result<(&str, &str, f64)> {
    let field = |index: usize, name: &'static str| {
        record
            .get(index)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SimilarityError::InvalidRecord {
                line,
                message: format!("missing {}", name),
            })
    };
    let user = field(0, "user")?;
    let item = field(1, "item")?;
    let value = match record.get(2).filter(|value| !value.is_empty()) {
        Some(raw) => raw.parse::<f64>().map_err(|e| SimilarityError::InvalidRecord {
            line,
            message: format!("invalid value {:?}: {}", raw, e),
        })?,
        None => 1.0,
    };
    Ok((user, item, value))
}

fn index_of(ids: &[String]) -> HashMap<String, usize> {
    ids.iter()
        .enumerate()
        .map(|(index, id)| (id.clone(), index))
        .collect()
}

pub fn write_item_ids<P: AsRef<Path>>(path: P, item_ids: &[String]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for id in item_ids {
        writeln!(writer, "{}", id)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_item_ids<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let ids = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Writes `item similar score rank` lines for the given items, the best neighbor ranked 1.
/// Returns the number of lines written.
pub fn write_similar_items<S, I, W>(
    lookup: &SimilarityLookup<S>,
    item_ids: &[String],
    items: I,
    top_k: usize,
    writer: W,
) -> Result<usize>
where
    S: Similarity,
    I: IntoIterator<Item = usize>,
    W: Write,
{
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    csv_writer.write_record(["item", "similar", "score", "rank"])?;

    let mut num_lines = 0;
    for item in items {
        let item_id = match item_ids.get(item) {
            Some(id) => id.as_str(),
            None => continue,
        };
        for (rank, (similar, score)) in lookup.similar_items(item, top_k).into_iter().enumerate() {
            let similar_id = item_ids.get(similar).map(String::as_str).unwrap_or_default();
            let score = score.to_string();
            let rank = (rank + 1).to_string();
            csv_writer.write_record([item_id, similar_id, score.as_str(), rank.as_str()])?;
            num_lines += 1;
        }
    }
    csv_writer.flush()?;
    Ok(num_lines)
}
