use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};
use crate::similarity::Similarity;
use crate::sparsesim::neighbor_table::Neighbor;
use crate::sparsesim::options::SimilarityOptions;
use crate::sparsesim::SimilarityLookup;

/// Version tag written in front of every saved lookup.
pub const LOOKUP_VERSION: u64 = 1;

#[derive(Serialize)]
struct StoredLookupRef<'a, F, V> {
    num_items: usize,
    final_item_data: &'a [F],
    boundaries: &'a [usize],
    entries: &'a [Neighbor<V>],
}

#[derive(Deserialize)]
struct StoredLookup<F, V> {
    num_items: usize,
    final_item_data: Vec<F>,
    boundaries: Vec<usize>,
    entries: Vec<Neighbor<V>>,
}

impl<S: Similarity> SimilarityLookup<S> {
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        bincode::serialize_into(&mut writer, &LOOKUP_VERSION)?;
        let stored = StoredLookupRef {
            num_items: self.num_items,
            final_item_data: &self.final_item_data,
            boundaries: &self.boundaries,
            entries: &self.entries,
        };
        bincode::serialize_into(&mut writer, &stored)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<R: Read>(similarity: S, options: SimilarityOptions, mut reader: R) -> Result<Self> {
        let version: u64 = bincode::deserialize_from(&mut reader)?;
        if version != LOOKUP_VERSION {
            return Err(SimilarityError::UnsupportedVersion {
                found: version,
                supported: LOOKUP_VERSION,
            });
        }

        let stored: StoredLookup<S::FinalItemData, S::FinalInteraction> =
            bincode::deserialize_from(&mut reader)?;
        check_layout(&stored)?;

        Ok(SimilarityLookup {
            similarity,
            options,
            num_items: stored.num_items,
            final_item_data: stored.final_item_data,
            boundaries: stored.boundaries,
            entries: stored.entries,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.save(BufWriter::new(file))?;
        info!(
            "Saved {} similarity lookup with {} entries to {}",
            self.similarity.name(),
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(
        similarity: S,
        options: SimilarityOptions,
        path: P,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let lookup = Self::load(similarity, options, BufReader::new(file))?;
        info!(
            "Loaded similarity lookup over {} items with {} entries from {}",
            lookup.num_items,
            lookup.entries.len(),
            path.display()
        );
        Ok(lookup)
    }
}

fn check_layout<F, V>(stored: &StoredLookup<F, V>) -> Result<()> {
    let num_items = stored.num_items;
    if stored.final_item_data.len() != num_items {
        return Err(SimilarityError::CorruptLookup(format!(
            "{} item values for {} items",
            stored.final_item_data.len(),
            num_items
        )));
    }
    if stored.boundaries.len() != num_items + 1
        || stored.boundaries.first() != Some(&0)
        || stored.boundaries.last() != Some(&stored.entries.len())
    {
        return Err(SimilarityError::CorruptLookup(format!(
            "{} boundaries do not describe {} entries over {} items",
            stored.boundaries.len(),
            stored.entries.len(),
            num_items
        )));
    }
    for (item, range) in stored.boundaries.windows(2).enumerate() {
        if range[0] > range[1] || range[1] > stored.entries.len() {
            return Err(SimilarityError::CorruptLookup(format!(
                "boundary {} of item {} is out of order",
                range[1], item
            )));
        }
        let neighbors = &stored.entries[range[0]..range[1]];
        let sorted = neighbors.windows(2).all(|pair| pair[0].item < pair[1].item);
        if !sorted || neighbors.iter().any(|n| n.item >= num_items) {
            return Err(SimilarityError::CorruptLookup(format!(
                "invalid neighbors stored for item {}",
                item
            )));
        }
    }
    Ok(())
}
