use std::fmt;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};

use crate::error::{Result, SimilarityError};

// Set some default values
pub const DEFAULT_MAX_ITEM_NEIGHBORHOOD_SIZE: usize = 64;
pub const DEFAULT_THRESHOLD: f64 = 0.001;
pub const DEFAULT_TARGET_MEMORY_USAGE: usize = 8 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_DATA_PASSES: usize = 4096;
pub const DEFAULT_DEGREE_APPROXIMATION_THRESHOLD: usize = 4096;
pub const DEFAULT_SPARSE_DENSITY_ESTIMATION_SAMPLE_SIZE: usize = 4096;

/// How the item-item interactions are accumulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrainingMethod {
    Auto,
    Dense,
    Sparse,
    NearestNeighbors,
    NearestNeighborsDense,
    NearestNeighborsSparse,
}

impl TrainingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMethod::Auto => "auto",
            TrainingMethod::Dense => "dense",
            TrainingMethod::Sparse => "sparse",
            TrainingMethod::NearestNeighbors => "nn",
            TrainingMethod::NearestNeighborsDense => "nn:dense",
            TrainingMethod::NearestNeighborsSparse => "nn:sparse",
        }
    }

    /// True for the methods that start with a brute force pass over the most common items.
    pub fn uses_nearest_neighbors(&self) -> bool {
        matches!(
            self,
            TrainingMethod::NearestNeighbors
                | TrainingMethod::NearestNeighborsDense
                | TrainingMethod::NearestNeighborsSparse
        )
    }
}

impl fmt::Display for TrainingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingMethod {
    type Err = SimilarityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "auto" => Ok(TrainingMethod::Auto),
            "dense" => Ok(TrainingMethod::Dense),
            "sparse" => Ok(TrainingMethod::Sparse),
            "nn" => Ok(TrainingMethod::NearestNeighbors),
            "nn:dense" => Ok(TrainingMethod::NearestNeighborsDense),
            "nn:sparse" => Ok(TrainingMethod::NearestNeighborsSparse),
            other => Err(SimilarityError::invalid_option("training_method", other)),
        }
    }
}

/// Options recognised by the lookup construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityOptions {
    /// Upper bound on the neighbors kept per item.
    pub max_item_neighborhood_size: usize,
    /// Similarities at or below this value are dropped when finalizing.
    pub threshold: f64,
    /// Memory budget in bytes for a single accumulation pass.
    pub target_memory_usage: usize,
    pub max_data_passes: usize,
    /// Rows with more items than this are pruned and subsampled.
    pub degree_approximation_threshold: usize,
    pub training_method: TrainingMethod,
    pub sparse_density_estimation_sample_size: usize,
    pub random_seed: u64,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        SimilarityOptions {
            max_item_neighborhood_size: DEFAULT_MAX_ITEM_NEIGHBORHOOD_SIZE,
            threshold: DEFAULT_THRESHOLD,
            target_memory_usage: DEFAULT_TARGET_MEMORY_USAGE,
            max_data_passes: DEFAULT_MAX_DATA_PASSES,
            degree_approximation_threshold: DEFAULT_DEGREE_APPROXIMATION_THRESHOLD,
            training_method: TrainingMethod::Auto,
            sparse_density_estimation_sample_size: DEFAULT_SPARSE_DENSITY_ESTIMATION_SAMPLE_SIZE,
            random_seed: 0,
        }
    }
}

impl SimilarityOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_item_neighborhood_size == 0 {
            return Err(SimilarityError::invalid_option(
                "max_item_neighborhood_size",
                self.max_item_neighborhood_size,
            ));
        }
        if !self.threshold.is_finite() {
            return Err(SimilarityError::invalid_option("threshold", self.threshold));
        }
        if self.target_memory_usage == 0 {
            return Err(SimilarityError::invalid_option(
                "target_memory_usage",
                self.target_memory_usage,
            ));
        }
        if self.max_data_passes == 0 {
            return Err(SimilarityError::invalid_option(
                "max_data_passes",
                self.max_data_passes,
            ));
        }
        if self.degree_approximation_threshold == 0 {
            return Err(SimilarityError::invalid_option(
                "degree_approximation_threshold",
                self.degree_approximation_threshold,
            ));
        }
        if self.sparse_density_estimation_sample_size == 0 {
            return Err(SimilarityError::invalid_option(
                "sparse_density_estimation_sample_size",
                self.sparse_density_estimation_sample_size,
            ));
        }
        Ok(())
    }
}
