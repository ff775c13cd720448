pub mod config;
pub mod config_processors;
pub mod error;
pub mod io;
pub mod rows;
pub mod similarity;
pub mod sparsesim;
pub mod stopwatch;

pub use error::{Result, SimilarityError};
pub use rows::SparseRows;
pub use sparsesim::{SimilarityLookup, SimilarityOptions, TrainingMethod, TrainingSummary};
