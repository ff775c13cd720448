use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimilarityError>;

/// Errors raised while building, loading or querying a similarity lookup.
#[derive(Debug, Error)]
pub enum SimilarityError {
    #[error("out of range item index encountered in row {row}; item index = {item} >= {num_items} = num_items")]
    ItemOutOfRange {
        row: usize,
        item: usize,
        num_items: usize,
    },

    #[error("{0}")]
    InfeasibleBudget(String),

    #[error(
        "out-of-memory allocating lookup tables with max_item_neighborhood_size = {max_item_neighborhood_size}; \
         this requires {bytes} bytes for {num_items} items. Please attempt with fewer items or use a machine with more memory"
    )]
    LookupAllocation {
        max_item_neighborhood_size: usize,
        num_items: usize,
        bytes: usize,
    },

    #[error("item similarity lookup does not support loading from version {found} (supported: {supported})")]
    UnsupportedVersion { found: u64, supported: u64 },

    #[error("invalid record at line {line}: {message}")]
    InvalidRecord { line: u64, message: String },

    #[error("corrupt item similarity lookup: {0}")]
    CorruptLookup(String),

    #[error("invalid value for option {name}: {value}")]
    InvalidOption { name: String, value: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl SimilarityError {
    pub(crate) fn invalid_option(name: &str, value: impl ToString) -> Self {
        SimilarityError::InvalidOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
