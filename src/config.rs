use std::convert::TryInto;
use std::ffi::OsStr;
use std::fs::File;

use justconfig::item::ValueExtractor;
use justconfig::processors::Trim;
use justconfig::sources::env::Env;
use justconfig::sources::text::ConfigText;
use justconfig::ConfPath;
use justconfig::Config;

use crate::config_processors::{ExpandByteUnits, Unquote};
use crate::error::{Result, SimilarityError};
use crate::sparsesim::options::*;

// Set some default values
const DEFAULT_MEASURE: &str = "jaccard";
const DEFAULT_SIMILAR_ITEMS_TOP_K: usize = 10;
const DEFAULT_NUM_RECOMMENDATIONS: usize = 21;

pub struct AppConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub data: DataConfig,
    pub similarity: SimilarityConfig,
    pub query: QueryConfig,
}

pub struct ServerConfig {
    pub num_workers: usize,
}

pub struct LogConfig {
    pub level: String,
}

pub struct DataConfig {
    pub training_data_path: String,
    pub lookup_path: String,
    /// Optional export of every item's similar items as text.
    pub similar_items_path: Option<String>,
}

pub struct SimilarityConfig {
    /// One of `jaccard`, `cosine`, `pearson` or `cooccurrence`.
    pub measure: String,
    pub max_item_neighborhood_size: usize,
    pub threshold: f64,
    pub target_memory_usage: usize,
    pub max_data_passes: usize,
    pub degree_approximation_threshold: usize,
    pub training_method: String,
    pub sparse_density_estimation_sample_size: usize,
    pub random_seed: u64,
}

pub struct QueryConfig {
    pub test_data_path: String,
    pub top_k: usize,
    pub num_recommendations: usize,
    pub exclude_known: bool,
}

impl AppConfig {
    pub fn new(config_path: &str) -> Result<AppConfig> {
        // Initialize config object
        let mut conf = Config::default();

        // Check if there is a config file
        if let Ok(config_file) = File::open(config_path) {
            let config_text = ConfigText::new(config_file, config_path)
                .map_err(|e| SimilarityError::Config(format!("loading {} failed: {}", config_path, e)))?;
            conf.add_source(config_text);
        }

        // Define config params from environment variables
        let config_env = Env::new(&[
            (
                ConfPath::from(&["data", "training_data_path"]),
                OsStr::new("TRAINING_DATA"),
            ),
            (
                ConfPath::from(&["server", "num_workers"]),
                OsStr::new("NUM_WORKERS"),
            ),
        ]);
        conf.add_source(config_env);

        // Parse into custom config struct
        AppConfig::parse(conf)
    }

    fn parse(conf: Config) -> Result<AppConfig> {
        Ok(AppConfig {
            server: ServerConfig::parse(&conf, ConfPath::from(&["server"])),
            log: LogConfig::parse(&conf, ConfPath::from(&["log"])),
            data: DataConfig::parse(&conf, ConfPath::from(&["data"]))?,
            similarity: SimilarityConfig::parse(&conf, ConfPath::from(&["similarity"])),
            query: QueryConfig::parse(&conf, ConfPath::from(&["query"])),
        })
    }
}

impl ServerConfig {
    fn parse(conf: &Config, path: ConfPath) -> ServerConfig {
        ServerConfig {
            num_workers: conf
                .get(path.push("num_workers"))
                .trim()
                .value()
                // Detect number of CPUs
                .unwrap_or_else(|_| {
                    sys_info::cpu_num()
                        .ok()
                        .and_then(|cpus| cpus.try_into().ok())
                        .unwrap_or(1)
                }),
        }
    }
}

impl LogConfig {
    fn parse(conf: &Config, path: ConfPath) -> LogConfig {
        LogConfig {
            level: conf
                .get(path.push("level"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from("info")),
        }
    }
}

impl DataConfig {
    fn parse(conf: &Config, path: ConfPath) -> Result<DataConfig> {
        Ok(DataConfig {
            training_data_path: conf
                .get(path.push("training_data_path"))
                .unquote()
                .value()
                .map_err(|e| SimilarityError::Config(e.to_string()))?,
            lookup_path: conf
                .get(path.push("lookup_path"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from("itemsim.lookup")),
            similar_items_path: conf
                .get(path.push("similar_items_path"))
                .unquote()
                .value()
                .ok(),
        })
    }
}

impl SimilarityConfig {
    fn parse(conf: &Config, path: ConfPath) -> SimilarityConfig {
        SimilarityConfig {
            measure: conf
                .get(path.push("measure"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from(DEFAULT_MEASURE)),
            max_item_neighborhood_size: conf
                .get(path.push("max_item_neighborhood_size"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_MAX_ITEM_NEIGHBORHOOD_SIZE),
            threshold: conf
                .get(path.push("threshold"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_THRESHOLD),
            target_memory_usage: conf
                .get(path.push("target_memory_usage"))
                .expand_byte_units()
                .value()
                .unwrap_or(DEFAULT_TARGET_MEMORY_USAGE),
            max_data_passes: conf
                .get(path.push("max_data_passes"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_MAX_DATA_PASSES),
            degree_approximation_threshold: conf
                .get(path.push("degree_approximation_threshold"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_DEGREE_APPROXIMATION_THRESHOLD),
            training_method: conf
                .get(path.push("training_method"))
                .unquote()
                .value()
                .unwrap_or_else(|_| String::from("auto")),
            sparse_density_estimation_sample_size: conf
                .get(path.push("sparse_density_estimation_sample_size"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_SPARSE_DENSITY_ESTIMATION_SAMPLE_SIZE),
            random_seed: conf
                .get(path.push("random_seed"))
                .trim()
                .value()
                .unwrap_or(0),
        }
    }

    /// The validated lookup options described by this section.
    pub fn to_options(&self) -> Result<SimilarityOptions> {
        let options = SimilarityOptions {
            max_item_neighborhood_size: self.max_item_neighborhood_size,
            threshold: self.threshold,
            target_memory_usage: self.target_memory_usage,
            max_data_passes: self.max_data_passes,
            degree_approximation_threshold: self.degree_approximation_threshold,
            training_method: self.training_method.parse()?,
            sparse_density_estimation_sample_size: self.sparse_density_estimation_sample_size,
            random_seed: self.random_seed,
        };
        options.validate()?;
        Ok(options)
    }
}

impl QueryConfig {
    fn parse(conf: &Config, path: ConfPath) -> QueryConfig {
        QueryConfig {
            test_data_path: conf
                .get(path.push("test_data_path"))
                .unquote()
                .value()
                .unwrap_or_default(),
            top_k: conf
                .get(path.push("top_k"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_SIMILAR_ITEMS_TOP_K),
            num_recommendations: conf
                .get(path.push("num_recommendations"))
                .trim()
                .value()
                .unwrap_or(DEFAULT_NUM_RECOMMENDATIONS),
            exclude_known: conf
                .get(path.push("exclude_known"))
                .trim()
                .value()
                .unwrap_or(true),
        }
    }
}

#[cfg(test)]
mod config_test {
    use justconfig::sources::defaults::Defaults;

    use super::*;

    fn config_with(values: &[(&str, &str)]) -> Config {
        let mut conf = Config::default();
        let mut defaults = Defaults::default();
        for &(key, value) in values {
            let parts: Vec<&str> = key.split('.').collect();
            defaults.set(conf.root().push_all(&parts), value, "test");
        }
        conf.add_source(defaults);
        conf
    }

    #[test]
    fn should_fall_back_to_defaults() {
        let conf = config_with(&[("data.training_data_path", "\"ratings.tsv\"")]);
        let config = AppConfig::parse(conf).unwrap();

        assert_eq!("ratings.tsv", config.data.training_data_path);
        assert_eq!("itemsim.lookup", config.data.lookup_path);
        assert!(config.data.similar_items_path.is_none());
        assert_eq!("info", config.log.level);
        assert_eq!(DEFAULT_MEASURE, config.similarity.measure);
        assert_eq!(SimilarityOptions::default(), config.similarity.to_options().unwrap());
        assert!(config.server.num_workers >= 1);
    }

    #[test]
    fn should_read_similarity_section() {
        let conf = config_with(&[
            ("data.training_data_path", "ratings.tsv"),
            ("similarity.measure", "\"cosine\""),
            ("similarity.target_memory_usage", "512M"),
            ("similarity.training_method", "\"nn:sparse\""),
            ("similarity.max_item_neighborhood_size", " 32 "),
            ("similarity.random_seed", "7"),
            ("query.exclude_known", "false"),
        ]);
        let config = AppConfig::parse(conf).unwrap();
        let options = config.similarity.to_options().unwrap();

        assert_eq!("cosine", config.similarity.measure);
        assert_eq!(512 * 1024 * 1024, options.target_memory_usage);
        assert_eq!(TrainingMethod::NearestNeighborsSparse, options.training_method);
        assert_eq!(32, options.max_item_neighborhood_size);
        assert_eq!(7, options.random_seed);
        assert!(!config.query.exclude_known);
    }

    #[test]
    fn should_require_training_data() {
        assert!(AppConfig::parse(config_with(&[])).is_err());
    }

    #[test]
    fn should_reject_unknown_training_method() {
        let conf = config_with(&[
            ("data.training_data_path", "ratings.tsv"),
            ("similarity.training_method", "fastest"),
        ]);
        let config = AppConfig::parse(conf).unwrap();
        assert!(matches!(
            config.similarity.to_options(),
            Err(SimilarityError::InvalidOption { .. })
        ));
    }
}
