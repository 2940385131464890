use crate::engine::EngineConfig;
use crate::mutator::{MutationOperator, default_weights};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SEED_INPUT: &str = "<html a=\"value\">...</html>";

/// Problems with user-supplied settings. None of them can be fixed by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown mutator: {0}")]
    UnknownMutator(String),
    #[error("Malformed mutator entry '{0}', expected <mutator>:<weight>")]
    MalformedPair(String),
    #[error("Invalid weight '{weight}' for mutator '{name}', expected a positive integer")]
    InvalidWeight { name: String, weight: String },
    #[error("Mutator list is empty")]
    EmptyMutatorList,
    #[error("Missing command to fuzz")]
    MissingCommand,
}

/// Parses a comma-separated list of `name:weight` pairs. Spaces are ignored.
///
/// The order of the list is kept, since it determines the threshold table.
pub fn parse_weight_list(list: &str) -> Result<Vec<(MutationOperator, u32)>, ConfigError> {
    let compact: String = list.chars().filter(|c| *c != ' ').collect();
    if compact.is_empty() {
        return Err(ConfigError::EmptyMutatorList);
    }

    compact
        .split(',')
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let [name, weight] = parts.as_slice() else {
                return Err(ConfigError::MalformedPair(entry.to_string()));
            };
            let operator = MutationOperator::from_name(name)
                .ok_or_else(|| ConfigError::UnknownMutator(name.to_string()))?;
            let weight = weight
                .parse::<u32>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| ConfigError::InvalidWeight {
                    name: name.to_string(),
                    weight: weight.to_string(),
                })?;
            Ok((operator, weight))
        })
        .collect()
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    #[serde(default = "default_seed_input")]
    pub seed_input: String,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default = "default_passes")]
    pub passes: u64,
    #[serde(default = "default_stop_on_first_failure")]
    pub stop_on_first_failure: bool,
    /// `name:weight` list; the full catalog with default weights when absent.
    #[serde(default)]
    pub mutators: Option<String>,
    /// Seed for the random source. Drawn from the OS when absent.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

pub fn default_seed_input() -> String {
    DEFAULT_SEED_INPUT.to_string()
}
pub fn default_count() -> usize {
    64
}
pub fn default_passes() -> u64 {
    64
}
fn default_stop_on_first_failure() -> bool {
    true
}

impl FuzzerSettings {
    /// The operator list to build the selector from.
    pub fn weights(&self) -> Result<Vec<(MutationOperator, u32)>, ConfigError> {
        match &self.mutators {
            Some(list) => parse_weight_list(list),
            None => Ok(default_weights()),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            seed_input: self.seed_input.clone(),
            population_size: self.count,
            passes: self.passes,
            stop_on_first_failure: self.stop_on_first_failure,
        }
    }
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            seed_input: default_seed_input(),
            count: default_count(),
            passes: default_passes(),
            stop_on_first_failure: default_stop_on_first_failure(),
            mutators: None,
            rng_seed: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Command line handed to the platform shell.
    pub command: Option<String>,
    pub timeout_ms: Option<u64>,
    pub working_dir: Option<PathBuf>,
}

impl ExecutorSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RippleConfig {
    #[serde(default)]
    pub fuzzer: FuzzerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl RippleConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Checks everything that can be checked without touching the file system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fuzzer.weights()?;
        match self.executor.command.as_deref().map(str::trim) {
            Some(command) if !command.is_empty() => Ok(()),
            _ => Err(ConfigError::MissingCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_weight_list_in_order() {
        let weights = parse_weight_list("flip_bit:3, reverse_all:1,duplicate:2").unwrap();
        assert_eq!(
            weights,
            vec![
                (MutationOperator::FlipBit, 3),
                (MutationOperator::ReverseAll, 1),
                (MutationOperator::DuplicateChar, 2),
            ]
        );
    }

    #[test]
    fn rejects_bad_weight_lists() {
        assert_eq!(
            parse_weight_list("explode:3"),
            Err(ConfigError::UnknownMutator("explode".to_string()))
        );
        assert_eq!(
            parse_weight_list("flip_bit"),
            Err(ConfigError::MalformedPair("flip_bit".to_string()))
        );
        assert_eq!(
            parse_weight_list("flip_bit:1:2"),
            Err(ConfigError::MalformedPair("flip_bit:1:2".to_string()))
        );
        assert_eq!(
            parse_weight_list("flip_bit:1,"),
            Err(ConfigError::MalformedPair(String::new()))
        );
        assert_eq!(
            parse_weight_list("flip_bit:0"),
            Err(ConfigError::InvalidWeight {
                name: "flip_bit".to_string(),
                weight: "0".to_string()
            })
        );
        assert!(matches!(
            parse_weight_list("flip_bit:-4"),
            Err(ConfigError::InvalidWeight { .. })
        ));
        assert_eq!(parse_weight_list("  "), Err(ConfigError::EmptyMutatorList));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RippleConfig::default();
        assert_eq!(config.fuzzer.seed_input, DEFAULT_SEED_INPUT);
        assert_eq!(config.fuzzer.count, 64);
        assert_eq!(config.fuzzer.passes, 64);
        assert!(config.fuzzer.stop_on_first_failure);
        assert_eq!(config.fuzzer.weights().unwrap(), default_weights());
        assert_eq!(config.executor.timeout(), None);
        assert_eq!(config.validate(), Err(ConfigError::MissingCommand));
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let config = RippleConfig::from_toml_str(
            r#"
            [fuzzer]
            seed-input = "ab"
            passes = 3
            stop-on-first-failure = false
            mutators = "reverse_all:1"
            rng-seed = 42

            [executor]
            command = "./target.sh"
            timeout-ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.fuzzer.seed_input, "ab");
        assert_eq!(config.fuzzer.count, 64);
        assert_eq!(config.fuzzer.passes, 3);
        assert!(!config.fuzzer.stop_on_first_failure);
        assert_eq!(config.fuzzer.rng_seed, Some(42));
        assert_eq!(config.executor.timeout(), Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());

        let engine_config = config.fuzzer.engine_config();
        assert_eq!(engine_config.seed_input, "ab");
        assert_eq!(engine_config.passes, 3);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(RippleConfig::from_toml_str("[fuzzer]\nthreads = 4\n").is_err());
    }

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[executor]\ncommand = \"true\"").unwrap();
        let config = RippleConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.executor.command.as_deref(), Some("true"));

        let missing = RippleConfig::load_from_file(Path::new("/nonexistent/ripple.toml"));
        assert!(missing.is_err());
    }
}
