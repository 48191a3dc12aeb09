use serde::Deserialize;
use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::services::aggregator::SchemaPolicy;

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_CHUNK_SIZE: usize = 9000;
pub const MIN_CHUNK_SIZE: usize = 500;
/// Bytes read from the start of the file for encoding and row size estimation.
pub const FILE_SAMPLE_SIZE: usize = 50_000;
pub const FALLBACK_ROW_SIZE: f64 = 150.0;

/// Tokens treated as missing cells. Mirrors the default NA set of pandas' `read_csv`.
pub const DEFAULT_NA_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_na_values() -> Vec<String> {
    DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub default_top_n: usize,
    pub default_chunk_size: usize,
    pub min_chunk_size: usize,
    pub sample_size: usize,
    pub fallback_row_size: f64,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    pub output_dir: PathBuf,
    pub schema_policy: SchemaPolicy,
    #[serde(default = "default_na_values")]
    pub na_values: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_top_n: DEFAULT_TOP_N,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_chunk_size: MIN_CHUNK_SIZE,
            sample_size: FILE_SAMPLE_SIZE,
            fallback_row_size: FALLBACK_ROW_SIZE,
            bind_addr: default_bind_addr(),
            output_dir: PathBuf::from("."),
            schema_policy: SchemaPolicy::Lenient,
            na_values: default_na_values(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let defaults = Config::default();
        let schema_policy = match std::env::var("TOPVALUES_SCHEMA_POLICY") {
            Ok(raw) if raw.eq_ignore_ascii_case("strict") => SchemaPolicy::Strict,
            Ok(raw) if raw.eq_ignore_ascii_case("lenient") => SchemaPolicy::Lenient,
            Ok(raw) => {
                tracing::warn!("Unknown TOPVALUES_SCHEMA_POLICY '{}', using lenient", raw);
                SchemaPolicy::Lenient
            }
            Err(_) => defaults.schema_policy,
        };

        let config = Config {
            default_top_n: env_or("TOPVALUES_DEFAULT_TOP_N", defaults.default_top_n),
            default_chunk_size: env_or("TOPVALUES_DEFAULT_CHUNK_SIZE", defaults.default_chunk_size),
            min_chunk_size: env_or("TOPVALUES_MIN_CHUNK_SIZE", defaults.min_chunk_size),
            sample_size: env_or("TOPVALUES_SAMPLE_SIZE", defaults.sample_size),
            fallback_row_size: env_or("TOPVALUES_FALLBACK_ROW_SIZE", defaults.fallback_row_size),
            bind_addr: env_or("TOPVALUES_BIND_ADDR", defaults.bind_addr),
            output_dir: std::env::var("TOPVALUES_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            schema_policy,
            na_values: defaults.na_values,
        };

        if config.default_top_n == 0 || config.min_chunk_size == 0 || config.sample_size == 0 {
            anyhow::bail!("TOPVALUES_DEFAULT_TOP_N, TOPVALUES_MIN_CHUNK_SIZE and TOPVALUES_SAMPLE_SIZE must be positive");
        }

        Ok(config)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}='{}'", key, raw);
            default
        }),
        Err(_) => default,
    }
}

pub fn load_config() -> Result<Config> {
    let config = Config::new()?;
    tracing::info!(
        "Loaded configuration: top_n={}, chunk_size={}, min_chunk_size={}, sample_size={}",
        config.default_top_n,
        config.default_chunk_size,
        config.min_chunk_size,
        config.sample_size
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.default_top_n, 10);
        assert_eq!(config.default_chunk_size, 9000);
        assert_eq!(config.min_chunk_size, 500);
        assert_eq!(config.sample_size, 50_000);
        assert_eq!(config.fallback_row_size, 150.0);
        assert_eq!(config.schema_policy, SchemaPolicy::Lenient);
        assert!(config.na_values.iter().any(|v| v == "NaN"));
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        std::env::set_var("TOPVALUES_TEST_GARBAGE", "abc");
        assert_eq!(env_or("TOPVALUES_TEST_GARBAGE", 7usize), 7);
        std::env::set_var("TOPVALUES_TEST_GARBAGE", " 42 ");
        assert_eq!(env_or("TOPVALUES_TEST_GARBAGE", 7usize), 42);
        std::env::remove_var("TOPVALUES_TEST_GARBAGE");
    }
}
