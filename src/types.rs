use crate::error::{FilterError, Result};
use crate::filter::FilterConfig;
use crate::store::{Store, StoreConfig};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetResponse {
    pub existed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TermsResponse {
    pub earliest: u64,
    pub latest: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotResponse {
    pub bytes: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TermQuery {
    /// Advance to this term before recording the key
    pub term: Option<u64>,
}

pub struct AppState {
    pub store: Store,
    /// Where `POST /snapshot` writes the snapshot bytes, if anywhere
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned")]
pub struct ServerConfig {
    #[builder(default = "\"127.0.0.1\".to_string()")]
    pub server_host: String,
    #[builder(default = "3000")]
    pub server_port: u16,
    #[builder(default = "1_000_000")]
    pub bloom_capacity: u64,
    #[builder(default = "0.01")]
    pub bloom_false_positive_rate: f64,
    #[builder(default = "3")]
    pub bloom_retention: u64,
    /// redb file receiving rotated-out terms; no archive when unset
    #[builder(default = "None")]
    pub bloom_archive_path: Option<String>,
    #[builder(default = "None")]
    pub bloom_snapshot_path: Option<String>,
    #[builder(default = "Duration::from_secs(10)")]
    pub bloom_apply_timeout: Duration,
    #[builder(default = "1024")]
    pub bloom_snapshot_threshold: usize,
}

fn env_or<T>(var_name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var_name) {
        Ok(value) => value.parse().map_err(|e: T::Err| {
            FilterError::EnvParseError {
                var_name: var_name.to_string(),
                value,
                error: e.to_string(),
            }
        }),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server_host: env_or("SERVER_HOST", "127.0.0.1".to_string())?,
            server_port: env_or("SERVER_PORT", 3000)?,
            bloom_capacity: env_or("BLOOM_CAPACITY", 1_000_000)?,
            bloom_false_positive_rate: env_or(
                "BLOOM_FALSE_POSITIVE_RATE",
                0.01,
            )?,
            bloom_retention: env_or("BLOOM_RETENTION", 3)?,
            bloom_archive_path: std::env::var("BLOOM_ARCHIVE_PATH").ok(),
            bloom_snapshot_path: std::env::var("BLOOM_SNAPSHOT_PATH").ok(),
            bloom_apply_timeout: Duration::from_millis(env_or(
                "BLOOM_APPLY_TIMEOUT_MS",
                10_000,
            )?),
            bloom_snapshot_threshold: env_or(
                "BLOOM_SNAPSHOT_THRESHOLD",
                1024,
            )?,
        })
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            capacity: self.bloom_capacity,
            false_positive_rate: self.bloom_false_positive_rate,
            retention: self.bloom_retention,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            filter: self.filter_config(),
            apply_timeout: self.bloom_apply_timeout,
            snapshot_threshold: self.bloom_snapshot_threshold,
        }
    }
}
