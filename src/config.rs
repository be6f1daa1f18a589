use std::time::Duration;

use thiserror::Error;

use crate::{
    overpass::DEFAULT_MIRRORS,
    pipeline::{SyncSettings, DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE},
    store::{StoreConfig, DEFAULT_TABLE},
};

pub const DEFAULT_CITY: &str = "Paris";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub sync: SyncSettings,
}

impl Config {
    /// Reads the configuration from the process environment.
    /// `.env` is expected to have been loaded already.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // blank values count as unset
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let base_url = get("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let service_key =
            get("SUPABASE_SERVICE_KEY").ok_or(ConfigError::Missing("SUPABASE_SERVICE_KEY"))?;
        let table = get("SUPABASE_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string());

        let city = get("CITY")
            .or_else(|| get("DEFAULT_CITY"))
            .unwrap_or_else(|| DEFAULT_CITY.to_string());
        let area = get("AREA_NAME");

        let mirrors = match get("OVERPASS_URLS") {
            Some(urls) => urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => DEFAULT_MIRRORS.iter().map(ToString::to_string).collect(),
        };

        let batch_size = match get("BATCH_SIZE") {
            Some(v) => match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "BATCH_SIZE",
                        value: v,
                    })
                }
            },
            None => DEFAULT_BATCH_SIZE,
        };

        let batch_pause = match get("BATCH_PAUSE_MS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::Invalid {
                    var: "BATCH_PAUSE_MS",
                    value: v.clone(),
                })?,
            None => DEFAULT_BATCH_PAUSE,
        };

        Ok(Self {
            store: StoreConfig::new(&base_url, &service_key, &table),
            sync: SyncSettings {
                city,
                area,
                mirrors,
                batch_size,
                batch_pause,
            },
        })
    }
}
