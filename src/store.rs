use std::fmt;

use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::{normalize::ShopRow, utils::truncate};

#[cfg(test)]
use mockall::automock;

pub const DEFAULT_TABLE: &str = "shops";

const ACCEPTED: [StatusCode; 3] = [StatusCode::OK, StatusCode::CREATED, StatusCode::NO_CONTENT];
const ERROR_BODY_LIMIT: usize = 2000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upsert rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait RowStore {
    /// writes one batch, merging rows that share an id
    async fn upsert(&self, batch: &[ShopRow]) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub service_key: String,
    pub table: String,
}

impl StoreConfig {
    pub fn new(base_url: &str, service_key: &str, table: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            table: table.to_string(),
        }
    }

    /// `<base>/rest/v1/<table>?on_conflict=id`
    pub fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}?on_conflict=id", self.base_url, self.table)
    }
}

// keep the key out of logs
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .field("table", &self.table)
            .finish()
    }
}

/// Upserts into a PostgREST table (Supabase's REST interface).
pub struct PostgrestStore {
    client: Client,
    endpoint: String,
    service_key: String,
}

impl PostgrestStore {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint(),
            service_key: config.service_key.clone(),
        }
    }
}

#[async_trait::async_trait]
impl RowStore for PostgrestStore {
    async fn upsert(&self, batch: &[ShopRow]) -> Result<(), StoreError> {
        let res = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header(
                "Prefer",
                "resolution=merge-duplicates, return=representation",
            )
            .json(batch)
            .send()
            .await?;

        let status = res.status();
        if ACCEPTED.contains(&status) {
            Ok(())
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            })
        }
    }
}
