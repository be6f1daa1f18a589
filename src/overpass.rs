use std::collections::BTreeMap;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::truncate;

#[cfg(test)]
use mockall::automock;

pub const DEFAULT_MIRRORS: [&str; 3] = [
    "https://overpass.kumi.systems/api/interpreter",
    "https://overpass-api.de/api/interpreter",
    "https://overpass.openstreetmap.ru/api/interpreter",
];

/// how much of an error body ends up in the logs
const ERROR_BODY_LIMIT: usize = 800;

/// The parts of an Overpass json document we care about.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<RawElement>,
}

/// A single element as returned by `out center tags;`.
///
/// Nodes carry `lat`/`lon` directly, ways and relations carry a `center`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub id: u64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub center: Option<Center>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

/// Failure of a single mirror. Never fatal on its own.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("json parse error: {0}")]
    Json(reqwest::Error),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no Overpass endpoints configured")]
    NoMirrors,
    #[error("all {attempts} Overpass endpoints failed, last error: {last}")]
    AllMirrorsFailed { attempts: usize, last: MirrorError },
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Interpreter {
    /// sends `query` to a single Overpass endpoint
    async fn interpret(&self, endpoint: &str, query: &str)
        -> Result<OverpassResponse, MirrorError>;
}

pub struct HttpInterpreter {
    client: Client,
}

impl HttpInterpreter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Interpreter for HttpInterpreter {
    async fn interpret(
        &self,
        endpoint: &str,
        query: &str,
    ) -> Result<OverpassResponse, MirrorError> {
        let res = self
            .client
            .post(endpoint)
            .form(&[("data", query)])
            .send()
            .await?;

        let status = res.status();
        if status.is_client_error() || status.is_server_error() {
            let body = res.text().await.unwrap_or_default();
            return Err(MirrorError::Status {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        res.json().await.map_err(MirrorError::Json)
    }
}

/// Tries every mirror in order and returns the elements of the first one that answers.
pub async fn fetch_elements(
    interpreter: &impl Interpreter,
    mirrors: &[String],
    query: &str,
) -> Result<Vec<RawElement>, FetchError> {
    let mut last = None;

    for mirror in mirrors {
        match interpreter.interpret(mirror, query).await {
            Ok(response) => {
                info!(
                    mirror = %mirror,
                    elements = response.elements.len(),
                    "Overpass answered"
                );
                return Ok(response.elements);
            }
            Err(error) => {
                warn!(mirror = %mirror, %error, "Overpass mirror failed, trying next");
                last = Some(error);
            }
        }
    }

    match last {
        Some(last) => Err(FetchError::AllMirrorsFailed {
            attempts: mirrors.len(),
            last,
        }),
        None => Err(FetchError::NoMirrors),
    }
}
