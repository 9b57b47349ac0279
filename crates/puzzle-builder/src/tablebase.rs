//! Tablebase lookup client with retry/backoff and a per-run memo cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::BuildError;

/// HTTP statuses worth retrying.
pub const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Outcome category of a candidate move as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Win,
    CursedWin,
    Draw,
    BlessedLoss,
    Loss,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Category {
    /// Ranking used to pick the best move: win > cursed-win > draw > blessed-loss > loss > unknown.
    pub fn score(self) -> u8 {
        match self {
            Category::Win => 5,
            Category::CursedWin => 4,
            Category::Draw => 3,
            Category::BlessedLoss => 2,
            Category::Loss => 1,
            Category::Unknown => 0,
        }
    }

    pub fn is_winning(self) -> bool {
        self.score() >= Category::CursedWin.score()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CandidateMove {
    pub uci: String,
    /// Service's SAN for the move, checked against the local replay
    #[serde(default)]
    pub san: Option<String>,
    #[serde(default)]
    pub category: Category,
    /// Distance to mate in plies, if known
    #[serde(default)]
    pub dtm: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TablebaseResponse {
    #[serde(default)]
    pub moves: Vec<CandidateMove>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection-level failure
    Network(String),
    /// Non-2xx response
    Status(u16),
    /// Body was not the expected JSON
    Decode(String),
}

/// Raw single-shot lookup. Retries and caching live in [`TablebaseClient`].
#[allow(async_fn_in_trait)]
pub trait TablebaseTransport {
    async fn fetch(&self, fen: &str) -> Result<TablebaseResponse, FetchError>;
}

/// The public lichess tablebase over HTTP.
pub struct HttpTablebase {
    client: Client,
    base_url: String,
}

impl HttpTablebase {
    pub fn new(base_url: &str) -> Result<Self, BuildError> {
        let client = Client::builder()
            .user_agent("PuzzleDbBuilder/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl TablebaseTransport for HttpTablebase {
    async fn fetch(&self, fen: &str) -> Result<TablebaseResponse, FetchError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("fen", fen)])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        resp.json::<TablebaseResponse>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// First delay after a network error
    pub network_base: Duration,
    /// First delay after a retryable status
    pub status_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            network_base: Duration::from_millis(150),
            status_base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: `base * 2^(attempt - 1)`.
    pub fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        base.saturating_mul(1u32 << exponent)
    }
}

/// Per-run memo of successful lookups, keyed by FEN.
///
/// Failed lookups are never stored, so a later lookup of the same position
/// goes back to the service.
#[derive(Debug, Default)]
pub struct TablebaseCache {
    entries: HashMap<String, Arc<TablebaseResponse>>,
}

impl TablebaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fen: &str) -> Option<Arc<TablebaseResponse>> {
        self.entries.get(fen).cloned()
    }

    pub fn insert(&mut self, fen: &str, response: Arc<TablebaseResponse>) {
        self.entries.insert(fen.to_string(), response);
    }

    pub fn contains(&self, fen: &str) -> bool {
        self.entries.contains_key(fen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Retrying, caching lookups on top of a transport.
pub struct TablebaseClient<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: TablebaseTransport> TablebaseClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Look up a position. `None` once retries are exhausted or on a
    /// permanent failure.
    pub async fn probe(&self, cache: &mut TablebaseCache, fen: &str) -> Option<Arc<TablebaseResponse>> {
        if let Some(hit) = cache.get(fen) {
            return Some(hit);
        }

        for attempt in 1..=self.policy.max_attempts {
            let err = match self.transport.fetch(fen).await {
                Ok(response) => {
                    let response = Arc::new(response);
                    cache.insert(fen, response.clone());
                    return Some(response);
                }
                Err(err) => err,
            };

            let base = match &err {
                FetchError::Network(_) => self.policy.network_base,
                FetchError::Status(status) if RETRY_STATUSES.contains(status) => self.policy.status_base,
                _ => {
                    debug!(fen, ?err, "Tablebase lookup failed permanently");
                    return None;
                }
            };

            if attempt == self.policy.max_attempts {
                warn!(fen, ?err, attempts = attempt, "Tablebase lookup retries exhausted");
                return None;
            }

            let delay = self.policy.delay(base, attempt);
            debug!(fen, ?err, attempt, delay_ms = delay.as_millis() as u64, "Retrying tablebase lookup");
            tokio::time::sleep(delay).await;
        }

        None
    }
}
