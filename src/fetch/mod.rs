//! Fetch collaborators and the batch/retry machinery driving bulk
//! calls.
//!
//! The scraping side of the system lives behind [`CatalogFetcher`] and
//! [`FreeFetcher`]; this crate only specifies the contract. A
//! not-found page is an `Ok(Fetched::NotFound)`: a fact about the
//! platform. A [`FetchError`] is a fact about the transport and must
//! never produce a stub.

pub mod batch;
pub mod retry;
pub mod steam_bulk;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::models::free_game::FreeGame;
use crate::models::steam::SteamApp;

/// Outcome of a successful round-trip to a platform.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Found(T),
    NotFound,
}

impl<T> Fetched<T> {
    #[must_use]
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// Transport-level failure. The [`retry::RetryPolicy`] classifies
/// these into backoff, batch-shrink or permanent failure.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server overloaded")]
    Overloaded,
    #[error("http status {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
}

/// Catalog-platform fetcher. `fetch_apps` is the bulk path the
/// [`batch::BatchController`] partitions work for; `fetch_app` is the
/// single-entity path used by relationship repair.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_app(&self, id: &str) -> Result<Fetched<SteamApp>, FetchError>;

    async fn fetch_apps(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Fetched<SteamApp>>, FetchError>;
}

/// Free-platform fetcher; one listing per call, no bulk endpoint.
#[async_trait]
pub trait FreeFetcher: Send + Sync {
    async fn fetch_game(&self, url: &str) -> Result<Fetched<FreeGame>, FetchError>;
}
