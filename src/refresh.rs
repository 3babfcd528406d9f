//! Stale-while-refresh coordination for cached datasets
//!
//! The coordinator answers queries from the local cache only. When the cached
//! entry is missing, older than the dataset's freshness window, or a refresh is
//! forced, it starts a detached download worker (at most one per dataset) and
//! returns whatever is cached right now.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheError, CacheManager};
use crate::data::FetchError;
use crate::jobs::{JobLauncher, Launch, LaunchError, WorkerCommand};

/// Delay in seconds the host should wait before asking again after a refresh was requested
pub const RERUN_DELAY_SECS: f64 = 0.2;

/// A remote dataset mirrored into the local cache
#[async_trait]
pub trait Dataset: Send + Sync {
    type Record: Serialize + DeserializeOwned + Send + Sync;

    /// Dataset name, used as the CLI subcommand of the worker
    fn name(&self) -> &'static str;

    /// Key of the dataset's entry in the cache store
    fn cache_key(&self) -> &'static str;

    /// Name of the background job refreshing this dataset
    fn job_name(&self) -> String {
        format!("{}-download", self.name())
    }

    /// Maximum age at which the cached entry is served without a refresh
    fn freshness(&self) -> Duration;

    /// Downloads and parses the authoritative dataset
    async fn fetch(&self) -> Result<Vec<Self::Record>, FetchError>;
}

/// Errors surfaced to the query path
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The cached entry exists but cannot be read
    #[error("error reading cached {dataset}: {source}")]
    Cache {
        dataset: &'static str,
        #[source]
        source: CacheError,
    },

    /// The background refresh could not be started
    #[error("error running background job: {0}")]
    Launch(#[from] LaunchError),
}

/// Cache state observed by a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing cached yet
    Absent,
    /// Cached and within the freshness window
    Fresh,
    /// Cached but older than the freshness window
    Stale,
}

/// Result of a lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T> {
    /// Records as currently cached, possibly stale
    pub records: Vec<T>,
    /// Cache state at read time
    pub freshness: Freshness,
    /// True when nothing was cached and a refresh is on its way
    pub pending: bool,
    /// Seconds after which the host should re-run the query, when a refresh was requested
    pub rerun: Option<f64>,
}

/// Decides when a dataset needs refreshing and starts the worker
pub struct RefreshCoordinator<'a> {
    store: &'a CacheManager,
    launcher: &'a dyn JobLauncher,
    worker: WorkerCommand,
}

impl<'a> RefreshCoordinator<'a> {
    /// `worker` is the base command; a refresh runs it as `<worker> <dataset> --download`
    pub fn new(
        store: &'a CacheManager,
        launcher: &'a dyn JobLauncher,
        worker: WorkerCommand,
    ) -> Self {
        Self {
            store,
            launcher,
            worker,
        }
    }

    /// Classifies the cached entry for `dataset`
    pub fn freshness<D: Dataset>(&self, dataset: &D) -> Freshness {
        let key = dataset.cache_key();
        if !self.store.exists(key) {
            Freshness::Absent
        } else if self.store.expired(key, dataset.freshness()) {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Returns the cached records for `dataset`, starting a refresh when needed.
    ///
    /// With `force` the refresh is started regardless of freshness; the served
    /// records are unaffected.
    pub fn get_data<D: Dataset>(
        &self,
        dataset: &D,
        force: bool,
    ) -> Result<Lookup<D::Record>, RefreshError> {
        debug!(dataset = dataset.name(), "Getting data");

        let freshness = self.freshness(dataset);

        if freshness == Freshness::Absent {
            info!(dataset = dataset.name(), "Empty cache, downloading");
            self.request_refresh(dataset)?;
            return Ok(Lookup {
                records: Vec::new(),
                freshness,
                pending: true,
                rerun: Some(RERUN_DELAY_SECS),
            });
        }

        let mut refreshing = false;
        if freshness == Freshness::Stale {
            info!(dataset = dataset.name(), "Cache expired, refreshing in background");
            refreshing = true;
        }
        if force {
            info!(dataset = dataset.name(), "Forcing refresh");
            refreshing = true;
        }
        if refreshing {
            self.request_refresh(dataset)?;
        }

        let cached = self
            .store
            .read::<Vec<D::Record>>(dataset.cache_key())
            .map_err(|source| RefreshError::Cache {
                dataset: dataset.name(),
                source,
            })?;

        debug!(
            dataset = dataset.name(),
            count = cached.data.len(),
            age_secs = (Utc::now() - cached.cached_at).num_seconds(),
            "Serving cached records"
        );

        Ok(Lookup {
            records: cached.data,
            freshness,
            pending: false,
            rerun: refreshing.then_some(RERUN_DELAY_SECS),
        })
    }

    /// Whether the dataset's worker is currently running
    pub fn is_refreshing<D: Dataset>(&self, dataset: &D) -> bool {
        self.launcher.is_running(&dataset.job_name())
    }

    fn request_refresh<D: Dataset>(&self, dataset: &D) -> Result<Launch, RefreshError> {
        let command = self
            .worker
            .clone()
            .arg(dataset.name())
            .arg("--download");
        Ok(self
            .launcher
            .launch_if_not_running(&dataset.job_name(), &command)?)
    }
}
