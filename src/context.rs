//! Per-invocation context shared by the query path and the worker

use std::path::{Path, PathBuf};

use chrono::Duration;
use reqwest::Client;
use thiserror::Error;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::data::{KeysClient, LinksClient};
use crate::icons::{FaviconClient, IconGuard, ICON_DIR};
use crate::jobs::{JobLauncher, ProcessLauncher, WorkerCommand};
use crate::refresh::RefreshCoordinator;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("could not determine the {0} directory; set GOLOOK_{1}_DIR")]
    NoDirectory(&'static str, &'static str),

    #[error("could not locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
}

/// Everything a component needs, built once in `main`
pub struct Context {
    pub config: Config,
    /// Dataset store
    pub data: CacheManager,
    /// Store for retry markers
    pub cache: CacheManager,
    pub launcher: Box<dyn JobLauncher>,
    pub http: Client,
    /// Base command re-invoked for background refreshes
    pub worker: WorkerCommand,
    cache_dir: PathBuf,
}

impl Context {
    /// Builds a context using platform directories and a process launcher.
    ///
    /// `config_path` is handed on to background workers.
    pub fn from_config(
        config: Config,
        config_path: Option<&Path>,
    ) -> Result<Self, ContextError> {
        let data_dir = config
            .data_dir()
            .ok_or(ContextError::NoDirectory("data", "DATA"))?;
        let cache_dir = config
            .cache_dir()
            .ok_or(ContextError::NoDirectory("cache", "CACHE"))?;
        let program = std::env::current_exe().map_err(ContextError::CurrentExe)?;
        let mut worker = WorkerCommand::new(program);
        if let Some(path) = config_path {
            worker = worker.arg("--config").arg(path);
        }
        let launcher = ProcessLauncher::new(cache_dir.join("jobs"));

        Ok(Self::new(config, data_dir, cache_dir, Box::new(launcher), worker))
    }

    pub fn new(
        config: Config,
        data_dir: PathBuf,
        cache_dir: PathBuf,
        launcher: Box<dyn JobLauncher>,
        worker: WorkerCommand,
    ) -> Self {
        Self {
            config,
            data: CacheManager::with_dir(data_dir),
            cache: CacheManager::with_dir(cache_dir.clone()),
            launcher,
            http: Client::new(),
            worker,
            cache_dir,
        }
    }

    pub fn coordinator(&self) -> RefreshCoordinator<'_> {
        RefreshCoordinator::new(&self.data, self.launcher.as_ref(), self.worker.clone())
    }

    pub fn links_client(&self) -> LinksClient {
        LinksClient::with_client(
            self.http.clone(),
            self.config.links.url.clone(),
            Duration::seconds(self.config.links.freshness_secs),
        )
    }

    pub fn keys_client(&self) -> KeysClient {
        KeysClient::with_client(
            self.http.clone(),
            self.config.keys.url.clone(),
            Duration::seconds(self.config.keys.freshness_secs),
        )
    }

    pub fn icon_guard(&self) -> IconGuard {
        IconGuard::new(
            self.cache_dir.join(ICON_DIR),
            self.cache.clone(),
            Duration::hours(self.config.icons.cooldown_hours),
        )
    }

    pub fn favicon_client(&self) -> FaviconClient {
        FaviconClient::with_client(self.http.clone())
    }
}
