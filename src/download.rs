//! Download worker: fetch a dataset and replace its cache entry

use thiserror::Error;
use tracing::info;

use crate::cache::{CacheError, CacheManager};
use crate::data::FetchError;
use crate::refresh::Dataset;

/// Errors that abort a refresh job
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("error downloading {dataset}: {source}")]
    Fetch {
        dataset: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("error persisting {dataset}: {source}")]
    Persist {
        dataset: &'static str,
        #[source]
        source: CacheError,
    },
}

/// Fetches `dataset` and overwrites its cache entry.
///
/// Nothing is written unless the whole response parses, so a failed download
/// leaves the previous entry in place. Returns the fresh records so the caller
/// can chain follow-up work.
pub async fn download_and_persist<D: Dataset>(
    dataset: &D,
    store: &CacheManager,
) -> Result<Vec<D::Record>, DownloadError> {
    let records = dataset
        .fetch()
        .await
        .map_err(|source| DownloadError::Fetch {
            dataset: dataset.name(),
            source,
        })?;

    store
        .write(dataset.cache_key(), &records)
        .map_err(|source| DownloadError::Persist {
            dataset: dataset.name(),
            source,
        })?;

    info!(
        dataset = dataset.name(),
        count = records.len(),
        "Persisted records to cache"
    );

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::keys::tests::key_line;
    use crate::data::{KeyRecord, KeysClient, LinksClient};
    use crate::jobs::WorkerCommand;
    use crate::refresh::tests::RecordingLauncher;
    use crate::refresh::{Freshness, RefreshCoordinator};
    use chrono::Duration;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const THREE_LINKS: &str = r#"{"Short":"a","Long":"https://a.example.com","Owner":"x","Created":"2024-01-01T00:00:00Z","LastEdit":"2024-01-01T00:00:00Z"}
{"Short":"b","Long":"https://b.example.com","Owner":"y","Created":"2024-01-01T00:00:00Z","LastEdit":"2024-01-01T00:00:00Z"}
{"Short":"c","Long":"https://c.example.com","Owner":"z","Created":"2024-01-01T00:00:00Z","LastEdit":"2024-01-01T00:00:00Z"}
"#;

    #[tokio::test]
    async fn test_absent_cache_then_refresh_then_fresh_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.export"))
            .respond_with(ResponseTemplate::new(200).set_body_string(THREE_LINKS))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = CacheManager::with_dir(temp_dir.path().to_path_buf());
        let launcher = RecordingLauncher::default();
        let coordinator = RefreshCoordinator::new(&store, &launcher, WorkerCommand::new("golook"));
        let links = LinksClient::new(format!("{}/.export", server.uri()), Duration::hours(1));

        let first = coordinator.get_data(&links, false).unwrap();
        assert!(first.records.is_empty());
        assert!(first.pending);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

        // What the launched worker does
        let fetched = download_and_persist(&links, &store).await.unwrap();
        assert_eq!(fetched.len(), 3);
        launcher.running.store(false, Ordering::SeqCst);

        let second = coordinator.get_data(&links, false).unwrap();
        assert_eq!(second.freshness, Freshness::Fresh);
        assert!(!second.pending);
        assert_eq!(second.records, fetched);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_key_line_leaves_previous_cache_untouched() {
        let mut lines: Vec<String> = (0..5)
            .map(|i| key_line("ssh-ed25519", i, &format!("user{i}")))
            .collect();
        lines.insert(2, "ssh-ed25519 AAAA-broken".to_string());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(lines.join("\n")))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = CacheManager::with_dir(temp_dir.path().to_path_buf());
        let previous = vec![KeyRecord {
            key_line: "ssh-ed25519 AAAA old".to_string(),
            comment: "old".to_string(),
        }];
        store.write("pubkey-cache", &previous).unwrap();
        let before = std::fs::read(temp_dir.path().join("pubkey-cache.json")).unwrap();

        let keys = KeysClient::new(server.uri(), Duration::hours(24));
        let result = download_and_persist(&keys, &store).await;

        assert!(matches!(result, Err(DownloadError::Fetch { .. })));
        let after = std::fs::read(temp_dir.path().join("pubkey-cache.json")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_a_fetch_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheManager::with_dir(temp_dir.path().to_path_buf());
        let keys = KeysClient::new("http://127.0.0.1:9/keys", Duration::hours(24));

        let result = download_and_persist(&keys, &store).await;

        assert!(matches!(result, Err(DownloadError::Fetch { .. })));
        assert!(!store.exists("pubkey-cache"));
    }
}
