// src/file_cache/mod.rs
// On-disk LRU cache of downloaded datasets, keyed by SHA-256(url) plus a
// format suffix inferred from the URL. Tolerant of concurrent access from
// multiple worker tasks on the same cache directory.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::worker::error::{ErrorType, WorkerError};

/// Maximum download attempts for transient network/timeout failures.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base backoff between retries; doubles each attempt.
const DEFAULT_BASE_BACKOFF_SECS: u64 = 1;

fn suffix_for_url(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    if path.ends_with(".csv.gz") {
        ".csv.gz"
    } else if path.ends_with(".parquet") {
        ".parquet"
    } else if path.ends_with(".tsv") {
        ".tsv"
    } else if path.ends_with(".json") {
        ".json"
    } else {
        ".csv"
    }
}

fn cache_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_transient(e: &WorkerError) -> bool {
    matches!(e.error_type, ErrorType::Network | ErrorType::Timeout)
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_bytes: u64,
}

pub struct FileCache {
    cache_dir: PathBuf,
    max_file_bytes: u64,
    max_cache_bytes: u64,
    download_timeout_secs: u64,
    http: reqwest::Client,
}

impl FileCache {
    pub fn new(cache_dir: impl Into<PathBuf>, max_file_bytes: u64, max_cache_bytes: u64, download_timeout_secs: u64) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            cache_dir,
            max_file_bytes,
            max_cache_bytes,
            download_timeout_secs,
            http: reqwest::Client::new(),
        })
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", cache_key(url), suffix_for_url(url)))
    }

    /// Probes the cache directory for write access, for the health endpoint.
    pub fn is_writable(&self) -> bool {
        let probe = self.cache_dir.join(".health_probe");
        let ok = std::fs::write(&probe, b"ok").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    }

    /// Returns the cached path if present, touching its access time.
    pub fn get(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        if path.exists() {
            touch_atime(&path);
            Some(path)
        } else {
            None
        }
    }

    /// Downloads the dataset if absent, then returns the on-disk path.
    /// Aborts with a validation error if the file exceeds the per-file cap.
    /// Transient network/timeout failures are retried with exponential
    /// backoff; validation and internal errors are not.
    pub async fn download(&self, url: &str) -> Result<PathBuf, WorkerError> {
        if let Some(path) = self.get(url) {
            return Ok(path);
        }

        let mut attempts = 0;
        let mut backoff = std::time::Duration::from_secs(DEFAULT_BASE_BACKOFF_SECS);

        loop {
            match self.try_download(url).await {
                Ok(path) => return Ok(path),
                Err(e) if attempts < DEFAULT_MAX_ATTEMPTS && is_transient(&e) => {
                    warn!(url, error = %e, "transient download failure, retrying in {:?}...", backoff);
                    tokio::time::sleep(backoff).await;
                    attempts += 1;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_download(&self, url: &str) -> Result<PathBuf, WorkerError> {
        let final_path = self.path_for(url);
        let tmp_name = format!(".download_{}{}", uuid::Uuid::new_v4(), suffix_for_url(url));
        let tmp_path = self.cache_dir.join(tmp_name);

        let resp = tokio::time::timeout(
            std::time::Duration::from_secs(self.download_timeout_secs),
            self.http.get(url).send(),
        )
        .await
        .map_err(|_| WorkerError::timeout(format!("timed out downloading {}", url)))?
        .map_err(|e| WorkerError::network(format!("download request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                WorkerError::network(format!("download failed with status {}", status))
            } else {
                WorkerError::validation(format!("download failed with status {}", status))
            });
        }

        let mut file = std::fs::File::create(&tmp_path)
            .map_err(|e| WorkerError::internal(format!("failed to create temp file: {}", e)))?;
        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| WorkerError::network(format!("download stream error: {}", e)))?;
            written += chunk.len() as u64;
            if written > self.max_file_bytes {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(WorkerError::validation(format!(
                    "dataset exceeds the {} byte size limit",
                    self.max_file_bytes
                )));
            }
            file.write_all(&chunk)
                .map_err(|e| WorkerError::internal(format!("failed to write temp file: {}", e)))?;
        }
        drop(file);

        std::fs::rename(&tmp_path, &final_path)
            .map_err(|e| WorkerError::internal(format!("failed to publish downloaded file: {}", e)))?;

        self.evict_lru();
        Ok(final_path)
    }

    /// Deletes entries ordered by access time ascending until the cache is
    /// back under its total byte cap.
    pub fn evict_lru(&self) {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let Ok(dir) = std::fs::read_dir(&self.cache_dir) else {
            return;
        };
        let mut total: u64 = 0;
        for entry in dir.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(".download_"))
                .unwrap_or(false)
            {
                continue;
            }
            let atime = meta.accessed().unwrap_or(UNIX_EPOCH);
            total += meta.len();
            entries.push((path, meta.len(), atime));
        }

        if total <= self.max_cache_bytes {
            return;
        }

        entries.sort_by_key(|(_, _, atime)| *atime);
        for (path, size, _) in entries {
            if total <= self.max_cache_bytes {
                break;
            }
            if std::fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(size);
            }
        }
    }

    /// Removes stale `.download_*` temp files older than `max_age_secs`.
    pub fn cleanup_stale_temp_files(&self, max_age_secs: u64) {
        let Ok(dir) = std::fs::read_dir(&self.cache_dir) else {
            return;
        };
        let now = SystemTime::now();
        for entry in dir.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(".download_"))
                .unwrap_or(false);
            if !is_temp {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    if now.duration_since(modified).map(|d| d.as_secs()).unwrap_or(0) > max_age_secs {
                        if std::fs::remove_file(&path).is_ok() {
                            warn!(?path, "removed stale download temp file");
                        }
                    }
                }
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(dir) = std::fs::read_dir(&self.cache_dir) else {
            return stats;
        };
        for entry in dir.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    stats.entry_count += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }
        stats
    }

    pub fn clear_cache(&self) {
        if let Ok(dir) = std::fs::read_dir(&self.cache_dir) {
            for entry in dir.flatten() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        info!("file cache cleared");
    }
}

fn touch_atime(path: &Path) {
    if let Ok(file) = std::fs::File::open(path) {
        let now = filetime_now();
        let _ = file.set_times(
            std::fs::FileTimes::new().set_accessed(now),
        );
    }
}

fn filetime_now() -> SystemTime {
    SystemTime::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_detection() {
        assert_eq!(suffix_for_url("http://x/data.parquet"), ".parquet");
        assert_eq!(suffix_for_url("http://x/data.csv.gz?x=1"), ".csv.gz");
        assert_eq!(suffix_for_url("http://x/data.tsv"), ".tsv");
        assert_eq!(suffix_for_url("http://x/data.json"), ".json");
        assert_eq!(suffix_for_url("http://x/data"), ".csv");
    }

    #[test]
    fn cache_key_is_deterministic_and_url_determined() {
        let a = cache_key("http://example.com/a.csv");
        let b = cache_key("http://example.com/a.csv");
        let c = cache_key("http://example.com/b.csv");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn get_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 1_000_000, 10_000_000, 30).unwrap();
        assert!(cache.get("http://example.com/missing.csv").is_none());
    }

    #[test]
    fn cache_stats_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 1_000_000, 10_000_000, 30).unwrap();
        let stats = cache.cache_stats();
        assert_eq!(stats.entry_count, 0);
    }

    #[test]
    fn network_and_timeout_errors_are_transient() {
        assert!(is_transient(&WorkerError::network("down")));
        assert!(is_transient(&WorkerError::timeout("slow")));
        assert!(!is_transient(&WorkerError::validation("too big")));
        assert!(!is_transient(&WorkerError::internal("disk full")));
    }
}
