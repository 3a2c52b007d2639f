use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::Builder;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gallery;

const PARTIAL_PREFIX: &str = ".socwall-";
const PARTIAL_SUFFIX: &str = ".part";

/// Stores the body behind a download URL at a local path.
pub trait ImageFetcher: Send + Sync {
    /// Returns the number of bytes written to `destination`.
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64>;
}

pub struct HttpFetcher {
    user_agent: String,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            user_agent: config.settings.user_agent.clone(),
            timeout: config.request_timeout(),
        }
    }
}

impl ImageFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64> {
        let dir = destination
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| Error::file(dir, e))?;

        let response = gallery::get(url, &self.user_agent, self.timeout)?;
        let expected = response
            .headers()
            .get(attohttpc::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        // The partial file lives next to the destination so the final rename
        // stays on one filesystem; dropping it on error removes it.
        let mut partial = Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::file(dir, e))?;

        let written = response
            .write_to(partial.as_file_mut())
            .map_err(|e| Error::fetch(url, e))?;
        if let Some(expected) = expected.filter(|&expected| expected != written) {
            return Err(Error::fetch(
                url,
                format!("short body: got {} of {} bytes", written, expected),
            ));
        }
        partial
            .as_file()
            .sync_all()
            .map_err(|e| Error::file(partial.path(), e))?;
        partial
            .persist(destination)
            .map_err(|e| Error::file(destination, e.error))?;

        log::debug!("Stored {} bytes from {} at {}", written, url, destination.display());
        Ok(written)
    }
}

pub fn is_partial_download(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX))
}

/// Deletes `.part` files an interrupted run left behind in `dir`.
pub fn remove_partial_downloads(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::file(dir, e)),
    };

    let mut removed = Vec::new();
    for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
        if !path.is_file() || !is_partial_download(&path) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Removed stale partial download {}", path.display());
                removed.push(path);
            }
            Err(e) => log::warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
