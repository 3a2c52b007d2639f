use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport failure, timeout or non-2xx answer from the gallery host.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("malformed image reference {0:?}")]
    MalformedRef(String),

    #[error("no download link on detail page for image {0}")]
    MissingDownloadLink(String),

    #[error("no unused images available, and downloading a new one failed")]
    NoImagesAvailable,

    #[error("failed to set wallpaper for {desktop}: {}", .failures.join("; "))]
    Apply {
        desktop: String,
        failures: Vec<String>,
    },

    #[error("I/O error on {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub fn fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Error::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
