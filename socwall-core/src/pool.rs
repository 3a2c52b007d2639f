use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::config::Config;
use crate::downloader::{Downloader, SessionReport};
use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Append-only list of image paths that have already been shown.
#[derive(Debug, Clone)]
pub struct UsedImageLog {
    path: PathBuf,
}

impl UsedImageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::file(&self.path, e)),
        }
    }

    pub fn append(&self, image: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::file(&self.path, e))?;
        writeln!(file, "{}", image.display()).map_err(|e| Error::file(&self.path, e))?;
        Ok(())
    }

    pub fn truncate(&self) -> Result<()> {
        fs::write(&self.path, "").map_err(|e| Error::file(&self.path, e))
    }
}

/// Local images on disk and which of them are still unused.
pub struct ImagePool<'a> {
    config: &'a Config,
    used: UsedImageLog,
}

impl<'a> ImagePool<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            used: UsedImageLog::new(&config.used_log_file),
        }
    }

    pub fn used_log(&self) -> &UsedImageLog {
        &self.used
    }

    /// Image files in the wallpaper directory and the static directory.
    pub fn local_images(&self) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();
        for dir in self.config.image_dirs() {
            images.extend(images_in(dir)?);
        }
        Ok(images)
    }

    pub fn unused_candidates(&self) -> Result<Vec<PathBuf>> {
        let used: HashSet<PathBuf> = self.used.entries()?.into_iter().collect();
        Ok(self
            .local_images()?
            .into_iter()
            .filter(|image| !used.contains(image))
            .collect())
    }

    /// Random unused image. An empty pool gets exactly one on-demand download.
    pub fn pick_random(&self, downloader: &Downloader<'_>) -> Result<PathBuf> {
        let mut rng = rand::thread_rng();

        if let Some(image) = self.unused_candidates()?.choose(&mut rng) {
            return Ok(image.clone());
        }

        info!("No unused images left, downloading one");
        match downloader.download_one() {
            Ok(Some(path)) => debug!("Downloaded {}", path.display()),
            Ok(None) => warn!("Could not download a new image"),
            Err(e) => warn!("Could not download a new image: {}", e),
        }

        self.unused_candidates()?
            .choose(&mut rng)
            .cloned()
            .ok_or(Error::NoImagesAvailable)
    }

    pub fn mark_used(&self, image: &Path) -> Result<()> {
        debug!("Marking {} as used", image.display());
        self.used.append(image)
    }

    /// Runs a download session for the shortfall when fewer than `target`
    /// unused images are on disk.
    pub fn ensure_provisioned(
        &self,
        target: usize,
        downloader: &Downloader<'_>,
    ) -> Result<Option<SessionReport>> {
        let unused = self.unused_candidates()?.len();
        if unused >= target {
            debug!("Pool has {} unused images, nothing to download", unused);
            return Ok(None);
        }

        let shortfall = target - unused;
        info!("Pool has {} unused images, fetching {} more", unused, shortfall);
        downloader.run(shortfall).map(Some)
    }

    /// Deletes every logged image and empties the log. Files that are gone or
    /// cannot be removed are skipped. Images in the static directory stay.
    pub fn purge_used(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for image in self.used.entries()? {
            if self.is_static(&image) {
                debug!("Keeping static image {}", image.display());
                continue;
            }
            match fs::remove_file(&image) {
                Ok(()) => {
                    info!("Removed used image {}", image.display());
                    removed.push(image);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Used image {} already gone", image.display());
                }
                Err(e) => warn!("Could not remove {}: {}", image.display(), e),
            }
        }

        self.used.truncate()?;
        Ok(removed)
    }

    /// Deletes the `count` least recently modified images of the wallpaper directory.
    pub fn purge_oldest(&self, count: usize) -> Result<Vec<PathBuf>> {
        let mut dated: Vec<(SystemTime, PathBuf)> = images_in(&self.config.wallpaper_dir)?
            .into_iter()
            .filter_map(|image| {
                let modified = fs::metadata(&image).and_then(|meta| meta.modified()).ok()?;
                Some((modified, image))
            })
            .collect();
        dated.sort();

        let mut removed = Vec::new();
        for (modified, image) in dated.into_iter().take(count) {
            match fs::remove_file(&image) {
                Ok(()) => {
                    let modified: DateTime<Local> = modified.into();
                    info!(
                        "Removed {} (last modified {})",
                        image.display(),
                        modified.format("%Y-%m-%d %H:%M")
                    );
                    removed.push(image);
                }
                Err(e) => warn!("Could not remove {}: {}", image.display(), e),
            }
        }
        Ok(removed)
    }

    fn is_static(&self, image: &Path) -> bool {
        self.config
            .static_dir
            .as_deref()
            .is_some_and(|dir| image.starts_with(dir))
    }
}

fn images_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::file(dir, e)),
    };

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image(path))
        .collect();
    images.sort();
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(true);

    !hidden
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
}
