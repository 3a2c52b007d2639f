//! Download sessions: pick unvisited gallery pages at random and fetch their
//! images on a bounded worker pool until enough new images are on disk.

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher::{remove_partial_downloads, ImageFetcher};
use crate::gallery::{Gallery, ImageRef};

/// Page numbers whose images were all attempted, one per line on disk.
#[derive(Debug)]
pub struct VisitedPageLog {
    path: PathBuf,
    pages: BTreeSet<u32>,
}

impl VisitedPageLog {
    /// Reads the log at `path`. A log covering more than `reset_ratio` of the
    /// page range is deleted so selection never runs dry as the site shrinks.
    pub fn load(path: &Path, max_page: u32, reset_ratio: f64) -> Result<Self> {
        let pages = match fs::read_to_string(path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| match line.parse::<u32>() {
                    Ok(page) if (1..=max_page).contains(&page) => Some(page),
                    _ => {
                        warn!("Ignoring invalid entry {:?} in {}", line, path.display());
                        None
                    }
                })
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No previous downloads found");
                BTreeSet::new()
            }
            Err(e) => return Err(Error::file(path, e)),
        };

        let mut log = VisitedPageLog {
            path: path.to_path_buf(),
            pages,
        };

        let threshold = reset_ratio * f64::from(max_page);
        if log.pages.len() as f64 > threshold {
            info!(
                "Visited {} of {} pages, starting over",
                log.pages.len(),
                max_page
            );
            log.reset()?;
        }

        Ok(log)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.pages.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::file(&self.path, e)),
        }
    }

    /// Appends `page` and flushes. Returns false if it was already recorded.
    pub fn record(&mut self, page: u32) -> Result<bool> {
        if !self.pages.insert(page) {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::file(&self.path, e))?;
        writeln!(file, "{}", page).map_err(|e| Error::file(&self.path, e))?;
        file.flush().map_err(|e| Error::file(&self.path, e))?;
        Ok(true)
    }

    pub fn contains(&self, page: u32) -> bool {
        self.pages.contains(&page)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.iter().copied()
    }
}

/// Uniformly random page in `1..=max_page` that is neither visited nor excluded.
pub fn pick_page<R: Rng + ?Sized>(
    max_page: u32,
    visited: &VisitedPageLog,
    excluded: &HashSet<u32>,
    rng: &mut R,
) -> Option<u32> {
    let candidates: Vec<u32> = (1..=max_page)
        .filter(|page| !visited.contains(*page) && !excluded.contains(page))
        .collect();
    candidates.choose(rng).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Downloaded(PathBuf),
    /// A file with the same name already exists in one of the image directories.
    Skipped(PathBuf),
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    TargetReached,
    Exhausted,
    Cancelled,
    TooManyPageFailures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub downloaded: Vec<PathBuf>,
    pub skipped: usize,
    pub failed_images: usize,
    pub pages_visited: Vec<u32>,
    pub pages_failed: Vec<u32>,
    pub stop: StopReason,
}

pub struct Downloader<'a> {
    config: &'a Config,
    gallery: &'a dyn Gallery,
    fetcher: &'a dyn ImageFetcher,
    workers: ThreadPool,
    cancel: Arc<AtomicBool>,
}

impl<'a> Downloader<'a> {
    pub fn new(config: &'a Config, gallery: &'a dyn Gallery, fetcher: &'a dyn ImageFetcher) -> Result<Self> {
        let workers = ThreadPoolBuilder::new()
            .num_threads(config.settings.concurrency)
            .thread_name(|index| format!("socwall-fetch-{}", index))
            .build()?;

        match remove_partial_downloads(&config.wallpaper_dir) {
            Ok(removed) if !removed.is_empty() => {
                info!("Removed {} partial downloads from an interrupted run", removed.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Could not sweep partial downloads: {}", e),
        }

        Ok(Self {
            config,
            gallery,
            fetcher,
            workers,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Uses a flag owned by the caller, e.g. one set from a Ctrl-C handler.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Setting the flag stops a running session before it selects its next page.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn load_visited(&self) -> Result<VisitedPageLog> {
        let settings = &self.config.settings;
        VisitedPageLog::load(
            &self.config.visited_log_file,
            settings.max_page,
            settings.visited_reset_ratio,
        )
    }

    /// Downloads whole pages until at least `target` new images are stored.
    pub fn run(&self, target: usize) -> Result<SessionReport> {
        let settings = &self.config.settings;
        let mut visited = self.load_visited()?;
        let mut failed_pages = HashSet::new();
        let mut consecutive_failures = 0;
        let mut report = SessionReport::default();
        let mut rng = rand::thread_rng();

        info!("Downloading {} new images", target);

        while report.downloaded.len() < target {
            if self.cancelled() {
                info!("Download session cancelled");
                report.stop = StopReason::Cancelled;
                break;
            }

            let Some(page) = pick_page(settings.max_page, &visited, &failed_pages, &mut rng) else {
                warn!("No unvisited gallery pages left");
                report.stop = StopReason::Exhausted;
                break;
            };

            let images = match self.gallery.list_images(page) {
                Ok(images) => {
                    consecutive_failures = 0;
                    unique(images)
                }
                Err(e) => {
                    warn!("Skipping page {}: {}", page, e);
                    failed_pages.insert(page);
                    report.pages_failed.push(page);
                    consecutive_failures += 1;
                    if consecutive_failures >= settings.max_page_failures {
                        warn!("Giving up after {} failed pages in a row", consecutive_failures);
                        report.stop = StopReason::TooManyPageFailures;
                        break;
                    }
                    continue;
                }
            };

            let mut page_downloads = 0;
            for outcome in self.fetch_all(&images) {
                match outcome {
                    ImageOutcome::Downloaded(path) => {
                        page_downloads += 1;
                        report.downloaded.push(path);
                    }
                    ImageOutcome::Skipped(_) => report.skipped += 1,
                    ImageOutcome::Failed => report.failed_images += 1,
                }
            }

            visited.record(page)?;
            report.pages_visited.push(page);
            info!(
                "Page {}: {} of {} images downloaded",
                page,
                page_downloads,
                images.len()
            );
        }

        Ok(report)
    }

    /// Fetches a single random image for when the pool runs dry. The page is
    /// not recorded as visited since only one of its images was taken.
    pub fn download_one(&self) -> Result<Option<PathBuf>> {
        let settings = &self.config.settings;
        let visited = self.load_visited()?;
        let mut tried = HashSet::new();
        let mut rng = rand::thread_rng();

        for _ in 0..settings.single_image_attempts {
            if self.cancelled() {
                break;
            }
            let Some(page) = pick_page(settings.max_page, &visited, &tried, &mut rng) else {
                break;
            };
            tried.insert(page);

            let mut images = match self.gallery.list_images(page) {
                Ok(images) => images,
                Err(e) => {
                    warn!("Skipping page {}: {}", page, e);
                    continue;
                }
            };
            images.shuffle(&mut rng);

            for image in &images {
                if let ImageOutcome::Downloaded(path) = self.fetch_image(image) {
                    return Ok(Some(path));
                }
            }
            debug!("Page {} had nothing new to offer", page);
        }

        Ok(None)
    }

    fn fetch_all(&self, images: &[ImageRef]) -> Vec<ImageOutcome> {
        self.workers
            .install(|| images.par_iter().map(|image| self.fetch_image(image)).collect())
    }

    /// Resolves and stores one image. Failures are logged and contained here.
    pub fn fetch_image(&self, image: &ImageRef) -> ImageOutcome {
        match self.try_fetch_image(image) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Failed to download image {}: {}", image, e);
                ImageOutcome::Failed
            }
        }
    }

    fn try_fetch_image(&self, image: &ImageRef) -> Result<ImageOutcome> {
        let file_name = image.file_name()?;
        if let Some(existing) = self.existing_copy(&file_name) {
            debug!("Skipping already downloaded image {}", existing.display());
            return Ok(ImageOutcome::Skipped(existing));
        }

        let url = self.gallery.resolve_download_url(image)?;
        info!("Downloading {}", url);
        let destination = self.config.wallpaper_dir.join(&file_name);
        self.fetcher.fetch(&url, &destination)?;
        Ok(ImageOutcome::Downloaded(destination))
    }

    fn existing_copy(&self, file_name: &str) -> Option<PathBuf> {
        self.config
            .image_dirs()
            .map(|dir| dir.join(file_name))
            .find(|path| path.exists())
    }
}

/// Drops repeated links so two workers never write the same file.
fn unique(images: Vec<ImageRef>) -> Vec<ImageRef> {
    let mut seen = HashSet::new();
    images
        .into_iter()
        .filter(|image| seen.insert(image.image_id().map(str::to_string).unwrap_or_else(|_| image.to_string())))
        .collect()
}
