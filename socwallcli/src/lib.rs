pub use crate::app::{RunOptions, RunSummary, SocwallCliApp};

mod app {
    use anyhow::{Context, Result};
    use socwall_core::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    pub struct RunOptions {
        /// Overrides desktop detection.
        pub desktop: Option<DesktopEnv>,
        pub keep_used: bool,
        pub no_download: bool,
        pub purge_oldest: Option<usize>,
        pub dry_run: bool,
    }

    #[derive(Debug, Default)]
    pub struct RunSummary {
        pub swept: usize,
        pub purged: usize,
        pub wallpaper: Option<PathBuf>,
        pub applied: bool,
        pub downloaded: usize,
    }

    pub struct SocwallCliApp {
        config: Config,
        gallery: Box<dyn Gallery>,
        fetcher: Box<dyn ImageFetcher>,
        cancel: Arc<AtomicBool>,
    }

    impl SocwallCliApp {
        pub fn new(config: Config) -> Self {
            let gallery = SocwallClient::new(&config);
            let fetcher = HttpFetcher::new(&config);
            Self::with_services(config, Box::new(gallery), Box::new(fetcher))
        }

        pub fn with_services(config: Config, gallery: Box<dyn Gallery>, fetcher: Box<dyn ImageFetcher>) -> Self {
            Self {
                config,
                gallery,
                fetcher,
                cancel: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Setting this flag makes downloads stop after the page in flight.
        pub fn cancel_handle(&self) -> Arc<AtomicBool> {
            Arc::clone(&self.cancel)
        }

        pub fn config(&self) -> &Config {
            &self.config
        }

        /// Sweeps, picks, applies and tops up. A summary with `applied == false`
        /// means no wallpaper was set.
        pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
            let pool = ImagePool::new(&self.config);
            let downloader = Downloader::new(&self.config, self.gallery.as_ref(), self.fetcher.as_ref())
                .context("Failed to start the downloader")?
                .with_cancel(self.cancel_handle());
            let mut summary = RunSummary::default();

            if options.keep_used || !self.config.settings.sweep_used {
                log::debug!("Keeping used wallpapers");
            } else {
                let removed = pool.purge_used().context("Failed to sweep used wallpapers")?;
                if !removed.is_empty() {
                    println!("Removed {} used wallpapers", removed.len());
                }
                summary.swept = removed.len();
            }

            if let Some(count) = options.purge_oldest {
                let removed = pool.purge_oldest(count).context("Failed to purge old wallpapers")?;
                println!("Purged {} oldest wallpapers", removed.len());
                summary.purged = removed.len();
            }

            let image = match pool.pick_random(&downloader) {
                Ok(image) => image,
                Err(Error::NoImagesAvailable) => {
                    eprintln!("No wallpaper available: nothing unused on disk and the download failed");
                    return Ok(summary);
                }
                Err(e) => return Err(e).context("Failed to pick a wallpaper"),
            };
            summary.wallpaper = Some(image.clone());

            if options.dry_run {
                println!("Would set wallpaper: {}", image.display());
                summary.applied = true;
            } else {
                let desktop = options.desktop.unwrap_or_else(desktop::detect);
                match wallpaper::apply(desktop, &image) {
                    Ok(()) => {
                        pool.mark_used(&image)
                            .with_context(|| format!("Failed to record {} as used", image.display()))?;
                        println!("Set wallpaper: {}", image.display());
                        summary.applied = true;
                    }
                    Err(e) => {
                        log::error!("{}", e);
                        eprintln!("Failed to set wallpaper {}: {}", image.display(), e);
                    }
                }
            }

            if options.no_download {
                return Ok(summary);
            }

            match pool.ensure_provisioned(self.config.settings.gallery_size, &downloader) {
                Ok(Some(report)) => {
                    if report.stop == StopReason::Cancelled {
                        println!("Download interrupted");
                    }
                    println!(
                        "Downloaded {} new wallpapers from {} pages",
                        report.downloaded.len(),
                        report.pages_visited.len()
                    );
                    summary.downloaded = report.downloaded.len();
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Top-up failed: {}", e);
                    eprintln!("Failed to download new wallpapers: {}", e);
                }
            }

            Ok(summary)
        }
    }

}
