pub mod config;
pub mod desktop;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod gallery;
pub mod pool;
pub mod wallpaper;

#[cfg(test)]
mod testing;

pub use crate::config::{Config, Settings};
pub use crate::desktop::DesktopEnv;
pub use crate::downloader::{Downloader, ImageOutcome, SessionReport, StopReason, VisitedPageLog};
pub use crate::error::{Error, Result};
pub use crate::fetcher::{HttpFetcher, ImageFetcher};
pub use crate::gallery::{Gallery, ImageRef, SocwallClient};
pub use crate::pool::{ImagePool, UsedImageLog};
pub use crate::wallpaper::{setter_for, WallpaperSetter};
