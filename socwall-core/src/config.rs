use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE: &str = "config.json";
pub const VISITED_LOG_FILE: &str = ".page_numbers";
pub const DEFAULT_BASE_URL: &str = "http://www.socwall.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/41.0.2228.0 Safari/537.36";
pub const MAX_CONCURRENCY: usize = 16;

/// Tunables, optionally read from `config.json` in the config directory.
/// Every field has a default so the file may list only what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Upper bound of simultaneous image fetches against the gallery host.
    pub concurrency: usize,
    /// Number of unused images to keep on disk.
    pub gallery_size: usize,
    /// Last listing page of the gallery. The site drifts, so this is tunable.
    pub max_page: u32,
    /// The visited page log is dropped once it covers more than this share of `max_page`.
    pub visited_reset_ratio: f64,
    pub max_page_failures: usize,
    pub single_image_attempts: usize,
    pub used_log_name: String,
    pub wallpaper_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub use_static_dir: bool,
    pub sweep_used: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            concurrency: 8,
            gallery_size: 20,
            max_page: 709,
            visited_reset_ratio: 0.9,
            max_page_failures: 3,
            single_image_attempts: 3,
            used_log_name: "used_images.log".to_string(),
            wallpaper_dir: None,
            static_dir: None,
            use_static_dir: true,
            sweep_used: true,
        }
    }
}

impl Settings {
    /// Reads settings from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default().sanitized());
        }
        Self::load_file(path)
    }

    /// Reads a settings file the user asked for by name; a missing file is an error.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings.sanitized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Clamps values that would make a session misbehave.
    pub fn sanitized(mut self) -> Self {
        let defaults = Settings::default();

        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            let clamped = self.concurrency.clamp(1, MAX_CONCURRENCY);
            log::warn!("concurrency {} out of range, using {}", self.concurrency, clamped);
            self.concurrency = clamped;
        }
        if self.max_page == 0 {
            log::warn!("max_page must be at least 1, using {}", defaults.max_page);
            self.max_page = defaults.max_page;
        }
        if !(self.visited_reset_ratio > 0.0 && self.visited_reset_ratio <= 1.0) {
            log::warn!(
                "visited_reset_ratio {} out of range, using {}",
                self.visited_reset_ratio,
                defaults.visited_reset_ratio
            );
            self.visited_reset_ratio = defaults.visited_reset_ratio;
        }
        self.max_page_failures = self.max_page_failures.max(1);
        self.single_image_attempts = self.single_image_attempts.max(1);
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
        if self.used_log_name.trim().is_empty() {
            self.used_log_name = defaults.used_log_name;
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self
    }
}

/// Resolved locations plus settings. Built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub wallpaper_dir: PathBuf,
    /// Never-delete directory whose images are candidates but are never purged.
    pub static_dir: Option<PathBuf>,
    pub used_log_file: PathBuf,
    pub visited_log_file: PathBuf,
    pub settings: Settings,
}

impl Config {
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir()?;
        let settings = Settings::load(&config_dir.join(SETTINGS_FILE))?;
        Self::with_settings(config_dir, settings)
    }

    pub fn default_config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "socwall", "socwall")
            .context("Failed to get project directories")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Fills in the default `~/Wallpapers` and `~/Static-Wallpapers` locations
    /// for directories the settings leave unset.
    pub fn with_settings(config_dir: PathBuf, settings: Settings) -> Result<Self> {
        let home_dir = || -> Result<PathBuf> {
            let user_dirs = UserDirs::new().context("Failed to locate the home directory")?;
            Ok(user_dirs.home_dir().to_path_buf())
        };

        let wallpaper_dir = match &settings.wallpaper_dir {
            Some(dir) => absolutize(dir)?,
            None => home_dir()?.join("Wallpapers"),
        };
        let static_dir = if settings.use_static_dir {
            Some(match &settings.static_dir {
                Some(dir) => absolutize(dir)?,
                None => home_dir()?.join("Static-Wallpapers"),
            })
        } else {
            None
        };

        Self::from_parts(absolutize(&config_dir)?, wallpaper_dir, static_dir, settings)
    }

    pub fn from_parts(
        config_dir: PathBuf,
        wallpaper_dir: PathBuf,
        static_dir: Option<PathBuf>,
        settings: Settings,
    ) -> Result<Self> {
        let settings = settings.sanitized();
        let used_log_file = config_dir.join(&settings.used_log_name);
        let visited_log_file = wallpaper_dir.join(VISITED_LOG_FILE);

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {}", config_dir.display()))?;
        fs::create_dir_all(&wallpaper_dir)
            .with_context(|| format!("Failed to create {}", wallpaper_dir.display()))?;
        if let Some(dir) = &static_dir {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        if !used_log_file.exists() {
            fs::write(&used_log_file, "")
                .with_context(|| format!("Failed to create {}", used_log_file.display()))?;
        }

        Ok(Config {
            config_dir,
            wallpaper_dir,
            static_dir,
            used_log_file,
            visited_log_file,
            settings,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.request_timeout_secs)
    }

    /// Directories scanned for candidate images, wallpaper directory first.
    pub fn image_dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.wallpaper_dir.as_path()).chain(self.static_dir.as_deref())
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(cwd.join(path))
}
