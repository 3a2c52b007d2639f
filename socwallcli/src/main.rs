use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use socwall_core::config::SETTINGS_FILE;
use socwall_core::{Config, DesktopEnv, Settings};
use socwallcli::{RunOptions, SocwallCliApp};

#[derive(Parser)]
#[command(name = "socwall")]
#[command(about = "Rotates the desktop wallpaper through images from socwall.com")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to config.json in the config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory downloaded wallpapers are stored in
    #[arg(long, value_name = "DIR")]
    wallpaper_dir: Option<PathBuf>,

    /// Number of unused wallpapers to keep on disk
    #[arg(long, value_name = "N")]
    gallery_size: Option<usize>,

    /// Desktop environment to apply for, skipping detection
    #[arg(long, value_name = "TAG")]
    desktop: Option<DesktopEnv>,

    /// Do not delete wallpapers that were already shown
    #[arg(long)]
    keep_used: bool,

    /// Do not top up the gallery after applying
    #[arg(long)]
    no_download: bool,

    /// Delete the N least recently modified wallpapers first
    #[arg(long, value_name = "N")]
    purge_oldest: Option<usize>,

    /// Pick a wallpaper and print it without applying
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config_dir = Config::default_config_dir()?;
    let mut settings = match &cli.config {
        Some(path) => Settings::load_file(path)?,
        None => Settings::load(&config_dir.join(SETTINGS_FILE))?,
    };

    if let Some(dir) = cli.wallpaper_dir {
        settings.wallpaper_dir = Some(dir);
    }
    if let Some(size) = cli.gallery_size {
        settings.gallery_size = size;
    }

    let config = Config::with_settings(config_dir, settings).context("Failed to prepare directories")?;
    log::debug!(
        "Wallpapers in {}, used log at {}",
        config.wallpaper_dir.display(),
        config.used_log_file.display()
    );

    let options = RunOptions {
        desktop: cli.desktop,
        keep_used: cli.keep_used,
        no_download: cli.no_download,
        purge_oldest: cli.purge_oldest,
        dry_run: cli.dry_run,
    };

    let app = SocwallCliApp::new(config);

    let cancel = app.cancel_handle();
    ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("Interrupted, finishing the current page (press Ctrl-C again to quit)");
    })
    .context("Failed to install the Ctrl-C handler")?;

    let summary = app.run(&options)?;
    Ok(summary.applied)
}
