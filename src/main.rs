use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::error;
use tokio::sync::mpsc;

use ytdl_updater::{
    CheckOutcome, DownloadProgress, PlatformTarget, UpdateCoordinator, UpdateNotice,
    UpdaterConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "ytdl-updater",
    author,
    version,
    about = "Keeps a locally cached youtube-dl binary up to date"
)]
struct Cli {
    /// Upstream platform convention (windows, macos, linux). Defaults to the host.
    #[arg(long)]
    platform: Option<PlatformTarget>,

    /// Where the managed binary is installed.
    #[arg(long)]
    binary_path: Option<PathBuf>,

    /// Where the installed version is recorded.
    #[arg(long)]
    version_file: Option<PathBuf>,

    /// Base URL of the release host.
    #[arg(long)]
    release_host: Option<String>,

    /// Only report local and latest versions; never download.
    #[arg(long)]
    check_only: bool,

    /// Print updater version and exit.
    #[arg(long)]
    version_only: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("ytdl-updater {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = build_config(&cli);
    let (tx, mut rx) = mpsc::unbounded_channel::<UpdateNotice>();
    let coordinator = match UpdateCoordinator::new(config, tx) {
        Ok(coordinator) => coordinator,
        Err(err) => {
            error!("startup: failed to build HTTP client: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_only {
        report_versions(&coordinator).await;
        return ExitCode::SUCCESS;
    }

    let bar = progress_bar();
    let progress_bar = bar.clone();
    let coordinator = coordinator.with_progress(Arc::new(move |p: DownloadProgress| {
        if let Some(total) = p.total {
            progress_bar.set_length(total);
        }
        progress_bar.set_position(p.downloaded);
        progress_bar.set_message(p.speed);
    }));

    let printer = tokio::spawn(async move {
        while let Some(notice) = rx.recv().await {
            println!("{notice}");
        }
    });

    let result = coordinator.check_update().await;
    bar.finish_and_clear();
    drop(coordinator);
    let _ = printer.await;

    match result {
        Ok(CheckOutcome::NoRemoteInfo) => {
            println!("Latest youtube-dl version unavailable; nothing to do");
            ExitCode::SUCCESS
        }
        Ok(CheckOutcome::UpToDate { version }) => {
            println!("youtube-dl {version} is up to date");
            ExitCode::SUCCESS
        }
        Ok(CheckOutcome::Updated { version, .. }) => {
            println!("youtube-dl {version} installed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("update: {err}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> UpdaterConfig {
    let platform = cli.platform.unwrap_or_else(PlatformTarget::current);
    let mut config = UpdaterConfig::for_platform(platform);
    if let Some(path) = &cli.binary_path {
        config = config.with_binary_path(path);
    }
    if let Some(path) = &cli.version_file {
        config = config.with_version_record_path(path);
    }
    if let Some(host) = &cli.release_host {
        config = config.with_release_host(host);
    }
    config
}

async fn report_versions(coordinator: &UpdateCoordinator<mpsc::UnboundedSender<UpdateNotice>>) {
    let local = coordinator.version_store().get_local_version().await;
    println!("installed: {}", local.as_deref().unwrap_or("none"));
    match coordinator.resolver().probe().await {
        Ok(release) => println!("latest:    {} ({})", release.version, release.download_url),
        Err(err) => println!("latest:    unknown ({err})"),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}
