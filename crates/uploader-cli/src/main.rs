use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use uploader_core::telegram::{DEFAULT_API_URL, DEFAULT_SESSION_PATH};
use uploader_core::{
    CancellationToken, ScanMode, TelegramClient, TelegramConfig, Worker, WorkerControl, WorkerOptions, DEFAULT_DIR,
};

#[derive(Parser)]
#[command(
    name = "episode-uploader",
    version,
    about = "Upload finished episodes from a drop directory and record their file ids"
)]
struct Cli {
    /// Directory the producer drops `<id>.mp3` / `<id>_data.txt` pairs into
    #[arg(long, default_value = DEFAULT_DIR)]
    dir: PathBuf,

    /// "batch" uploads every pending episode per cycle, "single" only the first
    #[arg(long, default_value = "batch")]
    mode: ScanMode,

    /// Pause between directory scans
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Application id the session belongs to (required, via flag or env)
    #[arg(long, env = "UPLOADER_API_ID")]
    api_id: i64,

    /// Application hash, 32 hex characters (required, via flag or env)
    #[arg(long, env = "UPLOADER_API_HASH", hide_env_values = true)]
    api_hash: String,

    /// Session file holding the bot token and self chat id
    #[arg(long, env = "UPLOADER_SESSION", default_value = DEFAULT_SESSION_PATH)]
    session: PathBuf,

    /// Bot API endpoint (point at a local server for large files)
    #[arg(long, env = "UPLOADER_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Per-upload request timeout
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    /// Exit after this many polling cycles
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = TelegramConfig {
        api_id: cli.api_id,
        api_hash: cli.api_hash,
        session_path: cli.session,
        api_url: cli.api_url,
        timeout: Duration::from_secs(cli.timeout_secs),
    };
    let client = TelegramClient::new(&config)
        .with_context(|| format!("Failed to start upload client from {}", config.session_path.display()))?;

    std::fs::create_dir_all(&cli.dir)
        .with_context(|| format!("Failed to create watch directory {}", cli.dir.display()))?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown requested, finishing current episode");
        handler_token.cancel();
    })
    .context("Failed to install signal handler")?;

    let options = WorkerOptions {
        dir: cli.dir,
        mode: cli.mode,
        poll_interval: Duration::from_millis(cli.interval_ms),
    };
    let mut control = WorkerControl::new().with_cancel_token(token);
    if let Some(max) = cli.max_cycles {
        control = control.with_max_cycles(max);
    }

    let summary = Worker::new(options, client).run(&control);

    eprintln!(
        "Stopped after {} cycle(s): {} uploaded, {} recovered, {} failed",
        summary.cycles, summary.totals.uploaded, summary.totals.recovered, summary.totals.failed
    );
    Ok(())
}
