pub mod cancel;
pub mod client;
pub mod episode;
pub mod error;
pub mod metadata;
pub mod result;
pub mod scan;
pub mod telegram;
pub mod worker;
pub mod writer;

use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use cancel::CancellationToken;
pub use client::{Peer, UploadClient, UploadRequest};
pub use episode::{EpisodeId, PendingEpisode};
pub use error::{ClientError, ConfigError, UploadError};
pub use metadata::EpisodeMetadata;
pub use result::{MediaKind, NormalizedResult, SentMessage, UploadResult};
pub use telegram::{TelegramClient, TelegramConfig};
pub use worker::Worker;

/// Directory shared with the producer and the downstream consumer.
pub const DEFAULT_DIR: &str = "episodes_to_send";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How many pending episodes one cycle takes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Every episode found in the cycle
    #[default]
    Batch,
    /// Only the first one; the rest wait for later cycles
    Single,
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(ScanMode::Batch),
            "single" => Ok(ScanMode::Single),
            other => Err(format!("unknown mode '{}', expected 'batch' or 'single'", other)),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanMode::Batch => "batch",
            ScanMode::Single => "single",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOptions {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DIR)
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            mode: ScanMode::default(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Control options for the polling loop (cancellation, cycle limit).
#[derive(Debug, Clone, Default)]
pub struct WorkerControl {
    /// Cancellation token for clean shutdown.
    pub cancel_token: Option<CancellationToken>,
    /// Stop after this many cycles. Unlimited when `None`.
    pub max_cycles: Option<u64>,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_token.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn limit_reached(&self, cycles: u64) -> bool {
        self.max_cycles.is_some_and(|max| cycles >= max)
    }
}

/// Counts for one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// `.mp3` files seen in the directory
    #[serde(default)]
    pub found: u64,
    #[serde(default)]
    pub uploaded: u64,
    /// Result already on disk from an interrupted cycle; inputs consumed without uploading
    #[serde(default)]
    pub recovered: u64,
    #[serde(default)]
    pub failed: u64,
    /// Invalid names, deferred sidecar collisions and episodes on hold
    #[serde(default)]
    pub skipped: u64,
}

impl AddAssign for CycleReport {
    fn add_assign(&mut self, other: Self) {
        self.found += other.found;
        self.uploaded += other.uploaded;
        self.recovered += other.recovered;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Totals returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub cycles: u64,
    #[serde(default)]
    pub totals: CycleReport,
}
