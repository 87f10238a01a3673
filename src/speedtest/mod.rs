pub mod download;
pub mod liveness;
pub mod ping;
mod sampler;
pub mod upload;

use std::time::Duration;

use reqwest::Client;

use crate::error::Result;
use crate::settings::Settings;

pub use sampler::{TransferProgress, TransferResult};

pub const ANDROID_UA: &str =
    "Dalvik/2.1.0 (Linux; U; Android 10; SM-G9750 Build/QP1A.190711.020)";
pub const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub download_bytes: u64,
    pub upload_bytes: u64,
    pub ping_ms: f64,
    pub jitter_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Checking,
    Ping,
    Download,
    Upload,
    Complete,
    Unreachable,
}

/// Knobs for one download or upload run.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub silent: bool,
    pub use_bytes: bool,
    pub use_mebi: bool,
    pub concurrency: usize,
    pub duration: Duration,
    pub token: String,
    pub no_prealloc: bool,
    pub upload_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            silent: false,
            use_bytes: false,
            use_mebi: false,
            concurrency: 4,
            duration: Duration::from_secs(15),
            token: String::new(),
            no_prealloc: false,
            upload_size: 1024 * 1024,
        }
    }
}

/// Measurement engine shared by every probe against every server.
#[derive(Debug, Clone)]
pub struct SpeedTest {
    client: Client,
    liveness_timeout: Duration,
}

impl SpeedTest {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, settings.liveness_timeout()))
    }

    pub fn with_client(client: Client, liveness_timeout: Duration) -> Self {
        Self {
            client,
            liveness_timeout,
        }
    }
}
