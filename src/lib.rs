//! gspeed - speed test engine for GlobalSpeed-style backends
//!
//! Measures download and upload throughput with a fixed pool of concurrent
//! HTTP transfers, and latency/jitter with ICMP echoes that fall back to
//! timed HTTP requests when raw sockets are not available.
//!
//! # Features
//!
//! - Three backend dialects (GlobalSpeed, Perception, WirelessSpeed)
//! - Per-server URI overrides
//! - Asymmetric exponential jitter smoothing
//! - Live rate sampling for progress displays

pub mod counter;
pub mod error;
pub mod isp;
pub mod server;
pub mod settings;
pub mod speedtest;

pub use counter::Counter;
pub use error::{Error, Result};
pub use isp::{IspRegistry, Operator, ServerGlobal};
pub use server::{Server, ServerType, TestKind};
pub use settings::Settings;
pub use speedtest::{
    ping::{Latency, LatencyStrategy, Network},
    SpeedTest, TransferOptions, TransferProgress, TransferResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
