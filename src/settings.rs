use std::env;
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::isp::IspRegistry;
use crate::server::{Server, ServerType};
use crate::speedtest::{ping::Network, TransferOptions};

#[derive(Debug, Clone)]
pub struct Settings {
    pub ping_count: usize,
    pub concurrency: usize,
    pub duration_secs: u64,
    pub upload_size_kb: usize,
    pub use_bytes: bool,
    pub use_mebi: bool,
    pub no_prealloc: bool,
    pub token: String,
    pub source_ip: Option<IpAddr>,
    pub network: Network,
    pub liveness_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ping_count: 10,
            concurrency: 4,
            duration_secs: 15,
            upload_size_kb: 1024,
            use_bytes: false,
            use_mebi: false,
            no_prealloc: false,
            token: String::new(),
            source_ip: None,
            network: Network::Any,
            liveness_timeout_ms: 5_000,
        }
    }
}

fn env_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| Error::Config(format!("{}={}: {}", key, raw, err))),
        Err(_) => Ok(None),
    }
}

fn env_string(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

impl Settings {
    /// Defaults overridden by any `GSPEED_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        if let Some(v) = env_var("GSPEED_PING_COUNT")? {
            settings.ping_count = v;
        }
        if let Some(v) = env_var("GSPEED_CONCURRENCY")? {
            settings.concurrency = v;
        }
        if let Some(v) = env_var("GSPEED_DURATION")? {
            settings.duration_secs = v;
        }
        if let Some(v) = env_var("GSPEED_UPLOAD_SIZE")? {
            settings.upload_size_kb = v;
        }
        if let Some(v) = env_var("GSPEED_BYTES")? {
            settings.use_bytes = v;
        }
        if let Some(v) = env_var("GSPEED_MEBI")? {
            settings.use_mebi = v;
        }
        if let Some(v) = env_var("GSPEED_NO_PREALLOC")? {
            settings.no_prealloc = v;
        }
        if let Some(v) = env_var("GSPEED_LIVENESS_TIMEOUT_MS")? {
            settings.liveness_timeout_ms = v;
        }
        if let Some(v) = env_var("GSPEED_NETWORK")? {
            settings.network = v;
        }
        settings.source_ip = env_var("GSPEED_SOURCE")?;
        settings.token = env_string("GSPEED_TOKEN");

        if settings.concurrency == 0 {
            return Err(Error::Config("GSPEED_CONCURRENCY must be at least 1".to_string()));
        }
        Ok(settings)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn upload_size_bytes(&self) -> usize {
        self.upload_size_kb * 1024
    }

    pub fn transfer_options(&self, silent: bool) -> TransferOptions {
        TransferOptions {
            silent,
            use_bytes: self.use_bytes,
            use_mebi: self.use_mebi,
            concurrency: self.concurrency,
            duration: self.duration(),
            token: self.token.clone(),
            no_prealloc: self.no_prealloc,
            upload_size: self.upload_size_bytes(),
        }
    }
}

/// Builds the target server from `GSPEED_*` variables.
pub fn server_from_env(registry: &IspRegistry) -> Result<Server> {
    let host = env_string("GSPEED_HOST");
    if host.is_empty() {
        return Err(Error::Config("GSPEED_HOST is not set".to_string()));
    }
    let port = env_var("GSPEED_PORT")?.unwrap_or(8080);
    let server_type: ServerType = env_var("GSPEED_TYPE")?.unwrap_or_default();

    let mut server = Server::new(host, port, server_type);
    server.id = env_string("GSPEED_ID");
    server.name = env_var("GSPEED_NAME")?.unwrap_or_else(|| server.host.clone());
    server.ip = env_string("GSPEED_IP");
    server.ipv6 = env_string("GSPEED_IPV6");
    server.download_uri = env_string("GSPEED_DOWNLOAD_URI");
    server.upload_uri = env_string("GSPEED_UPLOAD_URI");
    server.ping_uri = env_string("GSPEED_PING_URI");
    server.isp = registry.resolve(&env_string("GSPEED_ISP"), &server.name).id;
    Ok(server)
}
