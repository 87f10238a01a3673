use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;

/// Backend API dialect spoken by a speed test server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerType {
    #[default]
    GlobalSpeed,
    Perception,
    WirelessSpeed,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerType::GlobalSpeed => "GlobalSpeed",
            ServerType::Perception => "Perception",
            ServerType::WirelessSpeed => "WirelessSpeed",
        };
        f.write_str(name)
    }
}

impl FromStr for ServerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "default" | "global" | "globalspeed" => Ok(ServerType::GlobalSpeed),
            "1" | "perception" => Ok(ServerType::Perception),
            "2" | "wireless" | "wirelessspeed" => Ok(ServerType::WirelessSpeed),
            other => Err(Error::Config(format!("unknown server type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    Download,
    Upload,
    Ping,
}

/// A speed test target.
///
/// Everything except the ICMP flag is fixed once the descriptor is built. The
/// flag is raised the first time ICMP echoes come back empty and stays raised,
/// so later probes skip straight to HTTP.
#[derive(Debug, Default)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub ipv6: String,
    pub host: String,
    pub port: u16,
    pub prov: u8,
    pub province: String,
    pub city: String,
    pub isp: u8,
    pub download_uri: String,
    pub upload_uri: String,
    pub ping_uri: String,
    pub server_type: ServerType,
    no_icmp: AtomicBool,
}

impl Clone for Server {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            ip: self.ip.clone(),
            ipv6: self.ipv6.clone(),
            host: self.host.clone(),
            port: self.port,
            prov: self.prov,
            province: self.province.clone(),
            city: self.city.clone(),
            isp: self.isp,
            download_uri: self.download_uri.clone(),
            upload_uri: self.upload_uri.clone(),
            ping_uri: self.ping_uri.clone(),
            server_type: self.server_type,
            no_icmp: AtomicBool::new(self.no_icmp()),
        }
    }
}

impl Server {
    pub fn new(host: impl Into<String>, port: u16, server_type: ServerType) -> Self {
        Self {
            host: host.into(),
            port,
            server_type,
            ..Default::default()
        }
    }

    pub fn no_icmp(&self) -> bool {
        self.no_icmp.load(Ordering::Acquire)
    }

    pub fn mark_no_icmp(&self) {
        self.no_icmp.store(true, Ordering::Release);
    }

    pub fn url(&self, kind: TestKind) -> String {
        let uri = match kind {
            TestKind::Download => &self.download_uri,
            TestKind::Upload => &self.upload_uri,
            TestKind::Ping => &self.ping_uri,
        };
        if !uri.is_empty() {
            return format!("http://{}:{}{}", self.host, self.port, uri);
        }

        let path = match (self.server_type, kind) {
            (ServerType::Perception, TestKind::Download) => "/speedtest/download",
            (ServerType::Perception, TestKind::Upload) => "/speedtest/upload",
            (ServerType::Perception, TestKind::Ping) => "/speedtest/ping",
            (ServerType::WirelessSpeed, TestKind::Download) => "/GSpeedTestServer/download",
            (ServerType::WirelessSpeed, TestKind::Upload) => "/GSpeedTestServer/upload",
            (ServerType::WirelessSpeed, TestKind::Ping) => "/GSpeedTestServer/",
            (ServerType::GlobalSpeed, TestKind::Download) => "/speed/File(1G).dl",
            (ServerType::GlobalSpeed, TestKind::Upload) => "/speed/doAnalsLoad.do",
            (ServerType::GlobalSpeed, TestKind::Ping) => "/speed/",
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }

    pub fn download_url(&self) -> String {
        self.url(TestKind::Download)
    }

    pub fn upload_url(&self) -> String {
        self.url(TestKind::Upload)
    }

    pub fn ping_url(&self) -> String {
        self.url(TestKind::Ping)
    }
}
