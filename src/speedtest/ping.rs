use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use log::debug;
use reqwest::header::USER_AGENT;
use surge_ping::{Config, PingIdentifier, PingSequence, ICMP};
use url::Url;

use super::{SpeedTest, ANDROID_UA};
use crate::error::{Error, Result};
use crate::server::Server;

const ICMP_INTERVAL: Duration = Duration::from_secs(1);
const ICMP_PAYLOAD: [u8; 56] = [0; 56];

/// Address family used for ICMP echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Any,
    V4,
    V6,
}

impl Network {
    fn accepts(self, addr: &IpAddr) -> bool {
        match self {
            Network::Any => true,
            Network::V4 => addr.is_ipv4(),
            Network::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Any => "ip",
            Network::V4 => "ip4",
            Network::V6 => "ip6",
        })
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "ip" => Ok(Network::Any),
            "ip4" | "ipv4" | "4" => Ok(Network::V4),
            "ip6" | "ipv6" | "6" => Ok(Network::V6),
            other => Err(Error::Config(format!("unknown network: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyStrategy {
    Icmp,
    Http,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Latency {
    pub avg_ms: f64,
    pub jitter_ms: f64,
    pub samples: Vec<f64>,
    pub strategy: LatencyStrategy,
}

impl Latency {
    pub fn from_samples(samples: Vec<f64>, strategy: LatencyStrategy) -> Self {
        Self {
            avg_ms: average(&samples),
            jitter_ms: jitter(&samples),
            samples,
            strategy,
        }
    }
}

/// Outcome of one strategy in the fallback plan.
#[derive(Debug)]
enum Attempt {
    Measured(Latency),
    Fallback(String),
}

/// Smoothed round-trip variability.
///
/// Spikes pull the estimate up quickly (weight 0.2 on a fresh value that is
/// at least as large), improvements only bleed it down slowly (weight 0.3 on
/// a smaller value against 0.7 history). The blend only starts at the third
/// sample; the second only seeds `last`.
pub fn jitter(samples: &[f64]) -> f64 {
    let mut last = 0.0;
    let mut jitter = 0.0;
    for (idx, &sample) in samples.iter().enumerate() {
        if idx != 0 {
            let inst = (last - sample).abs();
            if idx > 1 {
                if jitter > inst {
                    jitter = jitter * 0.7 + inst * 0.3;
                } else {
                    jitter = inst * 0.2 + jitter * 0.8;
                }
            }
        }
        last = sample;
    }
    jitter
}

pub fn average(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Strategies to try in order, with the sample count each should request.
pub fn probe_plan(server: &Server, count: usize) -> Vec<(LatencyStrategy, usize)> {
    // Zero echoes would otherwise flag a host that was never probed.
    if server.no_icmp() || count == 0 {
        vec![(LatencyStrategy::Http, count + 2)]
    } else {
        vec![
            (LatencyStrategy::Icmp, count),
            (LatencyStrategy::Http, count + 2),
        ]
    }
}

fn as_millis(rtt: Duration) -> f64 {
    rtt.as_secs_f64() * 1000.0
}

impl SpeedTest {
    /// Measures latency with ICMP echoes, dropping to HTTP when raw sockets
    /// are unavailable or the host never answers.
    pub async fn icmp_ping_and_jitter(
        &self,
        server: &Server,
        count: usize,
        source: Option<IpAddr>,
        network: Network,
    ) -> Result<Latency> {
        if server.no_icmp() {
            debug!("Skipping ICMP for server {}, will use HTTP ping", server.name);
        }

        for (strategy, samples) in probe_plan(server, count) {
            let attempt = match strategy {
                LatencyStrategy::Icmp => icmp_attempt(server, samples, source, network).await,
                LatencyStrategy::Http => Attempt::Measured(self.ping_and_jitter(server, samples).await?),
            };

            match attempt {
                Attempt::Measured(latency) => return Ok(latency),
                Attempt::Fallback(reason) => {
                    debug!("{}, will use HTTP ping for server {}", reason, server.name)
                }
            }
        }

        Ok(Latency::from_samples(Vec::new(), LatencyStrategy::Http))
    }

    /// Measures latency by timing sequential GETs of the ping URL.
    ///
    /// The first round trip carries connection setup and is discarded.
    pub async fn ping_and_jitter(&self, server: &Server, count: usize) -> Result<Latency> {
        let url = Url::parse(&server.ping_url()).map_err(|err| {
            debug!("Failed when creating HTTP request: {}", err);
            err
        })?;

        let mut pings = Vec::with_capacity(count);
        for _ in 0..count {
            let start = Instant::now();
            let response = self
                .client
                .get(url.clone())
                .header(USER_AGENT, ANDROID_UA)
                .send()
                .await
                .map_err(|err| {
                    debug!("Failed when making HTTP request: {}", err);
                    err
                })?;
            if let Err(err) = response.bytes().await {
                debug!("Failed when reading ping response: {}", err);
            }
            pings.push(as_millis(start.elapsed()));
        }

        let samples = pings.into_iter().skip(1).collect();
        Ok(Latency::from_samples(samples, LatencyStrategy::Http))
    }
}

async fn icmp_attempt(
    server: &Server,
    count: usize,
    source: Option<IpAddr>,
    network: Network,
) -> Attempt {
    match icmp_echo(server, count, source, network).await {
        Ok(samples) => reduce_icmp(server, samples),
        Err(err) => Attempt::Fallback(format!("ICMP ping failed: {}", err)),
    }
}

fn reduce_icmp(server: &Server, samples: Vec<f64>) -> Attempt {
    if samples.is_empty() {
        server.mark_no_icmp();
        return Attempt::Fallback(format!(
            "No ICMP pings returned for server {} ({})",
            server.name, server.host
        ));
    }
    Attempt::Measured(Latency::from_samples(samples, LatencyStrategy::Icmp))
}

async fn resolve_target(server: &Server, network: Network) -> Result<IpAddr> {
    let literals = [server.ip.as_str(), server.ipv6.as_str(), server.host.as_str()];
    if let Some(addr) = literals
        .iter()
        .filter_map(|s| s.parse::<IpAddr>().ok())
        .find(|addr| network.accepts(addr))
    {
        return Ok(addr);
    }

    tokio::net::lookup_host((server.host.as_str(), 0))
        .await?
        .map(|addr| addr.ip())
        .find(|addr| network.accepts(addr))
        .ok_or_else(|| Error::Icmp(format!("no {} address for {}", network, server.host)))
}

async fn icmp_echo(
    server: &Server,
    count: usize,
    source: Option<IpAddr>,
    network: Network,
) -> Result<Vec<f64>> {
    let target = resolve_target(server, network).await?;
    let kind = if target.is_ipv4() { ICMP::V4 } else { ICMP::V6 };

    let mut builder = Config::builder()
        .kind(kind)
        .sock_type_hint(socket2::Type::RAW);
    if let Some(source) = source {
        builder = builder.bind(SocketAddr::new(source, 0));
    }
    let client = surge_ping::Client::new(&builder.build())?;
    let mut pinger = client.pinger(target, PingIdentifier(rand::random())).await;
    pinger.timeout(ICMP_INTERVAL);

    let mut samples = Vec::with_capacity(count);
    let echoes = async {
        let mut ticker = tokio::time::interval(ICMP_INTERVAL);
        for seq in 0..count {
            ticker.tick().await;
            match pinger.ping(PingSequence(seq as u16), &ICMP_PAYLOAD).await {
                Ok((_, rtt)) => samples.push(as_millis(rtt)),
                Err(err) => debug!("ICMP echo {} to {} lost: {}", seq, target, err),
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(count as u64), echoes)
        .await
        .is_err()
    {
        debug!("ICMP probe to {} hit its {}s deadline", target, count);
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerType;

    #[test]
    fn test_jitter_trigger_starts_at_third_sample() {
        // idx 1 only seeds `last`; idx 2 blends |20-15| = 5 against 0.
        assert_eq!(jitter(&[10.0, 20.0, 15.0]), 1.0);
        assert_eq!(jitter(&[10.0, 20.0]), 0.0);
        assert_eq!(jitter(&[10.0]), 0.0);
        assert_eq!(jitter(&[]), 0.0);
    }

    #[test]
    fn test_jitter_asymmetric_blend() {
        // inst: 10, 10, 2 -> 0.2*10 = 2.0, then 2 > 2 is false -> 0.2*2 + 0.8*2 = 2.0
        let j = jitter(&[0.0, 10.0, 20.0, 22.0]);
        assert!((j - 2.0).abs() < 1e-9);

        // inst: 10, 50, 1 -> 10.0, then 10 > 1 -> 0.7*10 + 0.3*1 = 7.3
        let j = jitter(&[0.0, 10.0, 60.0, 61.0]);
        assert!((j - 7.3).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_is_deterministic_and_order_sensitive() {
        let samples = [12.0, 30.0, 11.0, 45.0, 13.0, 14.0];
        let mut reversed = samples;
        reversed.reverse();

        assert_eq!(jitter(&samples), jitter(&samples));
        assert_ne!(jitter(&samples), jitter(&reversed));
    }

    #[test]
    fn test_average_of_empty_is_zero() {
        assert_eq!(average(&[]), 0.0);
        assert_eq!(average(&[10.0, 20.0, 15.0]), 15.0);
    }

    #[test]
    fn test_probe_plan_skips_icmp_once_flagged() {
        let server = Server::new("h", 80, ServerType::GlobalSpeed);
        assert_eq!(
            probe_plan(&server, 10),
            vec![(LatencyStrategy::Icmp, 10), (LatencyStrategy::Http, 12)]
        );

        server.mark_no_icmp();
        assert_eq!(probe_plan(&server, 10), vec![(LatencyStrategy::Http, 12)]);
    }

    #[test]
    fn test_probe_plan_without_echoes_keeps_icmp_enabled() {
        let server = Server::new("h", 80, ServerType::GlobalSpeed);
        assert_eq!(probe_plan(&server, 0), vec![(LatencyStrategy::Http, 2)]);
        assert!(!server.no_icmp());
    }

    #[test]
    fn test_zero_echoes_marks_server() {
        let server = Server::new("h", 80, ServerType::GlobalSpeed);
        assert!(matches!(reduce_icmp(&server, Vec::new()), Attempt::Fallback(_)));
        assert!(server.no_icmp());
    }

    #[test]
    fn test_icmp_samples_are_not_trimmed() {
        let server = Server::new("h", 80, ServerType::GlobalSpeed);
        match reduce_icmp(&server, vec![5.0, 7.0]) {
            Attempt::Measured(latency) => {
                assert_eq!(latency.samples, vec![5.0, 7.0]);
                assert_eq!(latency.avg_ms, 6.0);
                assert_eq!(latency.strategy, LatencyStrategy::Icmp);
            }
            Attempt::Fallback(reason) => panic!("unexpected fallback: {}", reason),
        }
        assert!(!server.no_icmp());
    }

    #[test]
    fn test_network_from_str() {
        assert_eq!("ip4".parse::<Network>().unwrap(), Network::V4);
        assert_eq!("".parse::<Network>().unwrap(), Network::Any);
        assert!("tcp".parse::<Network>().is_err());
    }
}
