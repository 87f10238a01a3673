use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, Stream};
use parking_lot::Mutex;
use rand::RngCore;

const CHUNK_SIZE: usize = 64 * 1024;

const DECIMAL_UNITS: [&str; 5] = ["", "K", "M", "G", "T"];
const BINARY_UNITS: [&str; 5] = ["", "Ki", "Mi", "Gi", "Ti"];

/// Where upload bytes come from.
#[derive(Debug, Clone)]
enum Payload {
    /// Prefilled random buffer shared by every upload request.
    Blob(Bytes),
    /// Fresh random bytes generated while the request is being sent.
    Random,
}

/// Byte accumulator for one throughput run.
///
/// Transfer tasks add to it concurrently while a progress display reads the
/// live rate. The rate is always measured from [`Counter::start`].
#[derive(Debug)]
pub struct Counter {
    total: AtomicU64,
    start: Mutex<Option<Instant>>,
    mebi: bool,
    use_bytes: bool,
    upload_size: usize,
    payload: Payload,
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            start: Mutex::new(None),
            mebi: false,
            use_bytes: false,
            upload_size: 1024 * 1024,
            payload: Payload::Random,
        }
    }

    pub fn set_mebi(&mut self, mebi: bool) {
        self.mebi = mebi;
    }

    pub fn set_use_bytes(&mut self, use_bytes: bool) {
        self.use_bytes = use_bytes;
    }

    pub fn set_upload_size(&mut self, size: usize) {
        self.upload_size = size;
    }

    pub fn upload_size(&self) -> usize {
        self.upload_size
    }

    /// Fills a reusable random buffer of `upload_size` bytes.
    pub fn generate_blob(&mut self) {
        let mut blob = vec![0u8; self.upload_size];
        rand::thread_rng().fill_bytes(&mut blob);
        self.payload = Payload::Blob(Bytes::from(blob));
    }

    /// Generate upload bytes inline with the transfer instead of up front.
    pub fn use_random_stream(&mut self) {
        self.payload = Payload::Random;
    }

    pub fn start(&self) {
        self.total.store(0, Ordering::Relaxed);
        *self.start.lock() = Some(Instant::now());
    }

    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn write(&self, buf: &[u8]) -> usize {
        self.add(buf.len() as u64);
        buf.len()
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        let start = *self.start.lock();
        start.map(|start| start.elapsed()).unwrap_or_default()
    }

    /// Average bytes per second since `start`.
    pub fn avg_bytes(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total() as f64 / secs
    }

    pub fn avg_mbps(&self) -> f64 {
        let divisor = if self.mebi { 131_072.0 } else { 125_000.0 };
        self.avg_bytes() / divisor
    }

    pub fn mbytes(&self) -> f64 {
        let divisor = if self.mebi { 1_048_576.0 } else { 1_000_000.0 };
        self.total() as f64 / divisor
    }

    pub fn avg_humanize(&self) -> String {
        if self.use_bytes {
            format!("{}B/s", humanize(self.avg_bytes(), self.mebi))
        } else {
            format!("{}bps", humanize(self.avg_bytes() * 8.0, self.mebi))
        }
    }

    pub fn bytes_humanize(&self) -> String {
        format!("{}B", humanize(self.total() as f64, self.mebi))
    }

    /// Streams `upload_size` bytes as a request body, counting each chunk as
    /// the HTTP client pulls it off the stream.
    pub fn upload_body(self: &Arc<Self>) -> reqwest::Body {
        reqwest::Body::wrap_stream(self.upload_stream())
    }

    pub(crate) fn upload_stream(
        self: &Arc<Self>,
    ) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let size = self.upload_size;
        stream::unfold((Arc::clone(self), 0usize), move |(counter, offset)| async move {
            if offset >= size {
                return None;
            }
            let len = CHUNK_SIZE.min(size - offset);
            let chunk = counter.chunk(offset, len);
            counter.add(len as u64);
            Some((Ok::<_, std::io::Error>(chunk), (counter, offset + len)))
        })
    }

    fn chunk(&self, offset: usize, len: usize) -> Bytes {
        match &self.payload {
            Payload::Blob(blob) if offset + len <= blob.len() => blob.slice(offset..offset + len),
            _ => {
                let mut buf = vec![0u8; len];
                rand::thread_rng().fill_bytes(&mut buf);
                Bytes::from(buf)
            }
        }
    }
}

fn humanize(value: f64, mebi: bool) -> String {
    let (base, units) = if mebi {
        (1024.0, BINARY_UNITS)
    } else {
        (1000.0, DECIMAL_UNITS)
    };

    let mut value = value;
    let mut unit = 0;
    while value >= base && unit < units.len() - 1 {
        value /= base;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}
