use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gspeed::{Server, ServerType, Settings, SpeedTest, TransferOptions};

const CHUNK: usize = 16 * 1024;
const CHUNKS_PER_RESPONSE: usize = 64;
const CHUNK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Stats {
    active: AtomicUsize,
    peak: AtomicUsize,
    requests: AtomicUsize,
    received: AtomicU64,
    last_query: Mutex<Option<String>>,
    last_key: Mutex<Option<String>>,
}

struct ActiveGuard(Arc<Stats>);

impl ActiveGuard {
    fn enter(stats: Arc<Stats>) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        stats.requests.fetch_add(1, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Streams a fixed-size body at a fixed pace.
async fn serve_download(State(stats): State<Arc<Stats>>, RawQuery(query): RawQuery) -> Body {
    *stats.last_query.lock().unwrap() = query;
    let guard = ActiveGuard::enter(stats);
    let chunks = stream::unfold((guard, 0usize), |(guard, sent)| async move {
        if sent == CHUNKS_PER_RESPONSE {
            return None;
        }
        tokio::time::sleep(CHUNK_INTERVAL).await;
        Some((
            Ok::<_, std::io::Error>(Bytes::from(vec![7u8; CHUNK])),
            (guard, sent + 1),
        ))
    });
    Body::from_stream(chunks)
}

async fn serve_upload(State(stats): State<Arc<Stats>>, headers: HeaderMap, body: Body) -> &'static str {
    *stats.last_key.lock().unwrap() = headers
        .get("key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let _guard = ActiveGuard::enter(Arc::clone(&stats));
    let mut body = body.into_data_stream();
    while let Some(Ok(chunk)) = body.next().await {
        stats.received.fetch_add(chunk.len() as u64, Ordering::SeqCst);
    }
    "ok"
}

async fn start_server(stats: Arc<Stats>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/speed/File(1G).dl", get(serve_download))
        .route("/speedtest/download", get(serve_download))
        .route("/speedtest/upload", post(serve_upload))
        .with_state(stats);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn engine() -> SpeedTest {
    SpeedTest::new(&Settings::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_holds_pool_at_concurrency() {
    let stats = Arc::new(Stats::default());
    let (addr, _handle) = start_server(Arc::clone(&stats)).await;
    let server = Server::new(addr.ip().to_string(), addr.port(), ServerType::Perception);

    let options = TransferOptions {
        silent: true,
        concurrency: 4,
        duration: Duration::from_secs(2),
        ..Default::default()
    };
    let result = engine().download(&server, &options, None).await.unwrap();

    let per_connection = CHUNK as f64 / CHUNK_INTERVAL.as_secs_f64();
    let expected = 4.0 * per_connection * options.duration.as_secs_f64();
    let total = result.total_bytes as f64;

    assert!(stats.peak.load(Ordering::SeqCst) <= 4);
    // Each response is ~640ms, so slots must have been refilled.
    assert!(stats.requests.load(Ordering::SeqCst) > 4);
    assert!(total > expected * 0.4, "total {} expected ~{}", total, expected);
    assert!(total < expected * 1.6, "total {} expected ~{}", total, expected);
    assert!(result.avg_mbps > 0.0);
}

#[tokio::test]
async fn test_download_sends_token_as_key_for_global_speed() {
    let stats = Arc::new(Stats::default());
    let (addr, _handle) = start_server(Arc::clone(&stats)).await;
    let server = Server::new(addr.ip().to_string(), addr.port(), ServerType::GlobalSpeed);

    let options = TransferOptions {
        silent: true,
        concurrency: 1,
        duration: Duration::from_millis(300),
        token: "tok123".to_string(),
        ..Default::default()
    };
    let result = engine().download(&server, &options, None).await.unwrap();

    assert!(result.total_bytes > 0);
    assert_eq!(stats.last_query.lock().unwrap().as_deref(), Some("key=tok123"));
}

#[tokio::test]
async fn test_download_publishes_progress_unless_silent() {
    let stats = Arc::new(Stats::default());
    let (addr, _handle) = start_server(Arc::clone(&stats)).await;
    let server = Server::new(addr.ip().to_string(), addr.port(), ServerType::Perception);
    let engine = engine();

    let mut options = TransferOptions {
        concurrency: 1,
        duration: Duration::from_millis(500),
        ..Default::default()
    };

    let (tx, mut rx) = mpsc::channel(64);
    engine.download(&server, &options, Some(tx)).await.unwrap();
    let mut seen = 0;
    while rx.recv().await.is_some() {
        seen += 1;
    }
    assert!(seen > 0);

    options.silent = true;
    let (tx, mut rx) = mpsc::channel(64);
    engine.download(&server, &options, Some(tx)).await.unwrap();
    assert!(rx.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_counts_sent_bytes() {
    let stats = Arc::new(Stats::default());
    let (addr, _handle) = start_server(Arc::clone(&stats)).await;
    let server = Server::new(addr.ip().to_string(), addr.port(), ServerType::Perception);

    for no_prealloc in [false, true] {
        stats.received.store(0, Ordering::SeqCst);
        let options = TransferOptions {
            silent: true,
            concurrency: 2,
            duration: Duration::from_millis(500),
            token: "secret".to_string(),
            no_prealloc,
            upload_size: 256 * 1024,
            ..Default::default()
        };
        let result = engine().upload(&server, &options, None).await.unwrap();

        let received = stats.received.load(Ordering::SeqCst);
        assert!(received > 0);
        assert!(result.total_bytes >= 256 * 1024);
        assert!(stats.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(stats.last_key.lock().unwrap().as_deref(), Some("secret"));
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_zero_without_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let server = Server::new(addr.ip().to_string(), addr.port(), ServerType::Perception);

    let options = TransferOptions {
        silent: true,
        concurrency: 2,
        duration: Duration::from_millis(200),
        ..Default::default()
    };
    let result = engine().download(&server, &options, None).await.unwrap();
    assert_eq!(result.total_bytes, 0);
}

#[tokio::test]
async fn test_bad_token_header_is_returned() {
    let server = Server::new("127.0.0.1", 9, ServerType::GlobalSpeed);
    let options = TransferOptions {
        token: "line\nbreak".to_string(),
        ..Default::default()
    };
    assert!(engine().upload(&server, &options, None).await.is_err());
}
