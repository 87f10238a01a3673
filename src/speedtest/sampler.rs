use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::counter::Counter;

const RAMP_STAGGER: Duration = Duration::from_millis(200);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub mbps: f64,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferResult {
    pub avg_mbps: f64,
    pub total_bytes: u64,
}

/// Errors that only mean the run is shutting down.
pub(crate) fn is_shutdown(err: &reqwest::Error) -> bool {
    err.is_timeout()
}

pub(crate) fn log_transfer_error(context: &str, err: &reqwest::Error) {
    if !is_shutdown(err) {
        debug!("{}: {}", context, err);
    }
}

/// Holds `concurrency` transfers in flight for `duration`.
///
/// `transfer` builds one request/response cycle and resolves to `true` once
/// the response has been streamed through the counter. Each `true` frees a
/// slot that is refilled straight away; failed attempts leave their slot
/// empty. At the deadline, or if the returned future is dropped early, every
/// in-flight transfer is cancelled.
pub(crate) async fn run_pool<F, Fut>(
    counter: Arc<Counter>,
    concurrency: usize,
    duration: Duration,
    progress: Option<mpsc::Sender<TransferProgress>>,
    transfer: F,
) -> TransferResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let concurrency = concurrency.max(1);
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let (done_tx, mut done_rx) = mpsc::channel::<()>(concurrency);

    let launch = || {
        let fut = transfer();
        let done_tx = done_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                completed = fut => {
                    if completed {
                        let _ = done_tx.try_send(());
                    }
                }
            }
        });
    };

    counter.start();
    if let Some(tx) = progress {
        spawn_progress(Arc::clone(&counter), tx, cancel.clone(), duration);
    }

    for _ in 0..concurrency {
        launch();
        tokio::time::sleep(RAMP_STAGGER).await;
    }

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                cancel.cancel();
                break;
            }
            Some(()) = done_rx.recv() => launch(),
        }
    }

    TransferResult {
        avg_mbps: counter.avg_mbps(),
        total_bytes: counter.total(),
    }
}

fn spawn_progress(
    counter: Arc<Counter>,
    tx: mpsc::Sender<TransferProgress>,
    cancel: CancellationToken,
    duration: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Never wait on a slow display.
                    let sent = tx.try_send(TransferProgress {
                        mbps: counter.avg_mbps(),
                        total_bytes: counter.total(),
                        elapsed: counter.elapsed(),
                        duration,
                    });
                    if let Err(TrySendError::Closed(_)) = sent {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_holds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(Counter::new());

        let result = run_pool(
            Arc::clone(&counter),
            3,
            Duration::from_millis(600),
            None,
            || {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let started = Arc::clone(&started);
                let counter = Arc::clone(&counter);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counter.add(1000);
                    active.fetch_sub(1, Ordering::SeqCst);
                    true
                }
            },
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        // 600ms ramp + 600ms run with 50ms transfers keeps replacing
        assert!(started.load(Ordering::SeqCst) > 10);
        assert!(result.total_bytes > 0);
        assert!(result.avg_mbps > 0.0);
    }

    #[tokio::test]
    async fn test_pool_refills_slots_after_warmup() {
        let active = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(Counter::new());
        let k = 3;

        let pool = run_pool(
            Arc::clone(&counter),
            k,
            Duration::from_millis(900),
            None,
            || {
                let active = Arc::clone(&active);
                async move {
                    active.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    true
                }
            },
        );
        let watch = async {
            // k launches 200ms apart, then the first queued completions refill.
            tokio::time::sleep(RAMP_STAGGER * k as u32 + Duration::from_millis(50)).await;
            let mut seen = Vec::new();
            let mut ticker = tokio::time::interval(Duration::from_millis(10));
            for _ in 0..70 {
                ticker.tick().await;
                seen.push(active.load(Ordering::SeqCst));
            }
            seen
        };
        let (_, seen) = tokio::join!(pool, watch);

        // A slot may be empty for one hop between completion and refill, never longer.
        assert!(seen.iter().all(|&n| n <= k));
        assert!(
            seen.windows(2).all(|w| w[0] == k || w[1] == k),
            "slots left empty: {:?}",
            seen
        );
        assert!(seen.iter().filter(|&&n| n == k).count() * 10 >= seen.len() * 9);
    }

    #[tokio::test]
    async fn test_dropped_pool_cancels_transfers() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(Counter::new());

        let transfer_ticks = Arc::clone(&ticks);
        let handle = tokio::spawn(run_pool(
            counter,
            2,
            Duration::from_secs(30),
            None,
            move || {
                let ticks = Arc::clone(&transfer_ticks);
                async move {
                    for _ in 0..u64::MAX {
                        ticks.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    true
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let settled = ticks.load(Ordering::SeqCst);
        assert!(settled > 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_progress_stops_when_receiver_is_gone() {
        let counter = Arc::new(Counter::new());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        spawn_progress(Arc::clone(&counter), tx, cancel.clone(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(250)).await;

        // The ticker task has exited and released its handle on the counter.
        assert_eq!(Arc::strong_count(&counter), 1);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failed_transfers_are_not_replaced() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(Counter::new());

        let result = run_pool(
            Arc::clone(&counter),
            2,
            Duration::from_millis(300),
            None,
            || {
                let started = Arc::clone(&started);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    false
                }
            },
        )
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(result.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_progress_reports_live_rate() {
        let counter = Arc::new(Counter::new());
        let (tx, mut rx) = mpsc::channel(64);

        run_pool(
            Arc::clone(&counter),
            1,
            Duration::from_millis(300),
            Some(tx),
            || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.add(10_000);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    true
                }
            },
        )
        .await;

        let mut last = None;
        while let Ok(progress) = rx.try_recv() {
            last = Some(progress);
        }
        let last = last.expect("no progress published");
        assert!(last.total_bytes > 0);
        assert_eq!(last.duration, Duration::from_millis(300));
    }
}
