use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use gspeed::speedtest::{SpeedTestResult, TestPhase};
use gspeed::{Latency, LatencyStrategy, Operator, Server, Settings, SpeedTest, TransferProgress};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    PingCount,
    Concurrency,
    Duration,
    UploadSize,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::Concurrency,
            SettingsField::Concurrency => SettingsField::Duration,
            SettingsField::Duration => SettingsField::UploadSize,
            SettingsField::UploadSize => SettingsField::PingCount,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::PingCount => SettingsField::UploadSize,
            SettingsField::Concurrency => SettingsField::PingCount,
            SettingsField::Duration => SettingsField::Concurrency,
            SettingsField::UploadSize => SettingsField::Duration,
        }
    }
}

pub struct App {
    pub phase: TestPhase,
    pub result: SpeedTestResult,
    pub should_quit: bool,

    pub server: Arc<Server>,
    pub operator: Operator,
    pub latency_strategy: Option<LatencyStrategy>,

    pub view: AppView,
    pub selected_panel: Panel,

    pub settings: Settings,
    pub selected_setting: SettingsField,

    pub download_progress: f64,
    pub upload_progress: f64,

    // Live rate readings, one per progress tick
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,

    cancel_tx: Option<mpsc::Sender<()>>,
}

impl App {
    pub fn new(server: Arc<Server>, operator: Operator, settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            result: SpeedTestResult::default(),
            should_quit: false,
            server,
            operator,
            latency_strategy: None,
            view: AppView::Main,
            selected_panel: Panel::Download,
            settings,
            selected_setting: SettingsField::PingCount,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            ping_samples: Vec::new(),
            cancel_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(
            self.phase,
            TestPhase::Idle | TestPhase::Complete | TestPhase::Unreachable
        )
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') if !self.is_running() => {
                self.view = AppView::Settings;
                None
            }
            KeyCode::Enter if !self.is_running() => Some(AppAction::StartTest),
            KeyCode::Esc if self.is_running() => Some(AppAction::CancelTest),
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                self.selected_panel = self.selected_panel.next();
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                self.selected_panel = self.selected_panel.prev();
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
            }
            KeyCode::Left | KeyCode::Char('h') => self.decrease_setting(),
            KeyCode::Right | KeyCode::Char('l') => self.increase_setting(),
            _ => {}
        }
        None
    }

    fn increase_setting(&mut self) {
        let s = &mut self.settings;
        match self.selected_setting {
            SettingsField::PingCount => s.ping_count = (s.ping_count + 5).min(100),
            SettingsField::Concurrency => s.concurrency = (s.concurrency + 1).min(32),
            SettingsField::Duration => s.duration_secs = (s.duration_secs + 5).min(120),
            SettingsField::UploadSize => s.upload_size_kb = (s.upload_size_kb * 2).min(64 * 1024),
        }
    }

    fn decrease_setting(&mut self) {
        let s = &mut self.settings;
        match self.selected_setting {
            SettingsField::PingCount => s.ping_count = s.ping_count.saturating_sub(5).max(5),
            SettingsField::Concurrency => s.concurrency = s.concurrency.saturating_sub(1).max(1),
            SettingsField::Duration => s.duration_secs = s.duration_secs.saturating_sub(5).max(5),
            SettingsField::UploadSize => s.upload_size_kb = (s.upload_size_kb / 2).max(64),
        }
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.result = SpeedTestResult::default();
        self.latency_strategy = None;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
    }

    pub fn update_latency(&mut self, latency: Latency) {
        self.result.ping_ms = latency.avg_ms;
        self.result.jitter_ms = latency.jitter_ms;
        self.latency_strategy = Some(latency.strategy);
        self.ping_samples = latency.samples;
    }

    pub fn update_download_progress(&mut self, progress: TransferProgress) {
        self.download_progress = progress_ratio(&progress);
        push_sample(&mut self.download_samples, progress.mbps);
    }

    pub fn update_upload_progress(&mut self, progress: TransferProgress) {
        self.upload_progress = progress_ratio(&progress);
        push_sample(&mut self.upload_samples, progress.mbps);
    }

    pub fn complete_test(&mut self) {
        self.phase = TestPhase::Complete;
    }

    pub fn set_cancel_tx(&mut self, tx: mpsc::Sender<()>) {
        self.cancel_tx = Some(tx);
    }

    pub fn cancel_test(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        self.phase = TestPhase::Idle;
    }
}

fn progress_ratio(progress: &TransferProgress) -> f64 {
    if progress.duration.is_zero() {
        return 0.0;
    }
    (progress.elapsed.as_secs_f64() / progress.duration.as_secs_f64()).min(1.0)
}

fn push_sample(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    if samples.len() > 200 {
        samples.remove(0);
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AppAction {
    Quit,
    StartTest,
    CancelTest,
}

pub enum TestUpdate {
    ServerUp,
    ServerDown,
    PingComplete(Latency),
    DownloadProgress(TransferProgress),
    DownloadComplete { speed_mbps: f64, total_bytes: u64 },
    UploadProgress(TransferProgress),
    UploadComplete { speed_mbps: f64, total_bytes: u64 },
}

/// Forwards progress from a running transfer until it finishes, or returns
/// `None` if the user cancelled first.
async fn forward_progress<T>(
    handle: tokio::task::JoinHandle<gspeed::Result<T>>,
    mut progress_rx: mpsc::Receiver<TransferProgress>,
    cancel_rx: &mut mpsc::Receiver<()>,
    update_tx: &mpsc::Sender<TestUpdate>,
    wrap: fn(TransferProgress) -> TestUpdate,
) -> Result<Option<T>> {
    while let Some(progress) = progress_rx.recv().await {
        if cancel_rx.try_recv().is_ok() {
            handle.abort();
            return Ok(None);
        }
        let _ = update_tx.send(wrap(progress)).await;
    }
    Ok(Some(handle.await??))
}

pub async fn run_speed_test(
    update_tx: mpsc::Sender<TestUpdate>,
    mut cancel_rx: mpsc::Receiver<()>,
    engine: SpeedTest,
    server: Arc<Server>,
    settings: Settings,
) -> Result<()> {
    if !engine.is_server_up(&server).await {
        let _ = update_tx.send(TestUpdate::ServerDown).await;
        return Ok(());
    }
    let _ = update_tx.send(TestUpdate::ServerUp).await;

    let latency = engine
        .icmp_ping_and_jitter(&server, settings.ping_count, settings.source_ip, settings.network)
        .await?;
    let _ = update_tx.send(TestUpdate::PingComplete(latency)).await;
    if cancel_rx.try_recv().is_ok() {
        return Ok(());
    }

    let options = settings.transfer_options(false);

    // Download test
    let (download_tx, download_rx) = mpsc::channel::<TransferProgress>(32);
    let download_handle = {
        let engine = engine.clone();
        let server = Arc::clone(&server);
        let options = options.clone();
        tokio::spawn(async move { engine.download(&server, &options, Some(download_tx)).await })
    };
    let Some(download) = forward_progress(
        download_handle,
        download_rx,
        &mut cancel_rx,
        &update_tx,
        TestUpdate::DownloadProgress,
    )
    .await?
    else {
        return Ok(());
    };
    let _ = update_tx
        .send(TestUpdate::DownloadComplete {
            speed_mbps: download.avg_mbps,
            total_bytes: download.total_bytes,
        })
        .await;

    // Upload test
    let (upload_tx, upload_rx) = mpsc::channel::<TransferProgress>(32);
    let upload_handle = {
        let engine = engine.clone();
        let server = Arc::clone(&server);
        tokio::spawn(async move { engine.upload(&server, &options, Some(upload_tx)).await })
    };
    let Some(upload) = forward_progress(
        upload_handle,
        upload_rx,
        &mut cancel_rx,
        &update_tx,
        TestUpdate::UploadProgress,
    )
    .await?
    else {
        return Ok(());
    };
    let _ = update_tx
        .send(TestUpdate::UploadComplete {
            speed_mbps: upload.avg_mbps,
            total_bytes: upload.total_bytes,
        })
        .await;

    Ok(())
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}
