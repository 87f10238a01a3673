mod app;
mod ui;

use anyhow::{Context, Result};
use app::{poll_event, run_speed_test, App, AppAction, TestUpdate};
use crossterm::event::Event;
use gspeed::speedtest::TestPhase;
use gspeed::{IspRegistry, Settings, SpeedTest};
use ratatui::DefaultTerminal;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use ui::draw_ui;

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    // stderr would scribble over the alternate screen
    if let Ok(path) = std::env::var("GSPEED_LOG_FILE") {
        let file = File::create(&path).with_context(|| format!("opening log file {}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging()?;

    let registry = IspRegistry::builtin();
    let settings = Settings::from_env()?;
    let server = gspeed::settings::server_from_env(&registry)?;
    let operator = registry.by_id(server.isp).clone();
    let engine = SpeedTest::new(&settings)?;
    log::info!(
        "Testing against {} ({}:{}, {})",
        server.name,
        server.host,
        server.port,
        server.server_type
    );

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let mut app = App::new(Arc::new(server), operator, settings);
    let result = run_app(&mut terminal, &mut app, engine).await;

    ratatui::restore();
    result
}

async fn run_app(terminal: &mut DefaultTerminal, app: &mut App, engine: SpeedTest) -> Result<()> {
    let mut test_rx: Option<mpsc::Receiver<TestUpdate>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, app))?;

        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(update) => handle_update(app, update),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if app.is_running() {
                            app.complete_test();
                        }
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        app.reset_for_new_test();
                        app.phase = TestPhase::Checking;

                        let (tx, rx) = mpsc::channel(64);
                        let (cancel_tx, cancel_rx) = mpsc::channel(1);

                        app.set_cancel_tx(cancel_tx);
                        test_rx = Some(rx);

                        let engine = engine.clone();
                        let server = Arc::clone(&app.server);
                        let settings = app.settings.clone();
                        tokio::spawn(async move {
                            if let Err(err) =
                                run_speed_test(tx, cancel_rx, engine, server, settings).await
                            {
                                log::error!("Speed test failed: {:#}", err);
                            }
                        });
                    }
                    AppAction::CancelTest => {
                        app.cancel_test();
                        test_rx = None;
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn handle_update(app: &mut App, update: TestUpdate) {
    match update {
        TestUpdate::ServerUp => app.phase = TestPhase::Ping,
        TestUpdate::ServerDown => app.phase = TestPhase::Unreachable,
        TestUpdate::PingComplete(latency) => {
            app.update_latency(latency);
            app.phase = TestPhase::Download;
        }
        TestUpdate::DownloadProgress(p) => app.update_download_progress(p),
        TestUpdate::DownloadComplete {
            speed_mbps,
            total_bytes,
        } => {
            app.result.download_mbps = speed_mbps;
            app.result.download_bytes = total_bytes;
            app.phase = TestPhase::Upload;
        }
        TestUpdate::UploadProgress(p) => app.update_upload_progress(p),
        TestUpdate::UploadComplete {
            speed_mbps,
            total_bytes,
        } => {
            app.result.upload_mbps = speed_mbps;
            app.result.upload_bytes = total_bytes;
            app.complete_test();
        }
    }
}
