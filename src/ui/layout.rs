use crate::app::{App, AppView, Panel, SettingsField};
use gspeed::speedtest::TestPhase;
use gspeed::LatencyStrategy;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);
const ERROR: Color = Color::Rgb(220, 120, 120);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let area = frame.area();

    match app.view {
        AppView::Main => draw_main_view(frame, area, app),
        AppView::Settings => draw_settings_view(frame, area, app),
    }
}

fn draw_main_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(4),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .split(area);

    draw_header(frame, chunks[0], app);

    let panels = Layout::horizontal([
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
        Constraint::Ratio(1, 3),
    ])
    .split(chunks[1]);

    draw_transfer_panel(
        frame,
        panels[0],
        "Download",
        (SUCCESS, SUCCESS_DIM),
        app.selected_panel == Panel::Download,
        current_rate(app.result.download_mbps, &app.download_samples),
        app.result.download_bytes,
        download_ratio(app),
        &app.download_samples,
    );
    draw_transfer_panel(
        frame,
        panels[1],
        "Upload",
        (INFO, INFO_DIM),
        app.selected_panel == Panel::Upload,
        current_rate(app.result.upload_mbps, &app.upload_samples),
        app.result.upload_bytes,
        upload_ratio(app),
        &app.upload_samples,
    );
    draw_latency_panel(frame, panels[2], app, app.selected_panel == Panel::Ping);

    draw_help(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::vertical([Constraint::Length(1), Constraint::Length(1)]).split(inner);
    let top = Layout::horizontal([
        Constraint::Length(18),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .split(rows[0]);

    frame.render_widget(
        Paragraph::new(header_title())
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        top[0],
    );

    let (status, color) = match app.phase {
        TestPhase::Idle => ("Ready", TEXT_MUTED),
        TestPhase::Checking => ("Checking server...", TEXT_SECONDARY),
        TestPhase::Ping => ("Measuring latency...", WARN),
        TestPhase::Download => ("Testing download...", SUCCESS),
        TestPhase::Upload => ("Testing upload...", INFO),
        TestPhase::Complete => ("Complete", ACCENT),
        TestPhase::Unreachable => ("Server unreachable", ERROR),
    };
    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        top[1],
    );
    frame.render_widget(
        Paragraph::new(phase_line(app.phase)).alignment(Alignment::Right),
        top[2],
    );

    let server = &app.server;
    let target = Line::from(vec![
        Span::styled(server.name.clone(), Style::default().fg(TEXT_SECONDARY)),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(
            format!("{}:{}", server.host, server.port),
            Style::default().fg(TEXT_MUTED),
        ),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(app.operator.display.clone(), Style::default().fg(TEXT_MUTED)),
        Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)),
        Span::styled(server.server_type.to_string(), Style::default().fg(TEXT_MUTED)),
    ]);
    frame.render_widget(Paragraph::new(target), rows[1]);
}

fn phase_line(phase: TestPhase) -> Line<'static> {
    let phases = [
        (TestPhase::Ping, "ping"),
        (TestPhase::Download, "down"),
        (TestPhase::Upload, "up"),
    ];
    let reached = |p: TestPhase| match phase {
        TestPhase::Download => p == TestPhase::Ping,
        TestPhase::Upload => p != TestPhase::Upload,
        TestPhase::Complete => true,
        _ => false,
    };

    let mut spans = Vec::new();
    for (i, (p, label)) in phases.iter().enumerate() {
        let style = if phase == *p {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else if reached(*p) {
            Style::default().fg(TEXT_SECONDARY)
        } else {
            Style::default().fg(TEXT_MUTED)
        };
        spans.push(Span::styled(*label, style));
        if i < phases.len() - 1 {
            spans.push(Span::styled(" / ", Style::default().fg(TEXT_MUTED)));
        }
    }
    Line::from(spans)
}

fn panel_block(title: &str, color: Color, selected: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if selected { BORDER_ACTIVE } else { BORDER }))
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(if selected { color } else { TEXT_SECONDARY }),
        ))
}

#[allow(clippy::too_many_arguments)]
fn draw_transfer_panel(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    (color, dim_color): (Color, Color),
    selected: bool,
    mbps: f64,
    total_bytes: u64,
    progress: f64,
    samples: &[f64],
) {
    let block = panel_block(title, color, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    frame.render_widget(
        Paragraph::new(format_speed(mbps))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    let used = if total_bytes > 0 {
        format!("data used {:.1} MB", total_bytes as f64 / 1_000_000.0)
    } else {
        String::new()
    };
    frame.render_widget(
        Paragraph::new(used)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    draw_progress_bar(frame, chunks[2], progress, color, dim_color);
    draw_chart(frame, chunks[3], samples, color);
}

fn draw_latency_panel(frame: &mut Frame, area: Rect, app: &App, selected: bool) {
    let block = panel_block("Latency", WARN, selected);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .split(inner);

    let value = if app.result.ping_ms > 0.0 {
        format!("{:.1} ms", app.result.ping_ms)
    } else {
        "--".to_string()
    };
    frame.render_widget(
        Paragraph::new(value)
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center),
        chunks[0],
    );

    let jitter = if app.result.jitter_ms > 0.0 {
        format!("jitter {:.1} ms", app.result.jitter_ms)
    } else {
        "jitter --".to_string()
    };
    frame.render_widget(
        Paragraph::new(jitter)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[1],
    );

    let via = match app.latency_strategy {
        Some(LatencyStrategy::Icmp) => "via icmp",
        Some(LatencyStrategy::Http) => "via http",
        None => "",
    };
    frame.render_widget(
        Paragraph::new(via)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );

    draw_chart(frame, chunks[3], &app.ping_samples, WARN);
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }

    let width = (area.width - 2) as usize;
    let filled = ((ratio * width as f64) as usize).min(width);
    let empty = width.saturating_sub(filled);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(empty), Style::default().fg(dim_color)),
        Span::raw(" "),
    ]);

    frame.render_widget(Paragraph::new(bar), area);
}

fn draw_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color) {
    if data.is_empty() || area.width < 4 || area.height < 2 {
        return;
    }

    let (min_val, max_val) = data_range(data);
    let range = (max_val - min_val).max(1.0);
    let points: Vec<(f64, f64)> = data
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(&points);

    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds([0.0, data.len() as f64]))
        .y_axis(Axis::default().bounds([(min_val - range * 0.1).max(0.0), max_val + range * 0.1]));

    frame.render_widget(chart, area);
}

fn draw_settings_view(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(10),
        Constraint::Length(1),
    ])
    .split(area);

    let header_block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let header_inner = header_block.inner(chunks[0]);
    frame.render_widget(header_block, chunks[0]);
    frame.render_widget(
        Paragraph::new("Settings")
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        header_inner,
    );

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(chunks[1]);
    frame.render_widget(block, chunks[1]);

    let rows = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Min(0),
    ])
    .split(inner);

    let s = &app.settings;
    let fields = [
        (SettingsField::PingCount, "Ping samples", s.ping_count.to_string()),
        (SettingsField::Concurrency, "Connections", s.concurrency.to_string()),
        (SettingsField::Duration, "Duration", format!("{} s", s.duration_secs)),
        (SettingsField::UploadSize, "Upload size", format!("{} KiB", s.upload_size_kb)),
    ];
    for (row, (field, label, value)) in rows.iter().zip(fields.iter()) {
        draw_setting_row(frame, *row, label, value, app.selected_setting == *field);
    }

    frame.render_widget(
        Paragraph::new("↑↓ select · ←→ adjust · enter done")
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_setting_row(frame: &mut Frame, area: Rect, label: &str, value: &str, selected: bool) {
    let chunks = Layout::horizontal([Constraint::Length(16), Constraint::Min(10)]).split(area);

    let (label_style, value_text, value_style) = if selected {
        (
            Style::default().fg(ACCENT),
            format!("< {} >", value),
            Style::default().fg(TEXT_PRIMARY),
        )
    } else {
        (
            Style::default().fg(TEXT_SECONDARY),
            value.to_string(),
            Style::default().fg(TEXT_MUTED),
        )
    };

    frame.render_widget(Paragraph::new(format!(" {}", label)).style(label_style), chunks[0]);
    frame.render_widget(Paragraph::new(value_text).style(value_style), chunks[1]);
}

fn draw_help(frame: &mut Frame, area: Rect, app: &App) {
    let help = if app.is_running() {
        "tab select · esc cancel · q quit"
    } else {
        "enter start · s settings · tab select · q quit"
    };

    frame.render_widget(
        Paragraph::new(help)
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

fn current_rate(final_mbps: f64, samples: &[f64]) -> f64 {
    if final_mbps > 0.0 {
        final_mbps
    } else {
        samples.last().copied().unwrap_or(0.0)
    }
}

fn data_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().cloned().fold(f64::MAX, f64::min);
    let max = data.iter().cloned().fold(f64::MIN, f64::max);
    (if min == f64::MAX { 0.0 } else { min }, if max == f64::MIN { 0.0 } else { max })
}

fn download_ratio(app: &App) -> f64 {
    match app.phase {
        TestPhase::Download => app.download_progress,
        TestPhase::Upload | TestPhase::Complete => 1.0,
        _ => 0.0,
    }
}

fn header_title() -> String {
    format!("gspeed v{}", gspeed::VERSION)
}

fn upload_ratio(app: &App) -> f64 {
    match app.phase {
        TestPhase::Upload => app.upload_progress,
        TestPhase::Complete => 1.0,
        _ => 0.0,
    }
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "--".to_string()
    }
}
