//! Terminal UI rendering.
//!
//! All drawing logic lives here, separated from application state ([`App`])
//! and input handling ([`crate::input`]).
//!
//! The feed is a vertical strip of full-height cards.  `app.scroll` is the
//! first visible row of that strip, so during a fine scroll two cards share
//! the screen, each clipped to its visible rows.

use std::time::Instant;

use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, CardState, Phase};
use crate::coordinator::LoadState;
use crate::playback::SinkStatus;
use crate::session::Session;
use crate::visibility::Extent;

/// Draw the complete UI for one frame.
pub fn draw(app: &mut App, frame: &mut Frame) {
    let [main_area, status_area] =
        Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).areas(frame.area());

    app.set_viewport_height(main_area.height);

    match &app.phase {
        Phase::LoadingManifest => draw_message(frame, main_area, "Loading feed…", Color::Gray),
        Phase::ManifestFailed(error) => draw_message(
            frame,
            main_area,
            &format!("Could not load the feed\n\n{error}\n\nr: retry  q: quit"),
            Color::Red,
        ),
        Phase::Ready => draw_feed(app, frame, main_area),
    }
    draw_status_bar(app, frame, status_area);
}

fn draw_message(frame: &mut Frame, area: Rect, text: &str, color: Color) {
    let lines = text.lines().count() as u16;
    let [_, middle, _] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(lines.min(area.height)),
        Constraint::Fill(1),
    ])
    .areas(area);
    let message = Paragraph::new(text.to_string())
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    frame.render_widget(message, middle);
}

/// Render every card that intersects the viewport.
fn draw_feed(app: &App, frame: &mut Frame, area: Rect) {
    let Some(session) = app.session.as_ref() else {
        return;
    };
    let height = i64::from(area.height.max(1));
    let viewport = Extent::new(app.scroll, u32::from(area.height));
    let now = Instant::now();

    let first = (app.scroll / height).max(0) as usize;
    for index in first..session.items().len() {
        let top = index as i64 * height;
        if top >= viewport.bottom() {
            break;
        }
        let visible_top = top.max(viewport.top);
        let visible_bottom = (top + height).min(viewport.bottom());
        if visible_bottom <= visible_top {
            continue;
        }
        let rect = Rect {
            x: area.x,
            y: area.y + (visible_top - viewport.top) as u16,
            width: area.width,
            height: (visible_bottom - visible_top) as u16,
        };
        let card = app.cards.get(index).cloned().unwrap_or_default();
        draw_card(session, index, &card, now, frame, rect);
    }
}

fn draw_card(
    session: &Session,
    index: usize,
    card: &CardState,
    now: Instant,
    frame: &mut Frame,
    area: Rect,
) {
    let item = &session.items()[index];
    let Some(sink) = session.sink(index) else {
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", item.number))
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if inner.height == 0 {
        return;
    }

    let mut lines = Vec::new();
    if card.info_until.is_some_and(|until| until > now) {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{} ", item.number),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::styled(item.title.as_str(), Style::default().fg(Color::White)),
        ]));
    }
    if let Some((rate, until)) = card.speed_overlay {
        if until > now {
            lines.push(Line::styled(
                format!("Speed {rate}x"),
                Style::default().fg(Color::Magenta),
            ));
        }
    }

    let state = session.load_state(index);
    let status = if let Some(error) = &card.error {
        Line::from(vec![
            Span::styled("✖ ", Style::default().fg(Color::Red)),
            Span::styled(error.as_str(), Style::default().fg(Color::Red)),
            Span::raw("  r: retry"),
        ])
    } else if card.autoplay_blocked {
        Line::styled("▶ press Enter to play", Style::default().fg(Color::Yellow))
    } else {
        match (state, sink.status()) {
            (_, SinkStatus::Playing) => Line::styled(
                format!(
                    "▶ {}  {}x",
                    format_position(sink.position().as_secs()),
                    sink.rate()
                ),
                Style::default().fg(Color::Green),
            ),
            (_, SinkStatus::Paused) => {
                Line::styled("❚❚ paused", Style::default().fg(Color::Gray))
            }
            (_, SinkStatus::Ready) => Line::styled("● ready", Style::default().fg(Color::Gray)),
            (LoadState::Loading, _) | (_, SinkStatus::Buffering) => {
                Line::styled("loading…", Style::default().fg(Color::DarkGray))
            }
            _ => Line::raw(""),
        }
    };
    lines.push(status);

    let text_height = (lines.len() as u16).min(inner.height);
    let [text_area, rest] =
        Layout::vertical([Constraint::Length(text_height), Constraint::Min(0)]).areas(inner);
    frame.render_widget(Paragraph::new(lines), text_area);

    if let Some((loaded, total)) = card.progress {
        if rest.height > 0 {
            let gauge_area = Rect { height: 1, ..rest };
            let (ratio, label) = match total {
                Some(total) if total > 0 => (
                    (loaded as f64 / total as f64).clamp(0.0, 1.0),
                    format!("{} / {}", format_bytes(loaded), format_bytes(total)),
                ),
                _ => (0.0, format_bytes(loaded)),
            };
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(Color::Blue))
                .ratio(ratio)
                .label(label);
            frame.render_widget(gauge, gauge_area);
        }
    }
}

/// Render the bottom status bar.
fn draw_status_bar(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(app.status.as_str(), Style::default().fg(Color::Yellow)),
    ];
    if let Some(offline) = &app.offline {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(offline.message.as_str(), Style::default().fg(Color::Cyan)));
        if offline.finished {
            spans.push(Span::raw(" (x: dismiss)"));
        }
    }
    if let (Some(session), Some(current)) = (app.session.as_ref(), app.current_index()) {
        let stats = session.cache_stats();
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("{}/{}", current + 1, session.items().len()),
            Style::default().fg(Color::Green),
        ));
        spans.push(Span::styled(
            format!("  cache {} hit / {} miss", stats.hits, stats.misses),
            Style::default().fg(Color::DarkGray),
        ));
    }
    spans.push(Span::raw("  q: quit  j/k: next/prev  Enter: play  s: speed  d: offline"));
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn format_position(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
