//! UI rendering

use super::app::App;
use crate::op::OpState;
use crate::search::SearchResult;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};
use std::time::Duration;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Title + session
            Constraint::Length(1), // Maintenance notice
            Constraint::Length(1), // Input
            Constraint::Length(12), // Suggestions
            Constraint::Length(3), // Current lookup
            Constraint::Min(3),    // History
            Constraint::Length(1), // Status bar
            Constraint::Length(1), // Toast
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_maintenance(frame, app, chunks[1]);
    render_input(frame, app, chunks[2]);
    render_suggestions(frame, app, chunks[3]);
    render_lookup(frame, app, chunks[4]);
    render_history(frame, app, chunks[5]);
    render_status_bar(frame, chunks[6]);
    render_toast_line(frame, app, chunks[7]);
}

fn status_color(result: &SearchResult) -> Color {
    if result.error.is_some() {
        Color::Red
    } else if !result.found {
        Color::DarkGray
    } else if result.is_insurance {
        Color::Green
    } else {
        Color::Yellow
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let dim = Style::default().fg(Color::DarkGray);
    let spans = vec![
        Span::styled(
            format!(" {}", app.settings.app_title),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  {}", app.settings.organization_name), dim),
        Span::styled(format!("  [{}]", app.session_label()), dim),
    ];
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_maintenance(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(notice) = app.settings.maintenance_notice() {
        let line = Line::from(Span::styled(
            format!(" ⚠ {}", notice),
            Style::default().fg(Color::Yellow),
        ));
        frame.render_widget(Paragraph::new(line), area);
    }
}

fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let cursor_style = Style::default().fg(Color::White).bg(Color::DarkGray);
    let text_style = Style::default().fg(Color::White);

    let (before, after) = app.input.text.split_at(app.input.cursor);
    let cursor_char = after.chars().next();
    let after_cursor = cursor_char.map_or("", |c| &after[c.len_utf8()..]);

    let mut spans = vec![
        Span::styled("▌ ", Style::default().fg(Color::Yellow)),
        Span::styled(before, text_style),
    ];
    match cursor_char {
        Some(c) => spans.push(Span::styled(c.to_string(), cursor_style)),
        None => spans.push(Span::styled("█", text_style)),
    }
    spans.push(Span::styled(after_cursor, text_style));

    if app.suggestions.is_loading() {
        spans.push(Span::styled(
            "  searching…",
            Style::default().fg(Color::DarkGray),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_suggestions(frame: &mut Frame, app: &mut App, area: Rect) {
    let items: Vec<ListItem> = app
        .suggestions
        .suggestions()
        .iter()
        .map(|s| {
            let (label, color) = if s.is_insurance {
                ("subscribed", Color::Green)
            } else {
                ("not subscribed", Color::Yellow)
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:<24}", s.serial_number)),
                Span::styled(label, Style::default().fg(color)),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Suggestions "))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("› ");
    frame.render_stateful_widget(list, area, &mut app.suggestion_state);
}

fn render_lookup(frame: &mut Frame, app: &App, area: Rect) {
    let line = match &app.lookup {
        OpState::Idle => Line::from(Span::styled(
            "Type a serial number and press Enter",
            Style::default().fg(Color::DarkGray),
        )),
        OpState::InFlight { .. } => {
            let elapsed = app.lookup.elapsed().unwrap_or_default();
            Line::from(Span::styled(
                format!(
                    "{} Looking up {}",
                    spinner_frame(elapsed),
                    app.lookup_term
                ),
                Style::default().fg(Color::Cyan),
            ))
        }
        OpState::Succeeded(result) => Line::from(vec![
            Span::styled(
                format!("{}  ", result.serial_number),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                result.display_status(),
                Style::default()
                    .fg(status_color(result))
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        OpState::Failed(message) => Line::from(vec![
            Span::styled(
                format!("{}  ", app.lookup_term),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("lookup error: {}", message),
                Style::default().fg(Color::Red),
            ),
        ]),
    };

    let para = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title(" Result "));
    frame.render_widget(para, area);
}

fn render_history(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .history
        .iter()
        .map(|r| {
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:<24}", r.serial_number)),
                Span::styled(r.display_status(), Style::default().fg(status_color(r))),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" History "));
    frame.render_widget(list, area);
}

fn render_status_bar(frame: &mut Frame, area: Rect) {
    let dim = Style::default().fg(Color::DarkGray);
    let bracket = Style::default().fg(Color::DarkGray);

    let mut spans = vec![Span::raw(" ")];
    for hint in ["Enter look up", "Tab accept", "↑↓ select", "Esc quit"] {
        spans.push(Span::styled("[", bracket));
        spans.push(Span::styled(hint, dim));
        spans.push(Span::styled("] ", bracket));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_toast_line(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(ref toast) = app.toast {
        let style = if toast.is_error {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::Blue).add_modifier(Modifier::DIM)
        };
        let line = Line::from(Span::styled(format!(" {}", toast.message), style));
        frame.render_widget(Paragraph::new(line), area);
    }
}

fn spinner_frame(elapsed: Duration) -> &'static str {
    const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    FRAMES[(elapsed.as_millis() / 80) as usize % FRAMES.len()]
}
