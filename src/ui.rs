use crate::app::App;
use crate::layout::{LineKind, RenderedLine};
use crate::utils::decode_url;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

const HINTS: &str =
    " j/k scroll  ] next  [ prev  a auto  p pause  s start/stop  n/e/b check  q quit";

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_page(f, app, chunks[0]);
    render_overlay(f, app, chunks[0]);
    render_status_bar(f, app, chunks[1]);
    render_hints(f, app, chunks[2]);
}

fn styled_line(line: &RenderedLine) -> Line<'static> {
    let style = match line.kind {
        LineKind::Text => Style::default(),
        LineKind::Link => Style::default().fg(Color::Cyan),
        LineKind::Divider => Style::default().fg(Color::Yellow).bold(),
        LineKind::Media => Style::default().fg(Color::Magenta),
        LineKind::Frame => Style::default().fg(Color::Gray),
    };
    Line::from(Span::styled(line.text.clone(), style))
}

fn render_page(f: &mut Frame, app: &mut App, area: Rect) {
    let first = app.session.viewport().first_row();
    let lines: Vec<Line> = app
        .session
        .lines()
        .iter()
        .skip(first)
        .take(area.height as usize)
        .map(styled_line)
        .collect();
    f.render_widget(Paragraph::new(lines), area);
}

fn render_overlay(f: &mut Frame, app: &App, area: Rect) {
    let Some(overlay) = app.session.overlay() else {
        return;
    };
    let mut lines = vec![Line::from(overlay.page.clone())];
    if let Some(debug) = &overlay.debug {
        lines.push(Line::from(Span::styled(
            debug.clone(),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let inner = lines.iter().map(Line::width).max().unwrap_or(0) as u16;
    let width = (inner + 4).min(area.width);
    let height = (lines.len() as u16 + 2).min(area.height);
    let rect = Rect {
        x: area.x + area.width.saturating_sub(width + 1),
        y: area.y,
        width,
        height,
    };
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).fg(Color::White)),
        rect,
    );
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let status_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let session = &app.session;
    let instance = session.instance();
    let (bg, txt) = match session.auto_indicator() {
        Some(auto) if instance.auto_paused => (Color::Gray, format!(" {auto} ")),
        Some(auto) => (Color::Green, format!(" {auto} ")),
        None if instance.enabled => (Color::Blue, format!(" {:?} ", instance.action).to_uppercase()),
        None => (Color::Gray, " OFF ".to_string()),
    };

    let mut left_spans = vec![
        Span::styled(txt, Style::default().bg(bg).fg(Color::Black).bold()),
        Span::raw(" "),
        Span::raw(decode_url(session.location())),
    ];

    if instance.is_loading {
        left_spans.push(Span::raw(" "));
        left_spans.push(Span::styled(
            "⏳",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::RAPID_BLINK),
        ));
    }

    f.render_widget(
        Paragraph::new(Line::from(left_spans)).bg(Color::DarkGray),
        status_chunks[0],
    );

    let mut right_spans = Vec::new();
    if let Some(notice) = session.notice() {
        right_spans.push(Span::styled(
            format!("{notice} "),
            Style::default().fg(Color::LightRed),
        ));
    }
    right_spans.push(Span::styled(
        format!("[{:?}] ", instance.append_mode),
        Style::default().fg(Color::Yellow),
    ));
    right_spans.push(Span::styled(
        format!("Page {}/{} ", instance.current_page, instance.total_pages),
        Style::default().fg(Color::Cyan).bold(),
    ));

    f.render_widget(
        Paragraph::new(Line::from(right_spans))
            .alignment(Alignment::Right)
            .bg(Color::DarkGray),
        status_chunks[1],
    );
}

fn render_hints(f: &mut Frame, app: &App, area: Rect) {
    let (text, fg) = match &app.message {
        Some(message) => (format!(" {message}"), Color::White),
        None => (HINTS.to_string(), Color::Gray),
    };
    f.render_widget(Paragraph::new(text).bg(Color::Black).fg(fg), area);
}
