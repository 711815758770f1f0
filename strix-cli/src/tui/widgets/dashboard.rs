//! Dashboard widget for the main TUI view

#![allow(clippy::indexing_slicing)]

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
    Frame,
};
use strix_core::knowledge::Severity;

use crate::tui::app::App;
use crate::tui::colors::{severity_style, state_style};

/// Render the dashboard view
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // Header
            Constraint::Length(3),      // Metrics
            Constraint::Percentage(45), // Agents | Findings
            Constraint::Min(5),         // Feed
            Constraint::Length(1),      // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_metrics(frame, app, chunks[1]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[2]);
    render_agents(frame, app, middle[0]);
    render_findings(frame, app, middle[1]);

    render_feed(frame, app, chunks[3]);
    render_footer(frame, app, chunks[4]);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let targets = match app.targets.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{first} (+{})", rest.len()),
    };
    let (status, status_style) = match &app.finished {
        Some((true, _)) => ("finished", Style::default().fg(Color::Cyan)),
        Some((false, _)) => ("failed", Style::default().fg(Color::Red)),
        None if app.cancel_requested => ("cancelling", Style::default().fg(Color::Magenta)),
        None => ("running", Style::default().fg(Color::Green)),
    };

    let header_text = vec![Line::from(vec![
        Span::styled("Target: ", Style::default().fg(Color::Gray)),
        Span::styled(targets, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("  |  "),
        Span::styled("Run: ", Style::default().fg(Color::Gray)),
        Span::styled(&app.run_name, Style::default().fg(Color::Yellow)),
        Span::raw("  |  "),
        Span::styled(status, status_style),
        Span::raw("  |  "),
        Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
        Span::styled(app.elapsed_display(), Style::default().fg(Color::White)),
    ])];

    let header =
        Paragraph::new(header_text).block(Block::default().borders(Borders::ALL).title(" strix "));
    frame.render_widget(header, area);
}

fn render_metrics(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
            Constraint::Ratio(1, 3),
        ])
        .split(area);

    let tokens = format!(
        "In: {} | Out: {}",
        format_number(app.metrics.tokens.input),
        format_number(app.metrics.tokens.output),
    );
    frame.render_widget(
        Paragraph::new(tokens).block(Block::default().borders(Borders::ALL).title(" Tokens ")),
        chunks[0],
    );

    let activity = format!(
        "Agents: {} active / {} | Tools: {} ({} failed)",
        app.active_agents(),
        app.agents.len(),
        app.metrics.tool_calls,
        app.metrics.tool_failures
    );
    frame.render_widget(
        Paragraph::new(activity).block(Block::default().borders(Borders::ALL).title(" Activity ")),
        chunks[1],
    );

    let counts = format!(
        "C:{} H:{} M:{} L:{} I:{}",
        app.count_findings(Severity::Critical),
        app.count_findings(Severity::High),
        app.count_findings(Severity::Medium),
        app.count_findings(Severity::Low),
        app.count_findings(Severity::Info),
    );
    let worst = app.findings.first().map(|f| severity_style(f.severity));
    frame.render_widget(
        Paragraph::new(counts)
            .style(worst.unwrap_or_default())
            .block(Block::default().borders(Borders::ALL).title(" Findings ")),
        chunks[2],
    );
}

fn render_agents(frame: &mut Frame, app: &App, area: Rect) {
    let header = Row::new(vec!["Agent", "State", "Tool", "Latest"])
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = app
        .tree_order()
        .into_iter()
        .map(|row| {
            let indent = "  ".repeat(app.depth_of(row));
            Row::new(vec![
                Cell::from(format!("{indent}{}", row.name)),
                Cell::from(row.state.as_str()).style(state_style(row.state)),
                Cell::from(row.current_tool.clone().unwrap_or_default())
                    .style(Style::default().fg(Color::DarkGray)),
                Cell::from(one_line(
                    row.summary.as_deref().or(row.thinking.as_deref()).unwrap_or_default(),
                )),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(30),
            Constraint::Length(20),
            Constraint::Length(18),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(" Agents "));

    frame.render_widget(table, area);
}

fn render_findings(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .findings
        .iter()
        .map(|f| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<8} ", f.severity.to_string()), severity_style(f.severity)),
                Span::raw(&f.title),
                Span::styled(format!("  {}", f.key), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Findings "));
    frame.render_widget(list, area);
}

fn render_feed(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .feed
        .iter()
        .rev()
        .take(area.height.saturating_sub(2) as usize)
        .map(|entry| {
            let style = if entry.is_error {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp.format("%H:%M:%S")),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("[{}] ", entry.agent), Style::default().fg(Color::Cyan)),
                Span::styled(&entry.message, style),
            ]))
        })
        .collect();

    let feed =
        List::new(items).block(Block::default().borders(Borders::ALL).title(" Activity Feed "));
    frame.render_widget(feed, area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let quit = if app.finished.is_some() { " exit  " } else { " cancel run  " };
    let help = Line::from(vec![
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(quit),
        Span::styled("l", Style::default().fg(Color::Yellow)),
        Span::raw(" logs  "),
        Span::styled("?", Style::default().fg(Color::Yellow)),
        Span::raw(" help"),
    ]);

    let footer = Paragraph::new(help).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, area);
}

/// First line of a possibly multi-line text
fn one_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// Format large numbers with K/M suffixes
fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(500), "500");
        assert_eq!(format_number(1500), "1.5K");
        assert_eq!(format_number(1_500_000), "1.5M");
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("  probing /login\nthen /admin"), "probing /login");
        assert_eq!(one_line(""), "");
    }
}
