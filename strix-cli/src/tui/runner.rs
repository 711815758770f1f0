//! TUI main loop

use std::io::{self, stdout};
use std::time::Duration;

use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio_util::sync::CancellationToken;

use super::app::{App, View};
use super::events::{handle_event, poll_event, EventResult};
use super::widgets::dashboard;

const KEYBINDINGS: &[(&str, &str)] = &[
    ("q, Ctrl+c", "Cancel the run (asks first); exit once it is over"),
    ("h, Esc", "Dashboard"),
    ("l", "Activity log"),
    ("j, Down", "Scroll down"),
    ("k, Up", "Scroll up"),
    ("PgUp/PgDn", "Scroll by ten entries"),
    ("?", "This help"),
];

fn render(frame: &mut Frame, app: &App) {
    match app.view {
        View::Dashboard => dashboard::render(frame, app),
        View::Logs => render_logs(frame, app),
        View::Help => render_help(frame),
    }

    if app.confirm_quit {
        render_confirm_dialog(frame);
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let [area] = Layout::horizontal([Constraint::Length(width)])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    area
}

fn render_confirm_dialog(frame: &mut Frame) {
    let area = centered(frame.area(), 44, 6);
    frame.render_widget(Clear, area);

    let text = vec![
        Line::from(""),
        Line::from("Cancel every running agent?").centered(),
        Line::from(vec![
            Span::styled("y", Style::default().fg(Color::Yellow)),
            Span::raw(" cancel   "),
            Span::styled("n", Style::default().fg(Color::Yellow)),
            Span::raw(" keep running"),
        ])
        .centered(),
    ];
    let dialog = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Cancel run "),
    );
    frame.render_widget(dialog, area);
}

fn render_logs(frame: &mut Frame, app: &App) {
    let [body, footer] = Layout::vertical([Constraint::Min(3), Constraint::Length(1)])
        .areas(frame.area());

    let items: Vec<ListItem> = app
        .feed
        .iter()
        .rev()
        .skip(app.log_scroll)
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

    let title = if app.log_scroll > 0 {
        format!(" Activity log ({} newer hidden) ", app.log_scroll)
    } else {
        " Activity log ".to_string()
    };
    frame.render_widget(
        List::new(items).block(Block::default().borders(Borders::ALL).title(title)),
        body,
    );

    let hints = Line::from(vec![
        Span::styled("h", Style::default().fg(Color::Yellow)),
        Span::raw(" back  "),
        Span::styled("j/k", Style::default().fg(Color::Yellow)),
        Span::raw(" scroll  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" cancel/exit"),
    ]);
    frame.render_widget(
        Paragraph::new(hints).style(Style::default().fg(Color::DarkGray)),
        footer,
    );
}

fn render_help(frame: &mut Frame) {
    let [body, footer] = Layout::vertical([Constraint::Min(3), Constraint::Length(1)])
        .areas(frame.area());

    let mut lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "  Keybindings",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    lines.extend(KEYBINDINGS.iter().map(|(keys, action)| {
        Line::from(vec![
            Span::styled(format!("  {keys:<11}"), Style::default().fg(Color::Yellow)),
            Span::raw(*action),
        ])
    }));

    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Help ")),
        body,
    );
    frame.render_widget(
        Paragraph::new("Press any key to close").style(Style::default().fg(Color::DarkGray)),
        footer,
    );
}

/// Run the dashboard until the user leaves it.
///
/// A confirmed cancel fires `cancel`; the dashboard stays up so the final
/// results can still be read.
pub fn run(app: &mut App, cancel: &CancellationToken) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    terminal.clear()?;

    let result = run_loop(&mut terminal, app, cancel);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    cancel: &CancellationToken,
) -> io::Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| render(frame, app))?;

        if let Some(event) = poll_event(Duration::from_millis(100))? {
            match handle_event(app, event) {
                EventResult::Quit => break,
                EventResult::CancelRun => cancel.cancel(),
                EventResult::Continue => {}
            }
        }

        app.drain_events();
    }
    Ok(())
}
