//! TUI Event handling

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use std::time::Duration;

use super::app::{App, View};

/// Event handling result
#[derive(Debug, PartialEq, Eq)]
pub enum EventResult {
    Continue,
    /// The user confirmed they want the run cancelled
    CancelRun,
    /// Leave the dashboard
    Quit,
}

/// Poll for events with timeout
pub fn poll_event(timeout: Duration) -> std::io::Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

pub fn handle_event(app: &mut App, event: Event) -> EventResult {
    match event {
        Event::Key(key) => handle_key_event(app, key),
        _ => EventResult::Continue,
    }
}

/// Handle keyboard events
pub fn handle_key_event(app: &mut App, key: KeyEvent) -> EventResult {
    let quit_key = key.code == KeyCode::Char('q')
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL));

    // once the run is over there is nothing left to cancel
    if app.finished.is_some() && (quit_key || key.code == KeyCode::Enter) {
        app.should_quit = true;
        return EventResult::Quit;
    }

    if app.confirm_quit {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                app.confirm_quit = false;
                if app.cancel_requested {
                    return EventResult::Continue;
                }
                app.cancel_requested = true;
                return EventResult::CancelRun;
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                app.confirm_quit = false;
            }
            _ => {}
        }
        return EventResult::Continue;
    }

    if quit_key {
        app.confirm_quit = true;
        return EventResult::Continue;
    }

    match key.code {
        KeyCode::Char('h') | KeyCode::Home | KeyCode::Esc => app.view = View::Dashboard,
        KeyCode::Char('l') => app.view = View::Logs,
        KeyCode::Char('?') => app.view = View::Help,
        KeyCode::Up | KeyCode::Char('k') => app.scroll_up(),
        KeyCode::Down | KeyCode::Char('j') => app.scroll_down(),
        KeyCode::PageUp => {
            for _ in 0..10 {
                app.scroll_up();
            }
        }
        KeyCode::PageDown => {
            for _ in 0..10 {
                app.scroll_down();
            }
        }
        _ => {
            if app.view == View::Help {
                app.view = View::Dashboard;
            }
        }
    }
    EventResult::Continue
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn test_q_asks_before_cancelling() {
        let mut app = App::new("run", vec![], None);
        assert_eq!(handle_key_event(&mut app, key(KeyCode::Char('q'))), EventResult::Continue);
        assert!(app.confirm_quit);

        assert_eq!(handle_key_event(&mut app, key(KeyCode::Char('n'))), EventResult::Continue);
        assert!(!app.confirm_quit);

        handle_key_event(&mut app, key(KeyCode::Char('q')));
        assert_eq!(handle_key_event(&mut app, key(KeyCode::Char('y'))), EventResult::CancelRun);
        assert!(app.cancel_requested);
        assert!(!app.should_quit);
    }

    #[test]
    fn test_cancel_is_only_requested_once() {
        let mut app = App::new("run", vec![], None);
        handle_key_event(&mut app, key(KeyCode::Char('q')));
        handle_key_event(&mut app, key(KeyCode::Char('y')));
        handle_key_event(&mut app, key(KeyCode::Char('q')));
        assert_eq!(handle_key_event(&mut app, key(KeyCode::Char('y'))), EventResult::Continue);
    }

    #[test]
    fn test_q_exits_after_run_finished() {
        let mut app = App::new("run", vec![], None);
        app.finished = Some((true, "done".to_string()));
        assert_eq!(handle_key_event(&mut app, key(KeyCode::Char('q'))), EventResult::Quit);
        assert!(app.should_quit);
    }

    #[test]
    fn test_view_navigation() {
        let mut app = App::new("run", vec![], None);
        handle_key_event(&mut app, key(KeyCode::Char('l')));
        assert_eq!(app.view, View::Logs);
        handle_key_event(&mut app, key(KeyCode::Char('?')));
        assert_eq!(app.view, View::Help);
        handle_key_event(&mut app, key(KeyCode::Char('x')));
        assert_eq!(app.view, View::Dashboard);
    }
}
