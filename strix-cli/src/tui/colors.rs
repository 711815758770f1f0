//! Color and style helpers for severity and agent state

use ratatui::style::{Color, Modifier, Style};
use strix_core::agents::AgentState;
use strix_core::knowledge::Severity;

pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => Color::Red,
        Severity::High => Color::LightRed,
        Severity::Medium => Color::Yellow,
        Severity::Low => Color::Blue,
        Severity::Info => Color::DarkGray,
    }
}

/// Critical severity is bold
pub fn severity_style(severity: Severity) -> Style {
    let style = Style::default().fg(severity_color(severity));
    if severity == Severity::Critical {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

pub fn state_color(state: AgentState) -> Color {
    match state {
        AgentState::Pending => Color::DarkGray,
        AgentState::Running => Color::Green,
        AgentState::WaitingOnChildren => Color::Yellow,
        AgentState::Succeeded => Color::Cyan,
        AgentState::Failed => Color::Red,
        AgentState::Cancelled => Color::Magenta,
    }
}

pub fn state_style(state: AgentState) -> Style {
    let style = Style::default().fg(state_color(state));
    if state == AgentState::Running {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_colors() {
        assert_eq!(severity_color(Severity::Critical), Color::Red);
        assert_eq!(severity_color(Severity::High), Color::LightRed);
        assert_eq!(severity_color(Severity::Medium), Color::Yellow);
        assert_eq!(severity_color(Severity::Low), Color::Blue);
        assert_eq!(severity_color(Severity::Info), Color::DarkGray);
    }

    #[test]
    fn test_severity_style_critical_is_bold() {
        let style = severity_style(Severity::Critical);
        assert_eq!(style.fg, Some(Color::Red));
        assert!(style.add_modifier.contains(Modifier::BOLD));
        assert!(!severity_style(Severity::High).add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_state_styles() {
        assert_eq!(state_style(AgentState::Running).fg, Some(Color::Green));
        assert_eq!(state_color(AgentState::Failed), Color::Red);
        assert_eq!(state_color(AgentState::WaitingOnChildren), Color::Yellow);
    }
}
