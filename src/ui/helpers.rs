use anyhow::Error;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::models::ItemStatus;

/// Produce a rectangle centered within `area` that spans the requested percent
/// of the width and height. Used for modal dialogs.
pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(horizontal[1]);

    vertical[1]
}

/// Extract the most relevant error message from a chained error.
pub(crate) fn surface_error(err: &Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}

/// Colour for a status cell.
pub(crate) fn status_style(status: ItemStatus) -> Style {
    match status {
        ItemStatus::Assigned => Style::default().fg(Color::Cyan),
        ItemStatus::Available => Style::default().fg(Color::Green),
        ItemStatus::Maintenance => Style::default().fg(Color::Yellow),
        ItemStatus::Retired => Style::default().fg(Color::DarkGray),
    }
}

/// Footer line of `[key] Action` pairs.
pub(crate) fn key_hints(hints: &[(&str, &str)]) -> Line<'static> {
    let key_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let mut spans = Vec::with_capacity(hints.len() * 2);
    for (idx, (key, action)) in hints.iter().enumerate() {
        let gap = if idx + 1 < hints.len() { "   " } else { "" };
        spans.push(Span::styled(format!("[{key}]"), key_style));
        spans.push(Span::raw(format!(" {action}{gap}")));
    }
    Line::from(spans)
}

/// `mailto:` link for the system mail handler, or `None` without an address.
pub(crate) fn mailto_link(email: &str) -> Option<String> {
    let email = email.trim();
    if email.is_empty() {
        None
    } else {
        Some(format!("mailto:{email}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn surface_error_returns_innermost_cause() {
        let err = Err::<(), _>(anyhow!("Coat 4 already exists."))
            .context("failed to insert item")
            .unwrap_err();
        assert_eq!(surface_error(&err), "Coat 4 already exists.");
    }

    #[test]
    fn mailto_requires_an_address() {
        assert_eq!(mailto_link("  "), None);
        assert_eq!(
            mailto_link(" ana@school.org "),
            Some("mailto:ana@school.org".to_string())
        );
    }

    #[test]
    fn key_hints_alternate_keys_and_actions() {
        let line = key_hints(&[("q", "Quit"), ("f", "Search")]);
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "[q] Quit   [f] Search");
    }
}
