//! Common UI components shared across views.
//!
//! This module contains the header bar, tab bar, status bar, and help overlay.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Frame,
};

use crate::app::{App, View};
use crate::session::TransportStatus;

/// Render the header bar with the session overview.
///
/// Displays: transport state, online node count, battery monitor state and
/// feed counters.
pub fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let dashboard = &app.dashboard;
    let transport = dashboard.transport();
    let nodes = dashboard.visible_sources();
    let online = nodes.iter().filter(|s| s.status().is_online()).count();
    let stats = dashboard.stats();

    let mut spans = vec![
        Span::styled(" ● ", app.theme.transport_style(transport)),
        Span::styled("NODEWATCH ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("│ "),
        Span::styled(transport.label(), app.theme.transport_style(transport)),
        Span::raw(" │ "),
        if online > 0 {
            Span::styled(online.to_string(), Style::default().fg(app.theme.online))
        } else {
            Span::styled("0", Style::default().add_modifier(Modifier::DIM))
        },
        Span::raw(format!("/{} online", nodes.len())),
    ];

    if let Some(status) = dashboard.battery_monitor_status() {
        spans.push(Span::raw(" │ battery "));
        spans.push(Span::styled(status.symbol(), app.theme.liveness_style(status)));
    }

    spans.push(Span::raw(format!(" │ msgs:{}", stats.routed)));
    if stats.malformed > 0 {
        spans.push(Span::raw(" bad:"));
        spans.push(Span::styled(
            stats.malformed.to_string(),
            Style::default().fg(app.theme.warning),
        ));
    }
    if let TransportStatus::Error { message, .. } = transport {
        spans.push(Span::raw(" │ "));
        spans.push(Span::styled(
            message.clone(),
            Style::default().fg(app.theme.offline),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render the tab bar showing available views.
///
/// Highlights the currently active view.
pub fn render_tabs(frame: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<Line> = vec![Line::from(" 1:Nodes "), Line::from(" 2:Average ")];

    let selected = match app.current_view {
        View::Nodes => 0,
        View::Average => 1,
    };

    let tabs = Tabs::new(titles)
        .select(selected)
        .style(app.theme.tab_inactive)
        .highlight_style(app.theme.tab_active)
        .divider("|");

    frame.render_widget(tabs, area);
}

/// Render the status bar at the bottom.
///
/// Shows: current view, feed source, available controls.
/// Also displays temporary status messages.
pub fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(msg) = app.get_status_message() {
        let paragraph =
            Paragraph::new(format!(" {} ", msg)).style(Style::default().fg(app.theme.highlight));
        frame.render_widget(paragraph, area);
        return;
    }

    let controls = match app.current_view {
        View::Nodes if app.filter_active => "Type to search | Enter:apply Esc:cancel",
        View::Nodes => "/:search s:sort S:reverse Tab:switch Enter:detail ?:help q:quit",
        View::Average => "Tab:switch e:export x:clear ?:help q:quit",
    };

    let status = format!(
        " {} | {} | {}",
        app.current_view.label(),
        app.source_description(),
        controls
    );

    let paragraph = Paragraph::new(status).style(Style::default().add_modifier(Modifier::DIM));
    frame.render_widget(paragraph, area);
}

/// Render the help overlay with keyboard shortcuts.
///
/// Displayed as a centered modal on top of the current view.
pub fn render_help(frame: &mut Frame, app: &App, area: Rect) {
    let section = |title: &'static str| {
        Line::from(vec![Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        )])
    };

    let help_text = vec![
        Line::from(vec![Span::styled("Keyboard Shortcuts", app.theme.header)]),
        Line::from(""),
        section(" Navigation"),
        Line::from("  ←/→ h/l     Switch views"),
        Line::from("  1/2         Nodes / Average"),
        Line::from("  ↑/↓ j/k     Navigate list"),
        Line::from("  PgUp/PgDn   Jump 10 items"),
        Line::from("  Home/End    Jump to first/last"),
        Line::from("  Enter       View node detail"),
        Line::from("  Esc         Go back"),
        Line::from(""),
        section(" Nodes"),
        Line::from("  /         Start filter/search"),
        Line::from("  c         Clear filter"),
        Line::from("  s         Cycle sort column"),
        Line::from("  S         Toggle sort direction"),
        Line::from(""),
        section(" General"),
        Line::from("  e         Export to JSON"),
        Line::from("  x         Clear cached session"),
        Line::from("  q         Quit"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Press any key to close",
            Style::default().add_modifier(Modifier::DIM),
        )]),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.highlight));

    let paragraph = Paragraph::new(help_text).block(block);

    // Center the help overlay - responsive to terminal size
    let help_width = 42u16.min(area.width.saturating_sub(4));
    let help_height = 26u16.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(help_width)) / 2;
    let y = area.y + (area.height.saturating_sub(help_height)) / 2;
    let help_area = Rect::new(x, y, help_width, help_height);

    frame.render_widget(ratatui::widgets::Clear, help_area);
    frame.render_widget(paragraph, help_area);
}
