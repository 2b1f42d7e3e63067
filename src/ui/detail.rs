//! Detail overlay rendering.
//!
//! Displays a modal overlay with every metric of the selected node.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

use crate::app::App;
use crate::data::duration::format_elapsed;
use crate::data::metric::{format_value, sort_keys};
use crate::data::SourceRole;

use super::render_sparkline;

/// Minimum width required for the detail overlay to render properly.
const MIN_OVERLAY_WIDTH: u16 = 50;
/// Minimum height required for the detail overlay to render properly.
const MIN_OVERLAY_HEIGHT: u16 = 16;

const TREND_WIDTH: usize = 20;

/// Render the node detail as a modal overlay.
pub fn render_overlay(frame: &mut Frame, app: &App, area: Rect) {
    // Skip rendering if terminal is too small for the overlay
    if area.width < MIN_OVERLAY_WIDTH || area.height < MIN_OVERLAY_HEIGHT {
        return;
    }

    let Some(source) = app.selected_node() else {
        return;
    };

    // Width: 95% of screen, clamped to [MIN_OVERLAY_WIDTH, 100]
    let overlay_width = (area.width * 95 / 100).clamp(MIN_OVERLAY_WIDTH, 100);
    // Height: 90% of screen, clamped to [MIN_OVERLAY_HEIGHT, 50]
    let overlay_height = (area.height * 90 / 100).clamp(MIN_OVERLAY_HEIGHT, 50);

    let x = area.x + (area.width.saturating_sub(overlay_width)) / 2;
    let y = area.y + (area.height.saturating_sub(overlay_height)) / 2;
    let overlay_area = Rect::new(x, y, overlay_width, overlay_height);

    frame.render_widget(Clear, overlay_area);

    let chunks = Layout::vertical([
        Constraint::Length(6), // Header with node info
        Constraint::Min(6),    // Metrics table
        Constraint::Length(1), // Footer
    ])
    .split(overlay_area);

    // ===== HEADER SECTION =====
    let status = source.status();
    let role = match source.role {
        SourceRole::Sensor => "sensor",
        SourceRole::BatteryMonitor => "battery monitor",
    };
    let last_seen = source
        .liveness
        .last_seen_at
        .map(|t| format!("{} ago", format_elapsed(app.now.saturating_sub(t))))
        .unwrap_or_else(|| "never".to_string());
    let excluded = app.dashboard.aggregator().is_excluded(&source.id);

    let mut header_lines = vec![
        Line::from(vec![
            Span::styled(
                format!(" {} ", source.id),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("({})", role), Style::default().add_modifier(Modifier::DIM)),
        ]),
        Line::from(vec![
            Span::raw(" Status: "),
            Span::styled(
                format!("{} {}", status.symbol(), status),
                app.theme.liveness_style(status).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("    Last report: {}", last_seen)),
        ]),
        Line::from(format!(
            " Averaged: {}",
            if excluded { "no (excluded)" } else { "yes" }
        )),
    ];
    if let Some(fault) = source.fault() {
        header_lines.push(Line::from(Span::styled(
            format!(" Sensor fault: {}", fault),
            Style::default().fg(app.theme.warning).add_modifier(Modifier::BOLD),
        )));
    }

    let header_block = Block::default()
        .title(" Node Detail ")
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.highlight));

    frame.render_widget(Paragraph::new(header_lines).block(header_block), chunks[0]);

    // ===== METRICS TABLE =====
    let metrics_block = Block::default()
        .title(format!(" Metrics ({}) ", source.metrics.len()))
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.border));

    if source.metrics.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "  No metrics reported",
                Style::default().add_modifier(Modifier::DIM),
            )),
        ])
        .block(metrics_block);
        frame.render_widget(empty, chunks[1]);
    } else {
        let header = Row::new(vec![
            Cell::from("Metric"),
            Cell::from("Value"),
            Cell::from("Trend"),
            Cell::from("Points"),
        ])
        .height(1)
        .style(app.theme.header);

        let rows: Vec<Row> = sort_keys(source.metrics.keys())
            .into_iter()
            .filter_map(|key| source.metrics.get(key.as_str()).map(|m| (key, m)))
            .map(|(key, metric)| {
                let series = source.series.get(key.as_str());
                let trend = series.map(|s| s.sparkline(TREND_WIDTH)).unwrap_or_default();
                let value = Cell::from(format_value(key, &metric.value));
                let value = if metric.value.fault().is_some() {
                    value.style(Style::default().fg(app.theme.warning))
                } else {
                    value
                };
                Row::new(vec![
                    Cell::from(metric.label.clone()),
                    value,
                    Cell::from(render_sparkline(&trend, TREND_WIDTH))
                        .style(Style::default().fg(app.theme.highlight)),
                    Cell::from(series.map(|s| s.len().to_string()).unwrap_or("-".into())),
                ])
            })
            .collect();

        let widths = [
            Constraint::Fill(2),                        // Metric
            Constraint::Length(14),                     // Value
            Constraint::Length(TREND_WIDTH as u16 + 2), // Trend
            Constraint::Length(8),                      // Points
        ];

        let table = Table::new(rows, widths).header(header).block(metrics_block);
        frame.render_widget(table, chunks[1]);
    }

    // ===== FOOTER =====
    let footer = Paragraph::new(Line::from(vec![Span::styled(
        " Press Esc to close ",
        Style::default().add_modifier(Modifier::DIM),
    )]));
    frame.render_widget(footer, chunks[2]);
}
