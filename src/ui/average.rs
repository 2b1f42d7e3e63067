//! Average view rendering.
//!
//! Shows the aggregate pseudo-source: how many nodes contribute, when the
//! averages were last computed, and one row per averaged metric.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame,
};

use crate::app::App;
use crate::data::duration::format_clock;
use crate::data::metric::{format_number, label_for, sort_keys};
use crate::data::SourceRole;

use super::render_sparkline;

const TREND_WIDTH: usize = 24;

/// Render the Average view.
pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let aggregate = app.dashboard.aggregate();

    let chunks = Layout::vertical([
        Constraint::Length(4), // Status
        Constraint::Min(5),    // Metrics
    ])
    .split(area);

    let updated = aggregate
        .updated_at
        .map(format_clock)
        .unwrap_or_else(|| "never".to_string());
    let excluded = app.dashboard.config().aggregate.exclude.len();

    let status_lines = vec![
        Line::from(vec![
            Span::raw(" Status: "),
            Span::styled(
                aggregate.status.to_string(),
                app.theme
                    .aggregate_style(aggregate.status)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw(" Updated: "),
            Span::styled(updated, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format!("    Excluded nodes: {}", excluded)),
        ]),
    ];

    let status = Paragraph::new(status_lines).block(
        Block::default()
            .title(" Average ")
            .borders(Borders::ALL)
            .border_type(app.theme.border_type)
            .border_style(Style::default().fg(app.theme.border)),
    );
    frame.render_widget(status, chunks[0]);

    let metrics_block = Block::default()
        .title(format!(" Metrics ({}) ", aggregate.metrics.len()))
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.border));

    if aggregate.metrics.is_empty() {
        let empty = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "  Waiting for numeric readings",
                Style::default().add_modifier(Modifier::DIM),
            )),
        ])
        .block(metrics_block);
        frame.render_widget(empty, chunks[1]);
        return;
    }

    // Stale means are kept on screen but dimmed
    let value_style = if aggregate.status.is_online() {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default().add_modifier(Modifier::DIM)
    };

    let header = Row::new(vec![
        Cell::from("Metric"),
        Cell::from("Mean"),
        Cell::from("Trend"),
        Cell::from("Points"),
    ])
    .height(1)
    .style(app.theme.header);

    let rows: Vec<Row> = sort_keys(aggregate.metrics.keys())
        .into_iter()
        .map(|key| {
            let series = aggregate.series.get(key.as_str());
            let trend = series.map(|s| s.sparkline(TREND_WIDTH)).unwrap_or_default();
            Row::new(vec![
                Cell::from(label_for(key, SourceRole::Sensor)),
                Cell::from(format_number(key, aggregate.metrics[key.as_str()])).style(value_style),
                Cell::from(render_sparkline(&trend, TREND_WIDTH))
                    .style(Style::default().fg(app.theme.highlight)),
                Cell::from(series.map(|s| s.len()).unwrap_or(0).to_string()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Fill(2),                       // Metric
        Constraint::Length(10),                    // Mean
        Constraint::Length(TREND_WIDTH as u16 + 2), // Trend
        Constraint::Length(8),                     // Points
    ];

    let table = Table::new(rows, widths).header(header).block(metrics_block);
    frame.render_widget(table, chunks[1]);
}
