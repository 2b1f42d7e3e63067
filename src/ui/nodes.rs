//! Nodes view rendering.
//!
//! Displays a table of all sensor nodes with liveness, time since the last
//! report, the well-known environment readings and a sparkline trend.

use std::cmp::Ordering;

use ratatui::{
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    text::Span,
    widgets::{Block, Borders, Cell, Row, Table, TableState},
    Frame,
};

use crate::app::App;
use crate::data::duration::format_elapsed;
use crate::data::metric::{format_value, PROXIMITY_KEY};
use crate::data::{LivenessStatus, Source};

use super::render_sparkline;

/// Metric columns of the node table, in display order.
const TABLE_METRICS: [(&str, &str); 5] = [
    ("lux", "Lux"),
    ("temp_air", "Air °C"),
    ("hum_air", "Air %"),
    ("hum_sol", "Soil %"),
    (PROXIMITY_KEY, "Height"),
];

/// Metric whose series drives the trend column.
const TREND_METRIC: &str = "lux";
const TREND_WIDTH: usize = 8;

/// Column to sort by in the Nodes view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    /// Sort by node id, numeric suffixes in numeric order.
    #[default]
    Name,
    /// Sort by liveness (online first).
    Status,
    /// Sort by time of the last report.
    LastSeen,
}

impl SortColumn {
    /// Cycle to the next sort column.
    pub fn next(self) -> Self {
        match self {
            SortColumn::Name => SortColumn::Status,
            SortColumn::Status => SortColumn::LastSeen,
            SortColumn::LastSeen => SortColumn::Name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortColumn::Name => "name",
            SortColumn::Status => "status",
            SortColumn::LastSeen => "seen",
        }
    }
}

/// Render the Nodes view showing all nodes in a sortable table.
pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let nodes = app.visible_nodes();
    let total = app.dashboard.visible_sources().len();

    let mut header_cells = vec![
        Cell::from(format_header("Node", SortColumn::Name, app)),
        Cell::from(format_header("Status", SortColumn::Status, app)),
        Cell::from(format_header("Seen", SortColumn::LastSeen, app)),
    ];
    header_cells.extend(TABLE_METRICS.iter().map(|(_, title)| Cell::from(*title)));
    header_cells.push(Cell::from("Trend"));
    let header = Row::new(header_cells).height(1).style(app.theme.header);

    let rows: Vec<Row> = nodes
        .iter()
        .map(|source| {
            let status = source.status();
            let seen = source
                .liveness
                .last_seen_at
                .map(|t| format!("{} ago", format_elapsed(app.now.saturating_sub(t))))
                .unwrap_or_else(|| "-".to_string());

            let mut cells = vec![
                Cell::from(source.id.clone()),
                Cell::from(status.symbol()).style(app.theme.liveness_style(status)),
                Cell::from(seen),
            ];
            for (key, _) in TABLE_METRICS {
                let cell = match source.metrics.get(key) {
                    Some(metric) if metric.value.fault().is_some() => {
                        Cell::from(format_value(key, &metric.value))
                            .style(Style::default().fg(app.theme.warning))
                    }
                    Some(metric) => Cell::from(format_value(key, &metric.value)),
                    None => Cell::from("-").style(Style::default().add_modifier(Modifier::DIM)),
                };
                cells.push(cell);
            }
            let trend = source
                .series
                .get(TREND_METRIC)
                .map(|s| s.sparkline(TREND_WIDTH))
                .unwrap_or_default();
            cells.push(Cell::from(render_sparkline(&trend, TREND_WIDTH)));
            Row::new(cells)
        })
        .collect();

    let mut widths = vec![
        Constraint::Fill(2),  // Node
        Constraint::Min(6),   // Status
        Constraint::Fill(1),  // Seen
    ];
    widths.extend(TABLE_METRICS.iter().map(|_| Constraint::Fill(1)));
    widths.push(Constraint::Min(TREND_WIDTH as u16));

    let selected_visual_index = app.selected_index.min(nodes.len().saturating_sub(1));
    let sort_dir = if app.sort_ascending { "↑" } else { "↓" };

    // Build title with filter info
    let filter_info = if app.filter_active {
        format!(" /{}_", app.filter_text)
    } else if !app.filter_text.is_empty() {
        format!(" /{}/ [c:clear]", app.filter_text)
    } else {
        String::new()
    };

    let position_info = if !nodes.is_empty() {
        format!(" [{}/{}]", selected_visual_index + 1, nodes.len())
    } else {
        String::new()
    };

    let title = format!(
        " Nodes ({}/{}) [s:sort {}{}]{}{} ",
        nodes.len(),
        total,
        app.sort_column.label(),
        sort_dir,
        filter_info,
        position_info
    );

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_type(app.theme.border_type)
                .border_style(Style::default().fg(app.theme.border)),
        )
        .row_highlight_style(app.theme.selected)
        .highlight_symbol("▶ ");

    let mut state = TableState::default();
    if !nodes.is_empty() {
        state.select(Some(selected_visual_index));
    }

    frame.render_stateful_widget(table, area, &mut state);
}

fn format_header(name: &str, col: SortColumn, app: &App) -> Span<'static> {
    if app.sort_column == col {
        let arrow = if app.sort_ascending { "↑" } else { "↓" };
        Span::raw(format!("{}{}", name, arrow))
    } else {
        Span::raw(name.to_string())
    }
}

/// Sort nodes by the given column and direction.
pub fn sort_sources_by(nodes: &mut [&Source], column: SortColumn, ascending: bool) {
    nodes.sort_by(|a, b| {
        let primary = match column {
            SortColumn::Name => compare_ids(&a.id, &b.id),
            SortColumn::Status => status_rank(a.status()).cmp(&status_rank(b.status())),
            // most recent first when ascending
            SortColumn::LastSeen => b.liveness.last_seen_at.cmp(&a.liveness.last_seen_at),
        };

        let primary = if ascending {
            primary
        } else {
            primary.reverse()
        };

        // Secondary sort by id for stability when primary values are equal
        if primary == Ordering::Equal {
            compare_ids(&a.id, &b.id)
        } else {
            primary
        }
    });
}

fn status_rank(status: LivenessStatus) -> u8 {
    match status {
        LivenessStatus::Online { .. } => 0,
        LivenessStatus::SeenNotLive { .. } => 1,
        LivenessStatus::Offline { .. } => 2,
        LivenessStatus::NeverConnected => 3,
    }
}

/// Order ids so that "source2" sorts before "source10".
fn compare_ids(a: &str, b: &str) -> Ordering {
    let split = |s: &str| {
        let digits = s.len() - s.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        let (stem, num) = s.split_at(s.len() - digits);
        (stem.to_string(), num.parse::<u64>().ok())
    };
    split(a).cmp(&split(b)).then_with(|| a.cmp(b))
}
