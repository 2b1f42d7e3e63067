//! Application state and navigation logic.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::data::Source;
use crate::session::Dashboard;
use crate::source::FeedSource;
use crate::ui::nodes::{sort_sources_by, SortColumn};
use crate::ui::Theme;

/// Default file written by the export key.
pub const DEFAULT_EXPORT_PATH: &str = "nodewatch_export.json";

/// The current view/tab in the TUI.
///
/// Node detail is shown as an overlay (controlled by `App::show_detail_overlay`)
/// rather than as a separate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Every sensor node with liveness and latest readings.
    Nodes,
    /// Running averages over the active nodes.
    Average,
}

impl View {
    /// Cycle to the next view.
    pub fn next(self) -> Self {
        match self {
            View::Nodes => View::Average,
            View::Average => View::Nodes,
        }
    }

    /// Cycle to the previous view. With two views this is the same as `next`.
    pub fn prev(self) -> Self {
        self.next()
    }

    /// Returns the display label for this view.
    pub fn label(&self) -> &'static str {
        match self {
            View::Nodes => "Nodes",
            View::Average => "Average",
        }
    }
}

/// Main application state.
pub struct App {
    pub running: bool,
    pub current_view: View,
    pub show_help: bool,
    pub show_detail_overlay: bool,

    // Feed and session
    source: Box<dyn FeedSource>,
    pub dashboard: Dashboard,
    /// Time of the last pump, used as "now" while rendering.
    pub now: u64,

    // Navigation state
    pub selected_index: usize,

    // Sorting (Nodes view)
    pub sort_column: SortColumn,
    pub sort_ascending: bool,

    // Search/filter
    pub filter_text: String,
    pub filter_active: bool,

    // UI
    pub theme: Theme,
    pub export_path: PathBuf,

    // Status message (temporary feedback)
    pub status_message: Option<(String, Instant)>,
}

impl App {
    /// Create a new App reading from `source` into `dashboard`.
    pub fn new(source: Box<dyn FeedSource>, dashboard: Dashboard) -> Self {
        Self::with_theme(source, dashboard, Theme::auto_detect())
    }

    /// Create a new App with an explicit theme.
    pub fn with_theme(source: Box<dyn FeedSource>, dashboard: Dashboard, theme: Theme) -> Self {
        Self {
            running: true,
            current_view: View::Nodes,
            show_help: false,
            show_detail_overlay: false,
            source,
            dashboard,
            now: 0,
            selected_index: 0,
            sort_column: SortColumn::default(),
            sort_ascending: true,
            filter_text: String::new(),
            filter_active: false,
            theme,
            export_path: PathBuf::from(DEFAULT_EXPORT_PATH),
            status_message: None,
        }
    }

    /// Returns a description of the current feed source.
    pub fn source_description(&self) -> &str {
        self.source.description()
    }

    /// Set a temporary status message that will be shown for a few seconds.
    pub fn set_status_message(&mut self, message: String) {
        self.status_message = Some((message, Instant::now()));
    }

    /// Get the current status message if it hasn't expired (3 seconds).
    pub fn get_status_message(&self) -> Option<&str> {
        if let Some((msg, time)) = &self.status_message {
            if time.elapsed() < Duration::from_secs(3) {
                return Some(msg);
            }
        }
        None
    }

    /// Apply pending feed events and due timers.
    ///
    /// Returns the number of feed events applied.
    pub fn pump(&mut self, now: u64) -> usize {
        self.now = now;
        let applied = self.dashboard.drain(self.source.as_mut(), now);
        self.dashboard.tick(now);

        let count = self.visible_nodes().len();
        if self.selected_index >= count {
            self.selected_index = count.saturating_sub(1);
        }
        applied
    }

    /// Switch to the next view.
    pub fn next_view(&mut self) {
        self.current_view = self.current_view.next();
    }

    /// Switch to the previous view.
    pub fn prev_view(&mut self) {
        self.current_view = self.current_view.prev();
    }

    /// Switch to a specific view.
    pub fn set_view(&mut self, view: View) {
        self.current_view = view;
    }

    /// Nodes after filtering and sorting, in display order.
    pub fn visible_nodes(&self) -> Vec<&Source> {
        let mut nodes: Vec<&Source> = self
            .dashboard
            .visible_sources()
            .into_iter()
            .filter(|s| self.matches_filter(&s.id))
            .collect();
        sort_sources_by(&mut nodes, self.sort_column, self.sort_ascending);
        nodes
    }

    /// The node under the cursor.
    pub fn selected_node(&self) -> Option<&Source> {
        self.visible_nodes().get(self.selected_index).copied()
    }

    /// Move selection down by one item.
    pub fn select_next(&mut self) {
        self.select_next_n(1);
    }

    /// Move selection up by one item.
    pub fn select_prev(&mut self) {
        self.select_prev_n(1);
    }

    /// Move selection down by n items.
    pub fn select_next_n(&mut self, n: usize) {
        if self.current_view != View::Nodes {
            return;
        }
        let max = self.visible_nodes().len().saturating_sub(1);
        self.selected_index = (self.selected_index + n).min(max);
    }

    /// Move selection up by n items.
    pub fn select_prev_n(&mut self, n: usize) {
        if self.current_view != View::Nodes {
            return;
        }
        self.selected_index = self.selected_index.saturating_sub(n);
    }

    /// Jump to the first item in the list.
    pub fn select_first(&mut self) {
        self.selected_index = 0;
    }

    /// Jump to the last item in the list.
    pub fn select_last(&mut self) {
        self.selected_index = self.visible_nodes().len().saturating_sub(1);
    }

    /// Open the detail overlay for the currently selected node.
    pub fn enter_detail(&mut self) {
        if self.current_view == View::Nodes && self.selected_node().is_some() {
            self.show_detail_overlay = true;
        }
    }

    /// Navigate back: close overlay first, then go to Nodes.
    pub fn go_back(&mut self) {
        if self.show_detail_overlay {
            self.show_detail_overlay = false;
            return;
        }
        self.current_view = View::Nodes;
    }

    /// Close the detail overlay if open.
    pub fn close_overlay(&mut self) {
        self.show_detail_overlay = false;
    }

    /// Toggle the help overlay.
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// Cycle to the next sort column.
    pub fn cycle_sort(&mut self) {
        self.sort_column = self.sort_column.next();
    }

    /// Toggle sort direction between ascending and descending.
    pub fn toggle_sort_direction(&mut self) {
        self.sort_ascending = !self.sort_ascending;
    }

    /// Enter filter input mode (starts capturing keystrokes for search).
    pub fn start_filter(&mut self) {
        self.filter_active = true;
    }

    /// Exit filter input mode without clearing the filter text.
    pub fn cancel_filter(&mut self) {
        self.filter_active = false;
    }

    /// Clear the filter text and exit filter mode.
    pub fn clear_filter(&mut self) {
        self.filter_text.clear();
        self.filter_active = false;
    }

    /// Append a character to the filter text.
    pub fn filter_push(&mut self, c: char) {
        self.filter_text.push(c);
        self.selected_index = 0;
    }

    /// Remove the last character from the filter text.
    pub fn filter_pop(&mut self) {
        self.filter_text.pop();
    }

    /// Check if a node id matches the current filter.
    pub fn matches_filter(&self, id: &str) -> bool {
        if self.filter_text.is_empty() {
            return true;
        }
        id.to_lowercase().contains(&self.filter_text.to_lowercase())
    }

    /// Forget every node, the averages and the saved session.
    pub fn clear_cache(&mut self) {
        self.dashboard.clear();
        self.selected_index = 0;
        self.show_detail_overlay = false;
        self.set_status_message("Cleared cached session".to_string());
    }

    /// Signal the application to quit.
    pub fn quit(&mut self) {
        self.running = false;
    }

    /// Export current state to a file.
    pub fn export_state(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.dashboard.export_json(self.now))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardConfig;
    use crate::source::{ChannelSource, FeedEvent, FeedMessage};
    use tokio::sync::mpsc::UnboundedSender;

    fn app() -> (UnboundedSender<FeedEvent>, App) {
        let (tx, source) = ChannelSource::create("test");
        let mut dashboard = Dashboard::new(DashboardConfig::default());
        dashboard.start(0);
        (tx, App::with_theme(Box::new(source), dashboard, Theme::dark()))
    }

    fn send(tx: &UnboundedSender<FeedEvent>, id: &str, payload: &str) {
        let topic = format!("{}/telemetry", id);
        tx.send(FeedEvent::Message(FeedMessage::new(topic, payload.as_bytes().to_vec(), false)))
            .unwrap();
    }

    #[test]
    fn test_view_cycle() {
        assert_eq!(View::Nodes.next(), View::Average);
        assert_eq!(View::Average.prev(), View::Nodes);
        assert_eq!(View::Average.label(), "Average");
    }

    #[test]
    fn test_pump_applies_events() {
        let (tx, mut app) = app();
        send(&tx, "source2", r#"{"lux": 1}"#);
        send(&tx, "source3", r#"{"lux": 2}"#);
        assert_eq!(app.pump(100), 2);
        assert_eq!(app.now, 100);
        assert_eq!(app.visible_nodes().len(), 2);
    }

    #[test]
    fn test_battery_monitor_hidden_from_node_list() {
        let (tx, mut app) = app();
        send(&tx, "source1", r#"{"voltage": 12.1}"#);
        send(&tx, "source2", r#"{"lux": 1}"#);
        app.pump(0);
        let ids: Vec<&str> = app.visible_nodes().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["source2"]);
    }

    #[test]
    fn test_selection_clamped_and_filtered() {
        let (tx, mut app) = app();
        for id in ["source2", "source3", "source12"] {
            send(&tx, id, r#"{"lux": 1}"#);
        }
        app.pump(0);

        app.select_next_n(10);
        assert_eq!(app.selected_index, 2);
        assert_eq!(app.selected_node().unwrap().id, "source12");

        app.start_filter();
        app.filter_push('3');
        assert_eq!(app.visible_nodes().len(), 1);
        assert_eq!(app.selected_node().unwrap().id, "source3");
    }

    #[test]
    fn test_detail_overlay_requires_selection() {
        let (tx, mut app) = app();
        app.enter_detail();
        assert!(!app.show_detail_overlay);

        send(&tx, "source2", r#"{"lux": 1}"#);
        app.pump(0);
        app.enter_detail();
        assert!(app.show_detail_overlay);
        app.go_back();
        assert!(!app.show_detail_overlay);
    }

    #[test]
    fn test_export_state_writes_json() {
        let (tx, mut app) = app();
        send(&tx, "source2", r#"{"lux": 7}"#);
        app.pump(50);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        app.export_state(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["exportedAt"], 50);
        assert_eq!(value["sources"][0]["id"], "source2");
    }

    #[test]
    fn test_clear_cache() {
        let (tx, mut app) = app();
        send(&tx, "source2", r#"{"lux": 7}"#);
        app.pump(0);
        app.clear_cache();
        assert!(app.visible_nodes().is_empty());
        assert!(app.get_status_message().is_some());
    }
}
