//! Theme configuration for the TUI.
//!
//! Supports light and dark themes with automatic terminal detection.

use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::block::BorderType;

use crate::data::{AggregateStatus, LivenessStatus};
use crate::session::TransportStatus;

/// Color and style theme for the TUI.
///
/// Use [`Theme::auto_detect()`] for automatic theme selection based on
/// terminal background, or [`Theme::dark()`]/[`Theme::light()`] explicitly.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Accent color for highlights and active elements.
    pub highlight: Color,
    /// Color for sources known only from replayed deliveries, and sensor faults.
    pub warning: Color,
    /// Color for offline sources and transport errors.
    pub offline: Color,
    /// Color for online sources.
    pub online: Color,
    /// Color for borders and separators.
    pub border: Color,
    /// Style for header rows in tables.
    pub header: Style,
    /// Style for selected/highlighted rows.
    pub selected: Style,
    /// Style for the active tab.
    pub tab_active: Style,
    /// Style for inactive tabs.
    pub tab_inactive: Style,
    /// Border style (rounded, plain, etc.).
    pub border_type: BorderType,
}

impl Theme {
    /// Create a dark theme suitable for dark terminal backgrounds.
    pub fn dark() -> Self {
        Self {
            highlight: Color::Cyan,
            warning: Color::Yellow,
            offline: Color::Red,
            online: Color::Green,
            border: Color::Gray,
            header: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD),
            tab_active: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            tab_inactive: Style::default().fg(Color::Gray),
            border_type: BorderType::Rounded,
        }
    }

    /// Create a light theme suitable for light terminal backgrounds.
    pub fn light() -> Self {
        Self {
            highlight: Color::Blue,
            warning: Color::Yellow,
            offline: Color::Red,
            online: Color::Green,
            border: Color::DarkGray,
            header: Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::LightBlue).add_modifier(Modifier::BOLD),
            tab_active: Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            tab_inactive: Style::default().fg(Color::DarkGray),
            border_type: BorderType::Rounded,
        }
    }

    /// Auto-detect based on terminal background
    pub fn auto_detect() -> Self {
        // Use terminal-light crate to detect background luminance
        match terminal_light::luma() {
            Ok(luma) if luma > 0.5 => Self::light(),
            _ => Self::dark(),
        }
    }

    /// Get style for a source liveness status
    pub fn liveness_style(&self, status: LivenessStatus) -> Style {
        match status {
            LivenessStatus::Online { .. } => Style::default().fg(self.online),
            LivenessStatus::SeenNotLive { .. } => Style::default().fg(self.warning),
            LivenessStatus::Offline { .. } => {
                Style::default().fg(self.offline).add_modifier(Modifier::BOLD)
            }
            LivenessStatus::NeverConnected => Style::default().add_modifier(Modifier::DIM),
        }
    }

    /// Get style for the aggregate status
    pub fn aggregate_style(&self, status: AggregateStatus) -> Style {
        match status {
            AggregateStatus::Averaging { .. } => Style::default().fg(self.online),
            AggregateStatus::NoActiveSources => Style::default().fg(self.offline),
            AggregateStatus::NoSourcesSeen => Style::default().add_modifier(Modifier::DIM),
        }
    }

    /// Get style for the transport indicator
    pub fn transport_style(&self, status: &TransportStatus) -> Style {
        match status {
            TransportStatus::Connected { .. } => Style::default().fg(self.online),
            TransportStatus::Connecting => Style::default().fg(self.warning),
            TransportStatus::Error { .. } | TransportStatus::Closed { .. } => {
                Style::default().fg(self.offline).add_modifier(Modifier::BOLD)
            }
        }
    }
}
