//! Terminal rendering with ratatui.
//!
//! - [`common`]: header, tabs, status bar and help overlay
//! - [`nodes`]: the node table
//! - [`average`]: the aggregate view
//! - [`detail`]: the node detail overlay
//! - [`theme`]: light/dark colors

pub mod average;
pub mod common;
pub mod detail;
pub mod nodes;
pub mod theme;

pub use theme::Theme;

/// Sparkline characters (8 levels of height).
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render 0-7 levels as sparkline characters, padded to `width`.
pub fn render_sparkline(levels: &[u8], width: usize) -> String {
    let mut line: String = levels
        .iter()
        .map(|&v| SPARKLINE_CHARS[v.min(7) as usize])
        .collect();
    let used = levels.len().min(width);
    line.extend(std::iter::repeat(' ').take(width - used));
    line
}
