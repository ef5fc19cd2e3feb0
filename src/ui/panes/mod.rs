//! TUI pane rendering modules
//!
//! # Pane Modules
//!
//! - [`source`]: the script with syntax highlighting and the fault line
//! - [`listing`]: IL and native code listings
//! - [`chart`]: per-generation heap sizes over the run, with GC markers
//! - [`log`]: engine notifications and script output
//! - [`status`]: build selection, run state and keybindings
//!
//! Each pane module exports a `render_*` function that takes the frame, its
//! area and the data to show. Scroll offsets are owned by the app and clamped
//! here against the content height.

pub mod chart;
pub mod listing;
pub mod log;
pub mod source;
pub mod status;

pub use chart::render_chart_pane;
pub use listing::render_listing_pane;
pub use log::render_log_pane;
pub use source::render_source_pane;
pub use status::{render_status_bar, StatusRenderData};

use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    style::{Modifier, Style},
    widgets::{Block, Borders},
};

/// Bordered block with the focus colour applied
pub(crate) fn pane_block(title: &str, is_focused: bool) -> Block<'_> {
    let border_style = if is_focused {
        Style::default()
            .fg(DEFAULT_THEME.border_focused)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(DEFAULT_THEME.border_normal)
    };

    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style)
}

/// Clamp only when the content is taller than the viewport. `usize::MAX`
/// therefore means "stick to the bottom".
pub(crate) fn clamp_scroll(offset: &mut usize, total: usize, visible: usize) {
    if total > visible {
        *offset = (*offset).min(total - visible);
    } else {
        *offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_scroll() {
        let mut offset = usize::MAX;
        clamp_scroll(&mut offset, 50, 10);
        assert_eq!(offset, 40);

        let mut offset = 7;
        clamp_scroll(&mut offset, 5, 10);
        assert_eq!(offset, 0);
    }
}
