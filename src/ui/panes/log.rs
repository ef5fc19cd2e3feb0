//! Log pane rendering

use crate::log::{LogKind, LogMessage};
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{List, ListItem, Padding, Paragraph},
    Frame,
};

fn kind_style(kind: LogKind) -> Style {
    match kind {
        LogKind::RunStarted | LogKind::RunEnded => Style::default()
            .fg(DEFAULT_THEME.primary)
            .add_modifier(Modifier::BOLD),
        LogKind::Warning => Style::default().fg(DEFAULT_THEME.secondary),
        LogKind::Output => Style::default().fg(DEFAULT_THEME.success),
        LogKind::Info => Style::default().fg(DEFAULT_THEME.comment),
    }
}

/// Render engine notifications, oldest first
pub fn render_log_pane(
    frame: &mut Frame,
    area: Rect,
    messages: &[LogMessage],
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = super::pane_block(" Log ", is_focused);

    if messages.is_empty() {
        let paragraph = Paragraph::new("(press r to run)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let block = block.padding(Padding::new(1, 0, 0, 0));
    let visible_height = area.height.saturating_sub(2).max(1) as usize;
    super::clamp_scroll(scroll_offset, messages.len(), visible_height);

    let items: Vec<ListItem> = messages
        .iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .map(|message| {
            let style = kind_style(message.kind);
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<5} ", message.kind), style),
                Span::styled(message.text.as_str(), Style::default().fg(DEFAULT_THEME.fg)),
            ]))
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}
