//! IL and native code listing panes
//!
//! Both listings are plain text produced by the inspector. Highlighting is
//! line-based: comments, directives, labels and the mnemonic column each get
//! their own colour.

use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

fn highlight_listing_line(line: &str) -> Line<'_> {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];

    if trimmed.starts_with("//") || trimmed.starts_with(';') {
        return Line::from(Span::styled(line, Style::default().fg(DEFAULT_THEME.comment)));
    }
    if trimmed.starts_with('.') || trimmed.starts_with('{') || trimmed.starts_with('}') {
        return Line::from(Span::styled(line, Style::default().fg(DEFAULT_THEME.keyword)));
    }

    // "IL_0004: ldc.i8 1" or "L_0004:" or "name:"
    if let Some((label, rest)) = trimmed.split_once(':') {
        if !label.contains(' ') {
            let mut spans = vec![
                Span::raw(indent),
                Span::styled(label, Style::default().fg(DEFAULT_THEME.label)),
                Span::raw(":"),
            ];
            spans.extend(instruction_spans(rest));
            return Line::from(spans);
        }
    }

    let mut spans = vec![Span::raw(indent)];
    spans.extend(instruction_spans(trimmed));
    Line::from(spans)
}

fn instruction_spans(text: &str) -> Vec<Span<'_>> {
    let body = text.trim_start();
    let lead = &text[..text.len() - body.len()];
    if body.is_empty() {
        return vec![Span::raw(text)];
    }

    let (code, comment) = match body.find(" ;").or_else(|| body.find(" //")) {
        Some(at) => (&body[..at], &body[at..]),
        None => (body, ""),
    };
    let (mnemonic, operands) = code.split_once(' ').unwrap_or((code, ""));

    let mut spans = vec![
        Span::raw(lead),
        Span::styled(
            mnemonic,
            Style::default()
                .fg(DEFAULT_THEME.function)
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if !operands.is_empty() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(operands, Style::default().fg(DEFAULT_THEME.fg)));
    }
    if !comment.is_empty() {
        spans.push(Span::styled(comment, Style::default().fg(DEFAULT_THEME.comment)));
    }
    spans
}

/// Render a listing with the given title
pub fn render_listing_pane(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    text: &str,
    is_focused: bool,
    scroll_offset: &mut usize,
) {
    let block = super::pane_block(title, is_focused);
    let lines: Vec<&str> = text.lines().collect();
    let visible_height = area.height.saturating_sub(2).max(1) as usize;
    super::clamp_scroll(scroll_offset, lines.len(), visible_height);

    let visible: Vec<Line> = lines
        .iter()
        .skip(*scroll_offset)
        .take(visible_height)
        .map(|line| highlight_listing_line(line))
        .collect();

    frame.render_widget(Paragraph::new(visible).block(block), area);
}
