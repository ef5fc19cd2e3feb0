//! Generation size chart
//!
//! ```text
//!   KB
//!    │      ╭──╮ gen0 grows, collection drops it
//!    │   ╭──╯  ╰──╮
//!    │───╯   •    ╰── gen1 picks up survivors
//!    └──────────────────── ms since run start
//! ```
//!
//! One line per generation plus a scatter series marking each collection.

use crate::executor::RunResults;
use crate::instrumentation::DataPoint;
use crate::memory::heap::GENERATIONS;
use crate::ui::theme::DEFAULT_THEME;
use ratatui::{
    layout::Rect,
    style::Style,
    symbols,
    widgets::{Axis, Chart, Dataset, GraphType, Paragraph},
    Frame,
};
use std::time::SystemTime;

/// Chart coordinates: milliseconds since `started`, kilobytes
fn to_series(points: &[DataPoint], started: SystemTime) -> Vec<(f64, f64)> {
    points
        .iter()
        .map(|p| (millis_since(started, p.timestamp), p.value as f64 / 1024.0))
        .collect()
}

fn millis_since(started: SystemTime, at: SystemTime) -> f64 {
    at.duration_since(started).unwrap_or_default().as_secs_f64() * 1000.0
}

fn upper_bound(value: f64) -> f64 {
    if value <= 0.0 {
        1.0
    } else {
        value * 1.1
    }
}

pub fn render_chart_pane(frame: &mut Frame, area: Rect, results: &RunResults, is_focused: bool) {
    let timeline = &results.timeline;
    let title = if timeline.truncated {
        format!(" GC Timeline ({} collections, truncated) ", timeline.events.len())
    } else {
        format!(" GC Timeline ({} collections) ", timeline.events.len())
    };
    let block = super::pane_block(&title, is_focused);

    if timeline.is_empty() {
        let paragraph = Paragraph::new("(no samples yet)")
            .block(block)
            .style(Style::default().fg(DEFAULT_THEME.comment));
        frame.render_widget(paragraph, area);
        return;
    }

    let started = results.report.started;
    let series: Vec<Vec<(f64, f64)>> = (0..GENERATIONS)
        .map(|g| to_series(timeline.generation(g), started))
        .collect();
    let markers: Vec<(f64, f64)> = timeline
        .events
        .iter()
        .map(|e| (millis_since(started, e.timestamp), e.value as f64 / 1024.0))
        .collect();

    let max_x = upper_bound(millis_since(started, results.report.ended).max(
        series
            .iter()
            .flatten()
            .map(|(x, _)| *x)
            .fold(0.0, f64::max),
    ));
    let max_y = upper_bound(timeline.peak() as f64 / 1024.0);

    let mut datasets: Vec<Dataset> = series
        .iter()
        .enumerate()
        .map(|(g, points)| {
            Dataset::default()
                .name(format!("Gen{g}"))
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(DEFAULT_THEME.generations[g]))
                .data(points)
        })
        .collect();
    datasets.push(
        Dataset::default()
            .name("GC")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(DEFAULT_THEME.gc_event))
            .data(&markers),
    );

    let axis_style = Style::default().fg(DEFAULT_THEME.comment);
    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title("ms")
                .style(axis_style)
                .bounds([0.0, max_x])
                .labels(vec!["0".to_string(), format!("{:.0}", max_x)]),
        )
        .y_axis(
            Axis::default()
                .title("KB")
                .style(axis_style)
                .bounds([0.0, max_y])
                .labels(vec!["0".to_string(), format!("{:.1}", max_y)]),
        );

    frame.render_widget(chart, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_series_is_relative_to_start() {
        let started = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let points = vec![
            DataPoint {
                timestamp: started + Duration::from_secs(2),
                value: 2048,
                description: None,
            },
            // Clock skew before the start clamps to zero
            DataPoint {
                timestamp: started - Duration::from_millis(1),
                value: 0,
                description: None,
            },
        ];
        assert_eq!(to_series(&points, started), vec![(2000.0, 2.0), (0.0, 0.0)]);
    }

    #[test]
    fn test_upper_bound_never_zero() {
        assert_eq!(upper_bound(0.0), 1.0);
        assert!(upper_bound(10.0) > 10.0);
    }
}
