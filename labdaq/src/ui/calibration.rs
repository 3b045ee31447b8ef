//! Calibration panel: raw trace with the averaging region, collected points and
//! the current fit.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
};

use crate::app::CalibrationPanel;
use crate::ui::{theme, util::fmt_value};

pub fn draw_calibration(f: &mut ratatui::Frame<'_>, area: Rect, cal: &CalibrationPanel) {
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Min(6)])
        .split(area);
    draw_trace(f, parts[0], cal);
    draw_points(f, parts[1], cal);
}

fn draw_trace(f: &mut ratatui::Frame<'_>, area: Rect, cal: &CalibrationPanel) {
    let (lo, hi) = cal.session.region();
    let [y0, y1] = cal.trace.y_bounds;
    let left = [(lo, y0), (lo, y1)];
    let right = [(hi, y0), (hi, y1)];
    let region_style = Style::default().fg(theme::REGION);
    let datasets = vec![
        Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(theme::TRACE_RAW))
            .data(&cal.trace.points),
        Dataset::default()
            .graph_type(GraphType::Line)
            .style(region_style)
            .data(&left),
        Dataset::default()
            .graph_type(GraphType::Line)
            .style(region_style)
            .data(&right),
    ];
    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Calibrating {} (raw) ", cal.session.sensor_name())),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(theme::AXIS))
                .bounds(cal.trace.x_bounds)
                .labels(crate::ui::util::axis_labels(cal.trace.x_bounds)),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(theme::AXIS))
                .bounds(cal.trace.y_bounds)
                .labels(crate::ui::util::axis_labels(cal.trace.y_bounds)),
        );
    f.render_widget(chart, area);
}

fn draw_points(f: &mut ratatui::Frame<'_>, area: Rect, cal: &CalibrationPanel) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let (lo, hi) = cal.session.region();
    let mean = cal
        .session
        .current_mean()
        .map(fmt_value)
        .unwrap_or_else(|| "waiting for data".into());
    let mut lines = vec![
        Line::from(vec![
            Span::styled("mass: ", bold),
            Span::raw(format!("{:.2} Kg   ", cal.mass)),
            Span::styled("region: ", bold),
            Span::raw(format!("{lo:.1}..{hi:.1} s   ")),
            Span::styled("mean: ", bold),
            Span::raw(mean),
        ]),
        Line::from(""),
    ];
    if cal.session.points().is_empty() {
        lines.push(Line::from(Span::styled(
            "no points yet: set a mass, wait for the trace to settle, press 'p'",
            Style::default().fg(theme::MUTED),
        )));
    }
    for (i, p) in cal.session.points().iter().enumerate() {
        lines.push(Line::from(format!(
            "{:>2}. {:>8.3} Kg  @ {}",
            i + 1,
            p.mass,
            fmt_value(p.voltage)
        )));
    }
    lines.push(Line::from(""));
    lines.push(match cal.session.fit() {
        Some(fit) => Line::from(vec![
            Span::styled("fit: ", bold),
            Span::raw(format!(
                "mass = {} * v + {}",
                fmt_value(fit.gradient),
                fmt_value(fit.intercept)
            )),
        ]),
        None => Line::from(Span::styled(
            "fit needs two points at different voltages",
            Style::default().fg(theme::MUTED),
        )),
    });
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Points ")),
        area,
    );
}
