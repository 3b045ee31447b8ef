//! One live chart per sensor.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
};

use crate::app::SensorPanel;
use crate::ui::{theme, util};

pub fn draw_sensor_chart(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    panel: &SensorPanel,
    index: usize,
    selected: bool,
    recording: bool,
) {
    let sensor = &panel.sensor;
    let now = panel
        .plot
        .last_value()
        .map(util::fmt_value)
        .unwrap_or_else(|| "--".into());
    let mut title = vec![Span::styled(
        format!(" {} ({}) now: {now} ", sensor.name(), sensor.units()),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if !sensor.is_attached() {
        title.push(Span::styled("[detached] ", Style::default().fg(theme::MUTED)));
    }
    if sensor.calibration().is_some() {
        title.push(Span::raw("[cal] "));
    }
    if recording {
        let (tag, color) = if panel.include {
            ("[rec] ", theme::RECORDING)
        } else {
            ("[excluded] ", theme::MUTED)
        };
        title.push(Span::styled(tag, Style::default().fg(color)));
    }
    if panel.alarm.enabled {
        let limits = format!(
            "[alarm {}..{}] ",
            util::fmt_value(panel.alarm.low),
            util::fmt_value(panel.alarm.high)
        );
        let style = if panel.latch.is_tripped() {
            Style::default()
                .fg(theme::ALARM)
                .add_modifier(Modifier::BOLD | Modifier::SLOW_BLINK)
        } else {
            Style::default()
        };
        title.push(Span::styled(limits, style));
    }

    let border = if panel.latch.is_tripped() {
        Style::default().fg(theme::ALARM)
    } else if selected {
        Style::default().fg(theme::SELECTED)
    } else {
        Style::default()
    };

    let data = Dataset::default()
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(theme::trace_color(index)))
        .data(&panel.plot.points);

    let chart = Chart::new(vec![data])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(Line::from(title)),
        )
        .x_axis(
            Axis::default()
                .title("s")
                .style(Style::default().fg(theme::AXIS))
                .bounds(panel.plot.x_bounds)
                .labels(util::axis_labels(panel.plot.x_bounds)),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(theme::AXIS))
                .bounds(panel.plot.y_bounds)
                .labels(util::axis_labels(panel.plot.y_bounds)),
        );
    f.render_widget(chart, area);
}
