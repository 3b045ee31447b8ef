//! Top header with rig name and recording state.

use chrono::{DateTime, Local};
use labdaq_core::recording::{format_countdown, RecordingSession};
use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders},
};

use crate::ui::{theme, util::truncate_middle};

pub fn draw_header(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    rig: &str,
    sensors: usize,
    rec: Option<&RecordingSession>,
    now: DateTime<Local>,
) {
    let mut spans = vec![Span::raw(format!("labdaq | rig: {rig} | sensors: {sensors} | "))];
    match rec {
        Some(r) => {
            let file = r
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut text = format!("REC {} ({} rows)", truncate_middle(&file, 40), r.rows());
            if let Some(left) = r.remaining(now) {
                text.push_str(&format!(" {}", format_countdown(left)));
            }
            spans.push(Span::styled(
                text,
                Style::default()
                    .fg(theme::RECORDING)
                    .add_modifier(Modifier::BOLD),
            ));
        }
        None => spans.push(Span::styled("not recording", Style::default().fg(theme::MUTED))),
    }
    spans.push(Span::raw("  (press 'q' to quit)"));
    f.render_widget(
        Block::default()
            .title(Line::from(spans))
            .borders(Borders::BOTTOM),
        area,
    );
}
