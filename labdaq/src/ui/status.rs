//! Bottom status line: last message on the left, key help on the right.

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::Style,
    text::Span,
    widgets::Paragraph,
};

use crate::ui::theme;

const HELP: &str = "Tab select  r rec  i include  a alarm  c calibrate  l load cal  q quit";
const HELP_CAL: &str =
    "+/- mass  [/] move region  {/} resize  p add  x remove  s save  Enter apply  Esc close";

pub fn draw_status(f: &mut ratatui::Frame<'_>, area: Rect, message: &str, calibrating: bool) {
    let help = if calibrating { HELP_CAL } else { HELP };
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(help.len() as u16)])
        .split(area);
    f.render_widget(Paragraph::new(message.to_string()), cols[0]);
    f.render_widget(
        Paragraph::new(Span::styled(help, Style::default().fg(theme::MUTED))).alignment(Alignment::Right),
        cols[1],
    );
}
