//! Shared UI colors.

use ratatui::style::Color;

pub const TRACE: Color = Color::Cyan;
pub const TRACE_RAW: Color = Color::Magenta;
pub const SELECTED: Color = Color::Yellow;
pub const ALARM: Color = Color::Red;
pub const RECORDING: Color = Color::LightRed;
pub const REGION: Color = Color::Green;
pub const AXIS: Color = Color::DarkGray;
pub const MUTED: Color = Color::Gray;

/// Rotates through trace colors so neighbouring charts stay distinguishable.
pub const PALETTE: [Color; 4] = [TRACE, Color::LightBlue, Color::LightGreen, Color::LightMagenta];

pub fn trace_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}
