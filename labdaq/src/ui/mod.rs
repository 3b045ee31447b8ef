//! UI module root: drawing functions for the dashboard panels.

pub mod calibration;
pub mod chart;
pub mod header;
pub mod status;
pub mod theme;
pub mod util;
