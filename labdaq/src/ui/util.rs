//! Small UI helpers: number formatting, axis labels, truncation.

use ratatui::text::Span;

/// Readings span load cells (kg) to bridge voltages (~1e-4 V/V): keep 4
/// significant digits either way.
pub fn fmt_value(v: f64) -> String {
    if !v.is_finite() {
        return "--".into();
    }
    let a = v.abs();
    if a != 0.0 && !(1e-3..1e5).contains(&a) {
        format!("{v:.3e}")
    } else if a >= 100.0 {
        format!("{v:.1}")
    } else {
        format!("{v:.4}")
    }
}

pub fn axis_labels(bounds: [f64; 2]) -> Vec<Span<'static>> {
    let mid = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], mid, bounds[1]]
        .into_iter()
        .map(|v| Span::raw(fmt_value(v)))
        .collect()
}

pub fn truncate_middle(s: &str, max: usize) -> String {
    let n = s.chars().count();
    if n <= max {
        return s.to_string();
    }
    if max <= 3 {
        return "...".into();
    }
    let keep = max - 3;
    let left: String = s.chars().take(keep / 2).collect();
    let right: String = s.chars().skip(n - (keep - keep / 2)).collect();
    format!("{left}...{right}")
}
