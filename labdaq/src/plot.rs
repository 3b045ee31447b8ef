//! Owned chart series: the points the UI draws plus the axis bounds to draw them in.

use labdaq_core::window::WindowView;

#[derive(Debug, Clone, PartialEq)]
pub struct PlotSeries {
    pub points: Vec<(f64, f64)>,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
}

impl PlotSeries {
    pub fn new(span: f64) -> Self {
        Self {
            points: Vec::new(),
            x_bounds: [0.0, span.max(f64::EPSILON)],
            y_bounds: [-1.0, 1.0],
        }
    }

    /// Replaces the points with the sensor's current window.
    pub fn update_from_window(
        &mut self,
        view: &WindowView<'_>,
        x_range: Option<(f64, f64)>,
        y_range: Option<(f64, f64)>,
    ) {
        self.points.clear();
        self.points.extend(view.points());
        self.fit_bounds(x_range, y_range);
    }

    pub fn set_points(&mut self, points: Vec<(f64, f64)>, y_range: Option<(f64, f64)>) {
        self.points = points;
        self.fit_bounds(None, y_range);
    }

    fn fit_bounds(&mut self, x_range: Option<(f64, f64)>, y_range: Option<(f64, f64)>) {
        if let Some((lo, hi)) = x_range {
            self.x_bounds = [lo, hi];
        }
        self.y_bounds = match y_range {
            Some((lo, hi)) => [lo, hi],
            None => auto_bounds(self.points.iter().map(|p| p.1)).unwrap_or(self.y_bounds),
        };
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().map(|p| p.1)
    }
}

/// Min..max of `values` with 10% headroom; a flat line gets a unit band.
pub fn auto_bounds(values: impl IntoIterator<Item = f64>) -> Option<[f64; 2]> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
    let pad = if hi > lo { (hi - lo) * 0.1 } else { 0.5 };
    Some([lo - pad, hi + pad])
}
