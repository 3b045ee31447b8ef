//! Load-cell calibration workflow: collect (mass, voltage) points against a live
//! trace, fit `mass = gradient * voltage + intercept` by least squares.

use std::collections::VecDeque;
use tracing::info;

use crate::calibration::Affine;
use crate::error::CalibrationError;
use crate::sensor::Sensor;

/// Ordinary least squares over `(voltage, mass)` pairs.
/// `None` with fewer than two points or when every voltage is identical.
pub fn fit_line(points: &[(f64, f64)]) -> Option<Affine> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
        let dx = x - mx;
        (sxx + dx * dx, sxy + dx * (y - my))
    });
    if sxx <= f64::EPSILON * n {
        return None;
    }
    let gradient = sxy / sxx;
    Affine::new(gradient, my - gradient * mx).ok()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub mass: f64,
    pub voltage: f64,
}

/// Default averaging region on the calibration trace, seconds from its left edge.
pub const DEFAULT_REGION: (f64, f64) = (5.0, 10.0);
pub const MIN_REGION_WIDTH: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    sensor_name: String,
    span: f64,
    region: (f64, f64),
    // absolute time, raw value
    trace: VecDeque<(f64, f64)>,
    current_mean: Option<f64>,
    points: Vec<CalibrationPoint>,
}

impl CalibrationSession {
    /// Switches `sensor` to raw output so the trace shows uncalibrated voltages.
    pub fn begin(sensor: &Sensor) -> Self {
        sensor.clear_calibration();
        info!(sensor = sensor.name(), "calibration session started");
        Self {
            sensor_name: sensor.name().to_string(),
            span: sensor.refresh_period(),
            region: DEFAULT_REGION,
            trace: VecDeque::new(),
            current_mean: None,
            points: Vec::new(),
        }
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    pub fn region(&self) -> (f64, f64) {
        self.region
    }

    /// Moves the averaging region, kept inside `0..=span` and at least
    /// [`MIN_REGION_WIDTH`] wide, and recomputes the mean over it.
    pub fn set_region(&mut self, lo: f64, hi: f64) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let width = (hi - lo).clamp(MIN_REGION_WIDTH.min(self.span), self.span);
        let lo = lo.clamp(0.0, self.span - width);
        self.region = (lo, lo + width);
        self.refresh_mean();
    }

    /// Slides the region by `dx` seconds, keeping its width.
    pub fn shift_region(&mut self, dx: f64) {
        let (lo, hi) = self.region;
        self.set_region(lo + dx, hi + dx);
    }

    /// Grows (or with a negative `dw`, shrinks) the region's right edge.
    pub fn resize_region(&mut self, dw: f64) {
        let (lo, hi) = self.region;
        self.set_region(lo, (hi + dw).max(lo + MIN_REGION_WIDTH));
    }

    /// Feeds freshly pulled samples (absolute times) into the trace and refreshes
    /// the mean over the highlighted region.
    pub fn observe(&mut self, times: &[f64], values: &[f64]) {
        for (&t, &v) in times.iter().zip(values) {
            while let Some(&(t0, _)) = self.trace.front() {
                if t - t0 >= self.span {
                    self.trace.pop_front();
                } else {
                    break;
                }
            }
            self.trace.push_back((t, v));
        }
        self.refresh_mean();
    }

    // Mean of the trace strictly inside the region; none until the trace reaches it.
    fn refresh_mean(&mut self) {
        let (Some(&(t0, _)), Some(&(t_last, _))) = (self.trace.front(), self.trace.back()) else {
            return;
        };
        let (lo, hi) = self.region;
        if t_last - t0 < lo {
            self.current_mean = None;
            return;
        }
        let (sum, n) = self
            .trace
            .iter()
            .map(|&(t, v)| (t - t0, v))
            .filter(|&(x, _)| x > lo && x < hi)
            .fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        self.current_mean = (n > 0).then(|| sum / n as f64);
    }

    /// Trace relative to its oldest point, ready for plotting.
    pub fn trace_points(&self) -> Vec<(f64, f64)> {
        let t0 = self.trace.front().map(|p| p.0).unwrap_or(0.0);
        self.trace.iter().map(|&(t, v)| (t - t0, v)).collect()
    }

    pub fn current_mean(&self) -> Option<f64> {
        self.current_mean
    }

    /// Pairs `mass` with the current region mean. Nothing is added until a mean exists.
    pub fn add_point(&mut self, mass: f64) -> Option<CalibrationPoint> {
        let voltage = self.current_mean?;
        let p = CalibrationPoint { mass, voltage };
        self.points.push(p);
        Some(p)
    }

    pub fn remove_last(&mut self) -> Option<CalibrationPoint> {
        self.points.pop()
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn fit(&self) -> Option<Affine> {
        let pairs: Vec<(f64, f64)> = self.points.iter().map(|p| (p.voltage, p.mass)).collect();
        fit_line(&pairs)
    }

    /// Installs the fitted line on `sensor`.
    pub fn apply(&self, sensor: &Sensor) -> Result<Affine, CalibrationError> {
        let fit = self.fit().ok_or(CalibrationError::Empty)?;
        sensor.set_calibration(fit.gradient, fit.intercept)?;
        info!(
            sensor = sensor.name(),
            gradient = fit.gradient,
            intercept = fit.intercept,
            "calibration applied"
        );
        Ok(fit)
    }
}
