//! Rolling plot window: every sample since the last wall-clock reset.
//!
//! Backing arrays are sized from `refresh_period / data_interval` and reused across
//! resets; only the prefix below `index` is meaningful. Producers running faster than
//! their nominal interval make the arrays grow one slot at a time within a window.

/// Backing storage beyond this multiple of the nominal size is released on reset.
const RETAIN_FACTOR: usize = 4;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    times: Vec<f64>,
    values: Vec<f64>,
    index: usize,
    window_start: f64,
    nominal: usize,
}

/// Valid prefix of a window. Borrowed: copy it before handing it to anything that
/// outlives the next `append`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowView<'a> {
    pub times: &'a [f64],
    pub values: &'a [f64],
}

impl<'a> WindowView<'a> {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + 'a {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// Number of slots a window needs for one refresh period at the nominal rate.
pub fn nominal_capacity(refresh_period_s: f64, data_interval_ms: u32) -> usize {
    let interval = f64::from(data_interval_ms.max(1));
    let slots = (refresh_period_s * 1000.0 / interval).round();
    if slots.is_finite() && slots >= 1.0 {
        slots as usize
    } else {
        1
    }
}

impl RollingWindow {
    pub fn new(nominal: usize, now: f64) -> Self {
        let nominal = nominal.max(1);
        Self {
            times: vec![0.0; nominal],
            values: vec![0.0; nominal],
            index: 0,
            window_start: now,
            nominal,
        }
    }

    pub fn reset(&mut self, now: f64) {
        self.index = 0;
        self.window_start = now;
        if self.times.len() > self.nominal * RETAIN_FACTOR {
            self.times.truncate(self.nominal);
            self.values.truncate(self.nominal);
            self.times.shrink_to_fit();
            self.values.shrink_to_fit();
        }
    }

    pub fn append(&mut self, time: f64, value: f64) {
        if self.index >= self.times.len() {
            self.times.push(0.0);
            self.values.push(0.0);
        }
        self.times[self.index] = time;
        self.values[self.index] = value;
        self.index += 1;
    }

    pub fn current_view(&self) -> WindowView<'_> {
        WindowView {
            times: &self.times[..self.index],
            values: &self.values[..self.index],
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn window_start(&self) -> f64 {
        self.window_start
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        now - self.window_start
    }

    /// Length of the backing arrays, including stale slots past `index`.
    pub fn capacity(&self) -> usize {
        self.times.len()
    }

    pub fn nominal_capacity(&self) -> usize {
        self.nominal
    }
}
