//! Sensor facade: one queue, one rolling window and one calibration switch per
//! channel, fed by a pluggable source and drained by the consumer tick.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::calibration::{Affine, CalibrationSwitch};
use crate::clock::Clock;
use crate::error::{CalibrationError, ChannelError, SensorError};
use crate::queue::SampleQueue;
use crate::source::SampleSource;
use crate::types::{Sample, SensorSpec};
use crate::window::{nominal_capacity, RollingWindow, WindowView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Created,
    Attaching,
    Attached,
    Detached,
}

impl SensorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SensorState::Created,
            1 => SensorState::Attaching,
            2 => SensorState::Attached,
            _ => SensorState::Detached,
        }
    }
}

// Everything the producer thread touches.
struct Shared {
    name: String,
    queue: SampleQueue,
    calibration: CalibrationSwitch,
    // f64 bits of the current window start; stamps `relative_time`
    window_start: AtomicU64,
    state: AtomicU8,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn state(&self) -> SensorState {
        SensorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: SensorState) {
        self.state.store(s as u8, Ordering::Release);
    }
}

/// Producer-side handle given to a source. Cheap to clone; safe to call from any
/// thread, but calls for one sensor are expected to arrive in order.
#[derive(Clone)]
pub struct SampleSink {
    shared: Arc<Shared>,
}

impl SampleSink {
    /// Records one raw reading. Ignored unless the sensor is attached.
    pub fn on_sample(&self, raw: f64) {
        let sh = &self.shared;
        if sh.state() != SensorState::Attached {
            return;
        }
        let now = sh.clock.now();
        let start = f64::from_bits(sh.window_start.load(Ordering::Acquire));
        sh.queue.push(Sample {
            value: sh.calibration.apply(raw),
            relative_time: now - start,
            absolute_time: now,
        });
    }

    /// Connection lost. Buffered data stays readable; new samples are dropped.
    pub fn on_detach(&self) {
        let prev = self.shared.state.swap(SensorState::Detached as u8, Ordering::AcqRel);
        if SensorState::from_u8(prev) != SensorState::Detached {
            info!("***** {} detached *****", self.shared.name);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.shared.state() == SensorState::Attached
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Result of one [`Sensor::pull`].
#[derive(Debug, Clone, PartialEq)]
pub struct Pulled<'a> {
    /// Absolute timestamps of the samples drained by this pull, one per sample.
    pub new_times: Vec<f64>,
    pub new_values: Vec<f64>,
    /// Current plot window (relative times).
    pub window: WindowView<'a>,
}

impl Pulled<'_> {
    pub fn has_new(&self) -> bool {
        !self.new_values.is_empty()
    }
}

pub struct Sensor {
    shared: Arc<Shared>,
    window: RollingWindow,
    refresh_period: f64,
    spec: SensorSpec,
    units: String,
    source: Option<Box<dyn SampleSource>>,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("kind", &self.spec.kind)
            .field("window_index", &self.window.index())
            .finish()
    }
}

impl Sensor {
    pub fn new(name: impl Into<String>, spec: SensorSpec, clock: Arc<dyn Clock>) -> Self {
        let name = name.into();
        if spec.data_interval_ms % 8 != 0 {
            warn!(
                sensor = %name,
                interval_ms = spec.data_interval_ms,
                "data interval is not a multiple of 8 ms; the device will round it"
            );
        }
        let now = clock.now();
        let nominal = nominal_capacity(spec.refresh_period_s, spec.data_interval_ms);
        let units = spec.kind.default_units().to_string();
        Self {
            shared: Arc::new(Shared {
                name,
                queue: SampleQueue::new(),
                calibration: CalibrationSwitch::new(),
                window_start: AtomicU64::new(now.to_bits()),
                state: AtomicU8::new(SensorState::Created as u8),
                clock,
            }),
            window: RollingWindow::new(nominal, now),
            refresh_period: spec.refresh_period_s,
            spec,
            units,
            source: None,
        }
    }

    /// Opens `source`, waiting at most the kind's attach timeout, then starts it.
    /// A sensor attaches once; after a failure or detach build a new one.
    pub fn attach(&mut self, mut source: Box<dyn SampleSource>) -> Result<(), SensorError> {
        let name = self.shared.name.clone();
        if self.state() != SensorState::Created {
            return Err(SensorError::AlreadyUsed { name });
        }
        self.shared.set_state(SensorState::Attaching);
        let timeout = self.spec.kind.attach_timeout();
        let info = match source.open(&self.spec, timeout) {
            Ok(info) => info,
            Err(e) => {
                self.shared.set_state(SensorState::Detached);
                warn!(sensor = %name, error = %e, "attach failed");
                return Err(match e {
                    ChannelError::Timeout => SensorError::AttachmentTimeout { name, timeout },
                    other => SensorError::Channel {
                        name,
                        source: other,
                    },
                });
            }
        };
        if let Some(u) = info.units {
            self.units = u;
        }
        self.reset_window(self.shared.clock.now());
        self.shared.set_state(SensorState::Attached);
        info!("***** {} Sensor Attached *****", name);
        if let Err(e) = source.start(self.sink()) {
            self.shared.set_state(SensorState::Detached);
            source.stop();
            return Err(SensorError::Channel { name, source: e });
        }
        self.source = Some(source);
        Ok(())
    }

    /// Operator-initiated close. Same observable effect as a hardware detach.
    pub fn detach(&mut self) {
        if let Some(mut src) = self.source.take() {
            src.stop();
        }
        self.sink().on_detach();
    }

    pub fn sink(&self) -> SampleSink {
        SampleSink {
            shared: Arc::clone(&self.shared),
        }
    }

    fn reset_window(&mut self, now: f64) {
        self.window.reset(now);
        self.shared.window_start.store(now.to_bits(), Ordering::Release);
    }

    /// Drains the queue into the window and returns what arrived plus the window.
    ///
    /// The refresh check runs after each appended sample; when it fires the window
    /// restarts at the current time and the rest of the batch lands in the new one.
    pub fn pull(&mut self) -> Pulled<'_> {
        let drained = self.shared.queue.drain();
        let mut new_times = Vec::with_capacity(drained.len());
        let mut new_values = Vec::with_capacity(drained.len());
        for s in drained {
            self.window.append(s.relative_time, s.value);
            new_times.push(s.absolute_time);
            new_values.push(s.value);
            let now = self.shared.clock.now();
            if self.window.elapsed(now) > self.refresh_period {
                debug!(sensor = %self.shared.name, points = self.window.index(), "window reset");
                self.reset_window(now);
            }
        }
        Pulled {
            new_times,
            new_values,
            window: self.window.current_view(),
        }
    }

    pub fn set_calibration(&self, gradient: f64, intercept: f64) -> Result<Affine, CalibrationError> {
        let a = self.shared.calibration.set(gradient, intercept)?;
        info!(sensor = %self.shared.name, gradient, intercept, "calibration active");
        Ok(a)
    }

    pub fn clear_calibration(&self) {
        self.shared.calibration.clear();
    }

    pub fn calibration(&self) -> Option<Affine> {
        self.shared.calibration.current()
    }

    pub fn state(&self) -> SensorState {
        self.shared.state()
    }

    pub fn is_attached(&self) -> bool {
        self.state() == SensorState::Attached
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn spec(&self) -> &SensorSpec {
        &self.spec
    }

    pub fn refresh_period(&self) -> f64 {
        self.refresh_period
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        if let Some(mut src) = self.source.take() {
            src.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::source::manual::ManualChannel;
    use crate::source::HardwareSource;
    use crate::types::SensorKind;

    fn attached(refresh: f64) -> (Sensor, Arc<ManualClock>, crate::source::manual::ManualHandle) {
        let clock = Arc::new(ManualClock::new(1000.0));
        let mut spec = SensorSpec::new(SensorKind::Strain { channel: 0 });
        spec.refresh_period_s = refresh;
        spec.data_interval_ms = 8;
        let mut s = Sensor::new("cell", spec, clock.clone());
        let (chan, handle) = ManualChannel::new();
        s.attach(Box::new(HardwareSource::new(chan))).unwrap();
        (s, clock, handle)
    }

    #[test]
    fn samples_before_attach_are_ignored() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut s = Sensor::new("x", SensorSpec::new(SensorKind::IrTemperature), clock);
        s.sink().on_sample(1.0);
        assert_eq!(s.state(), SensorState::Created);
        assert!(!s.pull().has_new());
    }

    #[test]
    fn end_to_end_calibrated_values() {
        let (mut s, clock, h) = attached(10.0);
        s.set_calibration(2.0, 0.5).unwrap();
        for raw in [1.0, 2.0, 3.0] {
            clock.advance(0.1);
            h.emit(raw);
        }
        let p = s.pull();
        assert_eq!(p.new_values, vec![2.5, 4.5, 6.5]);
        assert_eq!(p.window.values, &[2.5, 4.5, 6.5]);
        assert_eq!(s.window().index(), 3);
    }

    #[test]
    fn reset_boundary_splits_batch() {
        let (mut s, clock, h) = attached(1.0);
        let start = s.window().window_start();
        clock.set(start + 0.5);
        h.emit(10.0); // A
        clock.set(start + 1.2);
        h.emit(20.0); // B
        let p = s.pull();
        assert_eq!(p.new_values, vec![10.0, 20.0]);
        assert_eq!(p.window.values, &[20.0]);
        assert_eq!(s.window().index(), 1);
        assert_eq!(s.window().window_start(), start + 1.2);
    }

    #[test]
    fn relative_time_tracks_window_start() {
        let (mut s, clock, h) = attached(1.0);
        let start = s.window().window_start();
        clock.set(start + 0.25);
        h.emit(1.0);
        let p = s.pull();
        assert!((p.window.times[0] - 0.25).abs() < 1e-9);
        assert!((p.new_times[0] - (start + 0.25)).abs() < 1e-9);

        // cross the boundary; next sample is stamped against the new start
        clock.set(start + 1.5);
        h.emit(2.0);
        s.pull();
        clock.advance(0.1);
        h.emit(3.0);
        let p = s.pull();
        assert!((p.window.times[0] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_pull_is_idempotent() {
        let (mut s, clock, h) = attached(10.0);
        clock.advance(0.1);
        h.emit(5.0);
        s.pull();
        let snapshot = |s: &mut Sensor| {
            let p = s.pull();
            (p.new_values.clone(), p.window.times.to_vec(), p.window.values.to_vec())
        };
        let a = snapshot(&mut s);
        let b = snapshot(&mut s);
        assert!(a.0.is_empty());
        assert_eq!(a, b);
        assert_eq!(a.2, vec![5.0]);
    }

    #[test]
    fn calibration_is_not_retroactive() {
        let (mut s, clock, h) = attached(10.0);
        clock.advance(0.1);
        h.emit(1.0);
        s.set_calibration(10.0, 0.0).unwrap();
        clock.advance(0.1);
        h.emit(1.0);
        s.clear_calibration();
        clock.advance(0.1);
        h.emit(1.0);
        assert_eq!(s.pull().new_values, vec![1.0, 10.0, 1.0]);
    }

    #[test]
    fn detach_keeps_buffered_data() {
        let (mut s, clock, h) = attached(10.0);
        clock.advance(0.1);
        h.emit(1.0);
        h.detach();
        h.emit(2.0);
        assert_eq!(s.state(), SensorState::Detached);
        let p = s.pull();
        assert_eq!(p.new_values, vec![1.0]);
        assert_eq!(p.window.values, &[1.0]);
    }

    #[test]
    fn attach_timeout_is_fatal_and_not_retried() {
        let clock = Arc::new(ManualClock::new(0.0));
        let mut s = Sensor::new(
            "ir",
            SensorSpec::new(SensorKind::IrTemperature),
            clock,
        );
        let (chan, _h) = ManualChannel::never_attaches();
        let err = s.attach(Box::new(HardwareSource::new(chan))).unwrap_err();
        assert!(matches!(err, SensorError::AttachmentTimeout { .. }));
        assert_eq!(s.state(), SensorState::Detached);

        let (chan, _h) = ManualChannel::new();
        assert!(matches!(
            s.attach(Box::new(HardwareSource::new(chan))),
            Err(SensorError::AlreadyUsed { .. })
        ));
    }
}
