//! Affine calibration: the runtime switch read by producer callbacks and the `.cal`
//! file format it is persisted in.

use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::error::CalibrationError;

/// `calibrated = raw * gradient + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub gradient: f64,
    pub intercept: f64,
}

impl Affine {
    pub fn new(gradient: f64, intercept: f64) -> Result<Self, CalibrationError> {
        if !gradient.is_finite() || !intercept.is_finite() {
            return Err(CalibrationError::NonFinite {
                gradient,
                intercept,
            });
        }
        Ok(Self {
            gradient,
            intercept,
        })
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.gradient + self.intercept
    }
}

// One published calibration. `seq` is odd while a writer is filling it in.
#[derive(Debug)]
struct Slot {
    seq: AtomicU64,
    gradient: AtomicU64,
    intercept: AtomicU64,
    active: AtomicBool,
}

impl Slot {
    fn passthrough() -> Self {
        Self {
            seq: AtomicU64::new(0),
            gradient: AtomicU64::new(1.0f64.to_bits()),
            intercept: AtomicU64::new(0.0f64.to_bits()),
            active: AtomicBool::new(false),
        }
    }
}

/// Calibration state shared between the operator side (writer) and the device
/// callback (reader). Two slots: writers fill the one readers are not pointed at,
/// then flip `current`. A reader that catches a half-written slot only ever got
/// there through a stale index and picks up the finished slot on its retry, so it
/// never waits on a writer that was preempted mid-update.
#[derive(Debug)]
pub struct CalibrationSwitch {
    slots: [Slot; 2],
    current: AtomicUsize,
    // one writer at a time, so only the inactive slot is ever written
    writer: Mutex<()>,
}

impl Default for CalibrationSwitch {
    fn default() -> Self {
        Self {
            slots: [Slot::passthrough(), Slot::passthrough()],
            current: AtomicUsize::new(0),
            writer: Mutex::new(()),
        }
    }
}

impl CalibrationSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, gradient: f64, intercept: f64, active: bool) {
        let _w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next = 1 - self.current.load(Ordering::Relaxed);
        let slot = &self.slots[next];
        let s = slot.seq.load(Ordering::Relaxed);
        slot.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        slot.gradient.store(gradient.to_bits(), Ordering::Relaxed);
        slot.intercept.store(intercept.to_bits(), Ordering::Relaxed);
        slot.active.store(active, Ordering::Relaxed);
        slot.seq.store(s.wrapping_add(2), Ordering::Release);
        self.current.store(next, Ordering::Release);
    }

    /// Replaces the transform and turns it on. Non-finite pairs are rejected and the
    /// previous state is left untouched.
    pub fn set(&self, gradient: f64, intercept: f64) -> Result<Affine, CalibrationError> {
        let affine = Affine::new(gradient, intercept)?;
        self.write(affine.gradient, affine.intercept, true);
        debug!(gradient, intercept, "calibration set");
        Ok(affine)
    }

    /// Raw passthrough from the next sample on. Keeps the last coefficients around.
    pub fn clear(&self) {
        let (g, i, _) = self.read();
        self.write(g, i, false);
        debug!("calibration cleared");
    }

    fn read(&self) -> (f64, f64, bool) {
        loop {
            let slot = &self.slots[self.current.load(Ordering::Acquire)];
            let s1 = slot.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let g = slot.gradient.load(Ordering::Relaxed);
            let i = slot.intercept.load(Ordering::Relaxed);
            let a = slot.active.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if slot.seq.load(Ordering::Relaxed) == s1 {
                return (f64::from_bits(g), f64::from_bits(i), a);
            }
        }
    }

    pub fn current(&self) -> Option<Affine> {
        let (gradient, intercept, active) = self.read();
        active.then_some(Affine {
            gradient,
            intercept,
        })
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    pub fn apply(&self, raw: f64) -> f64 {
        match self.current() {
            Some(a) => a.apply(raw),
            None => raw,
        }
    }
}

/// Contents of a `.cal` file: `#` comment lines, then `gradient,intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFile {
    pub gradient: f64,
    pub intercept: f64,
}

impl CalibrationFile {
    pub fn from_affine(a: Affine) -> Self {
        Self {
            gradient: a.gradient,
            intercept: a.intercept,
        }
    }

    pub fn affine(&self) -> Result<Affine, CalibrationError> {
        Affine::new(self.gradient, self.intercept)
    }

    pub fn parse(text: &str) -> Result<Self, CalibrationError> {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .ok_or(CalibrationError::Empty)?;
        let mut parts = line.split(',');
        let (Some(g), Some(i)) = (parts.next(), parts.next()) else {
            return Err(CalibrationError::Malformed(line.to_string()));
        };
        let parse = |s: &str| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| CalibrationError::Malformed(line.to_string()))
        };
        let (gradient, intercept) = (parse(g)?, parse(i)?);
        Affine::new(gradient, intercept)?;
        Ok(Self {
            gradient,
            intercept,
        })
    }

    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn render(&self, performed: DateTime<Local>) -> String {
        format!(
            "#Calibration data for strain sensor\n\
             #Calibration performed on {}\n\
             #Calibration in form mass(Kg) = gradient*voltage(v/v) + intercept\n\
             #Data listed: gradient,intercept\n\
             {} , {}\n",
            performed.format("%d/%m/%Y__%H:%M:%S"),
            self.gradient,
            self.intercept
        )
    }

    pub fn save(&self, path: &Path, performed: DateTime<Local>) -> Result<(), CalibrationError> {
        std::fs::write(path, self.render(performed)).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn switch_starts_as_passthrough() {
        let c = CalibrationSwitch::new();
        assert_eq!(c.current(), None);
        assert_eq!(c.apply(3.0), 3.0);
    }

    #[test]
    fn set_twice_same_as_once() {
        let c = CalibrationSwitch::new();
        c.set(2.0, 0.5).unwrap();
        let once = c.apply(1.0);
        c.set(2.0, 0.5).unwrap();
        assert_eq!(c.apply(1.0), once);
        assert_eq!(once, 2.5);
    }

    #[test]
    fn non_finite_rejected_and_previous_kept() {
        let c = CalibrationSwitch::new();
        c.set(3.0, 1.0).unwrap();
        assert!(matches!(
            c.set(f64::NAN, 0.0),
            Err(CalibrationError::NonFinite { .. })
        ));
        assert!(c.set(1.0, f64::INFINITY).is_err());
        assert_eq!(c.current(), Some(Affine::new(3.0, 1.0).unwrap()));
    }

    #[test]
    fn clear_then_set_again() {
        let c = CalibrationSwitch::new();
        c.set(2.0, 1.0).unwrap();
        c.clear();
        assert!(!c.is_active());
        assert_eq!(c.apply(4.0), 4.0);
        c.set(0.5, 0.0).unwrap();
        assert_eq!(c.apply(4.0), 2.0);
    }

    #[test]
    fn reader_never_sees_mixed_pairs() {
        use std::sync::Arc;
        let c = Arc::new(CalibrationSwitch::new());
        c.set(1.0, 1.0).unwrap();
        let writer = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || {
                for n in 0..5_000 {
                    let v = (n % 7) as f64 + 1.0;
                    c.set(v, v).unwrap();
                }
            })
        };
        for _ in 0..50_000 {
            let a = c.current().unwrap();
            assert_eq!(a.gradient, a.intercept);
        }
        writer.join().unwrap();
    }

    #[test]
    fn stalled_writer_does_not_hold_up_readers() {
        let c = CalibrationSwitch::new();
        c.set(2.0, 3.0).unwrap();
        // a writer preempted halfway through filling the spare slot
        let spare = &c.slots[1 - c.current.load(Ordering::Relaxed)];
        spare.seq.fetch_add(1, Ordering::Relaxed);
        spare.gradient.store(99.0f64.to_bits(), Ordering::Relaxed);

        assert_eq!(c.current(), Some(Affine::new(2.0, 3.0).unwrap()));
        assert_eq!(c.apply(1.0), 5.0);
    }

    #[test]
    fn parse_skips_comments_and_tolerates_spaces() {
        let text = "#Calibration data\n# more\n\n 12.5 , -0.25\n99,99\n";
        let f = CalibrationFile::parse(text).unwrap();
        assert_eq!(f.gradient, 12.5);
        assert_eq!(f.intercept, -0.25);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            CalibrationFile::parse("# only comments\n"),
            Err(CalibrationError::Empty)
        ));
        assert!(matches!(
            CalibrationFile::parse("1.0\n"),
            Err(CalibrationError::Malformed(_))
        ));
        assert!(matches!(
            CalibrationFile::parse("abc, 1\n"),
            Err(CalibrationError::Malformed(_))
        ));
        assert!(matches!(
            CalibrationFile::parse("inf, 1\n"),
            Err(CalibrationError::NonFinite { .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.cal");
        let when = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let f = CalibrationFile {
            gradient: 1234.5,
            intercept: -0.75,
        };
        f.save(&path, when).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("#Calibration performed on 09/03/2024__14:05:07"));
        assert!(text.lines().filter(|l| l.starts_with('#')).count() == 4);
        assert_eq!(CalibrationFile::load(&path).unwrap(), f);
    }
}
