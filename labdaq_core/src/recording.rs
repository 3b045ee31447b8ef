//! Recording files: one header comment line, then `name \t,\t time \t,\t value \t`
//! rows, one per sample. Also reads them back for offline inspection.

use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::RecordingError;

pub const HEADER: &str = "# Channel name (units) \t,\t Time (S) \t,\t Sensor value ()";

pub fn format_row(name: &str, time: f64, value: f64) -> String {
    format!("{name}\t,\t{time}\t,\t{value}\t\n")
}

/// `dir/run.csv` started at 09-03-2024 14:05:07 → `dir/run__09-03-2024__14-05-07__.csv`
pub fn recording_path(base: &Path, started: DateTime<Local>) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".into());
    let ext = base
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".into());
    let stamp = started.format("%d-%m-%Y__%H-%M-%S");
    base.with_file_name(format!("{stem}__{stamp}__.{ext}"))
}

/// `DD:HH:MM:SS`
pub fn format_countdown(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{:02}:{:02}:{:02}:{:02}",
        secs / 86_400,
        secs / 3600 % 24,
        secs / 60 % 60,
        secs % 60
    )
}

pub struct Recorder {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl Recorder {
    pub fn create(path: &Path) -> Result<Self, RecordingError> {
        let io_err = |source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
        writeln!(out, "{HEADER}").map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            rows: 0,
        })
    }

    pub fn write_rows(
        &mut self,
        name: &str,
        times: &[f64],
        values: &[f64],
    ) -> Result<usize, RecordingError> {
        for (t, v) in times.iter().zip(values) {
            self.out
                .write_all(format_row(name, *t, *v).as_bytes())
                .map_err(|source| RecordingError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        let n = times.len().min(values.len());
        self.rows += n as u64;
        Ok(n)
    }

    pub fn flush(&mut self) -> Result<(), RecordingError> {
        self.out.flush().map_err(|source| RecordingError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// An active recording: the open file plus the optional duration countdown.
pub struct RecordingSession {
    recorder: Recorder,
    started: DateTime<Local>,
    duration: Option<Duration>,
}

impl RecordingSession {
    pub fn start(
        base: &Path,
        started: DateTime<Local>,
        duration: Option<Duration>,
    ) -> Result<Self, RecordingError> {
        let path = recording_path(base, started);
        let recorder = Recorder::create(&path)?;
        info!(path = %path.display(), ?duration, "recording started");
        Ok(Self {
            recorder,
            started,
            // a zero duration means "until stopped"
            duration: duration.filter(|d| !d.is_zero()),
        })
    }

    /// Writes the rows of one sensor's pull, unless that sensor is excluded.
    pub fn record(
        &mut self,
        name: &str,
        include: bool,
        times: &[f64],
        values: &[f64],
    ) -> Result<usize, RecordingError> {
        if !include {
            return Ok(0);
        }
        self.recorder.write_rows(name, times, values)
    }

    fn elapsed(&self, now: DateTime<Local>) -> Duration {
        (now - self.started).to_std().unwrap_or_default()
    }

    pub fn remaining(&self, now: DateTime<Local>) -> Option<Duration> {
        self.duration
            .map(|d| d.saturating_sub(self.elapsed(now)))
    }

    pub fn expired(&self, now: DateTime<Local>) -> bool {
        self.duration.is_some_and(|d| self.elapsed(now) >= d)
    }

    pub fn path(&self) -> &Path {
        self.recorder.path()
    }

    pub fn rows(&self) -> u64 {
        self.recorder.rows()
    }

    pub fn flush(&mut self) -> Result<(), RecordingError> {
        self.recorder.flush()
    }

    pub fn finish(mut self) -> Result<PathBuf, RecordingError> {
        self.recorder.flush()?;
        info!(
            path = %self.recorder.path().display(),
            rows = self.recorder.rows(),
            "recording stopped"
        );
        Ok(self.recorder.path().to_path_buf())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredSeries {
    pub name: String,
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl StoredSeries {
    /// Mean of the values whose time lies strictly between `x1` and `x2`.
    pub fn average_in(&self, x1: f64, x2: f64) -> Option<f64> {
        let (lo, hi) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (sum, n) = self
            .times
            .iter()
            .zip(&self.values)
            .filter(|(t, _)| **t > lo && **t < hi)
            .fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// A recording file grouped by channel, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredData {
    pub series: Vec<StoredSeries>,
}

impl StoredData {
    pub fn parse(text: &str) -> Result<Self, RecordingError> {
        let mut data = StoredData::default();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || RecordingError::Malformed {
                line_no: i + 1,
                line: raw.to_string(),
            };
            let mut fields = line.split(',').map(str::trim);
            let (Some(name), Some(t), Some(v)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(malformed());
            };
            let t: f64 = t.parse().map_err(|_| malformed())?;
            let v: f64 = v.parse().map_err(|_| malformed())?;
            let idx = match data.series.iter().position(|s| s.name == name) {
                Some(idx) => idx,
                None => {
                    data.series.push(StoredSeries {
                        name: name.to_string(),
                        ..Default::default()
                    });
                    data.series.len() - 1
                }
            };
            data.series[idx].times.push(t);
            data.series[idx].values.push(v);
        }
        Ok(data)
    }

    pub fn get(&self, name: &str) -> Option<&StoredSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

pub fn read_recording(path: &Path) -> Result<StoredData, RecordingError> {
    let text = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    StoredData::parse(&text)
}

/// Writes the rows of `series` with `x1 <= time <= x2` to a new file, no header.
pub fn write_selection(
    path: &Path,
    series: &[&StoredSeries],
    x1: f64,
    x2: f64,
) -> Result<usize, RecordingError> {
    let io_err = |source| RecordingError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    let mut n = 0;
    for s in series {
        for (t, v) in s.times.iter().zip(&s.values) {
            if *t >= x1 && *t <= x2 {
                out.write_all(format_row(&s.name, *t, *v).as_bytes())
                    .map_err(io_err)?;
                n += 1;
            }
        }
    }
    out.flush().map_err(io_err)?;
    Ok(n)
}
