//! Offline look at a finished recording: per-channel averages over a time range,
//! optionally saving the selected rows to a new file.

use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use labdaq_core::recording::{read_recording, write_selection, StoredData, StoredSeries};

use crate::ui::util::fmt_value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectRequest {
    pub file: PathBuf,
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub save_selection: Option<PathBuf>,
}

impl InspectRequest {
    /// Selected time range; an open end reaches the edge of the recording.
    pub fn range(&self) -> (f64, f64) {
        let lo = self.from.unwrap_or(f64::NEG_INFINITY);
        let hi = self.to.unwrap_or(f64::INFINITY);
        if lo <= hi {
            (lo, hi)
        } else {
            (hi, lo)
        }
    }
}

/// One line per channel: `name: N samples, t a..b, mean M`.
pub fn summarize(data: &StoredData, (lo, hi): (f64, f64)) -> Vec<String> {
    data.series
        .iter()
        .map(|s| {
            let selected = s.times.iter().filter(|t| **t >= lo && **t <= hi).count();
            let span = match (s.times.first(), s.times.last()) {
                (Some(a), Some(b)) => format!("t {}..{}", fmt_value(*a), fmt_value(*b)),
                _ => "empty".into(),
            };
            let mean = s
                .average_in(lo, hi)
                .map(fmt_value)
                .unwrap_or_else(|| "--".into());
            format!("{}: {} samples ({selected} selected), {span}, mean {mean}", s.name, s.len())
        })
        .collect()
}

pub fn run(req: &InspectRequest, out: &mut impl Write) -> anyhow::Result<()> {
    let data = read_recording(&req.file)
        .with_context(|| format!("reading recording {}", req.file.display()))?;
    let range = req.range();
    writeln!(out, "recording: {}", req.file.display())?;
    for line in summarize(&data, range) {
        writeln!(out, "  {line}")?;
    }
    if let Some(dest) = &req.save_selection {
        let series: Vec<&StoredSeries> = data.series.iter().collect();
        let rows = write_selection(dest, &series, range.0, range.1)
            .with_context(|| format!("saving selection to {}", dest.display()))?;
        info!(path = %dest.display(), rows, "selection saved");
        writeln!(out, "saved {rows} rows to {}", dest.display())?;
    }
    Ok(())
}
