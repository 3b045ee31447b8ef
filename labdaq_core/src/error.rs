//! Error types for the acquisition pipeline and its file formats.

use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Failure reported by a hardware channel binding.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("timed out waiting for attachment")]
    Timeout,
    #[error("no hardware binding available for {0} channels")]
    Unavailable(&'static str),
    #[error("{0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{name}: channel did not attach within {timeout:?}")]
    AttachmentTimeout { name: String, timeout: Duration },
    #[error("{name}: {source}")]
    Channel {
        name: String,
        #[source]
        source: ChannelError,
    },
    #[error("{name}: sensor was already attached once; create a new sensor to reattach")]
    AlreadyUsed { name: String },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("calibration must be finite (gradient={gradient}, intercept={intercept})")]
    NonFinite { gradient: f64, intercept: f64 },
    #[error("calibration file has no data line")]
    Empty,
    #[error("malformed calibration line: {0:?}")]
    Malformed(String),
    #[error("calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("line {line_no}: expected `name , time , value`, got {line:?}")]
    Malformed { line_no: usize, line: String },
}
