//! Runtime options shared by the dashboard and the headless recorder.

use std::path::PathBuf;
use std::time::Duration;

use crate::rigs::RigEntry;

pub const DEFAULT_TICK_MS: u64 = 45;
pub const DEFAULT_OUTPUT: &str = "labdaq.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub rig_name: String,
    /// Recording base path; see `labdaq_core::recording::recording_path`.
    pub output: PathBuf,
    pub duration: Option<Duration>,
    pub calibration: Option<PathBuf>,
    pub alarm_command: Option<String>,
    pub tick: Duration,
}

impl RunOptions {
    /// Command-line values win over the rig's.
    pub fn for_rig(
        rig_name: impl Into<String>,
        entry: &RigEntry,
        output: Option<PathBuf>,
        duration: Option<Duration>,
        calibration: Option<PathBuf>,
    ) -> Self {
        Self {
            rig_name: rig_name.into(),
            output: output
                .or_else(|| entry.output.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            duration,
            calibration,
            alarm_command: entry.alarm_command.clone(),
            tick: tick_interval(std::env::var("LABDAQ_TICK_MS").ok().as_deref()),
        }
    }
}

pub fn tick_interval(env: Option<&str>) -> Duration {
    let ms = env
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_TICK_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_env_parsing() {
        assert_eq!(tick_interval(None), Duration::from_millis(45));
        assert_eq!(tick_interval(Some("100")), Duration::from_millis(100));
        assert_eq!(tick_interval(Some("0")), Duration::from_millis(45));
        assert_eq!(tick_interval(Some("fast")), Duration::from_millis(45));
    }

    #[test]
    fn cli_output_overrides_rig() {
        let entry = RigEntry {
            output: Some("rig.csv".into()),
            alarm_command: Some("true".into()),
            ..Default::default()
        };
        let o = RunOptions::for_rig("bench", &entry, None, None, None);
        assert_eq!(o.output, PathBuf::from("rig.csv"));
        assert_eq!(o.alarm_command.as_deref(), Some("true"));
        let o = RunOptions::for_rig("bench", &entry, Some("cli.csv".into()), None, None);
        assert_eq!(o.output, PathBuf::from("cli.csv"));
        let o = RunOptions::for_rig("bench", &RigEntry::default(), None, None, None);
        assert_eq!(o.output, PathBuf::from(DEFAULT_OUTPUT));
    }
}
