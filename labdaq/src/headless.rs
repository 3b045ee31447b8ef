//! Headless recorder: attach, record every sensor until the duration elapses or
//! Ctrl-C, no terminal UI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use labdaq_core::{
    recording::RecordingSession, AlarmLatch, ChannelFactory, Clock, NoHardware, Sensor,
    SystemClock,
};

use crate::app::spawn_alarm_command;
use crate::config::RunOptions;
use crate::rigs::{apply_calibration_file, attach_sensors, RigEntry};

pub async fn run(entry: &RigEntry, opts: &RunOptions) -> anyhow::Result<PathBuf> {
    run_with(entry, opts, &NoHardware, Arc::new(SystemClock), tokio::signal::ctrl_c()).await
}

/// Same as [`run`], with the channel factory, clock and stop signal supplied.
pub async fn run_with<S>(
    entry: &RigEntry,
    opts: &RunOptions,
    factory: &dyn ChannelFactory,
    clock: Arc<dyn Clock>,
    stop: S,
) -> anyhow::Result<PathBuf>
where
    S: std::future::Future,
{
    let (mut sensors, failures) = attach_sensors(entry, factory, clock);
    for e in &failures {
        error!(error = %e, "sensor not attached");
    }
    if sensors.is_empty() {
        bail!("no sensor of rig '{}' attached", opts.rig_name);
    }
    if let Some(path) = &opts.calibration {
        apply_calibration_file(path, &sensors)
            .with_context(|| format!("applying calibration {}", path.display()))?;
    }

    let mut rec = RecordingSession::start(&opts.output, Local::now(), opts.duration)
        .context("starting recording")?;
    let mut latches = vec![AlarmLatch::default(); sensors.len()];
    info!(
        sensors = sensors.len(),
        path = %rec.path().display(),
        "headless recording"
    );

    let mut tick = interval(opts.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                drain(&mut sensors, &mut latches, &mut rec, opts)?;
                if rec.expired(Local::now()) {
                    info!("recording duration reached");
                    break;
                }
                if sensors.iter().all(|s| !s.is_attached() && s.pending() == 0) {
                    warn!("every sensor detached; stopping");
                    break;
                }
            }
            _ = &mut stop => {
                info!("interrupted");
                break;
            }
        }
    }
    drain(&mut sensors, &mut latches, &mut rec, opts)?;
    for s in &mut sensors {
        s.detach();
    }
    Ok(rec.finish()?)
}

fn drain(
    sensors: &mut [Sensor],
    latches: &mut [AlarmLatch],
    rec: &mut RecordingSession,
    opts: &RunOptions,
) -> anyhow::Result<()> {
    for (sensor, latch) in sensors.iter_mut().zip(latches.iter_mut()) {
        let name = sensor.name().to_string();
        let alarm = sensor.spec().alarm.unwrap_or_default();
        let pulled = sensor.pull();
        rec.record(&name, true, &pulled.new_times, &pulled.new_values)?;
        if latch.update(&alarm, &pulled.new_values) {
            let value = pulled.new_values.last().copied().unwrap_or_default();
            warn!(sensor = %name, value, "alarm tripped");
            if let Some(cmd) = &opts.alarm_command {
                spawn_alarm_command(cmd, &name, value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labdaq_core::recording::read_recording;
    use std::time::Duration;

    fn opts(dir: &std::path::Path, duration: Option<Duration>) -> RunOptions {
        RunOptions {
            rig_name: "demo".into(),
            output: dir.join("headless.csv"),
            duration,
            calibration: None,
            alarm_command: None,
            tick: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn records_demo_rig_until_duration() {
        let dir = tempfile::tempdir().unwrap();
        let mut rig = crate::rigs::demo_rig();
        for s in &mut rig.sensors {
            s.data_interval_ms = 8;
        }
        let path = run_with(
            &rig,
            &opts(dir.path(), Some(Duration::from_secs(1))),
            &NoHardware,
            Arc::new(SystemClock),
            std::future::pending::<()>(),
        )
        .await
        .unwrap();
        let data = read_recording(&path).unwrap();
        let names: Vec<&str> = data.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Sensor 1", "Sensor 2"]);
        assert!(data.series.iter().all(|s| !s.is_empty()));
    }

    #[tokio::test]
    async fn stop_signal_ends_open_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = run_with(
            &crate::rigs::demo_rig(),
            &opts(dir.path(), None),
            &NoHardware,
            Arc::new(SystemClock),
            tokio::time::sleep(Duration::from_millis(100)),
        )
        .await
        .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn no_attached_sensor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rig = RigEntry {
            sensors: vec![labdaq_core::SensorSpec::new(labdaq_core::SensorKind::IrTemperature)],
            ..Default::default()
        };
        let err = run_with(
            &rig,
            &opts(dir.path(), None),
            &NoHardware,
            Arc::new(SystemClock),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no sensor"));
    }
}
