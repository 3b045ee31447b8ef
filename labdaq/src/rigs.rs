//! Rigs: named sensor setups kept as JSON (rig name -> { sensors, output, alarm_command }).
//! Stored under XDG config dir: $XDG_CONFIG_HOME/labdaq/rigs.json (fallback ~/.config/labdaq/rigs.json)

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

use labdaq_core::{
    build_source, CalibrationError, CalibrationFile, ChannelFactory, Clock, Sensor, SensorError,
    SensorKind, SensorNamer, SensorSpec,
};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RigEntry {
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
    /// Base path for recordings; the start time is spliced into the file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Run through `sh -c` when a sensor alarm trips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RigsFile {
    #[serde(default)]
    pub rigs: BTreeMap<String, RigEntry>,
    #[serde(default)]
    pub version: u32,
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("labdaq")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("labdaq")
    }
}

pub fn rigs_path() -> PathBuf {
    config_dir().join("rigs.json")
}

pub fn load_rigs() -> RigsFile {
    let path = rigs_path();
    match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable rigs file");
            RigsFile::default()
        }),
        Err(_) => RigsFile::default(),
    }
}

pub fn save_rigs(r: &RigsFile) -> std::io::Result<()> {
    let path = rigs_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(r).map_err(std::io::Error::other)?;
    fs::write(path, data)
}

/// Reads a rig definition given on the command line.
pub fn load_rig_file(path: &Path) -> anyhow::Result<RigEntry> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading rig file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing rig file {}", path.display()))
}

pub enum ResolveRig {
    /// Rig given on the command line (maybe saved by the caller under its name)
    Direct(RigEntry),
    /// Loaded from an existing rigs.json entry
    Loaded(RigEntry),
    /// Should prompt the user to pick among saved rig names
    PromptSelect(Vec<String>),
    /// Name given but nothing saved under it and no file to create it from
    Missing(String),
    /// Nothing given and nothing saved
    None,
}

pub struct RigRequest {
    pub rig_name: Option<String>,
    pub rig: Option<RigEntry>,
}

impl RigRequest {
    pub fn resolve(self, rf: &RigsFile) -> ResolveRig {
        match (self.rig_name, self.rig) {
            (_, Some(entry)) => ResolveRig::Direct(entry),
            (Some(name), None) => match rf.rigs.get(&name) {
                Some(entry) => ResolveRig::Loaded(entry.clone()),
                None => ResolveRig::Missing(name),
            },
            (None, None) if rf.rigs.is_empty() => ResolveRig::None,
            (None, None) => ResolveRig::PromptSelect(rf.rigs.keys().cloned().collect()),
        }
    }
}

/// Two sine-wave sensors, no hardware needed.
pub fn demo_rig() -> RigEntry {
    let sine = |omega: f64| {
        let mut spec = SensorSpec::new(SensorKind::Simulated { omega });
        spec.refresh_period_s = 15.0;
        spec
    };
    RigEntry {
        sensors: vec![sine(1.0), sine(2.0)],
        output: None,
        alarm_command: None,
    }
}

/// Builds and attaches every sensor of `entry`. Sensors that fail to attach are
/// reported, not retried; the rest keep running.
pub fn attach_sensors(
    entry: &RigEntry,
    factory: &dyn ChannelFactory,
    clock: Arc<dyn Clock>,
) -> (Vec<Sensor>, Vec<SensorError>) {
    let mut namer = SensorNamer::new();
    let mut sensors = Vec::with_capacity(entry.sensors.len());
    let mut failures = Vec::new();
    for spec in &entry.sensors {
        let name = namer.name_for(spec);
        let mut sensor = Sensor::new(name.clone(), spec.clone(), Arc::clone(&clock));
        let source = match build_source(spec, factory, Arc::clone(&clock)) {
            Ok(s) => s,
            Err(e) => {
                warn!(sensor = %name, error = %e, "no source for sensor");
                failures.push(SensorError::Channel { name, source: e });
                continue;
            }
        };
        match sensor.attach(source) {
            Ok(()) => sensors.push(sensor),
            Err(e) => failures.push(e),
        }
    }
    (sensors, failures)
}

/// Installs the calibration stored at `path` on every calibratable sensor.
pub fn apply_calibration_file<'a>(
    path: &Path,
    sensors: impl IntoIterator<Item = &'a Sensor>,
) -> Result<usize, CalibrationError> {
    let file = CalibrationFile::load(path)?;
    let mut n = 0;
    for s in sensors
        .into_iter()
        .filter(|s| s.spec().kind.is_calibratable())
    {
        s.set_calibration(file.gradient, file.intercept)?;
        n += 1;
    }
    info!(path = %path.display(), sensors = n, "calibration file loaded");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use labdaq_core::{ManualClock, NoHardware, SensorState};

    fn rigs_with(name: &str) -> RigsFile {
        let mut rf = RigsFile::default();
        rf.rigs.insert(name.into(), demo_rig());
        rf
    }

    #[test]
    fn resolve_paths() {
        let rf = rigs_with("bench");
        let req = |name: Option<&str>, rig: Option<RigEntry>| RigRequest {
            rig_name: name.map(String::from),
            rig,
        };
        assert!(matches!(req(Some("bench"), None).resolve(&rf), ResolveRig::Loaded(_)));
        assert!(matches!(
            req(Some("oven"), None).resolve(&rf),
            ResolveRig::Missing(n) if n == "oven"
        ));
        assert!(matches!(
            req(Some("bench"), Some(RigEntry::default())).resolve(&rf),
            ResolveRig::Direct(_)
        ));
        assert!(matches!(req(None, None).resolve(&rf), ResolveRig::PromptSelect(v) if v == ["bench"]));
        assert!(matches!(req(None, None).resolve(&RigsFile::default()), ResolveRig::None));
    }

    #[test]
    fn hardware_kinds_fail_without_binding() {
        let mut rig = demo_rig();
        rig.sensors.push(SensorSpec {
            name: Some("cell".into()),
            ..SensorSpec::new(SensorKind::Strain { channel: 0 })
        });
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        // no runtime here, so the simulated ones fail too
        let (ok, failed) = attach_sensors(&rig, &NoHardware, clock);
        assert!(ok.is_empty());
        assert_eq!(failed.len(), 3);
        assert!(failed[2].to_string().contains("cell"));
    }

    #[tokio::test]
    async fn demo_rig_attaches_two_named_sensors() {
        let clock: Arc<dyn Clock> = Arc::new(labdaq_core::SystemClock);
        let (ok, failed) = attach_sensors(&demo_rig(), &NoHardware, clock);
        assert!(failed.is_empty());
        let names: Vec<&str> = ok.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["Sensor 1", "Sensor 2"]);
        assert!(ok.iter().all(|s| s.state() == SensorState::Attached));
    }

    #[test]
    fn calibration_file_targets_strain_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.cal");
        let file = CalibrationFile {
            gradient: 2.0,
            intercept: 1.0,
        };
        file.save(&path, chrono::Local::now()).unwrap();

        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        let sensors = vec![
            Sensor::new("cell", SensorSpec::new(SensorKind::Strain { channel: 0 }), clock.clone()),
            Sensor::new("ir", SensorSpec::new(SensorKind::IrTemperature), clock),
        ];
        assert_eq!(apply_calibration_file(&path, &sensors).unwrap(), 1);
        assert!(sensors[0].calibration().is_some());
        assert!(sensors[1].calibration().is_none());
    }
}
