//! Sample and sensor description types shared by the pipeline and the dashboard.
//! `SensorSpec` is the on-disk rig format, so keep field names stable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::alarm::Alarm;

/// One reading as it leaves the producer callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: f64,
    // seconds since the window start that was current when the sample was produced
    pub relative_time: f64,
    // wall clock, seconds since the unix epoch
    pub absolute_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermocoupleType {
    J,
    K,
    E,
    T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorKind {
    /// Load cell on a bridge input. The only kind the dashboard calibrates.
    Strain { channel: u8 },
    Thermocouple {
        channel: u8,
        thermocouple: ThermocoupleType,
    },
    IrTemperature,
    VoltageRatio { channel: u8, sensor_type: String },
    /// Sine wave generator, no device needed.
    Simulated { omega: f64 },
}

impl SensorKind {
    pub fn channel(&self) -> u8 {
        match self {
            SensorKind::Strain { channel }
            | SensorKind::Thermocouple { channel, .. }
            | SensorKind::VoltageRatio { channel, .. } => *channel,
            SensorKind::IrTemperature | SensorKind::Simulated { .. } => 0,
        }
    }

    // IR sensors take noticeably longer to enumerate than the bridge/thermocouple boards.
    pub fn attach_timeout(&self) -> Duration {
        match self {
            SensorKind::IrTemperature => Duration::from_millis(5000),
            SensorKind::Simulated { .. } => Duration::ZERO,
            _ => Duration::from_millis(100),
        }
    }

    /// Units known before attachment. Voltage-ratio inputs report theirs from the channel.
    pub fn default_units(&self) -> &'static str {
        match self {
            SensorKind::Strain { .. } => "Kg",
            SensorKind::Thermocouple { .. } => "degrees C",
            SensorKind::IrTemperature => "Degrees C",
            SensorKind::VoltageRatio { .. } => "",
            SensorKind::Simulated { .. } => "N/A",
        }
    }

    pub fn is_calibratable(&self) -> bool {
        matches!(self, SensorKind::Strain { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Strain { .. } => "strain",
            SensorKind::Thermocouple { .. } => "thermocouple",
            SensorKind::IrTemperature => "ir-temperature",
            SensorKind::VoltageRatio { .. } => "voltage-ratio",
            SensorKind::Simulated { .. } => "simulated",
        }
    }
}

fn default_data_interval_ms() -> u32 {
    200
}

fn default_refresh_period_s() -> f64 {
    15.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub device_serial: i32,
    /// Nominal delay between samples. The vendor boards only honour multiples of 8.
    #[serde(default = "default_data_interval_ms")]
    pub data_interval_ms: u32,
    /// Span of the live plot before it wraps.
    #[serde(default = "default_refresh_period_s")]
    pub refresh_period_s: f64,
    pub kind: SensorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<Alarm>,
}

impl SensorSpec {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            name: None,
            device_serial: 0,
            data_interval_ms: default_data_interval_ms(),
            refresh_period_s: default_refresh_period_s(),
            kind,
            x_range: None,
            y_range: None,
            alarm: None,
        }
    }

    pub fn data_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.data_interval_ms.max(1)))
    }
}

/// Hands out "Sensor N" names for specs that don't carry one.
/// Owned by whoever builds a rig so numbering restarts per rig.
#[derive(Debug, Default)]
pub struct SensorNamer {
    count: usize,
}

impl SensorNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_for(&mut self, spec: &SensorSpec) -> String {
        self.count += 1;
        match &spec.name {
            Some(n) if !n.trim().is_empty() => n.clone(),
            _ => format!("Sensor {}", self.count),
        }
    }
}
