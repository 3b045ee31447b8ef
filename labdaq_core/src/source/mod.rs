//! Sample producers. Hardware kinds go through a [`HardwareChannel`] supplied by the
//! vendor binding; simulated sensors generate a sine wave on a timer.

pub mod manual;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::ChannelError;
use crate::sensor::SampleSink;
use crate::types::{SensorKind, SensorSpec, ThermocoupleType};

pub use simulated::SimulatedSource;

/// What a source learned while attaching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachInfo {
    pub units: Option<String>,
}

/// Producer plugged into a [`crate::sensor::Sensor`].
pub trait SampleSource: Send {
    /// Blocks until the device confirms attachment or `timeout` passes.
    fn open(&mut self, spec: &SensorSpec, timeout: Duration) -> Result<AttachInfo, ChannelError>;
    /// Begins delivering samples (and the detach notice) into `sink`.
    fn start(&mut self, sink: SampleSink) -> Result<(), ChannelError>;
    fn stop(&mut self);
}

/// Per-kind channel settings applied right after attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub data_interval_ms: u32,
    pub bridge_gain: Option<u32>,
    pub thermocouple: Option<ThermocoupleType>,
    pub sensor_type: Option<String>,
}

// Load cells on the bridge boards read best at the highest gain.
const STRAIN_BRIDGE_GAIN: u32 = 128;

impl ChannelSetup {
    pub fn for_spec(spec: &SensorSpec) -> Self {
        let mut setup = ChannelSetup {
            data_interval_ms: spec.data_interval_ms,
            bridge_gain: None,
            thermocouple: None,
            sensor_type: None,
        };
        match &spec.kind {
            SensorKind::Strain { .. } => setup.bridge_gain = Some(STRAIN_BRIDGE_GAIN),
            SensorKind::Thermocouple { thermocouple, .. } => {
                setup.thermocouple = Some(*thermocouple)
            }
            SensorKind::VoltageRatio { sensor_type, .. } => {
                setup.sensor_type = Some(sensor_type.clone())
            }
            SensorKind::IrTemperature | SensorKind::Simulated { .. } => {}
        }
        setup
    }
}

/// Boundary to the vendor SDK. Implementations forward the SDK's value-change and
/// detach callbacks into the sink handed to `subscribe`.
pub trait HardwareChannel: Send {
    fn open_wait_for_attachment(
        &mut self,
        device_serial: i32,
        channel: u8,
        timeout: Duration,
    ) -> Result<(), ChannelError>;
    fn configure(&mut self, setup: &ChannelSetup) -> Result<(), ChannelError>;
    /// Unit symbol reported by the device, when it reports one.
    fn units(&self) -> Option<String> {
        None
    }
    fn subscribe(&mut self, sink: SampleSink) -> Result<(), ChannelError>;
    fn close(&mut self);
}

impl<T: HardwareChannel + ?Sized> HardwareChannel for Box<T> {
    fn open_wait_for_attachment(
        &mut self,
        device_serial: i32,
        channel: u8,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        (**self).open_wait_for_attachment(device_serial, channel, timeout)
    }
    fn configure(&mut self, setup: &ChannelSetup) -> Result<(), ChannelError> {
        (**self).configure(setup)
    }
    fn units(&self) -> Option<String> {
        (**self).units()
    }
    fn subscribe(&mut self, sink: SampleSink) -> Result<(), ChannelError> {
        (**self).subscribe(sink)
    }
    fn close(&mut self) {
        (**self).close()
    }
}

/// Strain, thermocouple, IR and voltage-ratio sensors: same pipeline, differing
/// only in the channel and its setup.
pub struct HardwareSource<C> {
    channel: C,
}

impl<C: HardwareChannel> HardwareSource<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: HardwareChannel> SampleSource for HardwareSource<C> {
    fn open(&mut self, spec: &SensorSpec, timeout: Duration) -> Result<AttachInfo, ChannelError> {
        self.channel
            .open_wait_for_attachment(spec.device_serial, spec.kind.channel(), timeout)?;
        self.channel.configure(&ChannelSetup::for_spec(spec))?;
        Ok(AttachInfo {
            units: self.channel.units(),
        })
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), ChannelError> {
        self.channel.subscribe(sink)
    }

    fn stop(&mut self) {
        self.channel.close();
    }
}

/// Opens hardware channels for specs. One per vendor binding.
pub trait ChannelFactory {
    fn channel(&self, spec: &SensorSpec) -> Result<Box<dyn HardwareChannel>, ChannelError>;
}

/// Factory for builds without a vendor binding: every hardware kind fails to attach.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHardware;

impl ChannelFactory for NoHardware {
    fn channel(&self, spec: &SensorSpec) -> Result<Box<dyn HardwareChannel>, ChannelError> {
        Err(ChannelError::Unavailable(spec.kind.label()))
    }
}

pub fn build_source(
    spec: &SensorSpec,
    factory: &dyn ChannelFactory,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn SampleSource>, ChannelError> {
    match spec.kind {
        SensorKind::Simulated { omega } => Ok(Box::new(SimulatedSource::new(omega, clock))),
        _ => Ok(Box::new(HardwareSource::new(factory.channel(spec)?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_per_kind() {
        let strain = ChannelSetup::for_spec(&SensorSpec::new(SensorKind::Strain { channel: 1 }));
        assert_eq!(strain.bridge_gain, Some(128));
        assert_eq!(strain.data_interval_ms, 200);

        let tc = ChannelSetup::for_spec(&SensorSpec::new(SensorKind::Thermocouple {
            channel: 0,
            thermocouple: ThermocoupleType::J,
        }));
        assert_eq!(tc.thermocouple, Some(ThermocoupleType::J));
        assert_eq!(tc.bridge_gain, None);

        let vr = ChannelSetup::for_spec(&SensorSpec::new(SensorKind::VoltageRatio {
            channel: 3,
            sensor_type: "1101_SHORT".into(),
        }));
        assert_eq!(vr.sensor_type.as_deref(), Some("1101_SHORT"));
    }

    #[test]
    fn no_hardware_rejects_device_kinds() {
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let spec = SensorSpec::new(SensorKind::IrTemperature);
        assert!(matches!(
            build_source(&spec, &NoHardware, clock.clone()),
            Err(ChannelError::Unavailable("ir-temperature"))
        ));
        let sim = SensorSpec::new(SensorKind::Simulated { omega: 1.0 });
        assert!(build_source(&sim, &NoHardware, clock).is_ok());
    }
}
