//! Sensor acquisition pipeline: producers push raw readings into a per-sensor
//! queue, the consumer tick drains it into a rolling plot window.

pub mod alarm;
pub mod calibration;
pub mod calibrator;
pub mod clock;
pub mod error;
pub mod queue;
pub mod recording;
pub mod sensor;
pub mod source;
pub mod types;
pub mod window;

pub use alarm::{Alarm, AlarmLatch};
pub use calibration::{Affine, CalibrationFile};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CalibrationError, ChannelError, RecordingError, SensorError};
pub use sensor::{Pulled, SampleSink, Sensor, SensorState};
pub use source::{build_source, ChannelFactory, NoHardware, SampleSource};
pub use types::{Sample, SensorKind, SensorNamer, SensorSpec, ThermocoupleType};
