//! Simulated sensor: a background task that emits `sin(omega * t)` every data
//! interval, standing in for a device callback thread.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::{AttachInfo, SampleSource};
use crate::clock::Clock;
use crate::error::ChannelError;
use crate::sensor::SampleSink;
use crate::types::SensorSpec;

pub struct SimulatedSource {
    omega: f64,
    clock: Arc<dyn Clock>,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl SimulatedSource {
    pub fn new(omega: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            omega,
            clock,
            period: Duration::from_millis(200),
            task: None,
        }
    }
}

pub fn spawn_sampler(
    sink: SampleSink,
    omega: f64,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            if !sink.is_attached() {
                debug!(sensor = sink.name(), "simulated sampler stopping");
                break;
            }
            sink.on_sample((omega * clock.now()).sin());
        }
    })
}

impl SampleSource for SimulatedSource {
    fn open(&mut self, spec: &SensorSpec, _timeout: Duration) -> Result<AttachInfo, ChannelError> {
        self.period = spec.data_interval();
        Ok(AttachInfo {
            units: Some(spec.kind.default_units().to_string()),
        })
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), ChannelError> {
        // Needs a runtime to live on; sensors are built inside the app's tokio context.
        tokio::runtime::Handle::try_current()
            .map_err(|_| ChannelError::Device("simulated sensors need a tokio runtime".into()))?;
        self.task = Some(spawn_sampler(
            sink,
            self.omega,
            Arc::clone(&self.clock),
            self.period,
        ));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(t) = self.task.take() {
            t.abort();
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}
