//! Hand-driven [`HardwareChannel`] for tests and replay: the caller decides when
//! the device attaches, what it reads and when it disconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{ChannelSetup, HardwareChannel};
use crate::error::ChannelError;
use crate::sensor::SampleSink;

#[derive(Default)]
struct Slot {
    sink: Option<SampleSink>,
    setup: Option<ChannelSetup>,
}

pub struct ManualChannel {
    attaches: bool,
    units: Option<String>,
    slot: Arc<Mutex<Slot>>,
    closed: Arc<AtomicBool>,
}

/// Device side of a [`ManualChannel`].
#[derive(Clone)]
pub struct ManualHandle {
    slot: Arc<Mutex<Slot>>,
    closed: Arc<AtomicBool>,
}

impl ManualChannel {
    pub fn new() -> (Self, ManualHandle) {
        Self::build(true)
    }

    /// A device that never confirms attachment.
    pub fn never_attaches() -> (Self, ManualHandle) {
        Self::build(false)
    }

    fn build(attaches: bool) -> (Self, ManualHandle) {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                attaches,
                units: None,
                slot: Arc::clone(&slot),
                closed: Arc::clone(&closed),
            },
            ManualHandle { slot, closed },
        )
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

impl HardwareChannel for ManualChannel {
    fn open_wait_for_attachment(
        &mut self,
        _device_serial: i32,
        _channel: u8,
        _timeout: Duration,
    ) -> Result<(), ChannelError> {
        if self.attaches {
            Ok(())
        } else {
            Err(ChannelError::Timeout)
        }
    }

    fn configure(&mut self, setup: &ChannelSetup) -> Result<(), ChannelError> {
        lock(&self.slot).setup = Some(setup.clone());
        Ok(())
    }

    fn units(&self) -> Option<String> {
        self.units.clone()
    }

    fn subscribe(&mut self, sink: SampleSink) -> Result<(), ChannelError> {
        lock(&self.slot).sink = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ManualHandle {
    /// Delivers one reading. `false` if nothing has subscribed yet.
    pub fn emit(&self, raw: f64) -> bool {
        match &lock(&self.slot).sink {
            Some(sink) => {
                sink.on_sample(raw);
                true
            }
            None => false,
        }
    }

    pub fn detach(&self) {
        if let Some(sink) = &lock(&self.slot).sink {
            sink.on_detach();
        }
    }

    pub fn setup(&self) -> Option<ChannelSetup> {
        lock(&self.slot).setup.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
