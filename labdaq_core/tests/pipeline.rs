//! Producer on its own thread, consumer pulling on the test thread.

use std::sync::Arc;
use std::thread;

use labdaq_core::source::manual::ManualChannel;
use labdaq_core::source::HardwareSource;
use labdaq_core::{ManualClock, Sensor, SensorKind, SensorSpec, SensorState, SystemClock};

#[test]
fn concurrent_producer_loses_nothing_and_keeps_order() {
    let mut spec = SensorSpec::new(SensorKind::Strain { channel: 0 });
    spec.data_interval_ms = 8;
    // long enough that the window never resets during the test
    spec.refresh_period_s = 3600.0;
    let mut sensor = Sensor::new("load", spec, Arc::new(SystemClock));
    let (chan, handle) = ManualChannel::new();
    sensor.attach(Box::new(HardwareSource::new(chan))).unwrap();

    const N: usize = 10_000;
    let producer = thread::spawn(move || {
        for i in 0..N {
            assert!(handle.emit(i as f64));
        }
    });

    let mut seen = Vec::with_capacity(N);
    let mut last_time = f64::MIN;
    while seen.len() < N {
        let p = sensor.pull();
        for (t, v) in p.new_times.iter().zip(&p.new_values) {
            assert!(*t >= last_time);
            last_time = *t;
            seen.push(*v);
        }
    }
    producer.join().unwrap();
    assert_eq!(seen, (0..N).map(|i| i as f64).collect::<Vec<_>>());
    assert_eq!(sensor.window().index(), N);
    assert!(sensor.window().capacity() >= N);
}

#[test]
fn device_units_override_kind_default() {
    let clock = Arc::new(ManualClock::new(0.0));
    let spec = SensorSpec::new(SensorKind::VoltageRatio {
        channel: 1,
        sensor_type: "1121_100".into(),
    });
    let mut sensor = Sensor::new("pressure", spec, clock);
    assert_eq!(sensor.units(), "");
    let (chan, handle) = ManualChannel::new();
    sensor
        .attach(Box::new(HardwareSource::new(chan.with_units("kPa"))))
        .unwrap();
    assert_eq!(sensor.units(), "kPa");
    let setup = handle.setup().unwrap();
    assert_eq!(setup.sensor_type.as_deref(), Some("1121_100"));
}

#[test]
fn operator_detach_closes_channel() {
    let clock = Arc::new(ManualClock::new(5.0));
    let spec = SensorSpec::new(SensorKind::Thermocouple {
        channel: 0,
        thermocouple: labdaq_core::ThermocoupleType::K,
    });
    let mut sensor = Sensor::new("tc", spec, clock.clone());
    let (chan, handle) = ManualChannel::new();
    sensor.attach(Box::new(HardwareSource::new(chan))).unwrap();
    clock.advance(0.2);
    handle.emit(21.5);
    sensor.detach();
    assert!(handle.is_closed());
    assert_eq!(sensor.state(), SensorState::Detached);
    handle.emit(99.0);
    let p = sensor.pull();
    assert_eq!(p.new_values, vec![21.5]);
}

#[test]
fn calibration_switch_under_load() {
    let mut spec = SensorSpec::new(SensorKind::Strain { channel: 2 });
    spec.refresh_period_s = 3600.0;
    let mut sensor = Sensor::new("bridge", spec, Arc::new(SystemClock));
    let (chan, handle) = ManualChannel::new();
    sensor.attach(Box::new(HardwareSource::new(chan))).unwrap();

    let producer = thread::spawn(move || {
        for _ in 0..5_000 {
            handle.emit(1.0);
        }
    });
    for i in 0..200 {
        if i % 2 == 0 {
            sensor.set_calibration(3.0, 4.0).unwrap();
        } else {
            sensor.clear_calibration();
        }
        thread::yield_now();
    }
    producer.join().unwrap();

    // every value is either raw or fully calibrated, never a mix of two settings
    let p = sensor.pull();
    assert_eq!(p.new_values.len(), 5_000);
    assert!(p.new_values.iter().all(|v| *v == 1.0 || *v == 7.0));
}
