// Telemetry written by the loop, read back by the log summary.

mod common;

use common::{low, single_sensor_config, FakeBus, Recorder};
use std::io::Cursor;
use tempbox::regulation::{CycleOutcome, RegulationLoop};
use tempbox::telemetry::{summarize, JsonLineSink, TelemetrySink};

#[tokio::test]
async fn test_loop_log_round_trips_through_summary() {
    let bus = FakeBus::default();
    let mut control_loop = RegulationLoop::new(&single_sensor_config(), bus.clone(), Recorder::default()).unwrap();
    let mut sink = JsonLineSink::new(Vec::new());

    // Heating on for the first two cycles, off for the last two.
    for (i, mean) in [27.0, 27.2, 28.0, 28.2].into_iter().enumerate() {
        bus.set(low(), mean);
        if let CycleOutcome::Actuated(record) = control_loop.tick(i as u64 * 1000).await {
            sink.emit(&record).await.unwrap();
        }
    }

    // Console chatter interleaved with records, as a serial capture has.
    let mut log = String::from("Serial initialized!\n\nFound 3 devices.\n");
    log.push_str(&String::from_utf8(sink.into_inner()).unwrap());
    log.push_str("For debugMode please press anykey.\n");

    let summary = summarize(Cursor::new(log), 2).unwrap();
    assert_eq!(summary.samples, 4);
    assert_eq!(summary.malformed, 0);
    assert_eq!(summary.first_ms, 0);
    assert_eq!(summary.last_ms, 3000);
    assert_eq!(summary.heating_fraction, 0.5);
    assert_eq!(summary.min_temperature, 27.0);
    assert_eq!(summary.max_temperature, 28.2);
    assert_eq!(summary.moving_average, Some((28.0 + 28.2) / 2.0));
    assert!((summary.mean_temperature - 27.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_record_fields_in_log_line() {
    let bus = FakeBus::default();
    bus.set(low(), 26.5);
    let mut control_loop = RegulationLoop::new(&single_sensor_config(), bus, Recorder::default()).unwrap();
    let mut sink = JsonLineSink::new(Vec::new());
    let CycleOutcome::Actuated(record) = control_loop.tick(1234).await else {
        panic!("cycle skipped");
    };
    sink.emit(&record).await.unwrap();

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
    assert_eq!(value["ms"], 1234);
    assert_eq!(value["sensorMean"], 26.5);
    assert_eq!(value["setpoint"], 27.5);
    assert_eq!(value["fan"], 220);
    assert_eq!(value["heatingElement"], true);
    assert_eq!(value["sensors"][0]["celsius"], 26.5);
    assert_eq!(value["sensors"][0]["takenAtMs"], 1234);
}
