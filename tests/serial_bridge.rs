// Integration tests for the serial MCU bridge against a scripted MCU on an
// in-memory stream.

mod common;

use common::{high, low, outside};
use std::time::Duration;
use tempbox::hardware::{BridgeError, BridgeHandle, SerialBridge};
use tempbox::sensor::SensorReader;
use tempbox::{Actuator, SensorBus, SensorError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Answers commands the way the box firmware does and reports every command
/// it received. With `slow`, the first command of that name is answered only
/// after the given delay.
fn spawn_mcu(stream: DuplexStream, slow: Option<(&'static str, Duration)>) -> mpsc::UnboundedReceiver<String> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        let mut slow = slow;
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = seen_tx.send(line.clone());
            let words: Vec<&str> = line.split_whitespace().collect();
            if let Some((name, delay)) = slow {
                if words.first() == Some(&name) {
                    slow = None;
                    tokio::time::sleep(delay).await;
                }
            }
            let reply = match words.as_slice() {
                ["convert"] => "# conversion started\nok\n".to_string(),
                ["temp", id] if *id == low().to_string() => format!("temp {} 27.1875\n", id),
                ["temp", id] if *id == high().to_string() => format!("temp {} -127.00\n", id),
                ["temp", id] => format!("temp {} disconnected\n", id),
                ["relay", "0"] | ["relay", "1"] => "ok\n".to_string(),
                ["fan", _] => "\nok\n".to_string(),
                ["scan"] => format!("rom {}\nrom {}\nrom 28:00:00:00:00:00:00:01\nok\n", low(), outside()),
                ["sync", n] => format!("synced {}\n", n),
                ["silent"] => continue,
                _ => "error unknown command\n".to_string(),
            };
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });
    seen_rx
}

fn bridge() -> (SerialBridge<DuplexStream>, mpsc::UnboundedReceiver<String>) {
    let (host, mcu) = tokio::io::duplex(1024);
    let seen = spawn_mcu(mcu, None);
    (SerialBridge::new(host, Duration::from_millis(500)), seen)
}

#[tokio::test]
async fn test_conversion_and_reads() {
    let (bridge, _seen) = bridge();
    let mut handle = BridgeHandle::new(bridge);

    handle.request_conversion().await.unwrap();
    assert_eq!(handle.read_celsius(&low()).await, Ok(27.1875));
    // -127 is how the firmware reports a missing device.
    assert_eq!(handle.read_celsius(&high()).await, Err(SensorError::Disconnected(high())));
    assert_eq!(handle.read_celsius(&outside()).await, Err(SensorError::Disconnected(outside())));

    let stats = handle.stats().await;
    assert_eq!(stats.commands_sent, 4);
    assert_eq!(stats.responses_received, 4);
    assert_eq!(stats.timeouts, 0);
}

#[tokio::test]
async fn test_actuator_commands_reach_mcu() {
    let (bridge, mut seen) = bridge();
    let mut handle = BridgeHandle::new(bridge);

    handle.set_relay(true).await;
    handle.set_fan_duty(86).await;
    handle.set_relay(false).await;
    handle.set_fan_duty(250).await;

    let mut commands = Vec::new();
    for _ in 0..4 {
        commands.push(seen.recv().await.unwrap());
    }
    assert_eq!(commands, vec!["relay 1", "fan 86", "relay 0", "fan 100"]);
    assert_eq!(handle.stats().await.errors, 0);
}

#[tokio::test]
async fn test_scan_skips_corrupt_roms() {
    let (bridge, _seen) = bridge();
    let mut handle = BridgeHandle::new(bridge);
    assert_eq!(handle.discover().await.unwrap(), vec![low(), outside()]);
}

#[tokio::test]
async fn test_error_reply_is_protocol_error() {
    let (mut bridge, _seen) = bridge();
    let result = bridge.transact("reboot").await;
    assert!(matches!(result, Err(BridgeError::Protocol(_))), "{:?}", result);
    assert_eq!(bridge.stats().errors, 1);
    // The link is still usable afterwards.
    bridge.convert().await.unwrap();
    assert!(!bridge.needs_resync());
}

#[tokio::test(start_paused = true)]
async fn test_silent_mcu_times_out() {
    let (mut bridge, _seen) = bridge();
    let result = bridge.transact("silent").await;
    assert!(
        matches!(result, Err(BridgeError::Timeout { after_ms: 500, .. })),
        "{:?}",
        result
    );
    assert_eq!(bridge.stats().timeouts, 1);
}

#[tokio::test]
async fn test_closed_link_is_reported() {
    let (host, mcu) = tokio::io::duplex(64);
    drop(mcu);
    let mut handle = BridgeHandle::new(SerialBridge::new(host, Duration::from_millis(500)));
    assert!(matches!(handle.request_conversion().await, Err(SensorError::Bus(_))));
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_is_discarded_before_next_command() {
    let (host, mcu) = tokio::io::duplex(1024);
    let mut seen = spawn_mcu(mcu, Some(("relay", Duration::from_millis(800))));
    let mut handle = BridgeHandle::new(SerialBridge::new(host, Duration::from_millis(500)));

    // The `ok` for this relay command arrives after the bridge gave up.
    handle.set_relay(true).await;
    assert_eq!(handle.stats().await.timeouts, 1);

    let mut readings = Vec::new();
    for _ in 0..10 {
        handle.request_conversion().await.unwrap();
        readings.push(handle.read_celsius(&low()).await);
    }
    assert!(readings.iter().all(|r| *r == Ok(27.1875)), "{:?}", readings);

    let stats = handle.stats().await;
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.stale_replies, 1);
    assert_eq!(seen.recv().await.unwrap(), "relay 1");
    assert_eq!(seen.recv().await.unwrap(), "sync 1");
    assert_eq!(seen.recv().await.unwrap(), "convert");
}

#[tokio::test(start_paused = true)]
async fn test_reader_timeout_mid_exchange_recovers() {
    let (host, mcu) = tokio::io::duplex(1024);
    let _seen = spawn_mcu(mcu, Some(("convert", Duration::from_millis(300))));
    let handle = BridgeHandle::new(SerialBridge::new(host, Duration::from_millis(500)));
    let mut reader = SensorReader::new(handle.clone(), vec![low()], None, Duration::from_millis(200));

    // The reader gives up while the bridge is still waiting for `ok`.
    assert_eq!(reader.sample(0).await, Err(SensorError::Timeout { after_ms: 200 }));

    let snapshot = reader.sample(1_000).await.unwrap();
    assert_eq!(snapshot.mean_c, 27.1875);
    let stats = handle.stats().await;
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.stale_replies, 1);
}

#[tokio::test]
async fn test_mismatched_reply_triggers_resync() {
    let (host, mcu) = tokio::io::duplex(1024);
    let (read_half, mut write_half) = tokio::io::split(mcu);
    // A leftover `ok` sits ahead of the real replies.
    write_half.write_all(b"ok\n").await.unwrap();
    let mut bridge = SerialBridge::new(host, Duration::from_millis(500));
    let script = tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        write_half.write_all(format!("temp {} 25.0\n", low()).as_bytes()).await.unwrap();
        let sync = lines.next_line().await.unwrap().unwrap();
        let n = sync.strip_prefix("sync ").unwrap().to_string();
        write_half.write_all(format!("synced {}\n", n).as_bytes()).await.unwrap();
        let next = lines.next_line().await.unwrap().unwrap();
        write_half.write_all(format!("temp {} 26.0\n", low()).as_bytes()).await.unwrap();
        (first, sync, next)
    });

    let first = bridge.temperature(&low()).await;
    assert!(matches!(first, Err(BridgeError::Protocol(_))), "{:?}", first);
    assert!(bridge.needs_resync());
    assert_eq!(bridge.temperature(&low()).await.unwrap(), Some(26.0));
    assert!(!bridge.needs_resync());
    assert_eq!(bridge.stats().stale_replies, 1);

    let (first, sync, next) = script.await.unwrap();
    assert_eq!(first, format!("temp {}", low()));
    assert_eq!(sync, "sync 1");
    assert_eq!(next, format!("temp {}", low()));
}
