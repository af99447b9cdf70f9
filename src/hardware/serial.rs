// src/hardware/serial.rs - line protocol to the box microcontroller
//
// Host -> MCU, one command per line:
//   convert            start a conversion on every sensor, reply `ok` when done
//   temp <id>          reply `temp <id> <celsius>` or `temp <id> disconnected`
//   relay <0|1>        reply `ok`
//   fan <percent>      reply `ok`
//   scan               reply `rom <id>` per device, then `ok`
//   sync <n>           reply `synced <n>` once every earlier command is answered
// Any command may be answered with `error <message>`. Lines starting with `#`
// are MCU log output and are skipped.
//
// The MCU answers commands in order. After an exchange that did not finish
// cleanly (timeout, unexpected reply, or a caller dropping the future) the
// next command is preceded by a `sync` and every line up to its `synced`
// reply is discarded.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempbox_shared::{Actuator, SensorBus, SensorError, SensorId};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Value a DS18B20 driver reports for a device that did not answer.
pub const DEVICE_DISCONNECTED_C: f64 = -127.0;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("serial IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply to `{command}` within {after_ms}ms")]
    Timeout { command: String, after_ms: u64 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("serial connection closed")]
    Closed,
}

impl From<BridgeError> for SensorError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Timeout { after_ms, .. } => SensorError::Timeout { after_ms },
            other => SensorError::Bus(other.to_string()),
        }
    }
}

/// Serial connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub commands_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub resyncs: u64,
    /// Replies discarded while resynchronizing.
    pub stale_replies: u64,
}

/// Request/response link to the MCU over any byte stream.
pub struct SerialBridge<T> {
    reader: BufReader<ReadHalf<T>>,
    writer: WriteHalf<T>,
    response_timeout: Duration,
    stats: SerialStats,
    /// Set while a command's reply has not been fully consumed.
    pending: bool,
    sync_seq: u32,
}

impl SerialBridge<serial2_tokio::SerialPort> {
    /// Open a serial port to the MCU.
    pub fn open(path: &str, baud: u32, response_timeout: Duration) -> Result<Self, BridgeError> {
        tracing::info!("Connecting to MCU on {} at {} baud", path, baud);
        let port = serial2_tokio::SerialPort::open(path, baud).map_err(|e| {
            tracing::error!("Failed to open serial port '{}': {}", path, e);
            BridgeError::Io(e)
        })?;
        Ok(Self::new(port, response_timeout))
    }
}

impl<T: AsyncRead + AsyncWrite> SerialBridge<T> {
    pub fn new(stream: T, response_timeout: Duration) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer,
            response_timeout,
            stats: SerialStats::default(),
            pending: false,
            sync_seq: 0,
        }
    }

    pub fn stats(&self) -> &SerialStats {
        &self.stats
    }

    /// Send one command and return the first reply line.
    pub async fn transact(&mut self, command: &str) -> Result<String, BridgeError> {
        self.begin(command).await?;
        let reply = self.reply_within(command).await?;
        self.pending = false;
        Ok(reply)
    }

    /// Send a command whose reply spans several lines terminated by `ok`.
    pub async fn transact_lines(&mut self, command: &str) -> Result<Vec<String>, BridgeError> {
        self.begin(command).await?;
        let mut lines = Vec::new();
        loop {
            let line = self.reply_within(command).await?;
            if line == "ok" {
                self.pending = false;
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    /// Whether the next command will resynchronize the link first.
    pub fn needs_resync(&self) -> bool {
        self.pending
    }

    async fn begin(&mut self, command: &str) -> Result<(), BridgeError> {
        if self.pending {
            self.resync().await?;
        }
        self.pending = true;
        self.send(command).await
    }

    /// Discard replies to earlier commands up to a fresh `synced` marker.
    async fn resync(&mut self) -> Result<(), BridgeError> {
        self.sync_seq = self.sync_seq.wrapping_add(1);
        let command = format!("sync {}", self.sync_seq);
        let marker = format!("synced {}", self.sync_seq);
        tracing::debug!("Resynchronizing MCU link with `{}`", command);
        self.send(&command).await?;

        let after_ms = u64::try_from(self.response_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut discarded = Vec::new();
        let drained = timeout(self.response_timeout, async {
            loop {
                let line = self.read_reply().await?;
                if line == marker {
                    return Ok::<_, BridgeError>(());
                }
                discarded.push(line);
            }
        })
        .await;

        for line in &discarded {
            tracing::debug!("Discarding stale reply `{}`", line);
        }
        self.stats.stale_replies += discarded.len() as u64;
        match drained {
            Ok(Ok(())) => {
                self.stats.resyncs += 1;
                self.pending = false;
                if !discarded.is_empty() {
                    tracing::info!("MCU link resynchronized after {} stale replies", discarded.len());
                }
                Ok(())
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Timeout after {}ms waiting for `{}`", after_ms, marker);
                self.stats.timeouts += 1;
                Err(BridgeError::Timeout { command, after_ms })
            }
        }
    }

    /// Record a reply that does not answer the command just sent.
    fn out_of_step(&mut self, e: BridgeError) -> BridgeError {
        self.pending = true;
        self.stats.errors += 1;
        e
    }

    async fn send(&mut self, command: &str) -> Result<(), BridgeError> {
        tracing::trace!("Serial TX: {}", command);
        let line = format!("{}\n", command);
        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.stats.errors += 1;
            return Err(BridgeError::Io(e));
        }
        self.stats.commands_sent += 1;
        self.stats.bytes_sent += line.len() as u64;
        Ok(())
    }

    async fn reply_within(&mut self, command: &str) -> Result<String, BridgeError> {
        let after_ms = u64::try_from(self.response_timeout.as_millis()).unwrap_or(u64::MAX);
        match timeout(self.response_timeout, self.read_reply()).await {
            Ok(Ok(line)) => {
                if let Some(message) = line.strip_prefix("error ") {
                    self.stats.errors += 1;
                    return Err(BridgeError::Protocol(format!("MCU rejected `{}`: {}", command, message)));
                }
                Ok(line)
            }
            Ok(Err(e)) => {
                self.stats.errors += 1;
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Timeout after {}ms waiting for reply to `{}`", after_ms, command);
                self.stats.timeouts += 1;
                Err(BridgeError::Timeout { command: command.to_string(), after_ms })
            }
        }
    }

    async fn read_reply(&mut self) -> Result<String, BridgeError> {
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let read = self.reader.read_line(&mut buffer).await?;
            if read == 0 {
                tracing::info!("Serial connection closed by remote");
                return Err(BridgeError::Closed);
            }
            self.stats.bytes_received += read as u64;
            let line = buffer.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(log) = line.strip_prefix('#') {
                tracing::debug!("MCU: {}", log.trim());
                continue;
            }
            tracing::trace!("Serial RX: {}", line);
            self.stats.responses_received += 1;
            return Ok(line.to_string());
        }
    }

    pub async fn convert(&mut self) -> Result<(), BridgeError> {
        let reply = self.transact("convert").await?;
        expect_ok(&reply).map_err(|e| self.out_of_step(e))
    }

    /// Read one sensor; `Ok(None)` when the MCU reports it disconnected.
    pub async fn temperature(&mut self, id: &SensorId) -> Result<Option<f64>, BridgeError> {
        let command = format!("temp {}", id);
        let reply = self.transact(&command).await?;
        parse_temperature(&reply, id).map_err(|e| self.out_of_step(e))
    }

    pub async fn relay(&mut self, energized: bool) -> Result<(), BridgeError> {
        let reply = self.transact(if energized { "relay 1" } else { "relay 0" }).await?;
        expect_ok(&reply).map_err(|e| self.out_of_step(e))
    }

    pub async fn fan(&mut self, percent: u8) -> Result<(), BridgeError> {
        let reply = self.transact(&format!("fan {}", percent.min(100))).await?;
        expect_ok(&reply).map_err(|e| self.out_of_step(e))
    }

    pub async fn scan(&mut self) -> Result<Vec<SensorId>, BridgeError> {
        let lines = self.transact_lines("scan").await?;
        let mut ids = Vec::with_capacity(lines.len());
        for line in lines {
            let Some(rom) = line.strip_prefix("rom ") else {
                return Err(self.out_of_step(BridgeError::Protocol(format!("unexpected scan reply `{}`", line))));
            };
            match rom.trim().parse::<SensorId>() {
                Ok(id) => ids.push(id),
                // A corrupted ROM read is not a device we can address.
                Err(e) => tracing::warn!("Ignoring ROM `{}` from scan: {}", rom, e),
            }
        }
        Ok(ids)
    }
}

fn expect_ok(reply: &str) -> Result<(), BridgeError> {
    if reply == "ok" {
        Ok(())
    } else {
        Err(BridgeError::Protocol(format!("expected `ok`, got `{}`", reply)))
    }
}

fn parse_temperature(reply: &str, id: &SensorId) -> Result<Option<f64>, BridgeError> {
    let mut parts = reply.split_whitespace();
    let (Some("temp"), Some(reply_id), Some(value), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(BridgeError::Protocol(format!("malformed temperature reply `{}`", reply)));
    };
    let reply_id: SensorId = reply_id
        .parse()
        .map_err(|e| BridgeError::Protocol(format!("bad sensor id in `{}`: {}", reply, e)))?;
    if &reply_id != id {
        return Err(BridgeError::Protocol(format!("asked for {} but got a reading for {}", id, reply_id)));
    }
    if value == "disconnected" {
        return Ok(None);
    }
    let celsius: f64 = value
        .parse()
        .map_err(|_| BridgeError::Protocol(format!("bad temperature `{}`", value)))?;
    if celsius == DEVICE_DISCONNECTED_C {
        Ok(None)
    } else {
        Ok(Some(celsius))
    }
}

/// Shared handle to a [`SerialBridge`] acting as both sensor bus and
/// actuator.
pub struct BridgeHandle<T> {
    inner: Arc<Mutex<SerialBridge<T>>>,
}

impl<T> Clone for BridgeHandle<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: AsyncRead + AsyncWrite> BridgeHandle<T> {
    pub fn new(bridge: SerialBridge<T>) -> Self {
        Self { inner: Arc::new(Mutex::new(bridge)) }
    }

    pub async fn stats(&self) -> SerialStats {
        self.inner.lock().await.stats().clone()
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Send> SensorBus for BridgeHandle<T> {
    async fn request_conversion(&mut self) -> Result<(), SensorError> {
        Ok(self.inner.lock().await.convert().await?)
    }

    async fn read_celsius(&mut self, sensor: &SensorId) -> Result<f64, SensorError> {
        match self.inner.lock().await.temperature(sensor).await? {
            Some(celsius) => Ok(celsius),
            None => Err(SensorError::Disconnected(*sensor)),
        }
    }

    async fn discover(&mut self) -> Result<Vec<SensorId>, SensorError> {
        Ok(self.inner.lock().await.scan().await?)
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Send> Actuator for BridgeHandle<T> {
    async fn set_relay(&mut self, energized: bool) {
        if let Err(e) = self.inner.lock().await.relay(energized).await {
            tracing::warn!("Relay command failed: {}", e);
        }
    }

    async fn set_fan_duty(&mut self, percent: u8) {
        if let Err(e) = self.inner.lock().await.fan(percent).await {
            tracing::warn!("Fan command failed: {}", e);
        }
    }
}
