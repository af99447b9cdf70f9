// src/main.rs - regulator host daemon
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tempbox::config::{self, Config};
use tempbox::regulation::{self, RegulationHandle, RegulationLoop};
use tempbox::scheduler::MonotonicClock;
use tempbox::telemetry::{self, JsonLineSink};
use tempbox::{Actuator, SensorBus, TimeInterface};
use tempbox_simulator::Simulator;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "tempbox", version, about = "Temperature regulator for a heated enclosure.")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "tempbox.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Drive the simulated enclosure instead of the MCU
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the regulation loop (default)
    Run,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Summarize a telemetry log
    Summary {
        log: PathBuf,
        /// Moving average window in samples
        #[arg(long, default_value_t = telemetry::summary::DEFAULT_MOVING_AVERAGE_WINDOW)]
        window: usize,
        /// Also write the extracted telemetry lines to this file
        #[arg(long)]
        extract: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // stdout carries telemetry, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!("Starting tempbox {}", env!("CARGO_PKG_VERSION"));
            let config = load(&cli.config)?;
            if cli.simulate {
                run_simulated(config).await
            } else {
                run_hardware(config).await
            }
        }
        Command::CheckConfig => {
            let config = load(&cli.config)?;
            println!(
                "{}: ok (mode {}, setpoint {:.2}°C, {} interior sensors)",
                cli.config.display(),
                config.regulation.mode,
                config.regulation.setpoint_c,
                config.sensors.interior.len()
            );
            Ok(())
        }
        Command::Summary { log, window, extract } => summarize(&log, window, extract.as_deref()),
    }
}

fn load(path: &std::path::Path) -> Result<Config, BoxError> {
    tracing::info!("Loading configuration from: {}", path.display());
    config::load_config(path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", path.display(), e);
        Box::new(e) as BoxError
    })
}

async fn run_hardware(config: Config) -> Result<(), BoxError> {
    tracing::info!("MCU: {} @ {} baud", config.mcu.serial, config.mcu.baud);
    let mcu = tempbox::hardware::connect(&config.mcu)?;
    regulate(&config, mcu.clone(), mcu, MonotonicClock::new()).await
}

async fn run_simulated(config: Config) -> Result<(), BoxError> {
    tracing::info!("Running against the simulated enclosure");
    let sim = Simulator::new(config.simulation.clone(), &config.sensors.interior, config.sensors.reference);

    // Advance the model in step with wall time.
    let physics = sim.clone();
    let stepper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;
            physics.advance_ms(100);
        }
    });

    let result = regulate(&config, sim.bus(), sim.actuator(), sim.clock()).await;
    stepper.abort();
    tracing::info!(
        "Simulation ended at {:.2}°C after {} relay switches",
        sim.air_temperature(),
        sim.relay_switch_count()
    );
    result
}

async fn regulate<B, A, C>(config: &Config, bus: B, actuator: A, clock: C) -> Result<(), BoxError>
where
    B: SensorBus,
    A: Actuator,
    C: TimeInterface,
{
    let mut control_loop = RegulationLoop::new(config, bus, actuator)?;
    let mut sink = JsonLineSink::new(telemetry_writer(&config.telemetry.output).await?);
    let (handle, requests) = regulation::channel::channel(16);
    tokio::spawn(console(handle, stdin_lines()));

    control_loop.start().await;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };
    control_loop.run(&clock, &mut sink, requests, shutdown).await;
    tracing::info!("Wrote {} telemetry records", sink.lines_written());
    Ok(())
}

async fn telemetry_writer(output: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>, BoxError> {
    if output == "stdout" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)
        .await
        .map_err(|e| {
            tracing::error!("Failed to open telemetry output '{}': {}", output, e);
            e
        })?;
    tracing::info!("Appending telemetry to {}", output);
    Ok(Box::new(file))
}

/// Read stdin on a plain thread; a blocking read inside the runtime would
/// hold up shutdown.
fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Line commands on stdin: `status`, `pause`, `resume`, `relay on|off`,
/// `fan <percent>`.
async fn console(handle: RegulationHandle, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => continue,
            ["status"] => handle.status().await.map(|status| {
                match serde_json::to_string(&status) {
                    Ok(json) => tracing::info!("Status: {}", json),
                    Err(e) => tracing::warn!("Failed to encode status: {}", e),
                }
            }),
            ["pause"] => handle.pause().await,
            ["resume"] => handle.resume().await,
            ["relay", "on"] => handle.set_relay(true).await,
            ["relay", "off"] => handle.set_relay(false).await,
            ["fan", percent] => match percent.parse::<u8>() {
                Ok(percent) => handle.set_fan(percent).await,
                Err(_) => {
                    tracing::warn!("Fan duty must be a number between 0 and 100");
                    continue;
                }
            },
            _ => {
                tracing::warn!("Unknown command `{}` (status, pause, resume, relay on|off, fan <percent>)", line.trim());
                continue;
            }
        };
        match result {
            Ok(()) => tracing::info!("`{}` ok", line.trim()),
            Err(regulation::RegulationError::LoopStopped) => return,
            Err(e) => tracing::warn!("`{}` rejected: {}", line.trim(), e),
        }
    }
}

fn summarize(log: &std::path::Path, window: usize, extract: Option<&std::path::Path>) -> Result<(), BoxError> {
    let open = || {
        std::fs::File::open(log).map(std::io::BufReader::new).map_err(|e| {
            tracing::error!("Failed to open log '{}': {}", log.display(), e);
            e
        })
    };
    if let Some(path) = extract {
        let out = std::io::BufWriter::new(std::fs::File::create(path)?);
        let count = telemetry::summary::extract(open()?, out)?;
        tracing::info!("Extracted {} records to {}", count, path.display());
    }
    let summary = telemetry::summarize(open()?, window)?;
    println!("{}", summary);
    Ok(())
}
