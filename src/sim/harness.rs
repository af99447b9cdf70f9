//! CLI entry point for offline simulation runs: the regulation loop drives the
//! simulated enclosure in stepped time and the run is written as CSV and JSONL.

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tempbox::config::{self, Config, ControlMode};
use tempbox::regulation::{CycleOutcome, RegulationLoop};
use tempbox::telemetry::{self, JsonLineSink, TelemetrySink};
use tempbox::SensorId;
use tempbox_simulator::Simulator;

/// Simulation Harness CLI
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Runs the regulator against the simulated enclosure.")]
pub struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated duration in seconds
    #[arg(long, default_value_t = 3600)]
    duration_s: u64,

    /// Ambient temperature override
    #[arg(long)]
    ambient_c: Option<f64>,

    /// Output directory for sim.csv and telemetry.jsonl
    #[arg(short, long, default_value = "./sim_output")]
    output: PathBuf,

    /// Disconnect a sensor during the run (e.g. --disconnect 28:D5:55:6B:35:19:01:99@600)
    #[arg(long, value_parser = parse_disconnect)]
    disconnect: Vec<(SensorId, u64)>,

    /// Controller override: threshold or pid
    #[arg(long, value_parser = parse_mode)]
    mode: Option<ControlMode>,
}

fn parse_disconnect(s: &str) -> Result<(SensorId, u64), String> {
    let Some((id, seconds)) = s.rsplit_once('@') else {
        return Err(format!("Invalid SENSOR@SECONDS: no `@` found in '{}'.", s));
    };
    let id = id.parse::<SensorId>().map_err(|e| e.to_string())?;
    let seconds = seconds.parse::<u64>().map_err(|e| format!("Invalid seconds '{}': {}", seconds, e))?;
    Ok((id, seconds))
}

fn parse_mode(s: &str) -> Result<ControlMode, String> {
    match s {
        "threshold" => Ok(ControlMode::Threshold),
        "pid" | "time_proportioned_pid" => Ok(ControlMode::TimeProportionedPid),
        other => Err(format!("Unknown mode '{}' (threshold, pid)", other)),
    }
}

#[derive(Debug, Serialize)]
struct SimRow {
    time_s: f64,
    air_c: f64,
    mean_c: Option<f64>,
    reference_c: Option<f64>,
    relay: bool,
    duty_percent: Option<f64>,
    skipped: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    // 1. Load config (default or from file)
    let mut config = match &cli.config {
        Some(path) => match config::load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // 2. Apply overrides
    if let Some(mode) = cli.mode {
        config.regulation.mode = mode;
    }
    if let Some(ambient) = cli.ambient_c {
        config.simulation.ambient_c = ambient;
    }

    // 3. Ensure output directory exists
    if let Err(e) = std::fs::create_dir_all(&cli.output) {
        eprintln!("Failed to create output directory {}: {e}", cli.output.display());
        std::process::exit(1);
    }

    if let Err(e) = run(&cli, &config).await {
        eprintln!("Simulation failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let sim = Simulator::new(config.simulation.clone(), &config.sensors.interior, config.sensors.reference);
    for (id, seconds) in &cli.disconnect {
        sim.disconnect_at(id, seconds_to_ms(*seconds));
    }

    let mut control_loop = RegulationLoop::new(config, sim.bus(), sim.actuator())?;
    let mut csv = csv::Writer::from_path(cli.output.join("sim.csv"))?;
    let jsonl_path = cli.output.join("telemetry.jsonl");
    let mut sink = JsonLineSink::new(tokio::fs::File::create(&jsonl_path).await?);

    tracing::info!(
        "Simulating {}s in {} mode, setpoint {:.2}°C, ambient {:.2}°C",
        cli.duration_s,
        config.regulation.mode,
        config.regulation.setpoint_c,
        config.simulation.ambient_c
    );
    control_loop.start().await;

    let tick_ms = config.regulation.tick_ms;
    let end_ms = seconds_to_ms(cli.duration_s);
    let mut skipped = 0u64;
    while sim.now_ms() <= end_ms {
        let now = sim.now_ms();
        let outcome = control_loop.tick(now).await;
        let mut row = SimRow {
            time_s: now as f64 / 1000.0,
            air_c: sim.air_temperature(),
            mean_c: None,
            reference_c: None,
            relay: control_loop.relay_on(),
            duty_percent: None,
            skipped: false,
        };
        match outcome {
            CycleOutcome::Actuated(record) => {
                row.mean_c = Some(record.sensor_mean);
                row.duty_percent = record.duty_cycle;
                row.reference_c = config
                    .sensors
                    .reference
                    .and_then(|id| record.sensors.iter().find(|s| s.sensor == id))
                    .and_then(|s| s.celsius);
                sink.emit(&record).await?;
            }
            CycleOutcome::Skipped(_) => {
                skipped += 1;
                row.skipped = true;
            }
            CycleOutcome::Paused => {}
        }
        csv.serialize(&row)?;
        sim.advance_ms(tick_ms);
    }
    control_loop.shutdown().await;
    csv.flush()?;

    let summary = telemetry::summarize(std::io::BufReader::new(std::fs::File::open(&jsonl_path)?), 600)?;
    println!("{}", summary);
    println!("skipped cycles:   {}", skipped);
    println!("relay switches:   {}", sim.relay_switch_count());
    println!("final air temp:   {:.3}°C", sim.air_temperature());
    println!("output:           {}", cli.output.display());
    Ok(())
}

fn seconds_to_ms(seconds: u64) -> u64 {
    seconds.saturating_mul(1000)
}
