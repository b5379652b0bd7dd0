//! bridgekit demo daemon
//!
//! Publishes a filtered temperature reading and exposes a relay command. Run
//! with `--dry-run` to swap the 1-Wire sensor for a simulated one.

use bridgekit::config::Settings;
use bridgekit::error::HandlerError;
use bridgekit::observability::{init_default_logging, init_from_section};
use bridgekit::{
    AdapterSource, App, DeviceLogger, Every, HandlerResult, LowPass, OnChange, State,
    StrategyExt, TelemetryOptions,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Demo IoT-to-MQTT bridge
#[derive(Parser)]
#[command(name = "bridgekit")]
#[command(about = "Demo IoT-to-MQTT bridge daemon")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Use simulated hardware
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },
}

/// Port for anything that can report a temperature
trait TemperatureSensor: Send + Sync {
    fn read_celsius(&self) -> Result<f64, HandlerError>;
}

/// DS18B20 on the Linux 1-Wire bus
struct W1Sensor {
    path: PathBuf,
}

impl W1Sensor {
    fn from_env() -> Self {
        let path = std::env::var("BRIDGEKIT_W1_SENSOR")
            .unwrap_or_else(|_| "/sys/bus/w1/devices/28-000000000000/w1_slave".to_string());
        Self {
            path: PathBuf::from(path),
        }
    }
}

impl TemperatureSensor for W1Sensor {
    fn read_celsius(&self) -> Result<f64, HandlerError> {
        let raw = std::fs::read_to_string(&self.path)?;
        if !raw.lines().next().is_some_and(|line| line.ends_with("YES")) {
            return Err(format!("CRC check failed on {}", self.path.display()).into());
        }
        let millis: i64 = raw
            .rsplit("t=")
            .next()
            .ok_or("missing t= field")?
            .trim()
            .parse()?;
        Ok(millis as f64 / 1000.0)
    }
}

/// Slow deterministic wave around 21 °C
struct SimulatedSensor {
    ticks: AtomicU64,
}

impl TemperatureSensor for SimulatedSensor {
    fn read_celsius(&self) -> Result<f64, HandlerError> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) as f64;
        Ok(21.0 + 1.5 * (tick / 20.0).sin())
    }
}

type Sensor = Arc<dyn TemperatureSensor>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = match load_configuration(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // No settings to configure logging from; fall back to LOG_LEVEL/LOG_FORMAT
            init_default_logging();
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    match cli.verbose {
        0 => {}
        1 => settings.logging.level = "debug".to_string(),
        _ => settings.logging.level = "trace".to_string(),
    }
    init_from_section(&settings.logging);

    info!("Starting bridgekit demo v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Run => run_bridge(settings, cli.dry_run).await,
        Commands::Config { show } => handle_config_command(&settings, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(Settings::load_from_file(path)?);
    }

    for candidate in ["bridgekit.toml", "config/bridgekit.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(Settings::load_from_file(path)?);
        }
    }

    let mut settings = Settings::default();
    settings.apply_env_overrides();
    settings.validate()?;
    Ok(settings)
}

fn build_app(settings: Settings, dry_run: bool) -> Result<App, Box<dyn std::error::Error>> {
    let mut app = App::new("bridgekit-demo", env!("CARGO_PKG_VERSION"));
    app.settings(settings);
    if dry_run {
        app.dry_run(true);
    }

    app.catalog("sim.temperature", || {
        let sensor: Sensor = Arc::new(SimulatedSensor {
            ticks: AtomicU64::new(0),
        });
        Ok(sensor)
    })?;
    app.adapter_source(
        AdapterSource::factory(|| {
            let sensor: Sensor = Arc::new(W1Sensor::from_env());
            Ok(sensor)
        }),
        Some(AdapterSource::catalog("sim.temperature")),
    )?;

    app.telemetry_with(
        "temperature",
        Duration::from_secs(10),
        TelemetryOptions::new()
            .filter("celsius", LowPass::new(0.3)?)
            .strategy(OnChange::threshold(0.2).or(Every::seconds(300.0)?)),
        |sensor: Sensor| async move {
            let celsius = sensor.read_celsius()?;
            let mut state = State::new();
            state.insert("celsius".to_string(), json!(celsius));
            HandlerResult::Ok(state)
        },
    )?;

    app.command(
        "relay",
        |_topic: String, payload: String, logger: DeviceLogger| async move {
            let on = match payload.trim().to_uppercase().as_str() {
                "ON" | "1" | "TRUE" => true,
                "OFF" | "0" | "FALSE" => false,
                other => return Err(format!("unsupported relay payload '{other}'").into()),
            };
            logger.info(if on { "relay on" } else { "relay off" });

            let mut state = State::new();
            state.insert("state".to_string(), json!(if on { "ON" } else { "OFF" }));
            HandlerResult::Ok(Some(state))
        },
    )?;

    app.on_startup(|sensor: Sensor| async move {
        // Fail fast on a missing bus instead of publishing errors forever
        sensor.read_celsius()?;
        HandlerResult::Ok(())
    })?;

    Ok(app)
}

async fn run_bridge(settings: Settings, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_app(settings, dry_run)?;
    info!("Bridge configured: {:?}", app);
    app.run().await?;
    Ok(())
}

fn handle_config_command(settings: &Settings, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(settings)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
