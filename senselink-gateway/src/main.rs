//! SenseLink gateway
//!
//! Keeps a BLE link to the sensor board and writes every reading to InfluxDB.

use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use senselink_ble::{BleLink, Supervisor, SupervisorConfig, ble};
use senselink_proto::ble::DEVICE_ADDRESS;
use senselink_sink::{
    DEFAULT_MEASUREMENT, HttpTransport, InfluxConfig, InfluxWriter, LogSink, SampleSink,
    WriteOptions,
};

#[derive(Parser)]
#[command(name = "senselink-gateway")]
#[command(about = "Stream SenseLink sensor readings into InfluxDB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sensor and stream readings until interrupted
    Run(RunArgs),
    /// Scan for nearby BLE devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Sensor address to highlight
        #[arg(long, env = "SENSELINK_DEVICE", default_value = DEVICE_ADDRESS)]
        device: String,
    },
    /// Decode one sensor line and print it as JSON
    Decode {
        line: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Hardware address of the sensor board
    #[arg(short, long, env = "SENSELINK_DEVICE", default_value = DEVICE_ADDRESS)]
    device: String,
    /// Measurement name samples are written under
    #[arg(long, env = "SENSELINK_MEASUREMENT", default_value = DEFAULT_MEASUREMENT)]
    measurement: String,
    /// Seconds to wait before reconnecting
    #[arg(long, default_value = "2")]
    backoff: u64,
    /// Seconds between link liveness checks
    #[arg(long, default_value = "1")]
    poll: u64,
    /// Seconds allowed for unsubscribe and disconnect when releasing the link
    #[arg(long, default_value = "5")]
    cleanup_timeout: u64,
    /// Seconds to scan when looking for the sensor
    #[arg(long, default_value = "5")]
    scan: u64,
    /// Log samples instead of writing them to InfluxDB
    #[arg(long)]
    no_push: bool,
    #[arg(long, env = "INFLUXDB_URL", required_unless_present = "no_push")]
    influxdb_url: Option<String>,
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true, required_unless_present = "no_push")]
    influxdb_token: Option<String>,
    #[arg(long, env = "INFLUXDB_ORG", required_unless_present = "no_push")]
    influxdb_org: Option<String>,
    #[arg(long, env = "INFLUXDB_BUCKET", required_unless_present = "no_push")]
    influxdb_bucket: Option<String>,
    /// Points per InfluxDB write
    #[arg(long, default_value = "10")]
    batch_size: usize,
    /// Milliseconds before a partial batch is written
    #[arg(long, default_value = "10000")]
    flush_interval: u64,
}

impl RunArgs {
    fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            backoff: Duration::from_secs(self.backoff),
            poll_interval: Duration::from_secs(self.poll),
            measurement: self.measurement.clone(),
            cleanup_timeout: Duration::from_secs(self.cleanup_timeout),
        }
    }

    fn influx_config(&self) -> Result<InfluxConfig, Box<dyn std::error::Error>> {
        Ok(InfluxConfig {
            url: self.influxdb_url.clone().ok_or("missing INFLUXDB_URL")?,
            token: self.influxdb_token.clone().ok_or("missing INFLUXDB_TOKEN")?,
            org: self.influxdb_org.clone().ok_or("missing INFLUXDB_ORG")?,
            bucket: self.influxdb_bucket.clone().ok_or("missing INFLUXDB_BUCKET")?,
        })
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions {
            batch_size: self.batch_size.max(1),
            flush_interval: Duration::from_millis(self.flush_interval),
            ..WriteOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            run(args).await?;
        }
        Commands::Scan { duration, device } => {
            scan_devices(duration, &device).await?;
        }
        Commands::Decode { line } => {
            decode_line(&line)?;
        }
    }

    Ok(())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupted by user");
                    shutdown.cancel();
                }
                Err(e) => warn!("cannot listen for ctrl-c: {e}"),
            }
        }
    });

    let link = BleLink::new(args.device.clone(), Duration::from_secs(args.scan));
    info!(device = %link.address(), "starting gateway");

    if args.no_push {
        supervise(link, LogSink, args.supervisor_config(), &shutdown).await;
        return Ok(());
    }

    let transport = HttpTransport::new(&args.influx_config()?)?;
    let (writer, flush_task) = InfluxWriter::spawn(transport, args.write_options());
    supervise(link, writer, args.supervisor_config(), &shutdown).await;
    flush_task.close().await;
    Ok(())
}

async fn supervise<S: SampleSink>(
    link: BleLink,
    sink: S,
    config: SupervisorConfig,
    shutdown: &CancellationToken,
) {
    let mut supervisor = Supervisor::new(link, sink, config);
    supervisor.run(shutdown).await;
}

async fn scan_devices(duration: u64, device: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for BLE devices ({} seconds)...", duration);

    let devices = ble::scan(Duration::from_secs(duration), device).await?;

    println!("\nFound {} devices:", devices.len());
    for d in devices {
        let rssi = d.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        let marker = if d.is_sensor { " [SENSOR]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", d.name, d.address, rssi, marker);
    }

    Ok(())
}

fn decode_line(line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let decoded = senselink_proto::decode(line.as_bytes())?;
    println!("{}", serde_json::to_string_pretty(&decoded.sample)?);
    if !decoded.trailing.is_empty() {
        eprintln!("ignored trailing input: {:?}", decoded.trailing);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn no_push_needs_no_influx_settings() {
        let cli = Cli::try_parse_from(["senselink-gateway", "run", "--no-push"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.no_push);
        let config = args.supervisor_config();
        assert_eq!(config.backoff, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.cleanup_timeout, Duration::from_secs(5));
    }

    #[test]
    fn run_args_map_to_write_options() {
        let cli = Cli::try_parse_from([
            "senselink-gateway",
            "run",
            "--influxdb-url",
            "http://localhost:8086",
            "--influxdb-token",
            "secret",
            "--influxdb-org",
            "home",
            "--influxdb-bucket",
            "sensors",
            "--batch-size",
            "25",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let influx = args.influx_config().unwrap();
        assert_eq!(influx.bucket, "sensors");
        assert_eq!(args.write_options().batch_size, 25);
        assert_eq!(args.write_options().max_retries, 5);
    }
}
