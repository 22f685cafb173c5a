use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info, warn};

use plux_lsl::device::connect_with_retry;
use plux_lsl::sim::SimulatedDevice;
use plux_lsl::sink::StreamBackend;
use plux_lsl::{
    DetectionMode, FrameLayout, PluxError, Result, SensorOverrides, Session, SessionConfig,
    ShutdownHandle,
};

#[derive(Parser)]
#[command(name = "plux-lsl", version)]
#[command(about = "Detect PLUX hub sensors and stream them to Lab Streaming Layer")]
struct Cli {
    /// Hub Bluetooth address, e.g. 00:07:80:8C:08:DF
    #[arg(long)]
    mac: Option<String>,

    /// Sampling rate in Hz (default: 1000)
    #[arg(long)]
    rate: Option<f64>,

    /// Output stream name (default: biosignalsplux)
    #[arg(long)]
    stream_name: Option<String>,

    /// Connection timeout in seconds (default: 60)
    #[arg(long)]
    timeout: Option<u64>,

    /// Manual sensor types, e.g. "1:EMG,2:RSP,9:SpO2"
    #[arg(long)]
    sensors: Option<SensorOverrides>,

    /// Sensor detection mode: tiered | electrical
    #[arg(long)]
    detection: Option<DetectionMode>,

    /// Raw frame layout: packed | split
    #[arg(long)]
    frame_layout: Option<FrameLayout>,

    /// JSON hub description for the simulated hub (default: built-in demo hub)
    #[arg(long)]
    device_file: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Debug logging, including periodic throughput lines
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(mac) = &self.mac {
            config.address = mac.clone();
        }
        match self.rate {
            Some(rate) if rate > 0.0 => config.sampling_rate = rate,
            Some(rate) => warn!(
                "Ignoring --rate {}: must be positive, using {} Hz",
                rate, config.sampling_rate
            ),
            None => {}
        }
        if let Some(name) = &self.stream_name {
            config.stream_name = name.clone();
        }
        if let Some(timeout) = self.timeout {
            config.connect_timeout = std::time::Duration::from_secs(timeout);
        }
        if let Some(sensors) = &self.sensors {
            config.overrides = sensors.clone();
        }
        if let Some(detection) = self.detection {
            config.detection = detection;
        }
        if let Some(layout) = self.frame_layout {
            config.frame_layout = layout;
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut config = SessionConfig::from_env();
    cli.apply(&mut config);

    if let Err(e) = run(&cli, config) {
        error!("{}", e);
        print_troubleshooting(&e);
        process::exit(1);
    }
}

fn run(cli: &Cli, config: SessionConfig) -> Result<()> {
    let address = if config.address.is_empty() {
        "simulated".to_string()
    } else {
        config.address.clone()
    };

    let device = connect_with_retry(&address, &config.retry_policy(), |_| {
        let device = match &cli.device_file {
            Some(path) => SimulatedDevice::from_file(path)?,
            None => SimulatedDevice::demo(),
        };
        let device = device.with_layout(config.frame_layout).realtime(true);
        Ok(match cli.frames {
            Some(n) => device.with_frame_limit(n),
            None => device,
        })
    })?;

    let mut session = Session::new(device, config);
    let schema = session.discover()?;
    info!("Channels: {}", schema.labels().join(", "));

    let mut backend = backend();
    session.create_outlet(backend.as_mut())?;

    spawn_quit_watcher(session.shutdown_handle());
    info!("Streaming. Type 'q' + Enter to quit.");

    let stats = session.start_acquisition()?;
    info!(
        "Done: {} frames in {:.1}s ({:.1} Hz), {} short frames",
        stats.frames,
        stats.elapsed_secs,
        if stats.elapsed_secs > 0.0 {
            stats.frames as f64 / stats.elapsed_secs
        } else {
            0.0
        },
        stats.short_frames
    );
    Ok(())
}

#[cfg(feature = "lsl")]
fn backend() -> Box<dyn StreamBackend> {
    Box::new(plux_lsl::sink::lsl_backend::LslBackend)
}

#[cfg(not(feature = "lsl"))]
fn backend() -> Box<dyn StreamBackend> {
    info!("Built without the 'lsl' feature, samples are only logged");
    Box::new(plux_lsl::sink::LogBackend)
}

/// Read stdin on a dedicated thread; `q` clears the session's running flag.
fn spawn_quit_watcher(handle: ShutdownHandle) {
    let spawned = std::thread::Builder::new()
        .name("plux-quit".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                        info!("'q' pressed, shutting down");
                        handle.shutdown();
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Keyboard quit unavailable: {}", e);
    }
}

fn print_troubleshooting(err: &PluxError) {
    if let PluxError::ConnectionTimeout { .. } = err {
        eprintln!();
        eprintln!("Troubleshooting:");
        eprintln!("  1. Make sure the hub is switched on and charged");
        eprintln!("  2. Pair it in your system's Bluetooth settings");
        eprintln!("  3. Check the MAC address printed on the device");
        eprintln!("  4. Close other applications that may hold the connection");
        eprintln!("  5. Try a longer --timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["plux-lsl", "--rate", "500", "--sensors", "1:EMG"]);
        let mut config = SessionConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.sampling_rate, 500.0);
        assert!(!config.overrides.is_empty());
    }

    #[test]
    fn test_non_positive_rate_is_ignored() {
        let cli = Cli::parse_from(["plux-lsl", "--rate", "0"]);
        let mut config = SessionConfig::default();
        let before = config.sampling_rate;
        cli.apply(&mut config);
        assert_eq!(config.sampling_rate, before);

        let cli = Cli::parse_from(["plux-lsl", "--rate=-5"]);
        cli.apply(&mut config);
        assert_eq!(config.sampling_rate, before);
    }
}
