//! Interfaces to the hub driver, plus connection retry.
//!
//! The vendor SDK is an external collaborator. A concrete driver implements
//! [`SensorQuery`] for enumeration and [`Acquisition`] for streaming; the
//! session only ever talks to those two traits.

use crate::protocol::format_address;
use crate::types::{DeviceProperties, SensorDescriptor, SourceConfig};
use crate::{PluxError, Result};
use std::time::{Duration, Instant};

/// Sensor enumeration side of a hub.
pub trait SensorQuery {
    /// Enumerate connected sensors.
    ///
    /// Implementations return [`PluxError::MetadataUnavailable`] when the hub
    /// cannot describe its sensors; the session then falls back to the
    /// default port layout.
    fn sensors(&mut self) -> Result<Vec<SensorDescriptor>>;

    /// Hub-level properties (may be empty).
    fn properties(&mut self) -> Result<DeviceProperties>;
}

/// What the acquisition loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    Stop,
}

/// Receives raw frames from [`Acquisition::run_loop`].
pub trait FrameHandler {
    fn on_frame(&mut self, seq: u64, frame: &[f64]) -> FrameAction;
}

impl<F> FrameHandler for F
where
    F: FnMut(u64, &[f64]) -> FrameAction,
{
    fn on_frame(&mut self, seq: u64, frame: &[f64]) -> FrameAction {
        self(seq, frame)
    }
}

/// Streaming side of a hub.
pub trait Acquisition {
    /// Configure sources and begin acquisition at `rate` Hz.
    fn start(&mut self, rate: f64, sources: &[SourceConfig]) -> Result<()>;

    /// Deliver frames to `handler` until it returns [`FrameAction::Stop`] or
    /// the device ends the stream.
    fn run_loop(&mut self, handler: &mut dyn FrameHandler) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// A complete hub driver.
pub trait PluxDevice: SensorQuery + Acquisition {}

impl<T: SensorQuery + Acquisition> PluxDevice for T {}

/// How long and how often to retry a connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

/// Translate common SDK connection failures into something actionable.
pub fn connect_hint(message: &str) -> Option<&'static str> {
    let msg = message.to_ascii_lowercase();
    if msg.contains("communication port could not be initialized") {
        Some("device not found or not paired")
    } else if msg.contains("access denied") {
        Some("permission denied, device may be in use")
    } else if msg.contains("failed bootstrap checkin") {
        Some("Bluetooth communication failed")
    } else if msg.contains("bluetooth") && msg.contains("not found") {
        Some("Bluetooth device not found")
    } else if cfg!(target_os = "windows") && msg.contains("com port") {
        Some("COM port error, check Bluetooth pairing")
    } else {
        None
    }
}

/// Call `connect` with the platform-formatted `address` until it succeeds or
/// `policy.timeout` runs out.
///
/// At least one attempt is always made. Retrying stops early once less than
/// one interval remains.
pub fn connect_with_retry<D, F>(address: &str, policy: &RetryPolicy, mut connect: F) -> Result<D>
where
    F: FnMut(&str) -> Result<D>,
{
    let formatted = format_address(address);
    log::info!(
        "Connecting to {} (timeout {:.0}s)",
        formatted,
        policy.timeout.as_secs_f64()
    );

    let started = Instant::now();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match connect(&formatted) {
            Ok(device) => {
                log::info!("Connected to {} (attempt {})", formatted, attempt);
                return Ok(device);
            }
            Err(e) => e,
        };

        let raw = err.to_string();
        let reason = connect_hint(&raw).map(str::to_string).unwrap_or(raw);
        let elapsed = started.elapsed();
        let remaining = policy.timeout.saturating_sub(elapsed);

        if attempt <= 5 || attempt % 10 == 0 {
            log::warn!(
                "Connection attempt {} failed: {} ({:.1}s remaining)",
                attempt,
                reason,
                remaining.as_secs_f64()
            );
        }

        if remaining <= policy.interval {
            return Err(PluxError::ConnectionTimeout {
                address: address.to_string(),
                elapsed_secs: elapsed.as_secs_f64(),
                reason,
            });
        }
        std::thread::sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_hint() {
        assert_eq!(
            connect_hint("The communication port could not be initialized."),
            Some("device not found or not paired")
        );
        assert_eq!(
            connect_hint("Access denied"),
            Some("permission denied, device may be in use")
        );
        assert_eq!(
            connect_hint("bluetooth adapter: device not found"),
            Some("Bluetooth device not found")
        );
        assert_eq!(connect_hint("something else"), None);
    }

    #[test]
    fn test_connect_succeeds_after_failures() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result = connect_with_retry("00:07:80:8C:08:DF", &policy, |_| {
            calls += 1;
            if calls < 3 {
                Err(PluxError::Device("busy".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_connect_times_out_with_hint() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            interval: Duration::from_millis(5),
        };
        let result: Result<()> = connect_with_retry("00:07:80:8C:08:DF", &policy, |_| {
            Err(PluxError::Device(
                "communication port could not be initialized".into(),
            ))
        });
        match result {
            Err(PluxError::ConnectionTimeout {
                address, reason, ..
            }) => {
                assert_eq!(address, "00:07:80:8C:08:DF");
                assert_eq!(reason, "device not found or not paired");
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_zero_timeout_still_tries_once() {
        let policy = RetryPolicy {
            timeout: Duration::ZERO,
            interval: Duration::from_secs(2),
        };
        let mut calls = 0;
        let result = connect_with_retry("dev", &policy, |_| {
            calls += 1;
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_closure_is_frame_handler() {
        let mut seen = Vec::new();
        let mut handler = |seq: u64, frame: &[f64]| {
            seen.push((seq, frame.len()));
            FrameAction::Continue
        };
        assert_eq!(handler.on_frame(0, &[1.0, 2.0]), FrameAction::Continue);
        assert_eq!(seen, vec![(0, 2)]);
    }
}
