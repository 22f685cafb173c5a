//! Session configuration.
//!
//! Defaults match the stock bridge; `PLUX_*` environment variables override
//! them, and the CLI overrides both.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `PLUX_ADDRESS` | `address` | (none) |
//! | `PLUX_RATE` | `sampling_rate` | 1000 |
//! | `PLUX_STREAM_NAME` | `stream_name` | `biosignalsplux` |
//! | `PLUX_CONNECT_TIMEOUT` | `connect_timeout` (s) | 60 |
//! | `PLUX_DETECTION` | `detection` | `tiered` |
//! | `PLUX_FRAME_LAYOUT` | `frame_layout` | `packed` |
//! | `PLUX_SENSORS` | `overrides` | (none) |

use crate::device::RetryPolicy;
use crate::protocol::{
    DEFAULT_SAMPLING_RATE, DEFAULT_SOURCE_ID, DEFAULT_STREAM_NAME, DEFAULT_STREAM_TYPE,
};
use crate::sink::StreamInfo;
use crate::types::{ChannelSchema, DetectionMode, FrameLayout, SensorOverrides};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Hub Bluetooth address, as printed on the device.
    pub address: String,
    pub sampling_rate: f64,
    pub stream_name: String,
    pub stream_type: String,
    pub source_id: String,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    /// Frames between throughput log lines.
    pub debug_interval: u64,
    pub detection: DetectionMode,
    pub frame_layout: FrameLayout,
    pub overrides: SensorOverrides,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            sampling_rate: DEFAULT_SAMPLING_RATE,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            stream_type: DEFAULT_STREAM_TYPE.to_string(),
            source_id: DEFAULT_SOURCE_ID.to_string(),
            connect_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(2),
            debug_interval: 1000,
            detection: DetectionMode::Tiered,
            frame_layout: FrameLayout::Packed,
            overrides: SensorOverrides::new(),
        }
    }
}

impl SessionConfig {
    /// Defaults with `PLUX_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Apply overrides from any variable source. Unparseable values keep the
    /// current setting and log a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(address) = read_env_string(&lookup, "PLUX_ADDRESS") {
            self.address = address;
        }
        if let Some(name) = read_env_string(&lookup, "PLUX_STREAM_NAME") {
            self.stream_name = name;
        }
        self.sampling_rate = read_env_parsed(&lookup, "PLUX_RATE", self.sampling_rate);
        if self.sampling_rate.is_nan() || self.sampling_rate <= 0.0 {
            log::warn!(
                "Ignoring non-positive PLUX_RATE, using {}",
                DEFAULT_SAMPLING_RATE
            );
            self.sampling_rate = DEFAULT_SAMPLING_RATE;
        }
        let timeout = read_env_parsed(
            &lookup,
            "PLUX_CONNECT_TIMEOUT",
            self.connect_timeout.as_secs(),
        );
        self.connect_timeout = Duration::from_secs(timeout);
        self.detection = read_env_parsed(&lookup, "PLUX_DETECTION", self.detection);
        self.frame_layout = read_env_parsed(&lookup, "PLUX_FRAME_LAYOUT", self.frame_layout);
        self.overrides = read_env_parsed(&lookup, "PLUX_SENSORS", self.overrides.clone());
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.connect_timeout,
            interval: self.retry_interval,
        }
    }

    /// Stream declaration for `schema` using this configuration's naming.
    pub fn stream_info(&self, schema: &ChannelSchema) -> StreamInfo {
        StreamInfo::from_schema(schema)
            .with_name(&self.stream_name)
            .with_type(&self.stream_type)
            .with_rate(self.sampling_rate)
            .with_source_id(&self.source_id)
    }
}

fn read_env_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match read_env_string(lookup, name) {
        None => default,
        Some(v) => match v.parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Ignoring {}='{}': {}", name, v, e);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorType;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.sampling_rate, 1000.0);
        assert_eq!(config.stream_name, "biosignalsplux");
        assert_eq!(config.stream_type, "Physiological");
        assert_eq!(config.source_id, "biosignalsplux");
        assert_eq!(config.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.retry_interval, Duration::from_secs(2));
        assert_eq!(config.debug_interval, 1000);
        assert_eq!(config.detection, DetectionMode::Tiered);
        assert_eq!(config.frame_layout, FrameLayout::Packed);
        assert!(config.overrides.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SessionConfig::default();
        config.apply_env(env(&[
            ("PLUX_ADDRESS", " 00:07:80:8C:08:DF "),
            ("PLUX_RATE", "500"),
            ("PLUX_STREAM_NAME", "lab-hub"),
            ("PLUX_CONNECT_TIMEOUT", "30"),
            ("PLUX_DETECTION", "electrical"),
            ("PLUX_FRAME_LAYOUT", "split"),
            ("PLUX_SENSORS", "1:emg,2:RSP"),
        ]));
        assert_eq!(config.address, "00:07:80:8C:08:DF");
        assert_eq!(config.sampling_rate, 500.0);
        assert_eq!(config.stream_name, "lab-hub");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.detection, DetectionMode::Electrical);
        assert_eq!(config.frame_layout, FrameLayout::Split);
        assert_eq!(config.overrides.get(1), Some(&SensorType::Emg));
        assert_eq!(config.overrides.get(2), Some(&SensorType::Rsp));
    }

    #[test]
    fn test_bad_env_values_keep_defaults() {
        let mut config = SessionConfig::default();
        config.apply_env(env(&[
            ("PLUX_RATE", "fast"),
            ("PLUX_CONNECT_TIMEOUT", "-1"),
            ("PLUX_DETECTION", "magic"),
            ("PLUX_SENSORS", "1=EMG"),
        ]));
        assert_eq!(config, SessionConfig::default());

        config.apply_env(env(&[("PLUX_RATE", "0")]));
        assert_eq!(config.sampling_rate, 1000.0);
    }

    #[test]
    fn test_stream_info() {
        let config = SessionConfig {
            stream_name: "hub".into(),
            sampling_rate: 250.0,
            ..Default::default()
        };
        let info = config.stream_info(&crate::layout::fallback_schema());
        assert_eq!(info.name, "hub");
        assert_eq!(info.nominal_rate, 250.0);
        assert_eq!(info.channel_count, 3);
    }
}
