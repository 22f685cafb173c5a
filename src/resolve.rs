//! Sensor type resolution.
//!
//! Automatic detection runs an ordered list of tiers, each a pure function
//! that either decides a type or defers to the next one:
//!
//! | Tier | Decides when |
//! |---|---|
//! | [`digital_spo2`] | raw code is 69 |
//! | [`accelerometer_axis`] | raw code is 4 (axis from characteristics, then port) |
//! | [`product_id_match`] | a productId matches the pattern table |
//! | [`type_code_table`] | always (unmapped codes become `Unknown_Type<N>`) |
//!
//! The order matters: productId heuristics are unreliable and must never
//! override an unambiguous type code.

use std::borrow::Cow;

use serde_json::Value;

use crate::protocol::{self, CHAR_AXIS, CHAR_CHANNEL, PRODUCT_ID_KEY, TYPE_ACC, TYPE_SPO2};
use crate::types::{
    Axis, Characteristics, DetectionMode, DeviceProperties, ResolvedPort, SensorDescriptor,
    SensorOverrides, SensorType,
};

/// One detection tier: `Some` decides, `None` defers to the next tier.
pub type Tier = fn(&SensorDescriptor, &DeviceProperties) -> Option<SensorType>;

/// Tiers in precedence order.
pub const TIERS: [Tier; 4] = [
    digital_spo2,
    accelerometer_axis,
    product_id_match,
    type_code_table,
];

pub fn digital_spo2(sensor: &SensorDescriptor, _: &DeviceProperties) -> Option<SensorType> {
    (sensor.type_code == TYPE_SPO2).then_some(SensorType::SpO2)
}

pub fn accelerometer_axis(sensor: &SensorDescriptor, _: &DeviceProperties) -> Option<SensorType> {
    if sensor.type_code != TYPE_ACC {
        return None;
    }
    let chars = &sensor.characteristics;
    let axis = chars
        .get(CHAR_AXIS)
        .map(|v| Axis::from_label(&value_text(v)))
        .or_else(|| chars.get(CHAR_CHANNEL).map(channel_axis))
        .or_else(|| protocol::axis_from_port(sensor.port));
    Some(SensorType::Acc(axis))
}

pub fn product_id_match(
    sensor: &SensorDescriptor,
    properties: &DeviceProperties,
) -> Option<SensorType> {
    product_id(sensor, properties).and_then(|id| match_product_id(&id))
}

pub fn type_code_table(sensor: &SensorDescriptor, _: &DeviceProperties) -> Option<SensorType> {
    Some(
        protocol::type_from_code(sensor.type_code)
            .unwrap_or(SensorType::Unknown(sensor.type_code)),
    )
}

/// The productId for a sensor: its own, else the device-level property.
pub fn product_id<'a>(
    sensor: &'a SensorDescriptor,
    properties: &'a DeviceProperties,
) -> Option<Cow<'a, str>> {
    sensor
        .product_id
        .as_deref()
        .map(Cow::Borrowed)
        .or_else(|| properties.get(PRODUCT_ID_KEY).map(|v| Cow::Owned(value_text(v))))
}

/// Case-insensitive substring match against the productId pattern table.
pub fn match_product_id(product_id: &str) -> Option<SensorType> {
    let lower = product_id.to_ascii_lowercase();
    protocol::PRODUCT_PATTERNS
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(_, t)| t.clone())
}

/// Tiered resolution. Never fails: the last tier always answers.
pub fn resolve(sensor: &SensorDescriptor, properties: &DeviceProperties) -> SensorType {
    TIERS
        .iter()
        .find_map(|tier| tier(sensor, properties))
        .unwrap_or(SensorType::Unknown(sensor.type_code))
}

/// Classify an analog sensor from its front-end characteristics alone.
///
/// For firmware that reports gains and filter cut-offs but no trustworthy
/// type code. Missing or non-numeric values never satisfy a threshold.
pub fn classify_by_characteristics(chars: &Characteristics) -> SensorType {
    let i_gain = numeric(chars, protocol::CHAR_I_GAIN);
    let v_gain = numeric(chars, protocol::CHAR_V_GAIN);
    let lp_freq = numeric(chars, protocol::CHAR_LP_FREQ);

    if i_gain.is_some_and(|g| g > protocol::EDA_MIN_I_GAIN) {
        return SensorType::Eda;
    }
    if let (Some(v), Some(lp)) = (v_gain, lp_freq) {
        if v <= protocol::RSP_MAX_V_GAIN && lp <= protocol::RSP_MAX_LP_HZ {
            return SensorType::Rsp;
        }
        if v > protocol::BIOPOTENTIAL_MIN_V_GAIN && lp < protocol::ECG_MAX_LP_HZ {
            return SensorType::Ecg;
        }
        if v > protocol::BIOPOTENTIAL_MIN_V_GAIN && lp > protocol::EMG_MIN_LP_HZ {
            return SensorType::Emg;
        }
    }
    SensorType::Emg
}

/// Electrical resolution: digital SpO2 still wins, everything else is
/// classified from characteristics.
pub fn resolve_electrical(sensor: &SensorDescriptor, properties: &DeviceProperties) -> SensorType {
    digital_spo2(sensor, properties)
        .unwrap_or_else(|| classify_by_characteristics(&sensor.characteristics))
}

/// Resolves every enumerated sensor with the configured detection mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    mode: DetectionMode,
}

impl Resolver {
    pub fn new(mode: DetectionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn resolve(&self, sensor: &SensorDescriptor, properties: &DeviceProperties) -> SensorType {
        match self.mode {
            DetectionMode::Tiered => resolve(sensor, properties),
            DetectionMode::Electrical => resolve_electrical(sensor, properties),
        }
    }

    /// Resolve all sensors, preserving enumeration order.
    pub fn resolve_all(
        &self,
        sensors: &[SensorDescriptor],
        properties: &DeviceProperties,
    ) -> Vec<ResolvedPort> {
        sensors
            .iter()
            .map(|sensor| {
                let sensor_type = self.resolve(sensor, properties);
                log::info!(
                    "Port {}: type={} class={:?} serial={} hw={:?} productID={} characteristics={} -> {}",
                    sensor.port,
                    sensor.type_code,
                    sensor.class,
                    sensor.serial.as_deref().unwrap_or("-"),
                    sensor.hw_version,
                    product_id(sensor, properties).as_deref().unwrap_or("Unknown"),
                    Value::Object(sensor.characteristics.clone()),
                    sensor_type
                );
                if sensor_type.is_unknown() {
                    log::warn!(
                        "Port {}: unrecognised sensor code {}, streaming as {}",
                        sensor.port,
                        sensor.type_code,
                        sensor_type
                    );
                }
                ResolvedPort::new(sensor.port, sensor_type)
            })
            .collect()
    }
}

/// Replace resolved types with manual overrides, port by port.
///
/// Overrides naming ports that were not enumerated are ignored: there is no
/// acquisition source behind them.
pub fn apply_overrides(ports: &mut [ResolvedPort], overrides: &SensorOverrides) {
    for (port, forced) in overrides.iter() {
        match ports.iter_mut().find(|p| p.port == port) {
            Some(slot) => {
                log::info!(
                    "Port {}: override {} -> {}",
                    port,
                    slot.sensor_type,
                    forced
                );
                slot.sensor_type = forced.clone();
            }
            None => log::warn!("Override for port {} ignored: no sensor on that port", port),
        }
    }
}

fn channel_axis(value: &Value) -> Axis {
    let index = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
    index
        .and_then(protocol::axis_from_channel)
        .unwrap_or_else(|| Axis::Raw(value_text(value)))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn numeric(chars: &Characteristics, key: &str) -> Option<f64> {
    match chars.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
