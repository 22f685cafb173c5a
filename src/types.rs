use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::PluxError;

/// Vendor characteristics reported for one sensor (gain, cut-off, axis, ...).
///
/// Values are loosely typed: the same key may be a number on one firmware
/// and a string on another.
pub type Characteristics = serde_json::Map<String, serde_json::Value>;

/// Device-level properties returned alongside the sensor list.
pub type DeviceProperties = serde_json::Map<String, serde_json::Value>;

/// Raw per-port metadata as reported by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Physical port, 1-based.
    pub port: u16,
    /// Numeric sensor type code.
    #[serde(rename = "type")]
    pub type_code: i32,
    #[serde(default)]
    pub characteristics: Characteristics,
    #[serde(default, rename = "productID")]
    pub product_id: Option<String>,
    /// Sensor class (diagnostics only).
    #[serde(default)]
    pub class: Option<i32>,
    /// Serial number (diagnostics only).
    #[serde(default)]
    pub serial: Option<String>,
    /// Hardware revision (diagnostics only).
    #[serde(default)]
    pub hw_version: Option<u32>,
}

impl SensorDescriptor {
    pub fn new(port: u16, type_code: i32) -> Self {
        Self {
            port,
            type_code,
            characteristics: Characteristics::new(),
            product_id: None,
            class: None,
            serial: None,
            hw_version: None,
        }
    }

    pub fn with_characteristic(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// Accelerometer axis. `Raw` carries whatever the firmware reported when it
/// is not one of the three canonical axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    Raw(String),
}

impl Axis {
    pub fn from_label(label: &str) -> Axis {
        match label {
            "X" => Axis::X,
            "Y" => Axis::Y,
            "Z" => Axis::Z,
            other => Axis::Raw(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::Raw(s) => s,
        }
    }
}

/// Canonical sensor label assigned after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SensorType {
    Emg,
    Ecg,
    Eda,
    Eeg,
    /// Accelerometer; `None` when the axis could not be determined.
    Acc(Option<Axis>),
    Gyro,
    Mag,
    Rsp,
    Pzt,
    Temp,
    SpO2,
    Ppg,
    /// Unmapped raw type code.
    Unknown(i32),
}

/// Derivation suffixes for SpO2, in frame order.
pub const SPO2_DERIVATIONS: [&str; 2] = ["RED", "INFRARED"];

/// Axis suffixes for an accelerometer whose axis is unresolved.
pub const ACC_AXES: [&str; 3] = ["X", "Y", "Z"];

impl SensorType {
    /// Derivation suffixes this type expands to, empty for single-channel types.
    pub fn derivations(&self) -> &'static [&'static str] {
        match self {
            SensorType::SpO2 => &SPO2_DERIVATIONS,
            SensorType::Acc(None) => &ACC_AXES,
            _ => &[],
        }
    }

    /// Number of logical channels one port of this type produces.
    pub fn channel_count(&self) -> usize {
        self.derivations().len().max(1)
    }

    /// Value written to the per-channel `type` metadata field.
    pub fn semantic_type(&self) -> String {
        self.to_string()
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SensorType::Unknown(_))
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Emg => f.write_str("EMG"),
            SensorType::Ecg => f.write_str("ECG"),
            SensorType::Eda => f.write_str("EDA"),
            SensorType::Eeg => f.write_str("EEG"),
            SensorType::Acc(None) => f.write_str("ACC"),
            SensorType::Acc(Some(axis)) => write!(f, "ACC_{}", axis.as_str()),
            SensorType::Gyro => f.write_str("GYRO"),
            SensorType::Mag => f.write_str("MAG"),
            SensorType::Rsp => f.write_str("RSP"),
            SensorType::Pzt => f.write_str("PZT"),
            SensorType::Temp => f.write_str("TEMP"),
            SensorType::SpO2 => f.write_str("SpO2"),
            SensorType::Ppg => f.write_str("PPG"),
            SensorType::Unknown(code) => write!(f, "Unknown_Type{}", code),
        }
    }
}

impl FromStr for SensorType {
    type Err = PluxError;

    /// Parse a canonical label, case-insensitively (`spo2`, `ACC_x`, `Unknown_Type7`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let parsed = match upper.as_str() {
            "EMG" => SensorType::Emg,
            "ECG" => SensorType::Ecg,
            "EDA" => SensorType::Eda,
            "EEG" => SensorType::Eeg,
            "ACC" => SensorType::Acc(None),
            "GYRO" => SensorType::Gyro,
            "MAG" => SensorType::Mag,
            "RSP" => SensorType::Rsp,
            "PZT" => SensorType::Pzt,
            "TEMP" => SensorType::Temp,
            "SPO2" => SensorType::SpO2,
            "PPG" => SensorType::Ppg,
            other => {
                if let Some(axis) = other.strip_prefix("ACC_").filter(|a| !a.is_empty()) {
                    SensorType::Acc(Some(Axis::from_label(axis)))
                } else if let Some(code) = other
                    .strip_prefix("UNKNOWN_TYPE")
                    .and_then(|c| c.parse::<i32>().ok())
                {
                    SensorType::Unknown(code)
                } else {
                    return Err(PluxError::InvalidOverride(format!(
                        "unknown sensor type '{}'",
                        s.trim()
                    )));
                }
            }
        };
        Ok(parsed)
    }
}

/// A port together with the type it resolved to, in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPort {
    pub port: u16,
    pub sensor_type: SensorType,
}

impl ResolvedPort {
    pub fn new(port: u16, sensor_type: SensorType) -> Self {
        Self { port, sensor_type }
    }
}

/// One named scalar stream in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannel {
    pub source_port: u16,
    pub label: String,
    pub unit: String,
    pub semantic_type: String,
}

/// Ordered output channel layout, frozen once built.
///
/// Channel order matches the order in which the demultiplexer emits values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSchema {
    ports: Vec<ResolvedPort>,
    channels: Vec<LogicalChannel>,
}

impl ChannelSchema {
    pub(crate) fn from_parts(ports: Vec<ResolvedPort>, channels: Vec<LogicalChannel>) -> Self {
        Self { ports, channels }
    }

    pub fn channels(&self) -> &[LogicalChannel] {
        &self.channels
    }

    pub fn ports(&self) -> &[ResolvedPort] {
        &self.ports
    }

    /// Physical ports in enumeration order.
    pub fn port_order(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.port).collect()
    }

    pub fn sensor_type(&self, port: u16) -> Option<&SensorType> {
        self.ports
            .iter()
            .find(|p| p.port == port)
            .map(|p| &p.sensor_type)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.label.as_str()).collect()
    }

    /// Total logical channel count; the output stream is declared with this.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

bitflags::bitflags! {
    /// Derivations enabled on a digital source.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(C)]
    pub struct DerivationMask: u8 {
        const RED      = 1 << 0;
        const INFRARED = 1 << 1;
    }
}

/// Per-port acquisition settings handed to the device at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub port: u16,
    /// Subsampling divisor (1 = every sample).
    pub freq_divisor: u32,
    /// ADC resolution in bits.
    pub n_bits: u8,
    /// Enabled derivations for digital sources; `None` for analog ports.
    pub derivations: Option<DerivationMask>,
}

/// How sensor types are inferred from descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMode {
    /// Type code, accelerometer axis, productId and code table, in that order.
    #[default]
    Tiered,
    /// Classify analog ports from gain and low-pass characteristics.
    Electrical,
}

impl FromStr for DetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiered" | "type" => Ok(DetectionMode::Tiered),
            "electrical" | "characteristics" => Ok(DetectionMode::Electrical),
            other => Err(format!(
                "unknown detection mode '{}' (supported: tiered|electrical)",
                other
            )),
        }
    }
}

/// Shape of multi-derivation values inside a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameLayout {
    /// One packed integer per port; derivations are bit fields.
    #[default]
    Packed,
    /// The SDK already split derivations into consecutive elements.
    Split,
}

impl FrameLayout {
    /// Raw frame elements one port of `sensor_type` occupies.
    pub fn slots(self, sensor_type: &SensorType) -> usize {
        match self {
            FrameLayout::Packed => 1,
            FrameLayout::Split => sensor_type.channel_count(),
        }
    }
}

impl FromStr for FrameLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "packed" => Ok(FrameLayout::Packed),
            "split" => Ok(FrameLayout::Split),
            other => Err(format!(
                "unknown frame layout '{}' (supported: packed|split)",
                other
            )),
        }
    }
}

/// Manual port → type assignments applied after automatic resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorOverrides(BTreeMap<u16, SensorType>);

impl SensorOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: u16, sensor_type: SensorType) {
        self.0.insert(port, sensor_type);
    }

    pub fn get(&self, port: u16) -> Option<&SensorType> {
        self.0.get(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &SensorType)> {
        self.0.iter().map(|(port, t)| (*port, t))
    }
}

impl FromStr for SensorOverrides {
    type Err = PluxError;

    /// Parse `port:TYPE` pairs separated by commas, e.g. `1:EMG,2:RSP,9:SpO2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut overrides = SensorOverrides::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (port, kind) = entry.split_once(':').ok_or_else(|| {
                PluxError::InvalidOverride(format!(
                    "'{}' is not a port:TYPE pair (expected e.g. 1:EMG,2:RSP)",
                    entry
                ))
            })?;
            let port = port.trim().parse::<u16>().map_err(|_| {
                PluxError::InvalidOverride(format!("'{}' is not a valid port", port.trim()))
            })?;
            overrides.insert(port, kind.parse()?);
        }
        Ok(overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(SensorType::Acc(Some(Axis::Y)).to_string(), "ACC_Y");
        assert_eq!(SensorType::Acc(None).to_string(), "ACC");
        assert_eq!(SensorType::Unknown(999).to_string(), "Unknown_Type999");
        assert_eq!(SensorType::SpO2.to_string(), "SpO2");
    }

    #[test]
    fn test_parse_round_trips_labels() {
        for t in [
            SensorType::Emg,
            SensorType::SpO2,
            SensorType::Acc(None),
            SensorType::Acc(Some(Axis::Z)),
            SensorType::Unknown(42),
        ] {
            assert_eq!(t.to_string().parse::<SensorType>().unwrap(), t);
        }
        assert_eq!("spo2".parse::<SensorType>().unwrap(), SensorType::SpO2);
        assert!("FOO".parse::<SensorType>().is_err());
    }

    #[test]
    fn test_channel_counts() {
        assert_eq!(SensorType::SpO2.channel_count(), 2);
        assert_eq!(SensorType::Acc(None).channel_count(), 3);
        assert_eq!(SensorType::Acc(Some(Axis::X)).channel_count(), 1);
        assert_eq!(SensorType::Unknown(3).channel_count(), 1);
    }

    #[test]
    fn test_parse_overrides() {
        let o: SensorOverrides = "1:emg, 2:RSP,9:SpO2".parse().unwrap();
        assert_eq!(o.get(1), Some(&SensorType::Emg));
        assert_eq!(o.get(2), Some(&SensorType::Rsp));
        assert_eq!(o.get(9), Some(&SensorType::SpO2));
        assert!("".parse::<SensorOverrides>().unwrap().is_empty());
        assert!("1=EMG".parse::<SensorOverrides>().is_err());
        assert!("x:EMG".parse::<SensorOverrides>().is_err());
    }

    #[test]
    fn test_descriptor_from_json() {
        let d: SensorDescriptor = serde_json::from_str(
            r#"{"port": 3, "type": 4, "characteristics": {"axis": "Z"}, "productID": "ACC-3x"}"#,
        )
        .unwrap();
        assert_eq!(d.port, 3);
        assert_eq!(d.type_code, 4);
        assert_eq!(d.characteristics["axis"], "Z");
        assert_eq!(d.product_id.as_deref(), Some("ACC-3x"));
        assert!(d.serial.is_none());
    }
}
