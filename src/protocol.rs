//! Vendor code tables, port conventions, and frame bit-field helpers.

use crate::types::{Axis, SensorType};

// -- Raw sensor type codes --
pub const TYPE_EMG: i32 = 0;
pub const TYPE_ECG: i32 = 1;
pub const TYPE_EDA: i32 = 2;
pub const TYPE_EEG: i32 = 3;
pub const TYPE_ACC: i32 = 4;
pub const TYPE_GYRO: i32 = 5;
pub const TYPE_MAG: i32 = 6;
pub const TYPE_RSP: i32 = 7;
pub const TYPE_PZT: i32 = 8;
pub const TYPE_TEMP: i32 = 9;
/// Digital pulse-oximetry sensor.
pub const TYPE_SPO2: i32 = 69;
pub const TYPE_PPG: i32 = 70;

/// Map a raw type code through the canonical code table.
///
/// Code 69 is handled before this table is consulted and is deliberately
/// absent here.
pub fn type_from_code(code: i32) -> Option<SensorType> {
    let t = match code {
        TYPE_EMG => SensorType::Emg,
        TYPE_ECG => SensorType::Ecg,
        TYPE_EDA => SensorType::Eda,
        TYPE_EEG => SensorType::Eeg,
        TYPE_ACC => SensorType::Acc(None),
        TYPE_GYRO => SensorType::Gyro,
        TYPE_MAG => SensorType::Mag,
        TYPE_RSP => SensorType::Rsp,
        TYPE_PZT => SensorType::Pzt,
        TYPE_TEMP => SensorType::Temp,
        TYPE_PPG => SensorType::Ppg,
        _ => return None,
    };
    Some(t)
}

/// Case-insensitive productId substrings, checked in order; first hit wins.
pub const PRODUCT_PATTERNS: &[(&[&str], SensorType)] = &[
    (&["ecg", "electrocardiogram"], SensorType::Ecg),
    (&["emg", "electromyogram"], SensorType::Emg),
    (&["eda", "gsr", "galvanic"], SensorType::Eda),
    (&["spo2", "oximetry"], SensorType::SpO2),
    (&["acc", "accelerometer"], SensorType::Acc(None)),
    (&["ppg", "photoplethysmography"], SensorType::Ppg),
    (&["resp", "respiratory"], SensorType::Rsp),
];

/// Device property key that may carry a product identifier.
pub const PRODUCT_ID_KEY: &str = "productID";

// -- Characteristic keys --
pub const CHAR_AXIS: &str = "axis";
pub const CHAR_CHANNEL: &str = "channel";
/// Current-source gain.
pub const CHAR_I_GAIN: &str = "iGain";
/// Voltage gain.
pub const CHAR_V_GAIN: &str = "vGain";
/// Low-pass cut-off in Hz.
pub const CHAR_LP_FREQ: &str = "lpFreq";

/// Axis for an accelerometer `channel` characteristic (0, 1, 2 → X, Y, Z).
pub fn axis_from_channel(channel: i64) -> Option<Axis> {
    match channel {
        0 => Some(Axis::X),
        1 => Some(Axis::Y),
        2 => Some(Axis::Z),
        _ => None,
    }
}

/// Axis implied by the port an accelerometer is plugged into.
///
/// Hubs conventionally wire three-axis accelerometers to ports 5-7, or to
/// 8-10 on the alternative arrangement.
pub fn axis_from_port(port: u16) -> Option<Axis> {
    match port {
        5 | 8 => Some(Axis::X),
        6 | 9 => Some(Axis::Y),
        7 | 10 => Some(Axis::Z),
        _ => None,
    }
}

// -- Electrical classification thresholds --
pub const EDA_MIN_I_GAIN: f64 = 100.0;
pub const RSP_MAX_V_GAIN: f64 = 10.0;
pub const RSP_MAX_LP_HZ: f64 = 5.0;
pub const BIOPOTENTIAL_MIN_V_GAIN: f64 = 500.0;
pub const ECG_MAX_LP_HZ: f64 = 200.0;
pub const EMG_MIN_LP_HZ: f64 = 400.0;

// -- Acquisition defaults --
pub const DEFAULT_FREQ_DIVISOR: u32 = 1;
pub const DEFAULT_N_BITS: u8 = 16;

/// Ports and types used when sensor enumeration fails.
pub const FALLBACK_PORTS: [(u16, SensorType); 3] = [
    (1, SensorType::Rsp),
    (2, SensorType::Emg),
    (3, SensorType::Eda),
];

// -- Output stream defaults --
pub const DEFAULT_STREAM_NAME: &str = "biosignalsplux";
pub const DEFAULT_STREAM_TYPE: &str = "Physiological";
pub const DEFAULT_SOURCE_ID: &str = "biosignalsplux";
pub const DEFAULT_SAMPLING_RATE: f64 = 1000.0;

/// Unit written for every channel. Legacy placeholder, kept even for
/// non-voltage quantities so downstream consumers see the same metadata.
pub const CHANNEL_UNIT: &str = "microvolts";

/// Split a packed SpO2 value into `[RED, INFRARED]` (low and high 16 bits).
pub fn unpack_spo2(raw: f64) -> [f64; 2] {
    let v = raw as i64;
    [(v & 0xFFFF) as f64, ((v >> 16) & 0xFFFF) as f64]
}

/// Split a packed accelerometer value into `[X, Y, Z]` (one byte each, LSB first).
pub fn unpack_acc(raw: f64) -> [f64; 3] {
    let v = raw as i64;
    [
        (v & 0xFF) as f64,
        ((v >> 8) & 0xFF) as f64,
        ((v >> 16) & 0xFF) as f64,
    ]
}

/// Pack `[RED, INFRARED]` the way [`unpack_spo2`] expects.
pub fn pack_spo2(red: u16, infrared: u16) -> f64 {
    (((infrared as u32) << 16) | red as u32) as f64
}

/// Pack `[X, Y, Z]` the way [`unpack_acc`] expects.
pub fn pack_acc(x: u8, y: u8, z: u8) -> f64 {
    (((z as u32) << 16) | ((y as u32) << 8) | x as u32) as f64
}

/// Format a Bluetooth address for the vendor SDK on the current platform.
///
/// Windows expects a `BTH` prefix; macOS and Linux expect dash separators.
pub fn format_address(address: &str) -> String {
    format_address_for(address, cfg!(target_os = "windows"))
}

fn format_address_for(address: &str, windows: bool) -> String {
    let address = address.trim();
    if windows {
        if address.starts_with("BTH") {
            address.to_string()
        } else {
            format!("BTH{}", address)
        }
    } else {
        address.replace(':', "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        assert_eq!(type_from_code(0), Some(SensorType::Emg));
        assert_eq!(type_from_code(1), Some(SensorType::Ecg));
        assert_eq!(type_from_code(2), Some(SensorType::Eda));
        assert_eq!(type_from_code(70), Some(SensorType::Ppg));
        assert_eq!(type_from_code(999), None);
    }

    #[test]
    fn test_unpack_spo2() {
        assert_eq!(unpack_spo2(12345.0), [12345.0, 0.0]);
        assert_eq!(unpack_spo2(pack_spo2(0x1234, 0xBEEF)), [4660.0, 48879.0]);
    }

    #[test]
    fn test_unpack_acc() {
        // 123456 = 0x01E240
        assert_eq!(unpack_acc(123456.0), [64.0, 226.0, 1.0]);
        assert_eq!(unpack_acc(pack_acc(1, 2, 3)), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_axis_from_port() {
        assert_eq!(axis_from_port(5), Some(Axis::X));
        assert_eq!(axis_from_port(9), Some(Axis::Y));
        assert_eq!(axis_from_port(10), Some(Axis::Z));
        assert_eq!(axis_from_port(1), None);
    }

    #[test]
    fn test_format_address() {
        assert_eq!(
            format_address_for("00:07:80:8C:08:DF", false),
            "00-07-80-8C-08-DF"
        );
        assert_eq!(
            format_address_for("00:07:80:8C:08:DF", true),
            "BTH00:07:80:8C:08:DF"
        );
        assert_eq!(
            format_address_for("BTH00:07:80:8C:08:DF", true),
            "BTH00:07:80:8C:08:DF"
        );
    }
}
