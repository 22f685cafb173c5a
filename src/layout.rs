//! Channel layout expansion.
//!
//! Each port contributes one logical channel, except SpO2 (`RED`,
//! `INFRARED`) and an accelerometer with no resolved axis (`X`, `Y`, `Z`).
//! Labels are `<type>_<port>` or `<type>_<port>_<derivation>`.

use crate::protocol::{self, CHANNEL_UNIT, DEFAULT_FREQ_DIVISOR, DEFAULT_N_BITS};
use crate::types::{
    ChannelSchema, DerivationMask, LogicalChannel, ResolvedPort, SensorType, SourceConfig,
};

/// Build the output schema from resolved ports, in the given order.
pub fn expand(ports: &[ResolvedPort]) -> ChannelSchema {
    let mut channels = Vec::with_capacity(ports.iter().map(|p| p.sensor_type.channel_count()).sum());

    for p in ports {
        let semantic_type = p.sensor_type.semantic_type();
        let derivations = p.sensor_type.derivations();
        if derivations.is_empty() {
            channels.push(LogicalChannel {
                source_port: p.port,
                label: format!("{}_{}", p.sensor_type, p.port),
                unit: CHANNEL_UNIT.to_string(),
                semantic_type,
            });
        } else {
            channels.extend(derivations.iter().map(|d| LogicalChannel {
                source_port: p.port,
                label: format!("{}_{}_{}", p.sensor_type, p.port, d),
                unit: CHANNEL_UNIT.to_string(),
                semantic_type: semantic_type.clone(),
            }));
        }
    }

    ChannelSchema::from_parts(ports.to_vec(), channels)
}

/// Ports used when sensor enumeration fails: RSP on 1, EMG on 2, EDA on 3.
pub fn fallback_ports() -> Vec<ResolvedPort> {
    protocol::FALLBACK_PORTS
        .iter()
        .map(|(port, t)| ResolvedPort::new(*port, t.clone()))
        .collect()
}

/// Schema substituted when sensor enumeration fails.
pub fn fallback_schema() -> ChannelSchema {
    expand(&fallback_ports())
}

/// Acquisition sources for resolved ports, one per port, in order.
///
/// Only ports whose final type is SpO2 get both derivations enabled, so the
/// elements the device emits per port always match what the schema reads.
/// Every other port is configured as a plain analog source.
pub fn source_configs(ports: &[ResolvedPort]) -> Vec<SourceConfig> {
    ports
        .iter()
        .map(|p| SourceConfig {
            port: p.port,
            freq_divisor: DEFAULT_FREQ_DIVISOR,
            n_bits: DEFAULT_N_BITS,
            derivations: (p.sensor_type == SensorType::SpO2)
                .then_some(DerivationMask::RED | DerivationMask::INFRARED),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Axis;

    fn mixed() -> Vec<ResolvedPort> {
        vec![
            ResolvedPort::new(1, SensorType::Emg),
            ResolvedPort::new(2, SensorType::SpO2),
            ResolvedPort::new(3, SensorType::Acc(None)),
        ]
    }

    #[test]
    fn test_expand_mixed() {
        let schema = expand(&mixed());
        assert_eq!(schema.len(), 6);
        assert_eq!(
            schema.labels(),
            vec![
                "EMG_1",
                "SpO2_2_RED",
                "SpO2_2_INFRARED",
                "ACC_3_X",
                "ACC_3_Y",
                "ACC_3_Z"
            ]
        );
        let types: Vec<&str> = schema
            .channels()
            .iter()
            .map(|c| c.semantic_type.as_str())
            .collect();
        assert_eq!(types, vec!["EMG", "SpO2", "SpO2", "ACC", "ACC", "ACC"]);
        assert!(schema.channels().iter().all(|c| c.unit == "microvolts"));
        assert_eq!(schema.channels()[2].source_port, 2);
        assert_eq!(schema.port_order(), vec![1, 2, 3]);
    }

    #[test]
    fn test_axis_qualified_acc_is_single_channel() {
        let schema = expand(&[
            ResolvedPort::new(5, SensorType::Acc(Some(Axis::X))),
            ResolvedPort::new(6, SensorType::Acc(Some(Axis::Y))),
        ]);
        assert_eq!(schema.labels(), vec!["ACC_X_5", "ACC_Y_6"]);
        assert_eq!(schema.channels()[0].semantic_type, "ACC_X");
    }

    #[test]
    fn test_unknown_type_label() {
        let schema = expand(&[ResolvedPort::new(4, SensorType::Unknown(999))]);
        assert_eq!(schema.labels(), vec!["Unknown_Type999_4"]);
    }

    #[test]
    fn test_expand_is_idempotent() {
        let a = expand(&mixed());
        let b = expand(&mixed());
        assert_eq!(a.labels(), b.labels());
        assert_eq!(a, b);
    }

    #[test]
    fn test_order_follows_enumeration_not_port_number() {
        let schema = expand(&[
            ResolvedPort::new(3, SensorType::Eda),
            ResolvedPort::new(1, SensorType::Rsp),
        ]);
        assert_eq!(schema.labels(), vec!["EDA_3", "RSP_1"]);
    }

    #[test]
    fn test_fallback_schema() {
        assert_eq!(fallback_schema().labels(), vec!["RSP_1", "EMG_2", "EDA_3"]);
    }

    #[test]
    fn test_source_configs() {
        let ports = vec![
            ResolvedPort::new(1, SensorType::Emg),
            ResolvedPort::new(9, SensorType::SpO2),
        ];
        let sources = source_configs(&ports);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].derivations, None);
        assert_eq!(sources[0].n_bits, 16);
        assert_eq!(sources[0].freq_divisor, 1);
        assert_eq!(sources[1].port, 9);
        assert_eq!(sources[1].derivations.map(|m| m.bits()), Some(0x03));
    }

    #[test]
    fn test_source_configs_follow_final_type() {
        // A code-69 port overridden to EMG, and a SpO2 found by productId.
        let ports = vec![
            ResolvedPort::new(9, SensorType::Emg),
            ResolvedPort::new(2, SensorType::SpO2),
        ];
        let sources = source_configs(&ports);
        assert_eq!(sources[0].derivations, None);
        assert!(sources[1].derivations.is_some());
        assert!(source_configs(&fallback_ports())
            .iter()
            .all(|s| s.derivations.is_none()));
    }
}
