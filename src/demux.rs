//! Raw frame demultiplexing.
//!
//! Walks the physical ports in order, consuming raw frame elements and
//! emitting logical channel values in the same order the layout expander
//! declared them. Two frame shapes are supported:
//!
//! | Layout | SpO2 | ACC (no axis) | Other |
//! |---|---|---|---|
//! | [`FrameLayout::Packed`] | 1 element → RED = bits 0-15, INFRARED = bits 16-31 | 1 element → X, Y, Z = bytes 0, 1, 2 | 1 → 1 |
//! | [`FrameLayout::Split`] | 2 → 2 | 3 → 3 | 1 → 1 |
//!
//! A frame too short for a port drops that port (and everything after it)
//! instead of failing.

use crate::protocol::{unpack_acc, unpack_spo2};
use crate::types::{ChannelSchema, FrameLayout, SensorType};

/// Demultiplex one packed frame against `schema`, walking `port_order`.
///
/// Ports absent from the schema are skipped without consuming elements.
pub fn demux(frame: &[f64], schema: &ChannelSchema, port_order: &[u16]) -> Vec<f64> {
    demux_with_layout(frame, schema, port_order, FrameLayout::Packed)
}

/// [`demux`] for an explicit frame layout.
pub fn demux_with_layout(
    frame: &[f64],
    schema: &ChannelSchema,
    port_order: &[u16],
    layout: FrameLayout,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(schema.len());
    let types = port_order.iter().filter_map(|port| schema.sensor_type(*port));
    unpack_frame(frame, types, layout, &mut out);
    out
}

/// Returns `true` when every port found its data in `frame`.
fn unpack_frame<'a>(
    frame: &[f64],
    types: impl Iterator<Item = &'a SensorType>,
    layout: FrameLayout,
    out: &mut Vec<f64>,
) -> bool {
    let mut cursor = 0;
    for sensor_type in types {
        let slots = layout.slots(sensor_type);
        let Some(raw) = frame.get(cursor..cursor + slots) else {
            return false;
        };
        cursor += slots;

        match (layout, sensor_type) {
            (FrameLayout::Packed, SensorType::SpO2) => out.extend(unpack_spo2(raw[0])),
            (FrameLayout::Packed, SensorType::Acc(None)) => out.extend(unpack_acc(raw[0])),
            _ => out.extend_from_slice(raw),
        }
    }
    true
}

/// Frame accounting kept by a [`Demuxer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Frames processed.
    pub frames: u64,
    /// Frames shorter than the layout requires.
    pub short_frames: u64,
    /// Logical channel values missing from short frames.
    pub missing_values: u64,
}

/// Stateful demultiplexer bound to one frozen schema.
#[derive(Debug, Clone)]
pub struct Demuxer {
    types: Vec<SensorType>,
    layout: FrameLayout,
    channel_count: usize,
    frame_len: usize,
    stats: DemuxStats,
}

impl Demuxer {
    pub fn new(schema: &ChannelSchema, layout: FrameLayout) -> Self {
        let types: Vec<SensorType> = schema
            .ports()
            .iter()
            .map(|p| p.sensor_type.clone())
            .collect();
        let frame_len = types.iter().map(|t| layout.slots(t)).sum();
        Self {
            types,
            layout,
            channel_count: schema.len(),
            frame_len,
            stats: DemuxStats::default(),
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Raw elements a complete frame carries.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Values a complete frame produces.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn demux(&mut self, frame: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.channel_count);
        self.demux_into(frame, &mut out);
        out
    }

    /// Clear `out` and fill it with the logical values of `frame`.
    pub fn demux_into(&mut self, frame: &[f64], out: &mut Vec<f64>) {
        out.clear();
        self.stats.frames += 1;

        if unpack_frame(frame, self.types.iter(), self.layout, out) {
            return;
        }

        self.stats.short_frames += 1;
        self.stats.missing_values += (self.channel_count - out.len()) as u64;
        let n = self.stats.short_frames;
        if n <= 5 || n % 100 == 0 {
            log::warn!(
                "Short frame #{}: {} of {} raw values, emitting {} of {} channels",
                n,
                frame.len(),
                self.frame_len,
                out.len(),
                self.channel_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::expand;
    use crate::types::{Axis, ResolvedPort};

    fn schema() -> ChannelSchema {
        expand(&[
            ResolvedPort::new(1, SensorType::Emg),
            ResolvedPort::new(2, SensorType::SpO2),
            ResolvedPort::new(3, SensorType::Acc(None)),
        ])
    }

    #[test]
    fn test_demux_packed() {
        let out = demux(&[10.0, 12345.0, 123456.0], &schema(), &[1, 2, 3]);
        assert_eq!(out.len(), 6);
        assert_eq!(out[0], 10.0);
        assert_eq!(out[1], (12345 & 0xFFFF) as f64);
        assert_eq!(out[2], ((12345 >> 16) & 0xFFFF) as f64);
        assert_eq!(out[3], (123456 & 0xFF) as f64);
        assert_eq!(out[4], ((123456 >> 8) & 0xFF) as f64);
        assert_eq!(out[5], ((123456 >> 16) & 0xFF) as f64);
    }

    #[test]
    fn test_demux_split_passes_through() {
        let out = demux_with_layout(
            &[10.0, 500.0, 600.0, 1.0, 2.0, 3.0],
            &schema(),
            &[1, 2, 3],
            FrameLayout::Split,
        );
        assert_eq!(out, vec![10.0, 500.0, 600.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_truncated_last_port_is_omitted() {
        let out = demux(&[10.0, 12345.0], &schema(), &[1, 2, 3]);
        assert_eq!(out, vec![10.0, 12345.0, 0.0]);

        let out = demux_with_layout(
            &[10.0, 500.0, 600.0, 1.0, 2.0],
            &schema(),
            &[1, 2, 3],
            FrameLayout::Split,
        );
        assert_eq!(out, vec![10.0, 500.0, 600.0]);
    }

    #[test]
    fn test_empty_frame() {
        assert!(demux(&[], &schema(), &[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_unknown_port_in_order_is_skipped() {
        let out = demux(&[7.0, 1.0], &schema(), &[1, 42, 2]);
        assert_eq!(out, vec![7.0, 1.0, 0.0]);
    }

    #[test]
    fn test_axis_qualified_acc_passes_through() {
        let schema = expand(&[
            ResolvedPort::new(5, SensorType::Acc(Some(Axis::X))),
            ResolvedPort::new(6, SensorType::Acc(Some(Axis::Y))),
        ]);
        assert_eq!(demux(&[123456.0, 8.0], &schema, &[5, 6]), vec![123456.0, 8.0]);
    }

    #[test]
    fn test_demuxer_counts_short_frames() {
        let mut d = Demuxer::new(&schema(), FrameLayout::Packed);
        assert_eq!(d.frame_len(), 3);
        assert_eq!(d.channel_count(), 6);

        assert_eq!(d.demux(&[1.0, 2.0, 3.0]).len(), 6);
        assert_eq!(d.demux(&[1.0, 2.0]).len(), 3);
        assert_eq!(d.demux(&[1.0, 2.0, 3.0, 4.0]).len(), 6);

        let stats = d.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.short_frames, 1);
        assert_eq!(stats.missing_values, 3);
    }

    #[test]
    fn test_demuxer_split_frame_len() {
        let d = Demuxer::new(&schema(), FrameLayout::Split);
        assert_eq!(d.frame_len(), 6);
    }
}
