//! Output stream declaration and backends.
//!
//! A [`StreamBackend`] turns a [`StreamInfo`] into an [`Outlet`]; the session
//! pushes one ordered sample per frame into that outlet. `MemoryBackend`
//! records everything for tests and `LogBackend` just logs. The `lsl` feature
//! adds [`lsl_backend::LslBackend`], which publishes on Lab Streaming Layer.

use crate::protocol::{
    DEFAULT_SAMPLING_RATE, DEFAULT_SOURCE_ID, DEFAULT_STREAM_NAME, DEFAULT_STREAM_TYPE,
};
use crate::types::ChannelSchema;
use crate::{PluxError, Result};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sample value format declared for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelFormat {
    #[default]
    Float32,
    Double64,
}

/// Per-channel metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub label: String,
    pub unit: String,
    pub channel_type: String,
}

/// Everything needed to declare an output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub name: String,
    pub stream_type: String,
    pub channel_count: usize,
    pub nominal_rate: f64,
    pub format: ChannelFormat,
    pub source_id: String,
    pub channels: Vec<ChannelMeta>,
}

impl StreamInfo {
    /// Declare a stream carrying every channel of `schema`, with default
    /// name, type, rate and source id.
    pub fn from_schema(schema: &ChannelSchema) -> Self {
        Self {
            name: DEFAULT_STREAM_NAME.to_string(),
            stream_type: DEFAULT_STREAM_TYPE.to_string(),
            channel_count: schema.len(),
            nominal_rate: DEFAULT_SAMPLING_RATE,
            format: ChannelFormat::Float32,
            source_id: DEFAULT_SOURCE_ID.to_string(),
            channels: schema
                .channels()
                .iter()
                .map(|c| ChannelMeta {
                    label: c.label.clone(),
                    unit: c.unit.clone(),
                    channel_type: c.semantic_type.clone(),
                })
                .collect(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, stream_type: impl Into<String>) -> Self {
        self.stream_type = stream_type.into();
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.nominal_rate = rate;
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }
}

/// A created output stream. Only the acquisition thread pushes into it.
pub trait Outlet {
    fn push_sample(&mut self, values: &[f64], timestamp: f64) -> Result<()>;

    /// Current time in the outlet's clock domain, in seconds.
    fn clock(&self) -> f64 {
        unix_time()
    }
}

/// Creates outlets.
pub trait StreamBackend {
    fn create_stream(&mut self, info: &StreamInfo) -> Result<Box<dyn Outlet>>;
}

/// Seconds since the Unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Default)]
struct Recording {
    streams: Vec<StreamInfo>,
    samples: Vec<Vec<f64>>,
    timestamps: Vec<f64>,
}

/// Backend that keeps declared streams and pushed samples in memory.
///
/// Clones share the same recording, so a test can keep one handle while the
/// session owns the outlet.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    recording: Arc<Mutex<Recording>>,
    fail_after: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make outlets reject every push after the first `n` samples.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// The most recently declared stream.
    pub fn stream(&self) -> Option<StreamInfo> {
        self.recording
            .lock()
            .ok()
            .and_then(|r| r.streams.last().cloned())
    }

    pub fn samples(&self) -> Vec<Vec<f64>> {
        self.recording
            .lock()
            .map(|r| r.samples.clone())
            .unwrap_or_default()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.recording
            .lock()
            .map(|r| r.timestamps.clone())
            .unwrap_or_default()
    }
}

impl StreamBackend for MemoryBackend {
    fn create_stream(&mut self, info: &StreamInfo) -> Result<Box<dyn Outlet>> {
        self.recording
            .lock()
            .map_err(|_| PluxError::Sink("recording lock poisoned".into()))?
            .streams
            .push(info.clone());
        Ok(Box::new(MemoryOutlet {
            recording: Arc::clone(&self.recording),
            fail_after: self.fail_after,
        }))
    }
}

struct MemoryOutlet {
    recording: Arc<Mutex<Recording>>,
    fail_after: Option<usize>,
}

impl Outlet for MemoryOutlet {
    fn push_sample(&mut self, values: &[f64], timestamp: f64) -> Result<()> {
        let mut rec = self
            .recording
            .lock()
            .map_err(|_| PluxError::Sink("recording lock poisoned".into()))?;
        if self.fail_after.is_some_and(|n| rec.samples.len() >= n) {
            return Err(PluxError::Sink("outlet closed".into()));
        }
        rec.samples.push(values.to_vec());
        rec.timestamps.push(timestamp);
        Ok(())
    }
}

/// Backend that only logs. Used when no streaming transport is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBackend;

impl StreamBackend for LogBackend {
    fn create_stream(&mut self, info: &StreamInfo) -> Result<Box<dyn Outlet>> {
        log::info!(
            "Stream '{}' ({}): {} channels @ {} Hz, source_id={}",
            info.name,
            info.stream_type,
            info.channel_count,
            info.nominal_rate,
            info.source_id
        );
        for (i, c) in info.channels.iter().enumerate() {
            log::info!("  [{}] {} ({}, {})", i, c.label, c.channel_type, c.unit);
        }
        Ok(Box::new(LogOutlet { pushed: 0 }))
    }
}

struct LogOutlet {
    pushed: u64,
}

impl Outlet for LogOutlet {
    fn push_sample(&mut self, values: &[f64], timestamp: f64) -> Result<()> {
        self.pushed += 1;
        log::trace!("sample {} @ {:.6}: {:?}", self.pushed, timestamp, values);
        Ok(())
    }
}

#[cfg(feature = "lsl")]
pub mod lsl_backend {
    //! Lab Streaming Layer outlet.

    use super::{ChannelFormat, Outlet, StreamBackend, StreamInfo};
    use crate::{PluxError, Result};
    use lsl::ExPushable;

    fn sink_err(e: lsl::Error) -> PluxError {
        PluxError::Sink(format!("{:?}", e))
    }

    /// Publishes streams on the local network through liblsl.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LslBackend;

    impl StreamBackend for LslBackend {
        fn create_stream(&mut self, info: &StreamInfo) -> Result<Box<dyn Outlet>> {
            let format = match info.format {
                ChannelFormat::Float32 => lsl::ChannelFormat::Float32,
                ChannelFormat::Double64 => lsl::ChannelFormat::Double64,
            };
            let count = info
                .channel_count
                .try_into()
                .map_err(|_| PluxError::Sink(format!("too many channels: {}", info.channel_count)))?;

            let mut lsl_info = lsl::StreamInfo::new(
                &info.name,
                &info.stream_type,
                count,
                info.nominal_rate,
                format,
                &info.source_id,
            )
            .map_err(sink_err)?;

            let mut channels = lsl_info.desc().append_child("channels");
            for c in &info.channels {
                channels
                    .append_child("channel")
                    .append_child_value("label", &c.label)
                    .append_child_value("unit", &c.unit)
                    .append_child_value("type", &c.channel_type);
            }

            let outlet = lsl::StreamOutlet::new(&lsl_info, 0, 360).map_err(sink_err)?;
            log::info!(
                "LSL outlet '{}' created: {} channels @ {} Hz",
                info.name,
                info.channel_count,
                info.nominal_rate
            );
            Ok(Box::new(LslOutlet {
                outlet,
                width: info.channel_count,
                buf: Vec::with_capacity(info.channel_count),
            }))
        }
    }

    struct LslOutlet {
        outlet: lsl::StreamOutlet,
        width: usize,
        buf: Vec<f32>,
    }

    impl Outlet for LslOutlet {
        fn push_sample(&mut self, values: &[f64], timestamp: f64) -> Result<()> {
            // Short samples are padded so every push matches the declared width.
            self.buf.clear();
            self.buf.extend(values.iter().take(self.width).map(|v| *v as f32));
            self.buf.resize(self.width, f32::NAN);
            self.outlet
                .push_sample_ex(&self.buf, timestamp, true)
                .map_err(sink_err)
        }

        fn clock(&self) -> f64 {
            lsl::local_clock()
        }
    }
}
