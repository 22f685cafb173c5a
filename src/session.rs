//! Acquisition session.
//!
//! A session runs strictly in order: [`Session::discover`] derives and freezes
//! the channel schema, [`Session::create_outlet`] declares the output stream
//! from it, and [`Session::start_acquisition`] runs the frame loop on the
//! calling thread until the device ends the stream, the outlet fails, or a
//! [`ShutdownHandle`] clears the running flag.

use crate::config::SessionConfig;
use crate::demux::Demuxer;
use crate::device::{FrameAction, PluxDevice};
use crate::layout;
use crate::resolve::{apply_overrides, Resolver};
use crate::sink::{Outlet, StreamBackend};
use crate::types::{ChannelSchema, DeviceProperties, SourceConfig};
use crate::{PluxError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Clears a session's running flag from another thread.
///
/// This is the only piece of session state that may cross threads; the
/// acquisition loop notices the change before the next frame.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Why the acquisition loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The running flag was cleared.
    Shutdown,
    /// The device stopped delivering frames.
    StreamEnded,
    /// The outlet rejected a sample.
    SinkError,
}

/// Summary of one acquisition run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub frames: u64,
    pub short_frames: u64,
    pub elapsed_secs: f64,
    pub stop_reason: StopReason,
}

pub struct Session<D: PluxDevice> {
    device: D,
    config: SessionConfig,
    running: Arc<AtomicBool>,
    schema: Option<ChannelSchema>,
    sources: Vec<SourceConfig>,
    outlet: Option<Box<dyn Outlet>>,
}

impl<D: PluxDevice> Session<D> {
    pub fn new(device: D, config: SessionConfig) -> Self {
        Self {
            device,
            config,
            running: Arc::new(AtomicBool::new(true)),
            schema: None,
            sources: Vec::new(),
            outlet: None,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// The frozen schema, once [`Session::discover`] has run.
    pub fn schema(&self) -> Option<&ChannelSchema> {
        self.schema.as_ref()
    }

    /// Acquisition sources that [`Session::start_acquisition`] will request.
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Enumerate sensors, resolve their types and freeze the channel schema.
    ///
    /// If the hub cannot describe its sensors the fixed RSP/EMG/EDA layout on
    /// ports 1-3 is used instead. Calling this again returns the frozen
    /// schema unchanged.
    pub fn discover(&mut self) -> Result<&ChannelSchema> {
        if self.schema.is_none() {
            let schema = self.derive_schema()?;
            self.schema = Some(schema);
        } else {
            log::debug!("Channel schema already frozen, skipping discovery");
        }
        self.schema.as_ref().ok_or(PluxError::SchemaNotReady)
    }

    fn derive_schema(&mut self) -> Result<ChannelSchema> {
        let mut ports = match self.device.sensors() {
            Ok(sensors) if sensors.is_empty() => {
                return Err(PluxError::Device("No sensors detected on device".into()));
            }
            Ok(sensors) => {
                let properties = self.device.properties().unwrap_or_else(|e| {
                    log::warn!("Device properties unavailable ({}), continuing without", e);
                    DeviceProperties::new()
                });
                Resolver::new(self.config.detection).resolve_all(&sensors, &properties)
            }
            Err(e) => {
                log::warn!("Sensor enumeration failed ({}), using fallback layout", e);
                layout::fallback_ports()
            }
        };

        apply_overrides(&mut ports, &self.config.overrides);
        let sources = layout::source_configs(&ports);

        let schema = layout::expand(&ports);
        log::info!(
            "Detected {} ports -> {} channels",
            schema.ports().len(),
            schema.len()
        );
        for c in schema.channels() {
            log::debug!("  {} (port {}, {})", c.label, c.source_port, c.semantic_type);
        }

        self.sources = sources;
        Ok(schema)
    }

    /// Declare the output stream for the frozen schema.
    pub fn create_outlet(&mut self, backend: &mut dyn StreamBackend) -> Result<()> {
        let schema = self.schema.as_ref().ok_or(PluxError::SchemaNotReady)?;
        let info = self.config.stream_info(schema);
        let outlet = backend.create_stream(&info)?;
        log::info!(
            "Output stream '{}' ready with {} channels",
            info.name,
            info.channel_count
        );
        self.outlet = Some(outlet);
        Ok(())
    }

    /// Start the device and stream frames until stopped, then stop and
    /// close the device.
    ///
    /// Blocks the calling thread, which becomes the only writer to the
    /// outlet. The outlet is consumed once the device has started. If the
    /// device refuses to start it is stopped but left open, and the outlet is
    /// kept, so the call can be retried.
    pub fn start_acquisition(&mut self) -> Result<SessionStats> {
        let schema = self.schema.as_ref().ok_or(PluxError::SchemaNotReady)?;
        if self.outlet.is_none() {
            return Err(PluxError::SinkNotReady);
        }

        let mut demuxer = Demuxer::new(schema, self.config.frame_layout);
        let port_order = schema.port_order();
        let debug_interval = self.config.debug_interval;
        let running = self.running.clone();

        log::info!(
            "Starting acquisition at {} Hz on ports {:?} ({:?} frames)",
            self.config.sampling_rate,
            port_order,
            demuxer.layout()
        );
        if let Err(e) = self.device.start(self.config.sampling_rate, &self.sources) {
            log::error!("Device failed to start: {}", e);
            if let Err(stop_err) = self.device.stop() {
                log::warn!("Device stop failed: {}", stop_err);
            }
            return Err(e);
        }
        let mut outlet = self.outlet.take().ok_or(PluxError::SinkNotReady)?;

        let started = Instant::now();
        let mut last_report = started;
        let mut frames = 0u64;
        let mut stop_reason = StopReason::StreamEnded;
        let mut sink_error: Option<PluxError> = None;
        let mut values = Vec::with_capacity(demuxer.channel_count());

        let mut handler = |seq: u64, frame: &[f64]| {
            if !running.load(Ordering::Relaxed) {
                stop_reason = StopReason::Shutdown;
                return FrameAction::Stop;
            }

            let timestamp = outlet.clock();
            demuxer.demux_into(frame, &mut values);
            if let Err(e) = outlet.push_sample(&values, timestamp) {
                log::error!("Failed to push sample {}: {}", seq, e);
                stop_reason = StopReason::SinkError;
                sink_error = Some(e);
                return FrameAction::Stop;
            }
            frames += 1;

            if debug_interval > 0 && frames % debug_interval == 0 {
                let elapsed = last_report.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 {
                    debug_interval as f64 / elapsed
                } else {
                    0.0
                };
                log::debug!(
                    "Frame #{} seq={} raw={:?} out={:?} rate={:.1} Hz",
                    frames,
                    seq,
                    frame,
                    values,
                    rate
                );
                last_report = Instant::now();
            }
            FrameAction::Continue
        };

        let loop_result = self.device.run_loop(&mut handler);
        let short_frames = demuxer.stats().short_frames;

        if let Err(e) = self.device.stop() {
            log::warn!("Device stop failed: {}", e);
        }
        if let Err(e) = self.device.close() {
            log::warn!("Device close failed: {}", e);
        }

        let stats = SessionStats {
            frames,
            short_frames,
            elapsed_secs: started.elapsed().as_secs_f64(),
            stop_reason,
        };
        log::info!(
            "Acquisition ended ({:?}): {} frames in {:.1}s, {} short",
            stats.stop_reason,
            stats.frames,
            stats.elapsed_secs,
            stats.short_frames
        );

        loop_result?;
        match sink_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
