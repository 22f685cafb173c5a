//! Simulated hub.
//!
//! Implements the device traits without hardware: sensors come from a JSON
//! description (or a built-in demo hub), frames are either scripted or
//! synthesised from per-port waveforms on a background generator thread.

use crate::device::{Acquisition, FrameAction, FrameHandler, SensorQuery};
use crate::protocol::{
    pack_acc, pack_spo2, TYPE_ACC, TYPE_ECG, TYPE_EDA, TYPE_EMG, TYPE_RSP, TYPE_SPO2,
};
use crate::resolve;
use crate::types::{DeviceProperties, FrameLayout, SensorDescriptor, SensorType, SourceConfig};
use crate::{PluxError, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Deserialize;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// JSON shape accepted by [`SimulatedDevice::from_json`].
///
/// ```json
/// {
///   "sensors": [
///     { "port": 1, "type": 0 },
///     { "port": 9, "type": 69, "productID": "SpO2 finger clip" }
///   ],
///   "properties": { "description": "biosignalsplux" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubDescription {
    #[serde(default)]
    pub sensors: Vec<SensorDescriptor>,
    #[serde(default)]
    pub properties: DeviceProperties,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Signal {
    Analog,
    SpO2,
    Acc,
}

#[derive(Debug, Clone)]
struct PortSignal {
    signal: Signal,
    freq_hz: f64,
}

struct FramePlan {
    script: Option<Vec<Vec<f64>>>,
    ports: Vec<PortSignal>,
    layout: FrameLayout,
    rate: f64,
    limit: Option<u64>,
    realtime: bool,
}

/// A hub that lives entirely in memory.
pub struct SimulatedDevice {
    description: HubDescription,
    fail_enumeration: bool,
    layout: FrameLayout,
    script: Option<Vec<Vec<f64>>>,
    frame_limit: Option<u64>,
    realtime: bool,
    started: Option<(f64, Vec<SourceConfig>)>,
    receiver: Option<Receiver<Vec<f64>>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    closed: bool,
}

impl SimulatedDevice {
    pub fn new(sensors: Vec<SensorDescriptor>) -> Self {
        Self::from_description(HubDescription {
            sensors,
            properties: DeviceProperties::new(),
        })
    }

    pub fn from_description(description: HubDescription) -> Self {
        Self {
            description,
            fail_enumeration: false,
            layout: FrameLayout::Packed,
            script: None,
            frame_limit: None,
            realtime: false,
            started: None,
            receiver: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
            closed: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let description: HubDescription = serde_json::from_str(json)
            .map_err(|e| PluxError::Device(format!("Invalid hub description: {}", e)))?;
        Ok(Self::from_description(description))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            PluxError::Device(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Demo hub: EMG, ECG, EDA, RSP, a SpO2 clip on port 9 and a bare
    /// three-axis accelerometer on port 11.
    pub fn demo() -> Self {
        let mut properties = DeviceProperties::new();
        properties.insert("description".into(), "biosignalsplux (simulated)".into());
        Self::from_description(HubDescription {
            sensors: vec![
                SensorDescriptor::new(1, TYPE_EMG),
                SensorDescriptor::new(2, TYPE_ECG),
                SensorDescriptor::new(3, TYPE_EDA),
                SensorDescriptor::new(4, TYPE_RSP),
                SensorDescriptor::new(9, TYPE_SPO2).with_product_id("SpO2 finger clip"),
                SensorDescriptor::new(11, TYPE_ACC),
            ],
            properties,
        })
    }

    /// Make [`SensorQuery::sensors`] fail as if the hub could not describe
    /// its sensors.
    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Deliver exactly these frames, then end the stream.
    pub fn with_frames(mut self, frames: Vec<Vec<f64>>) -> Self {
        self.script = Some(frames);
        self
    }

    /// End the stream after `n` frames.
    pub fn with_frame_limit(mut self, n: u64) -> Self {
        self.frame_limit = Some(n);
        self
    }

    /// Pace synthetic frames at the acquisition rate instead of as fast as
    /// possible.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Rate and sources passed to the last [`Acquisition::start`].
    pub fn started_with(&self) -> Option<&(f64, Vec<SourceConfig>)> {
        self.started.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.thread.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waveform for one configured source. A port emits two SpO2
    /// derivations only when its source asks for them.
    fn port_signal(&self, index: usize, source: &SourceConfig) -> PortSignal {
        let signal = if source.derivations.is_some() {
            Signal::SpO2
        } else {
            self.description
                .sensors
                .iter()
                .find(|s| s.port == source.port)
                .map(|s| match resolve::resolve(s, &self.description.properties) {
                    SensorType::Acc(None) => Signal::Acc,
                    _ => Signal::Analog,
                })
                .unwrap_or(Signal::Analog)
        };
        PortSignal {
            signal,
            freq_hz: 1.0 + index as f64 * 0.5,
        }
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.receiver = None;
    }
}

impl SensorQuery for SimulatedDevice {
    fn sensors(&mut self) -> Result<Vec<SensorDescriptor>> {
        if self.closed {
            return Err(PluxError::Device("device closed".into()));
        }
        if self.fail_enumeration {
            return Err(PluxError::MetadataUnavailable(
                "simulated hub does not report sensors".into(),
            ));
        }
        Ok(self.description.sensors.clone())
    }

    fn properties(&mut self) -> Result<DeviceProperties> {
        if self.closed {
            return Err(PluxError::Device("device closed".into()));
        }
        Ok(self.description.properties.clone())
    }
}

impl Acquisition for SimulatedDevice {
    fn start(&mut self, rate: f64, sources: &[SourceConfig]) -> Result<()> {
        if self.closed {
            return Err(PluxError::Device("device closed".into()));
        }
        if rate.is_nan() || rate <= 0.0 {
            return Err(PluxError::Device(format!("invalid sampling rate {}", rate)));
        }
        self.shutdown();

        let plan = FramePlan {
            script: self.script.clone(),
            ports: sources
                .iter()
                .enumerate()
                .map(|(i, s)| self.port_signal(i, s))
                .collect(),
            layout: self.layout,
            rate,
            limit: self.frame_limit,
            realtime: self.realtime,
        };

        let (sender, receiver) = crossbeam_channel::bounded(256);
        self.stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = self.stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("plux-sim".into())
            .spawn(move || {
                generator_loop(plan, sender, stop_clone);
            })
            .map_err(|e| PluxError::Device(format!("Failed to spawn generator thread: {}", e)))?;

        log::info!(
            "Simulated acquisition started: {} Hz, {} sources",
            rate,
            sources.len()
        );
        self.started = Some((rate, sources.to_vec()));
        self.receiver = Some(receiver);
        self.thread = Some(thread);
        Ok(())
    }

    fn run_loop(&mut self, handler: &mut dyn FrameHandler) -> Result<()> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| PluxError::Device("acquisition not started".into()))?;

        let mut seq = 0u64;
        loop {
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(frame) => {
                    if handler.on_frame(seq, &frame) == FrameAction::Stop {
                        return Ok(());
                    }
                    seq += 1;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    log::info!("Simulated stream ended after {} frames", seq);
                    return Ok(());
                }
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.shutdown();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown();
        self.closed = true;
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Append one synthetic sample for `port` at time `t`.
fn synthesize(port: &PortSignal, layout: FrameLayout, t: f64, out: &mut Vec<f64>) {
    let phase = TAU * port.freq_hz * t;
    match port.signal {
        Signal::Analog => out.push((32768.0 + 8000.0 * phase.sin()).round()),
        Signal::SpO2 => {
            let red = (30000.0 + 2000.0 * phase.sin()).round() as u16;
            let infrared = (40000.0 + 2000.0 * (phase + 0.5).sin()).round() as u16;
            match layout {
                FrameLayout::Packed => out.push(pack_spo2(red, infrared)),
                FrameLayout::Split => out.extend([red as f64, infrared as f64]),
            }
        }
        Signal::Acc => {
            let axis = |k: f64| (128.0 + 60.0 * (phase + k * TAU / 3.0).sin()).round() as u8;
            let (x, y, z) = (axis(0.0), axis(1.0), axis(2.0));
            match layout {
                FrameLayout::Packed => out.push(pack_acc(x, y, z)),
                FrameLayout::Split => out.extend([x as f64, y as f64, z as f64]),
            }
        }
    }
}

/// Runs in a dedicated thread, feeding frames until the script or frame
/// limit is exhausted, the stop flag is set, or the receiver goes away.
fn generator_loop(plan: FramePlan, sender: Sender<Vec<f64>>, stop_flag: Arc<AtomicBool>) {
    let epoch = Instant::now();
    let period = 1.0 / plan.rate;
    let mut script = plan.script.map(|frames| frames.into_iter());
    let mut n = 0u64;

    log::debug!("Simulated generator started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::debug!("Simulated generator stopping (stop flag set)");
            break;
        }
        if plan.limit.is_some_and(|limit| n >= limit) {
            break;
        }

        let t = n as f64 * period;
        let mut frame = match script.as_mut() {
            Some(frames) => match frames.next() {
                Some(frame) => frame,
                None => break,
            },
            None => {
                let mut frame = Vec::with_capacity(plan.ports.len() * 3);
                for port in &plan.ports {
                    synthesize(port, plan.layout, t, &mut frame);
                }
                frame
            }
        };

        if plan.realtime {
            let due = epoch + Duration::from_secs_f64(t);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }

        // Block in short slices so a stop request is still noticed.
        loop {
            match sender.send_timeout(frame, Duration::from_millis(100)) {
                Ok(()) => break,
                Err(crossbeam_channel::SendTimeoutError::Timeout(f)) => {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    frame = f;
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    log::debug!("Simulated generator disconnected");
                    return;
                }
            }
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::source_configs;
    use crate::resolve::Resolver;

    fn sources_for(device: &mut SimulatedDevice) -> Vec<SourceConfig> {
        let sensors = device.sensors().unwrap();
        let properties = device.properties().unwrap();
        source_configs(&Resolver::default().resolve_all(&sensors, &properties))
    }

    fn collect(device: &mut SimulatedDevice) -> Vec<(u64, Vec<f64>)> {
        let mut frames = Vec::new();
        let mut handler = |seq: u64, frame: &[f64]| {
            frames.push((seq, frame.to_vec()));
            FrameAction::Continue
        };
        device.run_loop(&mut handler).unwrap();
        frames
    }

    #[test]
    fn test_scripted_frames_in_order() {
        let mut device = SimulatedDevice::new(vec![SensorDescriptor::new(1, 0)])
            .with_frames(vec![vec![1.0], vec![2.0], vec![3.0]]);
        let sources = sources_for(&mut device);
        device.start(1000.0, &sources).unwrap();

        let frames = collect(&mut device);
        assert_eq!(
            frames,
            vec![(0, vec![1.0]), (1, vec![2.0]), (2, vec![3.0])]
        );
    }

    #[test]
    fn test_synthetic_frame_shape() {
        let mut device = SimulatedDevice::demo().with_frame_limit(10);
        let sources = sources_for(&mut device);
        device.start(1000.0, &sources).unwrap();
        let frames = collect(&mut device);
        assert_eq!(frames.len(), 10);
        assert!(frames.iter().all(|(_, f)| f.len() == 6));

        let mut device = SimulatedDevice::demo()
            .with_layout(FrameLayout::Split)
            .with_frame_limit(10);
        device.start(1000.0, &sources).unwrap();
        let frames = collect(&mut device);
        // 4 analog + SpO2 (2) + bare ACC (3)
        assert!(frames.iter().all(|(_, f)| f.len() == 9));
    }

    #[test]
    fn test_handler_stop_ends_loop() {
        let mut device = SimulatedDevice::demo();
        let sources = sources_for(&mut device);
        device.start(1000.0, &sources).unwrap();

        let mut count = 0;
        let mut handler = |_: u64, _: &[f64]| {
            count += 1;
            if count == 5 {
                FrameAction::Stop
            } else {
                FrameAction::Continue
            }
        };
        device.run_loop(&mut handler).unwrap();
        assert_eq!(count, 5);
        device.stop().unwrap();
        assert!(!device.is_streaming());
    }

    #[test]
    fn test_failing_enumeration() {
        let mut device = SimulatedDevice::demo().failing_enumeration();
        assert!(matches!(
            device.sensors(),
            Err(PluxError::MetadataUnavailable(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let mut device = SimulatedDevice::from_json(
            r#"{
                "sensors": [
                    {"port": 1, "type": 0},
                    {"port": 5, "type": 4, "characteristics": {"axis": "X"}},
                    {"port": 9, "type": 69, "productID": "SpO2 clip"}
                ],
                "properties": {"productID": "biosignalsplux"}
            }"#,
        )
        .unwrap();
        let sensors = device.sensors().unwrap();
        assert_eq!(sensors.len(), 3);
        assert_eq!(sensors[1].characteristics["axis"], "X");
        assert_eq!(sensors[2].product_id.as_deref(), Some("SpO2 clip"));
        assert_eq!(device.properties().unwrap()["productID"], "biosignalsplux");

        assert!(SimulatedDevice::from_json("{not json").is_err());
    }

    #[test]
    fn test_run_loop_requires_start() {
        let mut device = SimulatedDevice::demo();
        let mut handler = |_: u64, _: &[f64]| FrameAction::Continue;
        assert!(device.run_loop(&mut handler).is_err());
    }

    #[test]
    fn test_closed_device_rejects_calls() {
        let mut device = SimulatedDevice::demo();
        device.close().unwrap();
        assert!(device.is_closed());
        assert!(device.sensors().is_err());
        assert!(device.start(1000.0, &[]).is_err());
    }
}
