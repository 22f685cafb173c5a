//! # plux-lsl - sensor auto-detection and streaming bridge for PLUX hubs
//!
//! Turns the loosely-typed sensor metadata of a PLUX biosignal hub into a
//! stable channel layout and streams demultiplexed frames to an output sink
//! (Lab Streaming Layer with the `lsl` feature). Provides:
//! - Sensor type resolution from type codes, characteristics and productIds
//! - Channel layout expansion (SpO2 → RED/INFRARED, bare ACC → X/Y/Z)
//! - Raw frame demultiplexing for packed and pre-split frames
//! - A session driving any [`device::PluxDevice`] into any [`sink::StreamBackend`]
//! - C FFI over schema expansion, resolution and demultiplexing
//!
//! ## Quick Start
//! ```no_run
//! use plux_lsl::sim::SimulatedDevice;
//! use plux_lsl::sink::LogBackend;
//! use plux_lsl::{Session, SessionConfig};
//!
//! let mut session = Session::new(SimulatedDevice::demo(), SessionConfig::default());
//! let schema = session.discover().unwrap();
//! println!("channels: {:?}", schema.labels());
//!
//! session.create_outlet(&mut LogBackend).unwrap();
//! let stats = session.start_acquisition().unwrap();
//! println!("{} frames", stats.frames);
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod resolve;
pub mod layout;
pub mod demux;
pub mod device;
pub mod sink;
pub mod session;
pub mod sim;
pub mod config;
pub mod ffi;

pub use config::SessionConfig;
pub use demux::{demux, Demuxer};
pub use error::PluxError;
pub use layout::expand;
pub use resolve::{resolve, Resolver};
pub use session::{Session, SessionStats, ShutdownHandle};
pub use types::*;

/// Result type alias for plux-lsl operations.
pub type Result<T> = std::result::Result<T, PluxError>;
