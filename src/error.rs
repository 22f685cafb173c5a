use std::fmt;

/// Errors surfaced by the bridge.
///
/// Unrecognised sensor codes and short frames are not errors: they degrade
/// to `SensorType::Unknown` and a demux counter respectively.
#[derive(Debug, thiserror::Error)]
pub enum PluxError {
    #[error("Sensor metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Channel schema not ready (run sensor discovery first)")]
    SchemaNotReady,

    #[error("Output stream not created")]
    SinkNotReady,

    #[error("Output stream error: {0}")]
    Sink(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Failed to connect to {address} after {elapsed_secs:.1}s: {reason}")]
    ConnectionTimeout {
        address: String,
        elapsed_secs: f64,
        reason: String,
    },

    #[error("Invalid sensor override: {0}")]
    InvalidOverride(String),

    #[error("Buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &PluxError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
