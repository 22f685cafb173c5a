//! C FFI layer for plux-lsl.
//!
//! Exposes schema expansion, single-sensor resolution and frame
//! demultiplexing through opaque handles, for hosts that own the vendor SDK
//! themselves. The generated C header is written to `include/plux_lsl.h` by
//! cbindgen.

use crate::demux::demux;
use crate::error::LastError;
use crate::layout::{expand, fallback_schema};
use crate::resolve::resolve;
use crate::types::{
    ChannelSchema, DeviceProperties, ResolvedPort, SensorDescriptor, SensorOverrides,
};
use crate::PluxError;
use std::ffi::{c_char, c_int, CStr, CString};

static LAST_ERROR: LastError = LastError::new();

/// Opaque channel schema handle for C consumers.
pub struct PlxSchema {
    schema: ChannelSchema,
    labels: Vec<CString>,
}

impl PlxSchema {
    fn new(schema: ChannelSchema) -> Self {
        let labels = schema
            .labels()
            .into_iter()
            .map(|l| CString::new(l).unwrap_or_default())
            .collect();
        Self { schema, labels }
    }

    fn into_raw(self) -> *mut PlxSchema {
        Box::into_raw(Box::new(self))
    }
}

/// Build a schema from a `port:TYPE` list such as `"1:EMG,9:SpO2,11:ACC"`.
/// Ports are laid out in ascending order.
/// Returns NULL on error (check plx_last_error()).
///
/// # Safety
/// `list` must be a valid null-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn plx_schema_parse(list: *const c_char) -> *mut PlxSchema {
    if list.is_null() {
        return std::ptr::null_mut();
    }
    let list = CStr::from_ptr(list).to_string_lossy();

    match list.parse::<SensorOverrides>() {
        Ok(entries) => {
            LAST_ERROR.clear();
            let ports: Vec<ResolvedPort> = entries
                .iter()
                .map(|(port, t)| ResolvedPort::new(port, t.clone()))
                .collect();
            PlxSchema::new(expand(&ports)).into_raw()
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Build a schema by resolving raw `(port, type code)` pairs, in order.
/// Returns NULL on error.
///
/// # Safety
/// `ports` and `codes` must each point to `len` elements, or be null.
#[no_mangle]
pub unsafe extern "C" fn plx_schema_from_codes(
    ports: *const u16,
    codes: *const i32,
    len: usize,
) -> *mut PlxSchema {
    if ports.is_null() || codes.is_null() {
        return std::ptr::null_mut();
    }
    let ports = std::slice::from_raw_parts(ports, len);
    let codes = std::slice::from_raw_parts(codes, len);
    let properties = DeviceProperties::new();

    let resolved: Vec<ResolvedPort> = ports
        .iter()
        .zip(codes)
        .map(|(&port, &code)| {
            ResolvedPort::new(port, resolve(&SensorDescriptor::new(port, code), &properties))
        })
        .collect();
    LAST_ERROR.clear();
    PlxSchema::new(expand(&resolved)).into_raw()
}

/// The RSP/EMG/EDA schema used when a hub cannot enumerate its sensors.
#[no_mangle]
pub extern "C" fn plx_schema_fallback() -> *mut PlxSchema {
    PlxSchema::new(fallback_schema()).into_raw()
}

/// Free a schema handle.
///
/// # Safety
/// `schema` must be a pointer returned by a `plx_schema_*` constructor, or null.
#[no_mangle]
pub unsafe extern "C" fn plx_schema_free(schema: *mut PlxSchema) {
    if !schema.is_null() {
        drop(Box::from_raw(schema));
    }
}

/// Number of logical channels, or -1 for a null handle.
///
/// # Safety
/// `schema` must be a valid schema pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn plx_schema_channel_count(schema: *const PlxSchema) -> c_int {
    if schema.is_null() {
        return -1;
    }
    let schema = &*schema;
    c_int::try_from(schema.schema.len()).unwrap_or(c_int::MAX)
}

/// Label of channel `index`. The pointer stays valid for the lifetime of
/// the schema. Returns NULL when out of range.
///
/// # Safety
/// `schema` must be a valid schema pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn plx_schema_channel_label(
    schema: *const PlxSchema,
    index: usize,
) -> *const c_char {
    if schema.is_null() {
        return std::ptr::null();
    }
    let schema = &*schema;
    schema
        .labels
        .get(index)
        .map_or(std::ptr::null(), |l| l.as_ptr())
}

/// Resolve one sensor and write its type label (e.g. `SpO2`, `ACC_Y`) into
/// `out`, null-terminated. Returns the label length, or -1 if `out` is too
/// small.
///
/// # Safety
/// `product_id` must be a valid null-terminated string or null; `out` must
/// point to `out_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn plx_resolve(
    port: u16,
    type_code: i32,
    product_id: *const c_char,
    out: *mut c_char,
    out_len: usize,
) -> c_int {
    if out.is_null() {
        return -1;
    }
    let mut sensor = SensorDescriptor::new(port, type_code);
    if !product_id.is_null() {
        sensor.product_id = Some(CStr::from_ptr(product_id).to_string_lossy().into_owned());
    }
    let label = resolve(&sensor, &DeviceProperties::new()).to_string();

    let bytes = label.as_bytes();
    if bytes.len() >= out_len {
        LAST_ERROR.set(&PluxError::BufferTooSmall {
            needed: bytes.len() + 1,
            available: out_len,
        });
        return -1;
    }
    let out = std::slice::from_raw_parts_mut(out, out_len);
    for (dst, &b) in out.iter_mut().zip(bytes) {
        *dst = b as c_char;
    }
    out[bytes.len()] = 0;
    LAST_ERROR.clear();
    bytes.len() as c_int
}

/// Demultiplex one packed frame (ports in schema order) into `out`.
/// Returns the number of values written, or -1 on error.
///
/// # Safety
/// `frame` must point to `len` values and `out` to `cap` values.
#[no_mangle]
pub unsafe extern "C" fn plx_demux(
    schema: *const PlxSchema,
    frame: *const f64,
    len: usize,
    out: *mut f64,
    cap: usize,
) -> c_int {
    if schema.is_null() || out.is_null() || (frame.is_null() && len > 0) {
        return -1;
    }
    let schema = &(*schema).schema;
    let frame = if len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(frame, len)
    };

    let values = demux(frame, schema, &schema.port_order());
    if values.len() > cap {
        LAST_ERROR.set(&PluxError::BufferTooSmall {
            needed: values.len(),
            available: cap,
        });
        return -1;
    }
    std::ptr::copy_nonoverlapping(values.as_ptr(), out, values.len());
    LAST_ERROR.clear();
    values.len() as c_int
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next plx_* call.
#[no_mangle]
pub extern "C" fn plx_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}
