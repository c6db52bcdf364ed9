//! Frame classification and projection into typed records.
//!
//! A dissected [`Frame`] is classified against a fixed decision table on
//! `(highest layer, RR message subtype)` and projected into one [`Record`]
//! variant. The record carries everything the store needs; the frame is
//! dropped afterwards.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Local, TimeZone};
use thiserror::Error;

use crate::frame::Frame;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Record variant, one per target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Generic,
    Paging,
    LacCid,
    /// Neighbour-cell reports. No dissector path produces these yet; the
    /// variant, its insert path and its table exist for the inconsistent-LAC
    /// rule and for when neighbour list dissection lands.
    Neighbors,
}

impl Variant {
    /// Table the variant's rows land in.
    pub fn table(self) -> &'static str {
        match self {
            Variant::Generic => "PACKETS",
            Variant::Paging => "PAGE",
            Variant::LacCid => "LAC_CID",
            Variant::Neighbors => "NEIGHBORS",
        }
    }
}

/// The decision table. Everything not matched is a generic packet.
pub fn classify(highest_layer: &str, subtype: Option<&str>) -> Variant {
    match (highest_layer, subtype) {
        ("GSM_A.CCCH", Some("33")) => Variant::Paging,
        ("GSM_A.DTAP", Some("30")) => Variant::LacCid,
        _ => Variant::Generic,
    }
}

/// RR message subtype of the topmost layer, if any.
///
/// The primary field name is the one the dissector emits; the short form is
/// accepted as a fallback for field views produced by other dissectors.
pub fn subtype(frame: &Frame) -> Option<&str> {
    let layer = frame.top_layer()?;
    layer
        .get("gsm_a_dtap_msg_rr_type")
        .or_else(|| layer.get("msg_rr_type"))
}

// ---------------------------------------------------------------------------
// Typed records
// ---------------------------------------------------------------------------

/// Fields common to every record, sourced from the GSMTAP layer.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    /// Unique within a run; primary key in every table.
    pub hash: String,
    pub frame_nr: u32,
    pub channel: u32,
    pub signal_dbm: f64,
    pub arfcn: u32,
    /// Epoch seconds, from the frame's sniff timestamp.
    pub unix_time: f64,
    /// Local time, `%Y-%m-%d%H:%M:%S`.
    pub iso_time: String,
}

/// One decoded frame, ready for insertion.
#[derive(Debug, Clone)]
pub enum Record {
    Generic(RecordHeader),
    Paging {
        header: RecordHeader,
        id_type: String,
        msg_type: String,
        mode: String,
        chan_req_ch1: String,
        chan_req_ch2: String,
    },
    LacCid {
        header: RecordHeader,
        lac: u32,
        cid: u32,
    },
    Neighbors {
        header: RecordHeader,
        lac: u32,
        cid: u32,
        n_cell_lac: u32,
    },
}

impl Record {
    pub fn header(&self) -> &RecordHeader {
        match self {
            Record::Generic(header) => header,
            Record::Paging { header, .. } => header,
            Record::LacCid { header, .. } => header,
            Record::Neighbors { header, .. } => header,
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Record::Generic(_) => Variant::Generic,
            Record::Paging { .. } => Variant::Paging,
            Record::LacCid { .. } => Variant::LacCid,
            Record::Neighbors { .. } => Variant::Neighbors,
        }
    }
}

/// Per-frame decode failure. The frame is skipped with a warning.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("layer {0} not present")]
    MissingLayer(&'static str),
    #[error("field {0} missing")]
    MissingField(&'static str),
    #[error("field {field} unparseable: {value:?}")]
    BadField { field: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Classify and project a frame into its record.
pub fn project(frame: &Frame) -> Result<Record, DecodeError> {
    let variant = classify(&frame.highest_layer(), subtype(frame));
    let header = project_header(frame)?;

    match variant {
        Variant::Generic => Ok(Record::Generic(header)),
        Variant::Paging => {
            let layer = frame
                .top_layer()
                .ok_or(DecodeError::MissingLayer("gsm_a.ccch"))?;
            Ok(Record::Paging {
                header,
                id_type: text_field(layer, "gsm_a_ie_mobileid_type")?,
                msg_type: text_field(layer, "gsm_a_dtap_msg_rr_type")?,
                mode: text_field(layer, "gsm_a_rr_page_mode")?,
                chan_req_ch1: text_field(layer, "gsm_a_rr_chnl_needed_ch1")?,
                chan_req_ch2: text_field(layer, "gsm_a_rr_chnl_needed_ch2")?,
            })
        }
        Variant::LacCid => {
            let layer = frame
                .top_layer()
                .ok_or(DecodeError::MissingLayer("gsm_a.dtap"))?;
            // The serving cell's LAC rides in gsm_a_lac and its cell identity
            // in gsm_a_bssmap_cell_ci. Keep the mapping straight.
            Ok(Record::LacCid {
                header,
                lac: num_field(layer, "gsm_a_lac")?,
                cid: num_field(layer, "gsm_a_bssmap_cell_ci")?,
            })
        }
        Variant::Neighbors => {
            let layer = frame
                .top_layer()
                .ok_or(DecodeError::MissingLayer("gsm_a.dtap"))?;
            Ok(Record::Neighbors {
                header,
                lac: num_field(layer, "gsm_a_lac")?,
                cid: num_field(layer, "gsm_a_bssmap_cell_ci")?,
                n_cell_lac: num_field(layer, "gsm_a_rr_ncell_lac")?,
            })
        }
    }
}

fn project_header(frame: &Frame) -> Result<RecordHeader, DecodeError> {
    let gsmtap = frame
        .layer("gsmtap")
        .ok_or(DecodeError::MissingLayer("gsmtap"))?;
    Ok(RecordHeader {
        hash: compute_hash(frame),
        frame_nr: num_field(gsmtap, "frame_nr")?,
        channel: num_field(gsmtap, "chan_type")?,
        signal_dbm: num_field(gsmtap, "signal_dbm")?,
        arfcn: num_field(gsmtap, "arfcn")?,
        unix_time: frame.sniff_timestamp,
        iso_time: people_time(frame.sniff_timestamp),
    })
}

fn text_field(layer: &crate::frame::Layer, name: &'static str) -> Result<String, DecodeError> {
    layer
        .get(name)
        .map(str::to_owned)
        .ok_or(DecodeError::MissingField(name))
}

fn num_field<T: std::str::FromStr>(
    layer: &crate::frame::Layer,
    name: &'static str,
) -> Result<T, DecodeError> {
    let value = layer.get(name).ok_or(DecodeError::MissingField(name))?;
    value.parse().map_err(|_| DecodeError::BadField {
        field: name,
        value: value.to_owned(),
    })
}

/// Human-readable timestamp with date and time glued together — downstream
/// tooling expects exactly this shape, separator-free.
pub fn people_time(unix_time: f64) -> String {
    let secs = unix_time.trunc() as i64;
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Row key, unique within a run.
///
/// Mixes the capture ordinal with a monotonic nanosecond component so that
/// replaying the same capture file twice in one run cannot collide on the
/// primary key.
fn compute_hash(frame: &Frame) -> String {
    let mut hasher = DefaultHasher::new();
    frame.number.hash(&mut hasher);
    frame.sniff_timestamp.to_bits().hash(&mut hasher);
    now_ns().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Nanosecond monotonic timestamp; `CLOCK_MONOTONIC_RAW` on Linux, an
/// `Instant` fallback elsewhere.
fn now_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::Instant;
        static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let epoch = EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
