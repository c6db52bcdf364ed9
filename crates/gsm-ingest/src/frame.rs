//! Dissected frame model.
//!
//! A [`Frame`] is the in-flight unit between the frame source and the decoder
//! workers: a capture ordinal, a wall-clock sniff timestamp, and a stack of
//! named layers. Each layer is a flat string-keyed field view, the way a
//! packet dissector presents its protocol tree. Layer names are stored in
//! lowercase (`"gsmtap"`, `"gsm_a.ccch"`); [`Frame::highest_layer`] reports
//! the uppercase form used by the classification table.

/// One protocol layer: an ordered set of `field name → string value` pairs.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    fields: Vec<(String, String)>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a field. Later pushes with the same key shadow nothing; the
    /// first occurrence wins on lookup, matching dissector behaviour where a
    /// field name resolves to its first instance in the tree.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Names of every field present, in dissection order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }
}

/// A dissected frame, handed from the frame source to a decoder worker.
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based ordinal within the capture (or live session).
    pub number: u64,
    /// Wall-clock receive time, seconds since the Unix epoch.
    pub sniff_timestamp: f64,
    layers: Vec<Layer>,
    info: String,
}

impl Frame {
    pub fn new(number: u64, sniff_timestamp: f64) -> Self {
        Self { number, sniff_timestamp, layers: Vec::new(), info: String::new() }
    }

    pub fn push_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// Uppercase name of the topmost layer, e.g. `GSM_A.CCCH`.
    pub fn highest_layer(&self) -> String {
        self.layers
            .last()
            .map(|l| l.name.to_uppercase())
            .unwrap_or_default()
    }

    /// The topmost layer itself.
    pub fn top_layer(&self) -> Option<&Layer> {
        self.layers.last()
    }

    /// Indexed access by lowercase layer name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Best-effort one-line summary of the frame contents. Empty when the
    /// dissector recognized nothing beyond the transport header.
    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn set_info(&mut self, info: impl Into<String>) {
        self.info = info.into();
    }
}
