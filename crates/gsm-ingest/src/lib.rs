pub mod decode;
pub mod frame;
pub mod gsmtap;
pub mod ingest;
pub mod source;

pub use decode::{classify, project, subtype, DecodeError, Record, RecordHeader, Variant};
pub use frame::{Frame, Layer};
pub use gsmtap::{DissectError, GSMTAP_PORT};
pub use ingest::{IngestWorker, DEFAULT_REPLAY_DELAY};
pub use source::{FrameSource, SourceConfig};
