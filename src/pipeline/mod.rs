//! Streaming acquisition pipeline.
//!
//! Runs inside the acquisition helper. Scans flow from the device ring buffer
//! to per-channel temp files and decimated preview links, and are
//! consolidated into one recording when the session stops.
//!
//! # Architecture
//!
//! ```text
//! [AcquisitionDevice] ──► FeedDecoder<DaqScan> ──► ScanConverter ──┬──► ChannelFiles (all samples)
//!                                                                 └──► PreviewFanout (every Nth)
//! stop: cancel ──► drain tail ──► consolidate ──► <output> + <stem>_edge.bin ──► mirror
//! ```

pub mod calibration;
pub mod consolidate;
pub mod convert;
pub mod executor;
pub mod mirror;
pub mod recording;
pub mod sinks;

pub use calibration::Calibration;
pub use consolidate::{
    consolidate, find_edges, rescue, rescue_frames_only, rescue_single_channel, Consolidated,
};
pub use convert::{ConvertedBlock, ScanConverter};
pub use executor::AcquisitionPipeline;
pub use mirror::{await_mirrors, spawn_mirror, MirrorJob};
pub use recording::{edge_path, read_edges, write_edges, Recording, RecordingHeader};
pub use sinks::{
    output_stem, temp_path, temp_paths, ChannelFiles, Offer, PreviewFanout, PreviewSink,
};
