//! Wire codec for peripheral feeds
//!
//! Every feed is a stream of fixed-stride little-endian records with no
//! framing. The codec has no I/O of its own beyond draining a non-blocking
//! reader:
//!
//! | Feed | Record | Stride |
//! |---|---|---|
//! | Motion sensor | [`MotionSample`] `(t, dt, y, x)` as `f64` | 32 |
//! | Camera frame times | [`FrameTime`] `f64` | 8 |
//! | Lick sensor | [`LickSample`] `(t, amplitude)` as `f64` | 16 |
//! | Image sensor / frame-marker preview | [`ByteSample`] `i8` | 1 |
//! | Analog preview | [`AnalogSample`] `f32` | 4 |
//! | Acquisition scan | [`DaqScan`] 3 x `u32` | 12 |
//!
//! # Example
//!
//! ```ignore
//! use rigsync::wire::{FeedDecoder, LickSample};
//!
//! let mut licks = FeedDecoder::<LickSample>::new();
//! let drained = link.drain();
//! for lick in licks.push(&drained.bytes) {
//!     // ...
//! }
//! ```

pub mod decoder;
pub mod record;

pub use decoder::{
    decode_motion, decode_prefix, drain_nonblocking, encode, Drained, FeedDecoder, DRAIN_CHUNK,
};
pub use record::{
    lick_table, AnalogSample, ByteSample, DaqScan, FrameTime, LickSample, MotionSample, Record,
};
