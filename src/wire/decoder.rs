//! Record-boundary-safe decoding of byte streams.
//!
//! A socket read can end anywhere inside a record. [`decode_prefix`] only
//! interprets the stride-aligned prefix and hands back the rest, and
//! [`FeedDecoder`] keeps that rest as carry for the next read, so decoding a
//! stream in arbitrary pieces yields the same records as decoding it whole.

use std::io::{ErrorKind, Read};
use std::marker::PhantomData;

use super::record::{MotionSample, Record};
use crate::types::wall_clock_secs;

/// Size of one receive while draining a socket
pub const DRAIN_CHUNK: usize = 4096;

/// Decode every complete record in `bytes`.
///
/// Consumes exactly `floor(len / STRIDE) * STRIDE` bytes and returns the
/// unconsumed tail unchanged.
pub fn decode_prefix<R: Record>(bytes: &[u8]) -> (Vec<R>, &[u8]) {
    let aligned = bytes.len() - bytes.len() % R::STRIDE;
    let (body, rest) = bytes.split_at(aligned);
    let records = body.chunks_exact(R::STRIDE).map(R::read).collect();
    (records, rest)
}

/// Encode a slice of records back-to-back.
pub fn encode<R: Record>(records: &[R]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * R::STRIDE);
    for record in records {
        record.write(&mut out);
    }
    out
}

/// Decode a motion buffer; never returns an empty sample set.
///
/// When no complete record is present a single idle sample stamped with the
/// current wall clock is returned instead, since consumers sum over the
/// result.
pub fn decode_motion(bytes: &[u8]) -> (Vec<MotionSample>, &[u8]) {
    let (mut samples, rest) = decode_prefix::<MotionSample>(bytes);
    if samples.is_empty() {
        samples.push(MotionSample::idle(wall_clock_secs()));
    }
    (samples, rest)
}

/// Bytes collected by one drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Drained {
    pub bytes: Vec<u8>,
    /// The peer closed its end (a read returned 0)
    pub peer_closed: bool,
}

/// Read from a non-blocking source until a read would block.
///
/// Errors other than `WouldBlock`/`Interrupted` end the drain like
/// `WouldBlock` does; what was read so far is kept.
pub fn drain_nonblocking<S: Read + ?Sized>(source: &mut S) -> Drained {
    let mut drained = Drained::default();
    let mut chunk = [0u8; DRAIN_CHUNK];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => {
                drained.peer_closed = true;
                break;
            }
            Ok(n) => drained.bytes.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::trace!("Receive ended with {}", e);
                break;
            }
        }
    }
    drained
}

/// Incremental decoder for one feed.
///
/// Holds the partial record left over by the previous read.
#[derive(Debug)]
pub struct FeedDecoder<R: Record> {
    carry: Vec<u8>,
    _record: PhantomData<R>,
}

impl<R: Record> Default for FeedDecoder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> FeedDecoder<R> {
    pub fn new() -> Self {
        Self {
            carry: Vec::with_capacity(R::STRIDE),
            _record: PhantomData,
        }
    }

    /// Append newly read bytes and decode every record now complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<R> {
        if self.carry.is_empty() {
            let (records, rest) = decode_prefix::<R>(bytes);
            self.carry.extend_from_slice(rest);
            return records;
        }

        let mut joined = std::mem::take(&mut self.carry);
        joined.extend_from_slice(bytes);
        let (records, rest) = decode_prefix::<R>(&joined);
        self.carry = rest.to_vec();
        records
    }

    /// Bytes waiting for the rest of their record
    pub fn carry(&self) -> &[u8] {
        &self.carry
    }

    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    /// Drop any partial record.
    pub fn reset(&mut self) -> usize {
        let dropped = self.carry.len();
        self.carry.clear();
        dropped
    }
}

impl FeedDecoder<MotionSample> {
    /// Like [`FeedDecoder::push`], but substitutes one idle sample when
    /// nothing complete arrived.
    pub fn push_motion(&mut self, bytes: &[u8]) -> Vec<MotionSample> {
        let mut samples = self.push(bytes);
        if samples.is_empty() {
            samples.push(MotionSample::idle(wall_clock_secs()));
        }
        samples
    }
}
