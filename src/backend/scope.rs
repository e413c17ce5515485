//! Preview helper: consumes the decimated acquisition stream.
//!
//! Connects back to one control link and three data links (channel A,
//! channel B, frame markers) under the same suffix, keeps a rolling window
//! of each channel and logs a summary at a fixed interval. The preview
//! window in [`crate::frontend`] steps the same monitor and plots it.

use crate::config::TimeoutPolicy;
use crate::error::Result;
use crate::link::{control::ControlMessage, Link};
use crate::session::SessionState;
use crate::supervisor::connect_back;
use crate::wire::{AnalogSample, ByteSample, FeedDecoder};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept per channel
pub const DEFAULT_WINDOW: usize = 10_000;

/// Interval between summaries
pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

/// Socket base names of the three data links for a preview control base
pub fn preview_bases(scope_base: &str) -> [String; 3] {
    [
        format!("{}-a", scope_base),
        format!("{}-b", scope_base),
        format!("{}-fr", scope_base),
    ]
}

/// Rolling window over one channel
#[derive(Debug, Clone)]
pub struct Trace {
    values: VecDeque<f32>,
    capacity: usize,
    total: u64,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    pub fn extend(&mut self, values: impl IntoIterator<Item = f32>) {
        for v in values {
            if self.values.len() == self.capacity {
                self.values.pop_front();
            }
            self.values.push_back(v);
            self.total += 1;
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.total = 0;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Samples seen since the last clear
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Index, counted since the last clear, of the oldest sample kept
    pub fn first_index(&self) -> u64 {
        self.total - self.values.len() as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied()
    }

    /// `(min, max, mean)` of the window
    pub fn summary(&self) -> Option<(f32, f32, f32)> {
        if self.values.is_empty() {
            return None;
        }
        let (min, max, sum) = self.values.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
        );
        Some((min, max, (sum / self.values.len() as f64) as f32))
    }
}

/// Preview consumer state
pub struct ScopeMonitor {
    control: Link,
    data: [Link; 3],
    decode_a: FeedDecoder<AnalogSample>,
    decode_b: FeedDecoder<AnalogSample>,
    decode_frames: FeedDecoder<ByteSample>,
    pub channel_a: Trace,
    pub channel_b: Trace,
    pub frames: Trace,
    state: SessionState,
    policy: TimeoutPolicy,
    last_summary: Instant,
    finished: bool,
}

impl ScopeMonitor {
    pub fn new(control: Link, data: [Link; 3], policy: TimeoutPolicy) -> Self {
        Self {
            control,
            data,
            decode_a: FeedDecoder::new(),
            decode_b: FeedDecoder::new(),
            decode_frames: FeedDecoder::new(),
            channel_a: Trace::new(DEFAULT_WINDOW),
            channel_b: Trace::new(DEFAULT_WINDOW),
            frames: Trace::new(DEFAULT_WINDOW),
            state: SessionState::Idle,
            policy,
            last_summary: Instant::now(),
            finished: false,
        }
    }

    /// Connect back to the acquisition helper under `suffix`.
    pub fn connect(scope_base: &str, suffix: u32, policy: TimeoutPolicy) -> Result<Self> {
        let (mut control, context) =
            connect_back(scope_base, suffix, policy.connect_back(), policy.handshake())?;
        control.set_liveness(Some(policy.liveness()));
        tracing::info!(socket = %control.name(), context = %context, "Preview connected");

        let [a, b, fr] = preview_bases(scope_base);
        let connect = |base: &str| -> Result<Link> {
            connect_back(base, suffix, policy.connect_back(), policy.handshake()).map(|(l, _)| l)
        };
        let data = [connect(&a)?, connect(&b)?, connect(&fr)?];
        Ok(Self::new(control, data, policy))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// One iteration. Returns `false` once the monitor should exit.
    pub fn step(&mut self) -> bool {
        if let Some(parsed) = self.control.poll_control() {
            match parsed {
                Ok(ControlMessage::Quit) => {
                    tracing::info!("Preview asked to quit");
                    return false;
                }
                Ok(ControlMessage::Begin { name }) => {
                    tracing::info!("Preview of {}", name);
                    self.channel_a.clear();
                    self.channel_b.clear();
                    self.frames.clear();
                    self.state = SessionState::Recording;
                }
                Ok(ControlMessage::Stop) => {
                    self.log_summary();
                    self.state = SessionState::Idle;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Preview ignoring control payload: {}", e),
            }
        }
        if !self.control.is_connected() {
            tracing::warn!("Preview lost its control link");
            return false;
        }

        let [a, b, fr] = &mut self.data;
        let bytes_a = a.drain().bytes;
        let bytes_b = b.drain().bytes;
        let bytes_fr = fr.drain().bytes;
        self.channel_a
            .extend(self.decode_a.push(&bytes_a).into_iter().map(|s| s.0));
        self.channel_b
            .extend(self.decode_b.push(&bytes_b).into_iter().map(|s| s.0));
        self.frames
            .extend(self.decode_frames.push(&bytes_fr).into_iter().map(|s| s.0 as f32));

        if self.last_summary.elapsed() >= SUMMARY_INTERVAL {
            self.log_summary();
            self.last_summary = Instant::now();
        }
        true
    }

    fn log_summary(&self) {
        if let (Some((min_a, max_a, mean_a)), Some((min_b, max_b, mean_b))) =
            (self.channel_a.summary(), self.channel_b.summary())
        {
            tracing::info!(
                samples = self.channel_a.total(),
                frames_high = self.frames.summary().map(|(_, _, m)| m).unwrap_or(0.0),
                "A [{:.3}, {:.3}] mean {:.3} | B [{:.4}, {:.4}] mean {:.4}",
                min_a,
                max_a,
                mean_a,
                min_b,
                max_b,
                mean_b
            );
        }
    }

    /// Close the data links and acknowledge on the control link.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        for link in &mut self.data {
            link.shutdown();
        }
        self.control.acknowledge_close(self.policy.send());
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run until quit or link loss, then acknowledge.
    pub fn run(mut self) {
        let sleep = self.policy.idle_sleep().max(Duration::from_millis(1));
        while self.step() {
            std::thread::sleep(sleep);
        }
        self.finish();
    }
}
