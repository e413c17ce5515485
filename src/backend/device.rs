//! Acquisition device trait
//!
//! The streaming pipeline talks to the sampling hardware only through
//! [`AcquisitionDevice`]: a ring buffer of interleaved scans that fills while
//! an acquisition command runs. Real drivers are external; the crate ships a
//! [`SimulatedDevice`](super::sim_device::SimulatedDevice).

use crate::error::Result;

/// A sampler with a hardware ring buffer of interleaved [`DaqScan`]s
///
/// [`DaqScan`]: crate::wire::DaqScan
#[cfg_attr(test, mockall::automock)]
pub trait AcquisitionDevice: Send {
    /// Start the continuous acquisition command
    fn start(&mut self) -> Result<()>;

    /// Cancel the acquisition command. Already buffered data stays readable.
    fn cancel(&mut self) -> Result<()>;

    /// Bytes currently waiting in the ring buffer
    fn buffered_bytes(&mut self) -> Result<usize>;

    /// Ring buffer size in bytes
    fn buffer_capacity(&self) -> usize;

    /// Read up to `max_bytes`. May end mid-scan.
    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>>;

    /// Whether an acquisition command is running
    fn is_running(&self) -> bool;

    /// Short description for logs
    fn describe(&self) -> String {
        "acquisition device".to_string()
    }
}
