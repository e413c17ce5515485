//! Helper-process side of the acquisition peripheral
//!
//! The analog sampler runs in its own process, launched by the host's
//! supervisor. This module holds everything that runs there:
//!
//! - [`AcquisitionDevice`] - The sampler's ring buffer interface
//! - [`SimulatedDevice`] - Scripted/synthetic stand-in for the hardware
//! - [`DaqWorker`] - Control loop driving the session machine and pipeline
//! - [`ScopeMonitor`] - The preview helper the acquisition helper launches
//!
//! # Process layout
//!
//! ```text
//! host ──control──► daq helper ──control──► scope helper
//!                              ──ch A────►
//!                              ──ch B────►
//!                              ──frames──►
//! ```
//!
//! The scope's control link is found by suffix search; its three data links
//! are bound under the same suffix afterwards.
//!
//! # Example
//!
//! ```ignore
//! use rigsync::backend::{run_acquisition_helper, SimulatedDevice};
//!
//! let report = run_acquisition_helper(&config, "rigsync-daq", suffix, device, None)?;
//! ```

pub mod device;
pub mod scope;
pub mod sim_device;
pub mod worker;

pub use device::AcquisitionDevice;
pub use scope::{preview_bases, ScopeMonitor, Trace};
pub use sim_device::{SignalPattern, SimulatedDevice, SyntheticSignal};
pub use worker::{DaqWorker, WorkerReport};

use crate::config::{AcquisitionConfig, RigConfig};
use crate::error::Result;
use crate::link::Link;
use crate::pipeline::{AcquisitionPipeline, PreviewFanout};
use crate::supervisor::{connect_back, Peripheral, SpawnOptions, Supervisor};
use crate::types::PeripheralKind;

/// Launch the preview helper and attach its three data links.
pub fn launch_preview(
    supervisor: &Supervisor,
    config: &AcquisitionConfig,
    argv: &[String],
    context: &str,
) -> Result<(Peripheral, PreviewFanout<Link>)> {
    let mut peripheral = supervisor.spawn_and_handshake(
        PeripheralKind::Preview,
        &config.scope_socket_base,
        argv,
        context,
        &SpawnOptions::default(),
    )?;
    let suffix = peripheral.link().name().suffix();

    match attach_data_links(supervisor, &config.scope_socket_base, suffix, context) {
        Ok([a, b, fr]) => Ok((
            peripheral,
            PreviewFanout::with_sinks(config.preview_decimation, a, b, fr),
        )),
        Err(e) => {
            peripheral.shutdown(supervisor.policy().close());
            Err(e)
        }
    }
}

fn attach_data_links(
    supervisor: &Supervisor,
    scope_base: &str,
    suffix: u32,
    context: &str,
) -> Result<[Link; 3]> {
    let [base_a, base_b, base_fr] = preview_bases(scope_base);
    Ok([
        supervisor.attach(&base_a, suffix, context)?,
        supervisor.attach(&base_b, suffix, context)?,
        supervisor.attach(&base_fr, suffix, context)?,
    ])
}

/// Entry point of the acquisition helper process.
///
/// Connects back to `socket_base` + `suffix`, launches the preview helper
/// with `preview_command` if previews are enabled, then runs the worker
/// until the host quits or disappears.
pub fn run_acquisition_helper<D: AcquisitionDevice>(
    config: &RigConfig,
    socket_base: &str,
    suffix: u32,
    device: D,
    preview_command: Option<Vec<String>>,
) -> Result<WorkerReport> {
    let policy = config.timeouts.clone();
    let (mut control, context) =
        connect_back(socket_base, suffix, policy.connect_back(), policy.handshake())?;
    control.set_liveness(Some(policy.liveness()));
    tracing::info!(socket = %control.name(), context = %context, "Connected to host");

    let supervisor = Supervisor::new(policy.clone());
    let acquisition = &config.acquisition;
    let mut preview = None;
    let mut fanout = PreviewFanout::new(acquisition.preview_decimation);
    match preview_command {
        Some(argv) if acquisition.preview => {
            match launch_preview(&supervisor, acquisition, &argv, &context) {
                Ok((peripheral, links)) => {
                    preview = Some(peripheral);
                    fanout = links;
                }
                Err(e) => tracing::warn!("Running without preview: {}", e),
            }
        }
        _ => tracing::debug!("Preview disabled"),
    }

    let pipeline = AcquisitionPipeline::new(device, acquisition.clone(), fanout);
    let mut worker = DaqWorker::new(control, pipeline, policy).with_mirror(config.mirror.clone());
    if let Some(peripheral) = preview {
        worker = worker.with_preview(peripheral);
    }
    Ok(worker.run())
}

/// Entry point of the preview helper process.
pub fn run_preview_helper(config: &RigConfig, scope_base: &str, suffix: u32) -> Result<()> {
    let monitor = ScopeMonitor::connect(scope_base, suffix, config.timeouts.clone())?;
    monitor.run();
    Ok(())
}
