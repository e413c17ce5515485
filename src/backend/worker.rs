//! Acquisition helper worker loop
//!
//! Runs inside the `daq` helper process after it has connected back to the
//! host. Each iteration:
//!
//! 1. Receives whatever the host sent on the control link and feeds it to the
//!    [`SessionMachine`].
//! 2. Carries out the returned action (arm, stop, teardown).
//! 3. While recording, pumps the [`AcquisitionPipeline`], sleeping for the
//!    idle interval when nothing was ready; otherwise sleeps for the idle
//!    interval.
//!
//! # Messages to the host
//!
//! - `"primed"` followed by the 8-byte start timestamp once armed
//! - the 8-byte stop timestamp right after the acquisition is cancelled
//! - `"close"` after teardown
//!
//! Losing the host (liveness timeout or hang-up) is handled like `"quit"`,
//! including the stop sequence if a recording was running.

use crate::backend::device::AcquisitionDevice;
use crate::config::{MirrorConfig, TimeoutPolicy};
use crate::link::{control::ControlMessage, Link};
use crate::pipeline::{await_mirrors, AcquisitionPipeline, Consolidated, MirrorJob};
use crate::session::{SessionAction, SessionMachine, SessionState};
use crate::supervisor::Peripheral;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// What the worker did before exiting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerReport {
    /// Recordings consolidated
    pub completed: Vec<PathBuf>,
    /// Recordings whose consolidation failed (temp files kept)
    pub failed: Vec<PathBuf>,
    /// Recordings whose mirror copy failed or did not finish before exit
    pub unmirrored: Vec<PathBuf>,
    /// Exit was caused by losing the host rather than `"quit"`
    pub host_lost: bool,
}

/// Control loop of the acquisition helper
pub struct DaqWorker<D: AcquisitionDevice> {
    control: Link,
    pipeline: AcquisitionPipeline<D, Link>,
    machine: SessionMachine,
    policy: TimeoutPolicy,
    mirror: Option<MirrorConfig>,
    preview: Option<Peripheral>,
    mirrors: Vec<MirrorJob>,
    running: Arc<AtomicBool>,
    last_heartbeat: Instant,
    report: WorkerReport,
}

impl<D: AcquisitionDevice> DaqWorker<D> {
    pub fn new(
        control: Link,
        pipeline: AcquisitionPipeline<D, Link>,
        policy: TimeoutPolicy,
    ) -> Self {
        Self {
            control,
            pipeline,
            machine: SessionMachine::new(),
            policy,
            mirror: None,
            preview: None,
            mirrors: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            last_heartbeat: Instant::now(),
            report: WorkerReport::default(),
        }
    }

    pub fn with_mirror(mut self, mirror: Option<MirrorConfig>) -> Self {
        self.mirror = mirror;
        self
    }

    /// Control link of the preview helper; its data links live in the
    /// pipeline's fan-out.
    pub fn with_preview(mut self, preview: Peripheral) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Clearing the flag ends the loop as if the host had sent `"quit"`.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn pipeline(&self) -> &AcquisitionPipeline<D, Link> {
        &self.pipeline
    }

    /// One iteration of the loop. Returns `false` once the worker should exit.
    pub fn step(&mut self) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            let action = self.machine.on_message(ControlMessage::Quit);
            self.apply(action);
            return false;
        }

        if let Some(parsed) = self.control.poll_control() {
            let action = self.machine.on_payload(parsed);
            self.apply(action);
        }
        if !self.machine.is_terminated() && !self.control.is_connected() {
            self.report.host_lost = true;
            let action = self.machine.on_link_lost();
            self.apply(action);
        }
        if self.machine.is_terminated() {
            return false;
        }

        self.heartbeat_preview();

        if self.machine.state() == SessionState::Recording {
            match self.pipeline.pump() {
                // Below the read threshold; the device needs time to fill
                Ok(0) => std::thread::sleep(self.policy.idle_sleep()),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Acquisition failed, stopping: {}", e);
                    let action = self.machine.on_message(ControlMessage::Stop);
                    self.apply(action);
                }
            }
        } else {
            std::thread::sleep(self.policy.idle_sleep());
        }
        true
    }

    /// Run until quit or host loss, then tear down.
    pub fn run(mut self) -> WorkerReport {
        tracing::info!(socket = %self.control.name(), "Acquisition helper running");
        while self.step() {}
        self.shutdown();
        self.report
    }

    fn apply(&mut self, action: SessionAction) {
        match action {
            SessionAction::None => {}
            SessionAction::Arm { output } => self.arm(&output),
            SessionAction::Stop => self.stop(),
            SessionAction::Teardown { stop_first } => {
                if stop_first {
                    self.stop();
                }
            }
        }
    }

    fn arm(&mut self, output: &Path) {
        match self.pipeline.arm(output) {
            Ok(started) => {
                if let Err(e) = self
                    .control
                    .send_control(&ControlMessage::Primed, self.policy.send())
                    .and_then(|_| self.control.send_timestamp(started, self.policy.send()))
                {
                    tracing::warn!("Could not report start to host: {}", e);
                }
                if let Some(preview) = self.preview.as_mut() {
                    let begin = ControlMessage::begin(output.display().to_string());
                    if let Err(e) = preview.link_mut().send_control(&begin, self.policy.send()) {
                        tracing::debug!("Preview did not take begin: {}", e);
                    }
                }
                self.machine.armed();
            }
            Err(e) => {
                tracing::error!("Could not arm acquisition for {}: {}", output.display(), e);
                self.machine.arm_failed();
            }
        }
    }

    fn stop(&mut self) {
        let output = self.pipeline.output().map(Path::to_path_buf);
        match self.pipeline.cancel_and_drain() {
            Ok(stopped) => {
                if let Err(e) = self.control.send_timestamp(stopped, self.policy.send()) {
                    tracing::warn!("Could not report stop time to host: {}", e);
                }
            }
            Err(e) => tracing::error!("Draining acquisition failed: {}", e),
        }
        if let Some(preview) = self.preview.as_mut() {
            let _ = preview
                .link_mut()
                .send_control(&ControlMessage::Stop, self.policy.send());
        }

        match self.pipeline.finish() {
            Ok(consolidated) => self.completed(consolidated),
            Err(e) => {
                tracing::error!(
                    "Consolidation failed, temp files kept for rescue: {}",
                    e
                );
                if let Some(output) = output {
                    self.report.failed.push(output);
                }
            }
        }
        self.machine.stopped();
    }

    fn completed(&mut self, consolidated: Consolidated) {
        if let Some(mirror) = &self.mirror {
            self.mirrors.push(MirrorJob::spawn(
                mirror.clone(),
                consolidated.output.clone(),
                consolidated.files(),
            ));
        }
        self.report.completed.push(consolidated.output);
    }

    fn heartbeat_preview(&mut self) {
        let interval = self.policy.liveness() / 4;
        if self.last_heartbeat.elapsed() < interval {
            return;
        }
        if let Some(preview) = self.preview.as_mut() {
            preview.link_mut().heartbeat();
        }
        self.last_heartbeat = Instant::now();
    }

    fn shutdown(&mut self) {
        let (a, b, fr) = self.pipeline.preview_mut().take_sinks();
        for mut link in [a, b, fr].into_iter().flatten() {
            link.shutdown();
        }
        if let Some(mut preview) = self.preview.take() {
            preview.shutdown(self.policy.close());
        }
        let jobs = std::mem::take(&mut self.mirrors);
        self.report.unmirrored = await_mirrors(jobs, self.policy.mirror());
        self.control.acknowledge_close(self.policy.send());
        tracing::info!(
            completed = self.report.completed.len(),
            failed = self.report.failed.len(),
            unmirrored = self.report.unmirrored.len(),
            "Acquisition helper stopped"
        );
    }
}
