//! Live preview window
//!
//! The preview helper can plot the decimated acquisition stream instead of
//! logging summaries. The [`ScopeMonitor`] is stepped from the UI thread
//! once per frame, so the window never blocks on a link; it closes itself
//! when the acquisition helper sends `"quit"` or its control link is lost.

pub mod plot;

pub use plot::{trace_points, PreviewPlot};

use crate::backend::ScopeMonitor;
use crate::config::RigConfig;
use crate::error::{Result, RigError};
use std::time::Duration;

/// Repaint interval while the window is idle
const REPAINT_INTERVAL: Duration = Duration::from_millis(16);

/// eframe application wrapping one preview monitor
pub struct PreviewApp {
    monitor: ScopeMonitor,
    plot: PreviewPlot,
}

impl PreviewApp {
    pub fn new(monitor: ScopeMonitor, plot: PreviewPlot) -> Self {
        Self { monitor, plot }
    }

    fn status_line(&self) -> String {
        format!(
            "{} | {} samples | {} frame markers",
            self.monitor.state(),
            self.monitor.channel_a.total(),
            self.monitor.frames.total()
        )
    }
}

impl eframe::App for PreviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.monitor.is_finished() && !self.monitor.step() {
            self.monitor.finish();
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        egui::TopBottomPanel::bottom("preview_status").show(ctx, |ui| {
            ui.label(self.status_line());
        });
        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot.render(ui, &self.monitor);
        });

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

impl Drop for PreviewApp {
    fn drop(&mut self) {
        // Window closed by the user before "quit"
        self.monitor.finish();
    }
}

/// Entry point of the preview helper when it runs with a window.
pub fn run_preview_window(config: &RigConfig, scope_base: &str, suffix: u32) -> Result<()> {
    let monitor = ScopeMonitor::connect(scope_base, suffix, config.timeouts.clone())?;
    let plot = PreviewPlot::from_config(&config.acquisition);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([960.0, 640.0])
            .with_min_inner_size([480.0, 360.0])
            .with_title("rigsync preview"),
        ..Default::default()
    };

    tracing::info!("Opening preview window");
    eframe::run_native(
        "rigsync preview",
        native_options,
        Box::new(|cc| {
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Ok(Box::new(PreviewApp::new(monitor, plot)))
        }),
    )
    .map_err(|e| RigError::Preview(e.to_string()))
}
