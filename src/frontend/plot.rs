//! Preview plot rendering using egui_plot
//!
//! Three stacked plots (channel A, channel B, frame markers) share one
//! linked time axis. X values are milliseconds since the preview's `begin`,
//! derived from the sample index and the decimated sample period.

use crate::backend::{ScopeMonitor, Trace};
use crate::config::AcquisitionConfig;
use egui::{Color32, Ui};
use egui_plot::{Corner, Legend, Line, Plot, PlotPoints};

const CHANNEL_A_COLOR: Color32 = Color32::from_rgb(86, 180, 233);
const CHANNEL_B_COLOR: Color32 = Color32::from_rgb(230, 159, 0);
const FRAMES_COLOR: Color32 = Color32::from_rgb(0, 158, 115);

/// `[t, value]` points of a trace, `t` in the units of `sample_period`
pub fn trace_points(trace: &Trace, sample_period: f64) -> Vec<[f64; 2]> {
    let first = trace.first_index();
    trace
        .iter()
        .enumerate()
        .map(|(i, v)| [(first + i as u64) as f64 * sample_period, v as f64])
        .collect()
}

/// Plot configuration for the preview window
#[derive(Debug, Clone)]
pub struct PreviewPlot {
    /// Spacing of preview samples in `time_units`
    pub sample_period: f64,
    pub time_units: String,
    /// `(name, units)` of channel A and channel B
    pub channels: [(String, String); 2],
    pub line_width: f32,
    pub show_legend: bool,
}

impl PreviewPlot {
    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self {
            sample_period: config.sample_interval_ms * config.preview_decimation as f64,
            time_units: config.time_units.clone(),
            channels: [
                (config.channel_a.name.clone(), config.channel_a.units.clone()),
                (config.channel_b.name.clone(), config.channel_b.units.clone()),
            ],
            line_width: 1.5,
            show_legend: true,
        }
    }

    /// Render every trace of `monitor`, splitting the available height.
    pub fn render(&self, ui: &mut Ui, monitor: &ScopeMonitor) {
        let height = (ui.available_height() / 3.0 - ui.spacing().item_spacing.y).max(60.0);
        let [(name_a, units_a), (name_b, units_b)] = &self.channels;
        self.render_trace(ui, "preview_a", name_a, units_a, &monitor.channel_a, CHANNEL_A_COLOR, height);
        self.render_trace(ui, "preview_b", name_b, units_b, &monitor.channel_b, CHANNEL_B_COLOR, height);
        self.render_trace(ui, "preview_fr", "Frames", "", &monitor.frames, FRAMES_COLOR, height);
    }

    #[allow(clippy::too_many_arguments)]
    fn render_trace(
        &self,
        ui: &mut Ui,
        id: &str,
        name: &str,
        units: &str,
        trace: &Trace,
        color: Color32,
        height: f32,
    ) {
        let mut plot = Plot::new(id)
            .height(height)
            .link_axis("preview_time", [true, false])
            .allow_drag(false)
            .show_axes(true)
            .x_axis_label(format!("Time ({})", self.time_units))
            .y_axis_label(units.to_string());
        if self.show_legend {
            plot = plot.legend(Legend::default().position(Corner::RightTop));
        }

        let points = trace_points(trace, self.sample_period);
        plot.show(ui, |plot_ui| {
            if points.is_empty() {
                return;
            }
            plot_ui.line(
                Line::new(name.to_string(), PlotPoints::from(points))
                    .color(color)
                    .width(self.line_width),
            );
        });
    }
}
