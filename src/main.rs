//! rigsync - Main Entry Point
//!
//! One binary, three roles: the host that supervises a session, and the
//! acquisition and preview helpers the supervisor launches.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use rigsync::{
    backend::{
        run_acquisition_helper, run_preview_helper, SimulatedDevice, SyntheticSignal,
    },
    frontend::run_preview_window,
    config::RigConfig,
    pipeline::{rescue, rescue_frames_only, rescue_single_channel},
    session::SessionContext,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "rigsync", version, about = "Synchronized multi-peripheral experiment sessions")]
struct Cli {
    /// Config file shared by host and helpers
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Supervise the configured peripherals and record one session
    Host {
        /// Session output file
        #[arg(long)]
        output: PathBuf,
        /// Stop the session after this many seconds
        #[arg(long, default_value_t = 10.0)]
        duration_secs: f64,
        /// Host tick rate
        #[arg(long, default_value_t = 60.0)]
        tick_hz: f64,
    },
    /// Acquisition helper (launched by the host)
    Daq {
        /// Socket base name to connect back to
        #[arg(long)]
        socket: Option<String>,
        /// Socket suffix chosen by the supervisor
        suffix: u32,
    },
    /// Preview helper (launched by the acquisition helper)
    Scope {
        #[arg(long)]
        socket: Option<String>,
        /// Log summaries only, even if the config asks for a window
        #[arg(long)]
        headless: bool,
        suffix: u32,
    },
    /// Rebuild a recording from the temp files a session left behind
    Rescue {
        /// Output file of the interrupted session
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = RescueMode::Full)]
        mode: RescueMode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RescueMode {
    /// Both channels and the frame edges
    Full,
    /// Channel A and the frame edges
    SingleChannel,
    /// Frame edges only
    FramesOnly,
}

impl Role {
    fn log_name(&self) -> &'static str {
        match self {
            Role::Host { .. } => "rigsync-host.log",
            Role::Daq { .. } => "rigsync-daq.log",
            Role::Scope { .. } => "rigsync-scope.log",
            Role::Rescue { .. } => "rigsync-rescue.log",
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (file_layer, _guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, cli.role.log_name());
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rigsync=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    let config = match &cli.config {
        Some(path) => RigConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RigConfig::load_or_default(),
    };

    match cli.role {
        Role::Host {
            output,
            duration_secs,
            tick_hz,
        } => run_host(&config, output, duration_secs, tick_hz),
        Role::Daq { socket, suffix } => {
            let base = socket.unwrap_or_else(|| config.acquisition.socket_base.clone());
            let signal = SyntheticSignal {
                sample_interval: Duration::from_secs_f64(
                    config.acquisition.sample_interval_ms / 1000.0,
                ),
                calibration: config.acquisition.channel_a.calibration.clone(),
                ..SyntheticSignal::default()
            };
            let device = SimulatedDevice::default().with_signal(signal);
            let preview = preview_command(cli.config.as_ref())?;
            let report = run_acquisition_helper(&config, &base, suffix, device, Some(preview))
                .context("acquisition helper")?;
            tracing::info!(
                completed = ?report.completed,
                failed = ?report.failed,
                host_lost = report.host_lost,
                "Acquisition helper exiting"
            );
            Ok(())
        }
        Role::Scope {
            socket,
            headless,
            suffix,
        } => {
            let base = socket.unwrap_or_else(|| config.acquisition.scope_socket_base.clone());
            if config.acquisition.preview_window && !headless {
                run_preview_window(&config, &base, suffix).context("preview window")?;
            } else {
                run_preview_helper(&config, &base, suffix).context("preview helper")?;
            }
            Ok(())
        }
        Role::Rescue { output, mode } => {
            let acquisition = &config.acquisition;
            match mode {
                RescueMode::Full => {
                    let rescued = rescue(&output, acquisition)?;
                    tracing::info!(samples = rescued.samples, edges = rescued.edges, "Rescued");
                }
                RescueMode::SingleChannel => {
                    let rescued = rescue_single_channel(&output, acquisition)?;
                    tracing::info!(samples = rescued.samples, edges = rescued.edges, "Rescued");
                }
                RescueMode::FramesOnly => {
                    let (edge_file, edges) = rescue_frames_only(&output, acquisition)?;
                    tracing::info!(edges, "Rescued {}", edge_file.display());
                }
            }
            Ok(())
        }
    }
}

/// Command line that relaunches this binary as the preview helper
fn preview_command(config: Option<&PathBuf>) -> anyhow::Result<Vec<String>> {
    let exe = std::env::current_exe().context("locating current executable")?;
    let mut argv = vec![exe.display().to_string()];
    if let Some(path) = config {
        argv.push("--config".to_string());
        argv.push(path.display().to_string());
    }
    argv.push("scope".to_string());
    Ok(argv)
}

fn run_host(
    config: &RigConfig,
    output: PathBuf,
    duration_secs: f64,
    tick_hz: f64,
) -> anyhow::Result<()> {
    anyhow::ensure!(tick_hz > 0.0, "tick rate must be positive");
    let context = output
        .parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());

    tracing::info!("Starting host for {}", output.display());
    let mut ctx = SessionContext::spawn_all(config, &context);
    tracing::info!(present = ?ctx.present(), "Peripherals ready");

    let handle = ctx.start_session(&output)?;
    let period = Duration::from_secs_f64(1.0 / tick_hz);
    let until = Instant::now() + Duration::from_secs_f64(duration_secs.max(0.0));
    let mut frames = 0usize;
    let mut licks = 0usize;
    while Instant::now() < until {
        let started = Instant::now();
        let tick = ctx.tick();
        frames += tick.frame_times.len();
        licks += tick.licks.len();
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let header = ctx.stop_session(&handle);
    for (kind, acknowledged) in ctx.teardown() {
        tracing::debug!("{} closed (acknowledged: {})", kind, acknowledged);
    }
    let header = header?;
    tracing::info!(
        ticks = ctx.ticks(),
        frames,
        licks,
        start = ?header.acquisition_start,
        stop = ?header.acquisition_stop,
        "Session complete"
    );
    Ok(())
}
