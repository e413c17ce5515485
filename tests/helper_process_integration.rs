//! Integration tests that launch the real helper binary
//!
//! These tests validate the supervisor and the acquisition helper end to end:
//! - Bind retry past a stale socket name
//! - A full begin/stop/quit session with consolidation
//! - Substring recognition of quit inside longer text
//! - The preview helper launched by the acquisition helper
//! - Rebuilding the edge list through the rescue command

mod common;

use common::builders::RigConfigBuilder;
use common::{helper_policy, unique_base, wait_for};
use rigsync::config::RigConfig;
use rigsync::link::{control, SocketName};
use rigsync::pipeline::{edge_path, output_stem, read_edges, Recording};
use rigsync::session::{SessionContext, SessionHeader};
use rigsync::supervisor::{SpawnOptions, Supervisor};
use rigsync::types::PeripheralKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_rigsync");

fn daq_command(config_path: &Path, base: &str) -> Vec<String> {
    vec![
        BIN.to_string(),
        "--config".to_string(),
        config_path.display().to_string(),
        "daq".to_string(),
        "--socket".to_string(),
        base.to_string(),
    ]
}

/// Write a helper config under `dir`; the acquisition helper is listed as
/// the only peripheral.
fn write_config(dir: &Path, base: &str, preview: bool) -> (RigConfig, PathBuf) {
    let path = dir.join("rig.toml");
    let mut config = RigConfigBuilder::new()
        .timeouts(helper_policy())
        .preview(preview)
        .peripheral(PeripheralKind::Acquisition, base, daq_command(&path, base))
        .build();
    config.acquisition.socket_base = base.to_string();
    config.acquisition.scope_socket_base = format!("{}scope-", base);
    config.save(&path).unwrap();
    (config, path)
}

fn tick_for(ctx: &mut SessionContext, duration: Duration) {
    let until = Instant::now() + duration;
    while Instant::now() < until {
        let tick = ctx.tick();
        assert!(
            !tick.disconnected.contains(&PeripheralKind::Acquisition),
            "acquisition helper dropped"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn run_session(config: &RigConfig, output: &Path) -> SessionHeader {
    let mut ctx = SessionContext::spawn_all(config, "ctx");
    assert_eq!(ctx.present(), vec![PeripheralKind::Acquisition]);
    tick_for(&mut ctx, Duration::from_millis(300));

    let handle = ctx.start_session(output).unwrap();
    assert!(handle.acquisition_start.is_some());
    tick_for(&mut ctx, Duration::from_millis(400));
    let header = ctx.stop_session(&handle).unwrap();

    // Consolidation finishes before the helper acknowledges quit
    let closed = ctx.teardown();
    assert_eq!(closed, vec![(PeripheralKind::Acquisition, true)]);
    header
}

fn assert_recording(output: &Path, header: &SessionHeader) {
    let start = header.acquisition_start.unwrap();
    let stop = header.acquisition_stop.unwrap();
    assert!(stop > start, "stop {} <= start {}", stop, start);

    let recording = Recording::read(output).unwrap();
    assert!(!recording.channel_a.is_empty());
    assert_eq!(recording.channel_a.len(), recording.channel_b.len());
    assert_eq!(recording.header.samples as usize, recording.channel_a.len());

    let edges = read_edges(&edge_path(&output_stem(output))).unwrap();
    assert!(!edges.is_empty());
    assert!(edges.windows(2).all(|w| w[0] < w[1]));
}

#[test]
#[serial_test::serial]
fn test_spawn_skips_stale_socket_name() {
    let dir = tempfile::tempdir().unwrap();
    let base = unique_base("stale");
    let (config, path) = write_config(dir.path(), &base, false);
    let _stale = SocketName::new(&base, 0).bind().unwrap();

    let supervisor = Supervisor::new(config.timeouts.clone());
    let mut daq = supervisor
        .spawn_and_handshake(
            PeripheralKind::Acquisition,
            &base,
            &daq_command(&path, &base),
            "ctx",
            &SpawnOptions::default(),
        )
        .unwrap();
    assert_eq!(daq.link().name().suffix(), 1);
    assert!(daq.child_id().is_some());
    assert!(daq.is_running());

    assert!(daq.shutdown(config.timeouts.close()));
    assert!(!daq.is_running());
}

#[test]
#[serial_test::serial]
fn test_session_through_acquisition_helper() {
    let dir = tempfile::tempdir().unwrap();
    let base = unique_base("session");
    let (config, _) = write_config(dir.path(), &base, false);
    let output = dir.path().join("session_0001.rec");

    let header = run_session(&config, &output);
    assert_eq!(header.participants, vec![PeripheralKind::Acquisition]);
    assert_recording(&output, &header);
    assert_eq!(
        SessionHeader::load(&SessionHeader::path_for(&output)).unwrap(),
        header
    );
}

#[test]
#[serial_test::serial]
fn test_quit_inside_longer_text_tears_helper_down() {
    let dir = tempfile::tempdir().unwrap();
    let base = unique_base("chatty");
    let (config, path) = write_config(dir.path(), &base, false);

    let supervisor = Supervisor::new(config.timeouts.clone());
    let mut daq = supervisor
        .spawn_and_handshake(
            PeripheralKind::Acquisition,
            &base,
            &daq_command(&path, &base),
            "ctx",
            &SpawnOptions::default(),
        )
        .unwrap();

    let link = daq.link_mut();
    link.send_raw(b"warning: controller will quit after this trial", config.timeouts.send())
        .unwrap();
    assert!(link
        .recv_until(config.timeouts.close(), |b| {
            control::latin1(b).contains(control::CLOSE)
        })
        .is_ok());
    assert!(wait_for(Duration::from_secs(5), || !daq.is_running()));
}

#[test]
#[serial_test::serial]
fn test_session_with_preview_helper() {
    let dir = tempfile::tempdir().unwrap();
    let base = unique_base("preview");
    let (config, _) = write_config(dir.path(), &base, true);
    let output = dir.path().join("previewed.rec");

    let header = run_session(&config, &output);
    assert_recording(&output, &header);
}

#[test]
#[serial_test::serial]
fn test_rescue_command_rebuilds_edges() {
    let dir = tempfile::tempdir().unwrap();
    let base = unique_base("rescue");
    let (config, config_path) = write_config(dir.path(), &base, false);
    let output = dir.path().join("rescued.rec");

    run_session(&config, &output);
    let edge_file = edge_path(&output_stem(&output));
    let expected = read_edges(&edge_file).unwrap();
    std::fs::remove_file(&edge_file).unwrap();

    let status = std::process::Command::new(BIN)
        .arg("--config")
        .arg(&config_path)
        .arg("rescue")
        .arg(&output)
        .args(["--mode", "frames-only"])
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(read_edges(&edge_file).unwrap(), expected);
}
