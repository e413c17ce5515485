//! Integration tests for the host session context
//!
//! Peripherals are in-process peers attached under a fixed suffix:
//! - Feed decoding across ticks
//! - One peripheral going silent while the session keeps working
//! - Start/stop timestamps and the session header
//! - Teardown acknowledgements, including a slow final consolidation
//! - Cancelling an arm the acquisition helper acknowledged too late

mod common;

use common::builders::{frame_bytes, lick_bytes, motion_bytes};
use common::{attach_peer, unique_base, wait_for};
use rigsync::config::TimeoutPolicy;
use rigsync::link::{control, ControlMessage, Link};
use rigsync::session::{SessionContext, SessionHeader, SessionState};
use rigsync::types::PeripheralKind;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const SEND: Duration = Duration::from_millis(100);

/// Acquisition peer that answers one begin/stop cycle, then waits for quit.
fn fake_daq(mut link: Link, start: f64, stop: f64) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut seen = Vec::new();
        let begin = link
            .recv_until(Duration::from_secs(5), |b| {
                matches!(ControlMessage::parse_bytes(b), Ok(ControlMessage::Begin { .. }))
            })
            .unwrap();
        seen.push(control::latin1(&begin));
        link.send_control(&ControlMessage::Primed, SEND).unwrap();
        link.send_timestamp(start, SEND).unwrap();

        link.recv_until(Duration::from_secs(5), |b| {
            control::latin1(b).contains(control::STOP)
        })
        .unwrap();
        seen.push("stop".to_string());
        link.send_timestamp(stop, SEND).unwrap();

        if link
            .recv_until(Duration::from_secs(5), |b| {
                control::latin1(b).contains(control::QUIT)
            })
            .is_ok()
        {
            link.acknowledge_close(SEND);
            seen.push("quit".to_string());
        }
        seen
    })
}

fn is_begin(bytes: &[u8]) -> bool {
    matches!(ControlMessage::parse_bytes(bytes), Ok(ControlMessage::Begin { .. }))
}

fn wait_token(link: &mut Link, token: &str) -> bool {
    link.recv_until(Duration::from_secs(5), |b| control::latin1(b).contains(token))
        .is_ok()
}

fn report_start(link: &mut Link, start: f64) {
    link.send_control(&ControlMessage::Primed, SEND).unwrap();
    link.send_timestamp(start, SEND).unwrap();
}

/// Peer that answers quit only after `busy` has passed since stop.
fn consolidating_daq(mut link: Link, busy: Duration) -> JoinHandle<bool> {
    thread::spawn(move || {
        link.recv_until(Duration::from_secs(5), is_begin).unwrap();
        report_start(&mut link, 1.0);
        assert!(wait_token(&mut link, control::STOP));
        link.send_timestamp(2.0, SEND).unwrap();
        thread::sleep(busy);
        let quit = wait_token(&mut link, control::QUIT);
        link.acknowledge_close(SEND);
        quit
    })
}

/// Peer that only acknowledges quit.
fn closing_peer(mut link: Link) -> JoinHandle<bool> {
    thread::spawn(move || {
        let quit = link.recv_until(Duration::from_secs(5), |b| {
            control::latin1(b).contains(control::QUIT)
        });
        link.acknowledge_close(SEND);
        quit.is_ok()
    })
}

#[test]
fn test_tick_decodes_split_feeds() {
    let base = unique_base("feeds");
    let mut ctx = SessionContext::new(TimeoutPolicy::fast());
    let (motion, mut motion_peer) = attach_peer(PeripheralKind::Motion, &base, 0);
    let (camera, mut camera_peer) = attach_peer(PeripheralKind::Camera, &base, 1);
    let (lick, mut lick_peer) = attach_peer(PeripheralKind::Lick, &base, 2);
    ctx.attach(motion);
    ctx.attach(camera);
    ctx.attach(lick);
    assert_eq!(
        ctx.present(),
        vec![PeripheralKind::Motion, PeripheralKind::Camera, PeripheralKind::Lick]
    );

    // Split records across writes
    let bytes = motion_bytes(1.0, 3);
    motion_peer.send_raw(&bytes[..40], SEND).unwrap();
    let frames = frame_bytes(&[10.0, 10.016]);
    camera_peer.send_raw(&frames[..5], SEND).unwrap();
    lick_peer
        .send_raw(&lick_bytes(&[(2.0, 0.25)]), SEND)
        .unwrap();

    let mut moved = Vec::new();
    let mut frame_times = Vec::new();
    let mut licks = Vec::new();
    let mut sent_rest = false;
    let done = wait_for(Duration::from_secs(2), || {
        let tick = ctx.tick();
        assert!(!tick.motion[0].is_empty());
        moved.extend(tick.motion[0].iter().filter(|s| s.dt > 0.0).cloned());
        frame_times.extend(tick.frame_times.iter().map(|f| f.0));
        licks.extend(tick.licks);
        if !sent_rest {
            motion_peer.send_raw(&bytes[40..], SEND).unwrap();
            camera_peer.send_raw(&frames[5..], SEND).unwrap();
            sent_rest = true;
        }
        moved.len() == 3 && frame_times.len() == 2 && licks.len() == 1
    });
    assert!(done, "motion {:?} frames {:?} licks {:?}", moved, frame_times, licks);
    assert_eq!(moved[2].y, 2.0);
    assert_eq!(frame_times, vec![10.0, 10.016]);
    assert_eq!(licks, vec![[2.0, 0.25]]);

    // The host heartbeats every link each tick
    assert!(wait_for(Duration::from_secs(1), || {
        motion_peer
            .poll()
            .is_some_and(|b| control::latin1(&b).contains(control::HEARTBEAT))
    }));
}

#[test]
fn test_silent_peripheral_does_not_block_session() {
    let base = unique_base("silent");
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("s_0001.rec");
    let mut ctx = SessionContext::new(TimeoutPolicy::fast());

    let (mut lick, _silent_peer) = attach_peer(PeripheralKind::Lick, &base, 0);
    lick.link_mut().set_liveness(Some(Duration::from_millis(50)));
    let (camera, mut camera_peer) = attach_peer(PeripheralKind::Camera, &base, 1);
    let (acquisition, daq_peer) = attach_peer(PeripheralKind::Acquisition, &base, 2);
    ctx.attach(lick);
    ctx.attach(camera);
    ctx.attach(acquisition);
    let daq = fake_daq(daq_peer, 100.25, 160.5);

    let mut lost = Vec::new();
    assert!(wait_for(Duration::from_secs(2), || {
        lost.extend(ctx.tick().disconnected);
        !lost.is_empty()
    }));
    assert_eq!(lost, vec![PeripheralKind::Lick]);

    // Other links keep polling
    camera_peer.send_raw(&frame_bytes(&[1.0]), SEND).unwrap();
    let mut frames = 0;
    assert!(wait_for(Duration::from_secs(1), || {
        frames += ctx.tick().frame_times.len();
        frames == 1
    }));

    let handle = ctx.start_session(&output).unwrap();
    assert_eq!(ctx.state(), SessionState::Recording);
    assert_eq!(handle.acquisition_start, Some(100.25));
    assert_eq!(
        handle.participants,
        vec![PeripheralKind::Acquisition, PeripheralKind::Camera]
    );
    assert!(camera_peer
        .recv_until(Duration::from_secs(1), |b| {
            control::latin1(b).contains(&format!("begin{}end", output.display()))
        })
        .is_ok());

    let header = ctx.stop_session(&handle).unwrap();
    assert_eq!(header.acquisition_start, Some(100.25));
    assert_eq!(header.acquisition_stop, Some(160.5));
    assert_eq!(
        SessionHeader::load(&SessionHeader::path_for(&output)).unwrap(),
        header
    );
    assert!(camera_peer
        .recv_until(Duration::from_secs(1), |b| {
            control::latin1(b).contains(control::STOP)
        })
        .is_ok());

    let closed = ctx.teardown();
    assert!(closed.contains(&(PeripheralKind::Acquisition, true)));
    let seen = daq.join().unwrap();
    assert!(seen[0].contains("begin"));
    assert_eq!(&seen[1..], ["stop", "quit"]);
}

#[test]
fn test_start_without_primed_reply_degrades() {
    let base = unique_base("mute-daq");
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new(TimeoutPolicy::fast());
    let (acquisition, _mute) = attach_peer(PeripheralKind::Acquisition, &base, 0);
    ctx.attach(acquisition);

    let handle = ctx.start_session(dir.path().join("quiet.rec")).unwrap();
    assert!(handle.acquisition_start.is_none());
    assert!(handle.participants.is_empty());

    let header = ctx.stop_session(&handle).unwrap();
    assert!(header.acquisition_stop.is_none());
}

#[test]
fn test_second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new(TimeoutPolicy::fast());
    let handle = ctx.start_session(dir.path().join("a.rec")).unwrap();
    assert!(ctx.start_session(dir.path().join("b.rec")).is_err());
    assert_eq!(ctx.session(), Some(&handle));
}

#[test]
fn test_teardown_stops_session_and_closes_everything() {
    let base = unique_base("teardown");
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("t.rec");
    let mut ctx = SessionContext::new(TimeoutPolicy::fast());

    let (motion, motion_peer) = attach_peer(PeripheralKind::Motion, &base, 0);
    let (reward, reward_peer) = attach_peer(PeripheralKind::Reward, &base, 1);
    let (acquisition, daq_peer) = attach_peer(PeripheralKind::Acquisition, &base, 2);
    ctx.attach(motion);
    ctx.attach(reward);
    ctx.attach(acquisition);
    let motion_closed = closing_peer(motion_peer);
    let reward_closed = closing_peer(reward_peer);
    let daq = fake_daq(daq_peer, 1.0, 2.0);

    ctx.start_session(&output).unwrap();
    let mut closed = ctx.teardown();
    closed.sort_by_key(|(kind, _)| kind.to_string());
    assert_eq!(closed.len(), 3);
    assert!(closed.iter().all(|(_, acknowledged)| *acknowledged));
    assert_eq!(ctx.state(), SessionState::Idle);
    assert!(ctx.present().is_empty());
    assert!(SessionHeader::path_for(&output).exists());

    assert!(motion_closed.join().unwrap());
    assert!(reward_closed.join().unwrap());
    assert_eq!(daq.join().unwrap().len(), 3);
}

#[test]
fn test_teardown_waits_out_final_consolidation() {
    let base = unique_base("consolidating");
    let dir = tempfile::tempdir().unwrap();
    let policy = TimeoutPolicy {
        close_ms: 100,
        consolidate_ms: 5_000,
        ..TimeoutPolicy::fast()
    };
    let mut ctx = SessionContext::new(policy);
    let (acquisition, daq_peer) = attach_peer(PeripheralKind::Acquisition, &base, 0);
    ctx.attach(acquisition);
    let daq = consolidating_daq(daq_peer, Duration::from_millis(600));

    let handle = ctx.start_session(dir.path().join("long.rec")).unwrap();
    let header = ctx.stop_session(&handle).unwrap();
    assert_eq!(header.acquisition_stop, Some(2.0));

    let started = Instant::now();
    let closed = ctx.teardown();
    assert_eq!(closed, vec![(PeripheralKind::Acquisition, true)]);
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(daq.join().unwrap());
}

#[test]
fn test_late_primed_reply_is_stopped() {
    let base = unique_base("late-daq");
    let dir = tempfile::tempdir().unwrap();
    let policy = TimeoutPolicy {
        primed_ms: 100,
        timestamp_ms: 100,
        ..TimeoutPolicy::fast()
    };
    let mut ctx = SessionContext::new(policy);
    let (acquisition, mut peer) = attach_peer(PeripheralKind::Acquisition, &base, 0);
    ctx.attach(acquisition);

    let (late_tx, late_rx) = crossbeam_channel::bounded(1);
    let daq = thread::spawn(move || {
        // First session: armed after the host gave up
        peer.recv_until(Duration::from_secs(5), is_begin).unwrap();
        thread::sleep(Duration::from_millis(400));
        report_start(&mut peer, 5.0);
        let stopped = wait_token(&mut peer, control::STOP);
        peer.send_timestamp(6.0, SEND).unwrap();
        late_tx.send(stopped).unwrap();

        // Second session: prompt replies
        peer.recv_until(Duration::from_secs(5), is_begin).unwrap();
        report_start(&mut peer, 7.0);
        assert!(wait_token(&mut peer, control::STOP));
        peer.send_timestamp(8.0, SEND).unwrap();
        assert!(wait_token(&mut peer, control::QUIT));
        peer.acknowledge_close(SEND);
    });

    let first = ctx.start_session(dir.path().join("late.rec")).unwrap();
    assert!(first.acquisition_start.is_none());
    assert!(first.participants.is_empty());
    let header = ctx.stop_session(&first).unwrap();
    assert!(header.acquisition_stop.is_none());

    // The helper saw stop for the arm it acknowledged late
    assert!(late_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    thread::sleep(Duration::from_millis(50));
    ctx.tick();

    let second = ctx.start_session(dir.path().join("next.rec")).unwrap();
    assert_eq!(second.acquisition_start, Some(7.0));
    assert_eq!(second.participants, vec![PeripheralKind::Acquisition]);
    let header = ctx.stop_session(&second).unwrap();
    assert_eq!(header.acquisition_stop, Some(8.0));

    assert_eq!(ctx.teardown(), vec![(PeripheralKind::Acquisition, true)]);
    daq.join().unwrap();
}
