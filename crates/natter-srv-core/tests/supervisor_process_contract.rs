//! Contract Test: Child Process Supervision
//!
//! Uses `sh` scripts in place of natter.
//!
//! Constraints verified:
//! - Every new endpoint reaches the sink once, in output order
//! - Output closing without a restart request is an abnormal exit
//! - A restart request ends monitoring without counting as an exit
//! - Shutdown unblocks a monitor waiting on a silent child
//! - stop() terminates the child and clears the cached endpoint

#![cfg(unix)]

mod common;

use common::*;
use natter_srv_core::config::Timings;
use natter_srv_core::control::Control;
use natter_srv_core::endpoint::Endpoint;
use natter_srv_core::supervisor::{ChildCommand, MonitorOutcome, Supervisor};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

fn sh(script: &Path) -> ChildCommand {
    ChildCommand {
        program: "sh".to_string(),
        args: vec![script.to_string_lossy().into_owned()],
    }
}

fn supervisor_for(script: &Path, control: &Control) -> Supervisor {
    Supervisor::with_command(sh(script), control.clone(), &fast_timings())
}

#[tokio::test]
async fn new_endpoints_reach_sink_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "natter.sh",
        "echo 'Natter v2.1.1'\n\
         echo 'tcp://192.168.1.10:11451 <--Natter--> tcp://203.0.113.9:54321'\n\
         echo 'keep-alive ok'\n\
         echo 'tcp://192.168.1.10:11451 <--Natter--> tcp://203.0.113.9:54321'\n\
         echo 'tcp://192.168.1.10:11451 <--Natter--> tcp://203.0.113.9:54400' >&2\n\
         exit 0\n",
    );

    let control = Control::new();
    let mut supervisor = supervisor_for(&script, &control);
    let mut sink = RecordingSink::default();

    supervisor.start().await.expect("sh starts");
    let outcome = supervisor.monitor(&mut sink).await;

    assert_eq!(
        sink.endpoints,
        vec![
            Endpoint::new(Ipv4Addr::new(203, 0, 113, 9), 54321),
            Endpoint::new(Ipv4Addr::new(203, 0, 113, 9), 54400),
        ]
    );
    assert_eq!(
        supervisor.current_endpoint(),
        Some(Endpoint::new(Ipv4Addr::new(203, 0, 113, 9), 54400))
    );

    match outcome {
        MonitorOutcome::Exited { status } => {
            assert_eq!(status.and_then(|s| s.code()), Some(0));
        }
        other => panic!("expected Exited, got {:?}", other),
    }
    assert!(!supervisor.is_started());
}

#[tokio::test]
async fn non_utf8_output_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "natter.sh",
        &format!("printf '\\377\\376 garbage\\n'\necho '{}'\nexit 3\n", MAPPING_LINE),
    );

    let control = Control::new();
    let mut supervisor = supervisor_for(&script, &control);
    let mut sink = RecordingSink::default();

    supervisor.start().await.unwrap();
    let outcome = supervisor.monitor(&mut sink).await;

    assert_eq!(sink.endpoints, vec![mapped_endpoint()]);
    assert!(matches!(outcome, MonitorOutcome::Exited { status: Some(s) } if s.code() == Some(3)));
}

#[tokio::test]
async fn restart_request_is_not_an_exit() {
    let dir = tempfile::tempdir().unwrap();
    let script = long_running_natter(dir.path());

    let control = Control::new();
    let mut supervisor = supervisor_for(&script, &control);
    let handle = supervisor.handle();
    let mut sink = RecordingSink::default();

    let first_pid = supervisor.start().await.unwrap();

    // What the IP watcher does on a change
    let watcher_side = control.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        watcher_side.request_restart();
        handle.terminate().await;
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor.monitor(&mut sink))
        .await
        .expect("monitor returns after terminate");
    assert_eq!(outcome, MonitorOutcome::RestartRequested);
    assert_eq!(sink.endpoints, vec![mapped_endpoint()]);

    let second_pid = supervisor.restart().await.expect("restart succeeds");
    assert_ne!(first_pid, second_pid);
    assert!(!control.restart_requested(), "flag cleared after restart");
    assert!(supervisor.is_started());

    // Cached endpoint was cleared, so the same mapping is reported again
    let observer = control.clone();
    let child = supervisor.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        observer.shutdown();
        child.terminate().await;
    });
    let outcome = supervisor.monitor(&mut sink).await;
    assert_eq!(outcome, MonitorOutcome::Shutdown);
    assert_eq!(sink.endpoints, vec![mapped_endpoint(), mapped_endpoint()]);

    supervisor.stop().await;
}

#[tokio::test]
async fn shutdown_unblocks_silent_child() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "natter.sh", "exec sleep 30\n");

    let control = Control::new();
    let mut supervisor = supervisor_for(&script, &control);
    let mut sink = RecordingSink::default();

    supervisor.start().await.unwrap();

    let stopper = control.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.shutdown();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor.monitor(&mut sink))
        .await
        .expect("monitor honours shutdown");
    assert_eq!(outcome, MonitorOutcome::Shutdown);

    let handle = supervisor.handle();
    assert!(handle.pid().await.is_some());

    tokio::time::timeout(Duration::from_secs(5), supervisor.stop())
        .await
        .expect("stop completes within the grace period");
    assert_eq!(handle.pid().await, None);
    assert_eq!(supervisor.current_endpoint(), None);
}

#[tokio::test]
async fn stubborn_child_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "natter.sh",
        "trap '' TERM\nwhile true; do sleep 1; done\n",
    );

    let control = Control::new();
    let timings = Timings {
        stop_grace: Duration::from_millis(300),
        ..fast_timings()
    };
    let mut supervisor = Supervisor::with_command(sh(&script), control.clone(), &timings);

    supervisor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), supervisor.stop())
        .await
        .expect("stop escalates to kill");
    assert_eq!(supervisor.handle().pid().await, None);
}
