//! Integration tests for exec-spawn
//!
//! Every test spawns real processes and some count this process's open
//! descriptors, so all of them run under one lock.

use exec_spawn::{
    Exec, ExecError, ExitReport, POSIX_ARG_MAX, ProcessHandle, RawStdio, SpawnOptions,
    WaitOptions, WaitOutcome, spawn,
};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::os::fd::OwnedFd;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

static INTEGRATION_TEST_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    INTEGRATION_TEST_LOCK
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn open_fd_count() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

fn wait_exit(handle: &mut ProcessHandle<RawStdio>) -> ExitReport {
    match handle.wait(WaitOptions::blocking()).unwrap() {
        WaitOutcome::Exited(report) => report,
        other => panic!("expected exit, got {:?}", other),
    }
}

fn read_available(fd: &OwnedFd, out: &mut Vec<u8>) -> bool {
    let mut file = File::from(fd.try_clone().unwrap());
    let mut buf = [0u8; 4096];
    loop {
        match file.read(&mut buf) {
            Ok(0) => return true,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
            Err(e) => panic!("read failed: {}", e),
        }
    }
}

/// Test that a spawn leaves exactly the three parent descriptors open
#[test]
fn test_spawn_returns_exactly_three_descriptors() {
    let _lock = lock();

    let before = open_fd_count();
    let mut handle = spawn(&SpawnOptions::new("/bin/true")).unwrap();
    assert_eq!(open_fd_count(), before + 3);

    wait_exit(&mut handle);
    drop(handle);
    assert_eq!(open_fd_count(), before);
}

/// Test that explicit close releases the descriptors once
#[test]
fn test_close_releases_descriptors() {
    let _lock = lock();

    let before = open_fd_count();
    let mut handle = Exec::new("/bin/true").spawn().unwrap();
    assert!(handle.close());
    assert_eq!(open_fd_count(), before);
    assert!(!handle.close());
    assert!(wait_exit(&mut handle).success());
}

/// Test that an oversized argv fails before any descriptor is allocated
#[test]
fn test_argument_limit_allocates_nothing() {
    let _lock = lock();

    let before = open_fd_count();
    let options = SpawnOptions {
        path: "/bin/true".to_string(),
        argv: Some(vec!["x".into(); POSIX_ARG_MAX + 1]),
        ..Default::default()
    };
    let err = spawn(&options).unwrap_err();
    assert!(matches!(
        err,
        ExecError::ArgumentListTooLong {
            limit: POSIX_ARG_MAX,
            ..
        }
    ));
    assert_eq!(open_fd_count(), before);
}

/// Test spawning from a JSON options document
#[test]
fn test_spawn_from_json_options() {
    let _lock = lock();

    let options: SpawnOptions = serde_json::from_str(
        r#"{
            "path": "sh",
            "search": true,
            "argv": ["sh", "-c", "echo \"$GREETING $COUNT\"; exit 9"],
            "env": {"GREETING": "hello", "COUNT": 3}
        }"#,
    )
    .unwrap();

    let mut handle = spawn(&options).unwrap();
    let report = wait_exit(&mut handle);
    assert_eq!(report.code, 9);

    let mut stdout = Vec::new();
    let stdio = handle.stdio().unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !read_available(&stdio.stdout, &mut stdout) {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stdout, b"hello 3\n");
}

/// Test that non-blocking descriptors let several children be drained together
#[test]
fn test_multiplex_several_children() {
    let _lock = lock();

    let mut children: Vec<_> = (0..4)
        .map(|i| {
            let script = format!("sleep 0.{}; echo child-{}", 4 - i, i);
            Exec::new("/bin/sh")
                .argv(["sh", "-c", script.as_str()])
                .spawn()
                .unwrap()
        })
        .collect();

    let mut outputs = vec![Vec::new(); children.len()];
    let mut done = vec![false; children.len()];
    let deadline = Instant::now() + Duration::from_secs(10);
    while done.iter().any(|d| !d) {
        assert!(Instant::now() < deadline, "children never finished");
        for (i, child) in children.iter().enumerate() {
            if !done[i] {
                done[i] = read_available(&child.stdio().unwrap().stdout, &mut outputs[i]);
            }
        }
        thread::sleep(Duration::from_millis(10));
    }

    for (i, child) in children.iter_mut().enumerate() {
        assert!(wait_exit(child).success());
        assert_eq!(outputs[i], format!("child-{}\n", i).into_bytes());
    }
}

/// Test that a failed exec is reported through wait, not spawn
#[test]
fn test_exec_failure_is_observed_as_exit() {
    let _lock = lock();

    let mut handle = Exec::new("/nonexistent/program").spawn().unwrap();
    let report = wait_exit(&mut handle);
    assert_eq!(report.code, libc::ENOENT);
}
