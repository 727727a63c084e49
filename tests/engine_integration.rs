//! Integration tests for transactions over real unit files and processes

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use unitd::manager::{JobOutcome, JobType, Manager, ManagerError};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_test_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = PathBuf::from(format!("/tmp/unitd-test-{}-{}", std::process::id(), id));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_unit(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn load(dir: &Path) -> Manager {
    let manager = Manager::with_paths(vec![dir.to_path_buf()]);
    manager.load_units().await.unwrap();
    manager
}

async fn wait_for_job(manager: &Manager, name: &str) {
    for _ in 0..200 {
        if manager.status(name).await.unwrap().job.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never got a job", name);
}

fn read_log(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_after_orders_execution() {
    let dir = unique_test_dir();
    let log = dir.join("order.log");

    write_unit(&dir, "stack.target", "[Unit]\nRequires=first.service second.service\n");
    write_unit(&dir, "first.service", &format!(
        "[Service]\nType=oneshot\nRemainAfterExit=yes\nExecStart=/bin/sh -c 'sleep 0.3; echo first >> {}'\n",
        log.display()
    ));
    write_unit(&dir, "second.service", &format!(
        "[Unit]\nAfter=first.service\n\n[Service]\nType=oneshot\nRemainAfterExit=yes\nExecStart=/bin/sh -c 'echo second >> {}'\n",
        log.display()
    ));

    let manager = load(&dir).await;
    let reports = manager.start(&names(&["stack.target"])).await.unwrap();

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.outcome == JobOutcome::Done));
    assert_eq!(read_log(&log), vec!["first", "second"]);
}

#[tokio::test]
async fn test_before_orders_execution() {
    let dir = unique_test_dir();
    let log = dir.join("order.log");

    write_unit(&dir, "early.service", &format!(
        "[Unit]\nBefore=late.service\n\n[Service]\nType=oneshot\nExecStart=/bin/sh -c 'sleep 0.3; echo early >> {}'\n",
        log.display()
    ));
    write_unit(&dir, "late.service", &format!(
        "[Service]\nType=oneshot\nExecStart=/bin/sh -c 'echo late >> {}'\n",
        log.display()
    ));

    let manager = load(&dir).await;
    manager.start(&names(&["late", "early"])).await.unwrap();

    assert_eq!(read_log(&log), vec!["early", "late"]);
}

#[tokio::test]
async fn test_failure_does_not_block_ordered_sibling() {
    let dir = unique_test_dir();
    let log = dir.join("ok.log");

    write_unit(&dir, "app.target", "[Unit]\nWants=broken.service fine.service\n");
    write_unit(&dir, "broken.service", "[Service]\nType=oneshot\nExecStart=/bin/sh -c 'exit 3'\n");
    write_unit(&dir, "fine.service", &format!(
        "[Unit]\nAfter=broken.service\n\n[Service]\nType=oneshot\nExecStart=/bin/sh -c 'echo ran >> {}'\n",
        log.display()
    ));

    let manager = load(&dir).await;
    let reports = manager.start(&names(&["app.target"])).await.unwrap();

    let broken = reports.iter().find(|r| r.unit == "broken.service").unwrap();
    assert!(broken.is_failed());
    assert_eq!(read_log(&log), vec!["ran"]);
    assert_eq!(manager.status("broken").await.unwrap().state, "failed");
    assert_eq!(manager.status("app.target").await.unwrap().state, "active");
}

#[tokio::test]
async fn test_missing_wanted_unit_is_ignored() {
    let dir = unique_test_dir();
    write_unit(&dir, "app.target", "[Unit]\nWants=not-installed.service\n");

    let manager = load(&dir).await;
    let reports = manager.start(&names(&["app.target"])).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].unit, "app.target");
}

#[tokio::test]
async fn test_missing_required_unit_runs_nothing() {
    let dir = unique_test_dir();
    write_unit(&dir, "app.target", "[Unit]\nRequires=present.target not-installed.service\n");
    write_unit(&dir, "present.target", "");

    let manager = load(&dir).await;
    let err = manager.start(&names(&["app.target"])).await.unwrap_err();

    assert!(matches!(err, ManagerError::NotFound(_)));
    assert_eq!(manager.status("present.target").await.unwrap().state, "inactive");
}

#[tokio::test]
async fn test_second_start_is_redundant() {
    let dir = unique_test_dir();
    let log = dir.join("runs.log");
    write_unit(&dir, "once.service", &format!(
        "[Service]\nType=oneshot\nRemainAfterExit=yes\nExecStart=/bin/sh -c 'echo run >> {}'\n",
        log.display()
    ));

    let manager = load(&dir).await;
    manager.start(&names(&["once"])).await.unwrap();
    let reports = manager.start(&names(&["once"])).await.unwrap();

    assert_eq!(reports[0].outcome, JobOutcome::Skipped);
    assert_eq!(read_log(&log).len(), 1);
}

#[tokio::test]
async fn test_simple_service_restart_and_stop() {
    let dir = unique_test_dir();
    write_unit(&dir, "sleeper.service", "[Unit]\nDescription=Sleeps\n\n[Service]\nExecStart=/bin/sleep 60\nTimeoutStopSec=2\n");

    let manager = load(&dir).await;
    manager.start(&names(&["sleeper"])).await.unwrap();
    let first = manager.status("sleeper").await.unwrap();
    assert_eq!(first.state, "active");
    assert!(first.main_pid.is_some());

    let reports = manager.restart(&names(&["sleeper"])).await.unwrap();
    assert_eq!(reports[0].job_type, JobType::Restart);
    let second = manager.status("sleeper").await.unwrap();
    assert_eq!(second.state, "active");
    assert_ne!(first.main_pid, second.main_pid);

    manager.stop(&names(&["sleeper"])).await.unwrap();
    let stopped = manager.status("sleeper").await.unwrap();
    assert_eq!(stopped.state, "inactive");
    assert!(stopped.main_pid.is_none());
}

#[tokio::test]
async fn test_reload_exports_main_pid() {
    let dir = unique_test_dir();
    let out = dir.join("reload.pid");
    write_unit(&dir, "daemon.service", &format!(
        "[Service]\nExecStart=/bin/sleep 60\nExecReload=/bin/sh -c 'echo $MAINPID > {}'\nTimeoutStopSec=2\n",
        out.display()
    ));

    let manager = load(&dir).await;
    manager.start(&names(&["daemon"])).await.unwrap();
    let pid = manager.status("daemon").await.unwrap().main_pid.unwrap();

    let reports = manager.reload(&names(&["daemon"])).await.unwrap();
    assert_eq!(reports[0].outcome, JobOutcome::Done);
    assert_eq!(read_log(&out), vec![pid.to_string()]);

    manager.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_conflicts_stops_the_other_unit() {
    let dir = unique_test_dir();
    write_unit(&dir, "old.service", "[Service]\nExecStart=/bin/sleep 60\nTimeoutStopSec=2\n");
    write_unit(&dir, "new.service", "[Unit]\nConflicts=old.service\n\n[Service]\nType=oneshot\nRemainAfterExit=yes\nExecStart=/bin/true\n");

    let manager = load(&dir).await;
    manager.start(&names(&["old"])).await.unwrap();
    assert_eq!(manager.status("old").await.unwrap().state, "active");

    let reports = manager.start(&names(&["new"])).await.unwrap();
    let stop = reports.iter().find(|r| r.unit == "old.service").unwrap();
    assert_eq!(stop.job_type, JobType::Stop);
    assert_eq!(manager.status("old").await.unwrap().state, "inactive");
    assert_eq!(manager.status("new").await.unwrap().state, "active");
}

#[tokio::test]
async fn test_earlier_unit_dir_wins() {
    let first = unique_test_dir();
    let second = unique_test_dir();
    write_unit(&first, "app.target", "[Unit]\nDescription=override\n");
    write_unit(&second, "app.target", "[Unit]\nDescription=vendor\n");
    write_unit(&second, "extra.target", "");

    let manager = Manager::with_paths(vec![first, second]);
    assert_eq!(manager.load_units().await.unwrap(), 2);

    let status = manager.status("app.target").await.unwrap();
    assert_eq!(status.description.as_deref(), Some("override"));
}

#[tokio::test]
async fn test_reload_unit_files_updates_dependencies() {
    let dir = unique_test_dir();
    write_unit(&dir, "app.target", "[Unit]\nDescription=v1\n");
    write_unit(&dir, "dep.target", "");

    let manager = load(&dir).await;
    let plan = manager.plan(JobType::Start, &names(&["app.target"])).await.unwrap();
    assert_eq!(plan.len(), 1);

    write_unit(&dir, "app.target", "[Unit]\nDescription=v2\nRequires=dep.target\nAfter=dep.target\n");
    manager.load_units().await.unwrap();

    let plan = manager.plan(JobType::Start, &names(&["app.target"])).await.unwrap();
    let units: Vec<&str> = plan.iter().map(|p| p.unit.as_str()).collect();
    assert_eq!(units, vec!["dep.target", "app.target"]);
    assert_eq!(
        manager.status("app.target").await.unwrap().description.as_deref(),
        Some("v2")
    );
}

#[tokio::test]
async fn test_bad_unit_file_is_skipped() {
    let dir = unique_test_dir();
    write_unit(&dir, "good.target", "");
    write_unit(&dir, "bad.target", "[Unit]\n[Unit]\n");
    write_unit(&dir, "notes.txt", "not a unit");

    let manager = load(&dir).await;
    let list: Vec<String> = manager.list().await.into_iter().map(|u| u.name).collect();
    assert_eq!(list, vec!["good.target"]);
}

const SLOW_ONESHOT: &str =
    "[Service]\nType=oneshot\nRemainAfterExit=yes\nExecStart=/bin/sh -c 'sleep 0.5'\nTimeoutStopSec=2\n";

#[tokio::test]
async fn test_busy_wanted_unit_does_not_block_request() {
    let dir = unique_test_dir();
    write_unit(&dir, "app.target", "[Unit]\nWants=slow.service\n");
    write_unit(&dir, "slow.service", SLOW_ONESHOT);

    let manager = Arc::new(load(&dir).await);
    let starting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start(&names(&["slow"])).await })
    };
    wait_for_job(&manager, "slow.service").await;

    let reports = manager.start(&names(&["app.target"])).await.unwrap();
    let app = reports.iter().find(|r| r.unit == "app.target").unwrap();
    let slow = reports.iter().find(|r| r.unit == "slow.service").unwrap();
    assert_eq!(app.outcome, JobOutcome::Done);
    assert!(slow.is_failed());
    assert_eq!(manager.status("app.target").await.unwrap().state, "active");

    starting.await.unwrap().unwrap();
    assert_eq!(manager.status("slow").await.unwrap().state, "active");
}

#[tokio::test]
async fn test_stop_all_during_start() {
    let dir = unique_test_dir();
    write_unit(&dir, "up.target", "");
    write_unit(&dir, "slow.service", SLOW_ONESHOT);

    let manager = Arc::new(load(&dir).await);
    manager.start(&names(&["up.target"])).await.unwrap();
    let starting = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start(&names(&["slow"])).await })
    };
    wait_for_job(&manager, "slow.service").await;

    manager.stop_all().await.unwrap();
    assert_eq!(manager.status("up.target").await.unwrap().state, "inactive");
    assert_eq!(manager.status("slow").await.unwrap().state, "inactive");
    starting.await.unwrap().unwrap();
}
