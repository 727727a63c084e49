//! Integration tests for the unit file parser
//!
//! Parses unit files from disk the way the daemon loads them.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use unitd::units::{self, ServiceType, UnitDefinition};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_test_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = PathBuf::from(format!("/tmp/unitd-parse-{}-{}", std::process::id(), id));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn test_parse_full_service_file() {
    let dir = unique_test_dir();
    let path = dir.join("web.service");
    fs::write(&path, r#"
# Web frontend
[Unit]
Description=Web frontend
Requires=db.service
Wants=cache.service metrics.service
Conflicts=maintenance.target
After=db.service
After=cache.service
Before=multi-user.target

[Service]
Type=oneshot
ExecStart=-/usr/bin/web --port 8080
ExecStart=/usr/bin/web-warmup
ExecStop=/usr/bin/web --shutdown
ExecReload=/bin/kill -HUP $MAINPID
RemainAfterExit=yes
WorkingDirectory=/srv/web
Environment="MODE=production" LEVEL=info
TimeoutStartSec=30s
TimeoutStopSec=5
"#).unwrap();

    let def = units::load_unit(&path).await.unwrap();
    assert_eq!(def.name(), "web.service");
    assert_eq!(def.unit_type(), "service");

    let unit = def.unit_section();
    assert_eq!(unit.description.as_deref(), Some("Web frontend"));
    assert_eq!(unit.requires, vec!["db.service"]);
    assert_eq!(unit.wants, vec!["cache.service", "metrics.service"]);
    assert_eq!(unit.conflicts, vec!["maintenance.target"]);
    assert_eq!(unit.after, vec!["db.service", "cache.service"]);
    assert_eq!(unit.before, vec!["multi-user.target"]);

    let svc = def.as_service().unwrap();
    assert_eq!(svc.service.service_type, ServiceType::Oneshot);
    assert_eq!(svc.service.exec_start.len(), 2);
    assert_eq!(svc.service.exec_stop, vec!["/usr/bin/web --shutdown"]);
    assert!(svc.service.remain_after_exit);
    assert_eq!(svc.service.working_directory, Some(PathBuf::from("/srv/web")));
    assert!(svc
        .service
        .environment
        .contains(&("MODE".to_string(), "production".to_string())));
    assert_eq!(svc.service.timeout_start_sec, Some(Duration::from_secs(30)));
    assert_eq!(svc.service.timeout_stop_sec, Duration::from_secs(5));
}

#[tokio::test]
async fn test_parse_target_file() {
    let dir = unique_test_dir();
    let path = dir.join("multi-user.target");
    fs::write(&path, "[Unit]\nDescription=Multi-User System\nWants=web.service\n").unwrap();

    let def = units::load_unit(&path).await.unwrap();
    assert!(def.is_target());
    assert!(matches!(def, UnitDefinition::Target(_)));
    assert_eq!(def.unit_section().wants, vec!["web.service"]);
}

#[tokio::test]
async fn test_unknown_suffix_rejected() {
    let dir = unique_test_dir();
    let path = dir.join("web.socket");
    fs::write(&path, "[Socket]\nListenStream=80\n").unwrap();

    let err = units::load_unit(&path).await.unwrap_err();
    assert!(matches!(err, units::ParseError::UnknownType(_)));
}

#[tokio::test]
async fn test_load_directory_sorted() {
    let dir = unique_test_dir();
    for name in ["c.service", "a.target", "b.service"] {
        fs::write(dir.join(name), "[Unit]\n").unwrap();
    }

    let defs = units::load_directory(&dir).await.unwrap();
    let names: Vec<&str> = defs.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["a.target", "b.service", "c.service"]);

    assert!(units::load_directory(&dir.join("missing")).await.unwrap().is_empty());
}
