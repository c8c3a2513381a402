//! The foreground daemon against a temporary database, without the health
//! server.

mod common;

use std::time::Duration;

use quicknews::config::Config;
use quicknews::daemon::{Daemon, DaemonOptions, PidFile};
use tokio_util::sync::CancellationToken;

use common::wait_for;

#[tokio::test]
async fn shutdown_removes_the_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("quicknews.pid");

    let mut config = Config::default();
    config.db = dir.path().join("quicknews.db").display().to_string();
    config.gemini_api_key = Some("test-key".into());
    config.daemon.interval = "1h".into();
    config.daemon.pid_file = pid_path.display().to_string();
    config.daemon.health_check_port = 0;

    let options = DaemonOptions::from_config(&config).unwrap();
    assert_eq!(options.health_check_port, 0);
    assert_eq!(options.interval, Duration::from_secs(3600));

    let cancel = CancellationToken::new();
    let run = tokio::spawn(Daemon::new(config, options).with_cancel(cancel.clone()).run());

    wait_for(|| pid_path.exists()).await;
    let pid_file = PidFile::new(pid_path.to_str().unwrap());
    assert_eq!(pid_file.read().unwrap(), Some(std::process::id() as i32));

    cancel.cancel();
    run.await.unwrap().unwrap();
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn live_pid_file_blocks_a_second_start() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("quicknews.pid");
    std::fs::write(&pid_path, format!("{}\n", std::process::id())).unwrap();

    let mut config = Config::default();
    config.db = dir.path().join("quicknews.db").display().to_string();
    config.gemini_api_key = Some("test-key".into());
    config.daemon.pid_file = pid_path.display().to_string();
    config.daemon.health_check_port = 0;
    let options = DaemonOptions::from_config(&config).unwrap();

    let err = Daemon::new(config, options).run().await.unwrap_err();
    assert!(matches!(err, quicknews::error::AppError::Daemon(_)));
    // The other instance's file stays.
    assert!(pid_path.exists());
}
