use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::config::{parse_duration, Config};
use crate::daemon::{is_alive, Daemon, DaemonOptions, LogToggle, PidFile};
use crate::error::{AppError, Result};

const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_POLL: Duration = Duration::from_millis(250);
const FALLBACK_HEALTH_PORTS: [u16; 3] = [8080, 8081, 8082];
const MIN_INTERVAL: Duration = Duration::from_secs(60);

/// `daemon start` flags; unset ones fall back to `[daemon]`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub interval: Option<String>,
    pub max_workers: Option<usize>,
    pub pid_file: Option<String>,
    pub detach: bool,
    pub health_check_port: Option<u16>,
}

impl StartOptions {
    fn resolve(&self, config: &Config) -> Result<DaemonOptions> {
        let mut options = DaemonOptions::from_config(config)?;
        if let Some(interval) = &self.interval {
            options.interval = parse_duration(interval)?;
        }
        if options.interval < MIN_INTERVAL {
            return Err(AppError::Config(format!(
                "interval must be at least 1m, got {:?}",
                options.interval
            )));
        }
        if let Some(workers) = self.max_workers {
            if workers == 0 {
                return Err(AppError::Config("max-workers must be at least 1".into()));
            }
            options.max_workers = workers;
        }
        if let Some(path) = &self.pid_file {
            options.pid_file = PidFile::new(path);
        }
        if let Some(port) = self.health_check_port {
            options.health_check_port = port;
        }
        Ok(options)
    }
}

fn pid_file_for(config: &Config, override_path: Option<&str>) -> PidFile {
    PidFile::new(override_path.unwrap_or(&config.daemon.pid_file))
}

pub async fn start(config: Config, options: StartOptions, log_toggle: LogToggle) -> Result<()> {
    let resolved = options.resolve(&config)?;
    if let Some(pid) = resolved.pid_file.running_pid()? {
        return Err(AppError::Daemon(format!(
            "daemon already running with pid {} ({})",
            pid,
            resolved.pid_file.path().display()
        )));
    }

    if options.detach {
        return detach(&resolved.pid_file);
    }

    Daemon::new(config, resolved)
        .with_log_toggle(log_toggle)
        .run()
        .await
}

/// Re-run this binary in the background with the same arguments minus
/// `--detach`. Its log goes next to the pid file.
fn detach(pid_file: &PidFile) -> Result<()> {
    let exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().skip(1).filter(|a| a != "--detach").collect();
    if let Some(pos) = args.iter().position(|a| a == "daemon") {
        if args.get(pos + 1).map(String::as_str) == Some("restart") {
            args[pos + 1] = "start".to_string();
        }
    }

    let log_path = pid_file.path().with_extension("log");
    let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let child = Command::new(exe)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(log)
        .process_group(0)
        .spawn()?;

    println!(
        "Daemon started in background (pid {}), logging to {}",
        child.id(),
        log_path.display()
    );
    Ok(())
}

/// Signal the daemon and wait for it to exit. Returns false when none
/// was running.
pub async fn stop(config: &Config, pid_file: Option<&str>, force: bool) -> Result<bool> {
    let pid_file = pid_file_for(config, pid_file);
    let Some(pid) = pid_file.running_pid()? else {
        println!("Daemon is not running");
        pid_file.remove()?;
        return Ok(false);
    };

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| AppError::Daemon(format!("could not signal pid {pid}: {e}")))?;
    tracing::info!(pid, ?signal, "signal sent");

    let deadline = Instant::now() + STOP_TIMEOUT;
    while is_alive(pid) {
        if Instant::now() >= deadline {
            return Err(AppError::Daemon(format!(
                "pid {pid} still running after {}s, try --force",
                STOP_TIMEOUT.as_secs()
            )));
        }
        tokio::time::sleep(STOP_POLL).await;
    }

    // A killed daemon never gets to clean up after itself.
    if force {
        pid_file.remove()?;
    }
    println!("Daemon stopped (pid {pid})");
    Ok(true)
}

pub async fn restart(config: Config, options: StartOptions, log_toggle: LogToggle) -> Result<()> {
    stop(&config, options.pid_file.as_deref(), false).await?;
    start(config, options, log_toggle).await
}

/// Print pid liveness and, when reachable, the health report.
pub async fn status(config: &Config, pid_file: Option<&str>) -> Result<()> {
    let pid_file = pid_file_for(config, pid_file);
    match pid_file.running_pid()? {
        Some(pid) => println!("Daemon is running (pid {pid})"),
        None => {
            println!("Daemon is not running");
            return Ok(());
        }
    }

    let mut ports = Vec::new();
    if config.daemon.health_check_port != 0 {
        ports.push(config.daemon.health_check_port);
    }
    for port in FALLBACK_HEALTH_PORTS {
        if !ports.contains(&port) {
            ports.push(port);
        }
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    for port in ports {
        let url = format!("http://127.0.0.1:{port}/health");
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(%url, "health endpoint not reachable: {}", e);
                continue;
            }
        };
        let code = response.status();
        let report: serde_json::Value = response.json().await?;
        println!("Health ({url}): {code}");
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Health endpoint not reachable");
    Ok(())
}
