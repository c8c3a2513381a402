use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::config::expand_home;
use crate::error::{AppError, Result};

/// The daemon's pid file.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// A leading `~/` expands to the home directory.
    pub fn new(path: &str) -> Self {
        Self {
            path: expand_home(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write our pid with mode 0600. Refuses when the file names a live
    /// process; a stale file is overwritten.
    pub fn write(&self) -> Result<()> {
        if let Some(pid) = self.running_pid()? {
            return Err(AppError::Daemon(format!(
                "daemon already running with pid {} ({})",
                pid,
                self.path.display()
            )));
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(())
    }

    /// The recorded pid, or `None` when there is no file.
    pub fn read(&self) -> Result<Option<i32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        content
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|e| AppError::Daemon(format!("invalid pid file {}: {}", self.path.display(), e)))
    }

    /// The recorded pid when that process is alive. A file that does not
    /// hold a pid counts as stale.
    pub fn running_pid(&self) -> Result<Option<i32>> {
        let pid = match self.read() {
            Ok(pid) => pid,
            Err(AppError::Daemon(reason)) => {
                tracing::warn!("ignoring stale pid file: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };
        Ok(pid.filter(|pid| is_alive(*pid)))
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.running_pid()?.is_some())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Signal 0 probes for existence without delivering anything. `EPERM`
/// means the process exists but belongs to someone else.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("q.pid").to_str().unwrap());

        assert_eq!(pid_file.read().unwrap(), None);
        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(std::process::id() as i32));
        assert!(pid_file.is_running().unwrap());

        let mode = fs::metadata(pid_file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
    }

    #[test]
    fn refuses_live_pid_and_replaces_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.pid");
        let pid_file = PidFile::new(path.to_str().unwrap());

        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        assert!(matches!(pid_file.write(), Err(AppError::Daemon(_))));

        // Pids this large are never allocated.
        fs::write(&path, "2147483000\n").unwrap();
        assert!(!pid_file.is_running().unwrap());
        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(std::process::id() as i32));
    }

    #[test]
    fn garbage_is_unreadable_but_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.pid");
        let pid_file = PidFile::new(path.to_str().unwrap());

        fs::write(&path, "not a pid").unwrap();
        assert!(pid_file.read().is_err());
        assert_eq!(pid_file.running_pid().unwrap(), None);

        // A crash between truncate and write leaves an empty file.
        fs::write(&path, "").unwrap();
        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(std::process::id() as i32));
    }

    #[test]
    fn expands_home() {
        let pid_file = PidFile::new("~/quicknews.pid");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(pid_file.path(), home.join("quicknews.pid"));
        }
    }
}
