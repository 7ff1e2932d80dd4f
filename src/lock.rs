//! Best-effort single-instance PID lock.
//!
//! Two instances quoting the same account would fight over orders, so a
//! new instance always wins: if the lock file names a live process that
//! looks like this program, it is killed before we take the lock. The
//! file is removed again on drop.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

const LOCK_FILE: &str = ".bot.lock";

pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Kill any previous instance recorded in the lock file, then write
    /// our own PID.
    pub fn acquire() -> Result<InstanceLock> {
        let path = PathBuf::from(LOCK_FILE);

        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if pid != std::process::id() && is_our_binary(pid) {
                    warn!("Killing existing bot instance (pid {pid})");
                    let _ = Command::new("kill").args(["-9", &pid.to_string()]).status();
                    // Give the OS a moment to reap before we take over.
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }

        fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("writing lock file {}", path.display()))?;
        info!("Instance lock acquired ({})", path.display());
        Ok(InstanceLock { path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Whether `pid` is a live process running this binary.
fn is_our_binary(pid: u32) -> bool {
    let our_name = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
    let Some(our_name) = our_name else {
        return false;
    };
    match fs::read_to_string(format!("/proc/{pid}/cmdline")) {
        Ok(cmdline) => cmdline.contains(&our_name),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("lp-bot-lock-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(&dir).unwrap();

        {
            let _lock = InstanceLock::acquire().unwrap();
            let recorded = fs::read_to_string(LOCK_FILE).unwrap();
            assert_eq!(recorded.trim(), std::process::id().to_string());
        }
        // Dropped: the lock file is gone.
        assert!(!PathBuf::from(LOCK_FILE).exists());

        std::env::set_current_dir(prev).unwrap();
        let _ = fs::remove_dir_all(dir);
    }
}
