//! Process-level lock so only one agent owns a pending queue.
//!
//! Two agents sharing a queue would retry the same records concurrently and
//! race on the tail offsets file. The lock is an advisory OS file lock
//! (flock) keyed on the pending directory and held for the process lifetime.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const AGENT_LOCK_FILE: &str = "printwatch-agent.lock";

/// Held by a running agent. Dropping it releases the lock.
///
/// The lock file itself is left in place: unlinking it while another
/// process has it open would let two processes lock different inodes.
pub struct AgentGuard {
    file: File,
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
    }
}

/// Acquire the agent lock for `pending_dir`.
///
/// Fails if another agent is already using the same pending queue.
pub fn acquire_agent_guard(pending_dir: &Path) -> Result<AgentGuard> {
    match try_acquire_lock(AGENT_LOCK_FILE, pending_dir)? {
        Some(guard) => Ok(guard),
        None => anyhow::bail!(
            "another printwatch agent is already using {}",
            pending_dir.display()
        ),
    }
}

fn try_acquire_lock(filename: &str, pending_dir: &Path) -> Result<Option<AgentGuard>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, pending_dir));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = writeln!(file, "pending_dir={}", pending_dir.display());
            let _ = file.flush();

            Ok(Some(AgentGuard { file }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("printwatch");
    dir
}

fn scoped_lock_filename(base_filename: &str, pending_dir: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    pending_dir.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

// No advisory lock elsewhere; a second agent is not detected.
#[cfg(not(unix))]
fn lock_file_nonblocking(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
    Ok(())
}
