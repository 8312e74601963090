use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::error::Result;

/// Advisory whole-file lock scoped to one device, shared across processes.
///
/// The bus cores offer no per-caller isolation, so a bus transaction must
/// exclude every other requester on this host: other threads via the
/// embedded mutex, other processes via `flock` on a file keyed by device
/// serial number. The kernel releases `flock` locks when the holding
/// process dies, so a killed process never permanently wedges the bus.
pub struct NamedLock {
    file: File,
    path: PathBuf,
    gate: Mutex<()>,
}

/// Scoped holder of a [`NamedLock`]; releases on every exit path.
pub struct NamedLockGuard<'a> {
    lock: &'a NamedLock,
    _gate: MutexGuard<'a, ()>,
}

impl NamedLock {
    /// Open (creating if needed) the lock file for `name`, scoped under a
    /// per-serial-number directory so unrelated devices never contend.
    /// The file lives in the system temp directory; it does not persist
    /// past host reboot and is not shared with other hosts.
    pub fn open(serial_number: &str, name: &str) -> Result<Self> {
        let path = device_specific_path(serial_number, name)?;
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            // other users' processes must be able to take the lock too
            options.mode(0o666);
        }
        let file = options.open(&path)?;
        Ok(Self {
            file,
            path,
            gate: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until no other thread or process holds this lock, then take it.
    pub fn acquire(&self) -> Result<NamedLockGuard<'_>> {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        flock(&self.file, libc::LOCK_EX)?;
        Ok(NamedLockGuard { lock: self, _gate: gate })
    }
}

impl Drop for NamedLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = flock(&self.lock.file, libc::LOCK_UN) {
            warn!(path = ?self.lock.path, %err, "failed to release file lock");
        }
    }
}

fn flock(file: &File, operation: libc::c_int) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the
        // duration of this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// A path that, for any program talking to this specific device, names the
/// same file for a given `name`.
fn device_specific_path(serial_number: &str, name: &str) -> std::io::Result<PathBuf> {
    let mut path = std::env::temp_dir();
    path.push("reglink");
    path.push(serial_number);
    std::fs::create_dir_all(&path)?;
    path.push(name);
    Ok(path)
}
