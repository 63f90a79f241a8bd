//! Cross-process update lock scoped to the packages directory.
//!
//! Acquisition never blocks: if another process (or another handle in this
//! process) holds the lock, [`UpdateLock::try_acquire`] fails immediately
//! with [`UpdateError::LockContention`]. The lock is released when the
//! guard is dropped.

use crate::error::{Result, UpdateError};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Held update lock. Dropping it releases the OS lock.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Try to take the lock at `path`, creating the file (and its parent
    /// directory) if needed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::LockContention`] if the lock is held elsewhere,
    /// or an I/O error if the lock file cannot be created.
    pub fn try_acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_exclusive(path)?;
        tracing::debug!(path = %path.display(), "update lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_exclusive(path: &Path) -> Result<File> {
    use std::os::fd::AsRawFd;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    // flock locks belong to the open file description, so a second handle in
    // the same process contends just like another process would.
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            return Ok(file);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
                return Err(UpdateError::LockContention(format!(
                    "{} is held by another update",
                    path.display()
                )));
            }
            _ => return Err(UpdateError::Io(err)),
        }
    }
}

#[cfg(windows)]
fn open_exclusive(path: &Path) -> Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .share_mode(0)
        .open(path)
        .map_err(|e| match e.raw_os_error() {
            Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION) => UpdateError::LockContention(
                format!("{} is held by another update", path.display()),
            ),
            _ => UpdateError::Io(e),
        })
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            // SAFETY: the descriptor is still owned by `self.file`.
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        tracing::debug!(path = %self.path.display(), "update lock released");
    }
}
