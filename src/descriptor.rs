//! Saved copies of descriptors 1 and 2 for the native capture.
//!
//! The copies can be released by two parties: the capture itself once the
//! callback is done, and the exit signal handler if the process is torn down
//! first. Both go through [`release_saved`], which only does the work once.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::error::{Cleanup, Error, Result};

const REBIND_ATTEMPTS: usize = 8;

struct ReleaseSlot {
    armed: AtomicBool,
    stdout: AtomicI32,
    stderr: AtomicI32,
}

impl ReleaseSlot {
    const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            stdout: AtomicI32::new(-1),
            stderr: AtomicI32::new(-1),
        }
    }

    fn arm(&self, stdout: RawFd, stderr: RawFd) {
        self.stdout.store(stdout, Ordering::SeqCst);
        self.stderr.store(stderr, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    // Async-signal-safe: a single atomic swap decides the winner.
    fn take(&self) -> Option<(RawFd, RawFd)> {
        if self.armed.swap(false, Ordering::SeqCst) {
            Some((
                self.stdout.swap(-1, Ordering::SeqCst),
                self.stderr.swap(-1, Ordering::SeqCst),
            ))
        } else {
            None
        }
    }
}

static SLOT: ReleaseSlot = ReleaseSlot::new();

/// Duplicate of descriptors 1 and 2 taken at the start of a native capture.
///
/// Dropping it without calling [`SavedStdio::restore`] still restores, but
/// discards any errors.
#[derive(Debug)]
pub(crate) struct SavedStdio {
    _private: (),
}

impl SavedStdio {
    /// Duplicate descriptors 1 and 2 (close-on-exec, numbered above 2).
    pub(crate) fn save() -> Result<Self> {
        let stdout = dup_cloexec(libc::STDOUT_FILENO).map_err(|e| Error::resource("dup stdout", e))?;
        let stderr = match dup_cloexec(libc::STDERR_FILENO) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = close(stdout);
                return Err(Error::resource("dup stderr", e));
            }
        };
        SLOT.arm(stdout, stderr);
        Ok(Self { _private: () })
    }

    /// Bind descriptors 1 and 2 to `target`.
    ///
    /// On failure nothing is undone here; restoring is still up to the caller.
    pub(crate) fn redirect_to(&self, target: RawFd) -> Result<()> {
        dup2(target, libc::STDOUT_FILENO).map_err(|e| Error::resource("dup2 pipe onto stdout", e))?;
        dup2(target, libc::STDERR_FILENO).map_err(|e| Error::resource("dup2 pipe onto stderr", e))
    }

    /// Put the original descriptors back on 1 and 2 and close the copies,
    /// recording every failed step.
    pub(crate) fn restore(self, cleanup: &mut Cleanup) {
        if let Some(steps) = release_saved() {
            for (step, result) in steps {
                cleanup.step(step, result);
            }
        }
    }
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        let _ = release_saved();
    }
}

/// Release the saved descriptors if nobody has done so yet.
///
/// Safe to call from a signal handler: only atomics, `dup2` and `close`.
/// Returns `None` when the other party already released them.
pub(crate) fn release_saved() -> Option<[(&'static str, io::Result<()>); 4]> {
    let (stdout, stderr) = SLOT.take()?;
    Some([
        ("restore stdout", rebind(stdout, libc::STDOUT_FILENO)),
        ("close saved stdout", close(stdout)),
        ("restore stderr", rebind(stderr, libc::STDERR_FILENO)),
        ("close saved stderr", close(stderr)),
    ])
}

fn rebind(saved: RawFd, target: RawFd) -> io::Result<()> {
    let mut last = None;
    for _ in 0..REBIND_ATTEMPTS {
        match dup2(saved, target) {
            Ok(()) => return Ok(()),
            Err(e) if matches!(e.raw_os_error(), Some(libc::EINTR | libc::EBUSY)) => last = Some(e),
            Err(e) => {
                last = Some(e);
                break;
            }
        }
    }
    // A target still bound to the pipe would keep the drain waiting forever.
    unsafe { libc::close(target) };
    Err(last.unwrap_or_else(|| io::Error::from_raw_os_error(libc::EBADF)))
}

fn dup_cloexec(fd: RawFd) -> io::Result<RawFd> {
    let copy = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) };
    if copy < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(copy)
}

fn dup2(src: RawFd, dst: RawFd) -> io::Result<()> {
    if unsafe { libc::dup2(src, dst) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn close(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
