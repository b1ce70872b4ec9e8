#[cfg(unix)]
mod unix {
    use std::io::{self, Write};
    use std::os::fd::AsRawFd;
    use std::panic::{self, AssertUnwindSafe};
    use std::ptr;
    use std::sync::{Mutex, PoisonError};

    use crate::capture::SWAP_LOCK;
    use crate::descriptor::SavedStdio;
    use crate::error::{Cleanup, Error, Result};
    use crate::output::CapturedOutput;
    use crate::pipe::{self, Drain};
    use crate::signal::ExitSignalMonitor;

    /// Taken before the swap lock by every native capture.
    static NATIVE_LOCK: Mutex<()> = Mutex::new(());

    /// Capture everything written to descriptors 1 and 2 while `callback`
    /// runs, including output from linked C code and inheriting children.
    ///
    /// Descriptors 1 and 2 are rebound to a pipe for the duration, and the C
    /// library's buffered streams are flushed before they are put back.
    ///
    /// Native captures do not nest: calling this from inside any capture on
    /// the same thread fails with [`Error::NestedCapture`]. Calls from other
    /// threads wait their turn.
    ///
    /// If the process receives SIGHUP, SIGINT, SIGQUIT or SIGTERM while the
    /// descriptors are swapped and that signal still has its default action,
    /// the original descriptors are put back before the process terminates.
    pub fn capture_native<F>(callback: F) -> Result<CapturedOutput>
    where
        F: FnOnce(),
    {
        capture_native_with(callback).map(|((), output)| output)
    }

    /// Like [`capture_native`], but also hands back whatever `callback` returned.
    pub fn capture_native_with<F, R>(callback: F) -> Result<(R, CapturedOutput)>
    where
        F: FnOnce() -> R,
    {
        if SWAP_LOCK.held_by_current_thread() {
            return Err(Error::NestedCapture);
        }
        let native_guard = NATIVE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let swap_guard = SWAP_LOCK.acquire();

        // Bytes buffered before the call belong to the real streams.
        if let Err(e) = flush_buffered() {
            log::warn!("native capture: flushing before redirect failed: {}", e);
        }

        let (reader, writer) = pipe::open()?;
        let drain = Drain::start(reader)?;
        let saved = match SavedStdio::save() {
            Ok(saved) => saved,
            Err(e) => {
                drop(writer);
                let _ = drain.finish();
                return Err(e);
            }
        };
        let monitor = ExitSignalMonitor::arm();
        log::debug!(
            "native capture: redirecting descriptors 1 and 2 to fd {} (exit fallback for {:?})",
            writer.as_raw_fd(),
            monitor.signals().collect::<Vec<_>>()
        );

        // From here until `saved.restore` nothing may log.
        let mut cleanup = Cleanup::default();
        let mut flushed = Ok(());
        let outcome = saved.redirect_to(writer.as_raw_fd()).map(|()| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
            flushed = flush_buffered();
            outcome
        });
        saved.restore(&mut cleanup);
        drop(monitor);

        if let Err(e) = flushed {
            log::warn!("native capture: flushing captured output failed: {}", e);
        }

        // Descriptors 1 and 2 no longer refer to the pipe, so closing this
        // end lets the drain reach end-of-stream.
        drop(writer);
        let drained = drain.finish();
        drop(swap_guard);
        drop(native_guard);

        let bytes = match drained {
            Ok(bytes) => bytes,
            Err(e) => {
                cleanup.fail(e);
                Vec::new()
            }
        };
        match outcome {
            Ok(Ok(value)) => {
                cleanup.finish()?;
                log::trace!("native capture: collected {} bytes", bytes.len());
                Ok((value, CapturedOutput::new(bytes)))
            }
            Ok(Err(payload)) => {
                if let Err(e) = cleanup.finish() {
                    log::error!("native capture: cleanup after panic failed: {}", e);
                }
                panic::resume_unwind(payload)
            }
            Err(e) => Err(cleanup.into_error(e)),
        }
    }

    /// Flush Rust's and the C library's buffered output streams.
    fn flush_buffered() -> io::Result<()> {
        let stdout = io::stdout().flush();
        let stderr = io::stderr().flush();
        let c_streams = if unsafe { libc::fflush(ptr::null_mut()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        };
        stdout.and(stderr).and(c_streams)
    }
}

#[cfg(not(unix))]
mod non_unix {
    use crate::error::{Error, Result};
    use crate::output::CapturedOutput;

    /// Descriptor-level capture needs Unix descriptor semantics.
    pub fn capture_native<F>(_callback: F) -> Result<CapturedOutput>
    where
        F: FnOnce(),
    {
        Err(Error::PlatformUnsupported(std::env::consts::OS))
    }

    pub fn capture_native_with<F, R>(_callback: F) -> Result<(R, CapturedOutput)>
    where
        F: FnOnce() -> R,
    {
        Err(Error::PlatformUnsupported(std::env::consts::OS))
    }
}

#[cfg(unix)]
pub use unix::{capture_native, capture_native_with};
#[cfg(not(unix))]
pub use non_unix::{capture_native, capture_native_with};
