//! The swap coordinator: every stdio redirection goes through here.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::Result;
use crate::lock::SwapLock;
use crate::output::CapturedOutput;
use crate::pipe::{self, Drain};
use crate::stream;

/// Serializes all captures in the process, managed and native alike.
pub(crate) static SWAP_LOCK: SwapLock = SwapLock::new();

/// Capture everything written through [`stdout()`](crate::stdout) and
/// [`stderr()`](crate::stderr) while `callback` runs.
///
/// Captures on the same thread nest: an inner capture gets its own bytes and
/// the outer one resumes afterwards. Captures on other threads wait until this
/// one is done, and anything they would have written through the handles in
/// the meantime is part of this capture.
///
/// A callback that starts a thread which itself calls `capture`, and then
/// waits for that thread, deadlocks.
///
/// If `callback` panics, the streams are restored and the panic continues
/// with its original payload.
pub fn capture<F>(callback: F) -> Result<CapturedOutput>
where
    F: FnOnce(),
{
    capture_with(callback).map(|((), output)| output)
}

/// Like [`capture`], but also hands back whatever `callback` returned.
pub fn capture_with<F, R>(callback: F) -> Result<(R, CapturedOutput)>
where
    F: FnOnce() -> R,
{
    let guard = SWAP_LOCK.acquire();
    log::trace!("capture: entering at depth {}", SWAP_LOCK.depth());

    // The drain worker runs before anything is swapped, so a failure here
    // leaves the streams untouched.
    let (reader, writer) = pipe::open()?;
    let drain = Drain::start(reader)?;
    let writer = Arc::new(writer);

    // Nothing below may log until the routes are restored.
    let saved = stream::swap_to(&writer);
    let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
    saved.restore();

    // Handles that loaded the route mid-write hold their own reference, so the
    // drain only sees end-of-stream once those writes have landed.
    drop(writer);
    let drained = drain.finish();
    drop(guard);

    match outcome {
        Ok(value) => {
            let bytes = drained?;
            log::trace!("capture: collected {} bytes", bytes.len());
            Ok((value, CapturedOutput::new(bytes)))
        }
        Err(payload) => {
            if let Err(e) = drained {
                log::error!("capture: callback panicked and draining failed: {}", e);
            }
            panic::resume_unwind(payload)
        }
    }
}
