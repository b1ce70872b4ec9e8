//! Process-wide stdout/stderr handles that captures can reroute.
//!
//! Rust's own `std::io::stdout()` always writes to descriptor 1, so the
//! managed capture routes these handles instead. With no capture active they
//! forward to the real streams.

use std::fmt;
use std::io::{self, PipeWriter, Write};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Which of the two standard streams a [`StreamHandle`] stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

// Current route of each stream. Only the swap coordinator stores into these,
// and only while it holds the swap lock.
static STDOUT_ROUTE: ArcSwapOption<PipeWriter> = ArcSwapOption::const_empty();
static STDERR_ROUTE: ArcSwapOption<PipeWriter> = ArcSwapOption::const_empty();

fn route(stream: Stream) -> &'static ArcSwapOption<PipeWriter> {
    match stream {
        Stream::Stdout => &STDOUT_ROUTE,
        Stream::Stderr => &STDERR_ROUTE,
    }
}

/// Handle to the process-wide standard output.
pub fn stdout() -> StreamHandle {
    StreamHandle { stream: Stream::Stdout }
}

/// Handle to the process-wide standard error.
pub fn stderr() -> StreamHandle {
    StreamHandle { stream: Stream::Stderr }
}

/// Writer for one of the two standard streams.
///
/// Writes go to the pipe of the innermost active capture, or to the real
/// stream otherwise. Each write is unbuffered.
#[derive(Debug, Clone, Copy)]
pub struct StreamHandle {
    stream: Stream,
}

impl StreamHandle {
    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Whether writes are currently being captured.
    pub fn is_captured(&self) -> bool {
        route(self.stream).load().is_some()
    }
}

impl Write for StreamHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The loaded Arc keeps the pipe open for this write even if the
        // capture restores its route concurrently.
        match route(self.stream).load_full() {
            Some(pipe) => (&*pipe).write(buf),
            None => match self.stream {
                Stream::Stdout => {
                    let mut out = io::stdout().lock();
                    let n = out.write(buf)?;
                    out.flush()?;
                    Ok(n)
                }
                Stream::Stderr => io::stderr().write(buf),
            },
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match route(self.stream).load_full() {
            Some(pipe) => (&*pipe).write_all(buf),
            None => match self.stream {
                // Rust's stdout is line buffered; flush so the handle stays
                // unbuffered like stderr.
                Stream::Stdout => {
                    let mut out = io::stdout().lock();
                    out.write_all(buf)?;
                    out.flush()
                }
                Stream::Stderr => io::stderr().lock().write_all(buf),
            },
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        }
    }
}

/// Routes of both streams as they were before a swap.
#[derive(Debug)]
pub(crate) struct SavedRoutes {
    stdout: Option<Arc<PipeWriter>>,
    stderr: Option<Arc<PipeWriter>>,
}

/// Point both streams at `pipe`, returning what they pointed at before.
pub(crate) fn swap_to(pipe: &Arc<PipeWriter>) -> SavedRoutes {
    SavedRoutes {
        stdout: STDOUT_ROUTE.swap(Some(Arc::clone(pipe))),
        stderr: STDERR_ROUTE.swap(Some(Arc::clone(pipe))),
    }
}

impl SavedRoutes {
    /// Put both streams back where they were.
    pub(crate) fn restore(self) {
        STDOUT_ROUTE.store(self.stdout);
        STDERR_ROUTE.store(self.stderr);
    }
}
