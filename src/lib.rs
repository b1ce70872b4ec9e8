//! Capture everything a callback writes to stdout and stderr.
//!
//! Two flavours share one process-wide lock:
//!
//! - [`capture`] reroutes the crate's own [`stdout()`] and [`stderr()`]
//!   handles into a pipe. It nests on the same thread and never touches the
//!   process's descriptors.
//! - [`capture_native`] rebinds descriptors 1 and 2 themselves, so output from
//!   `println!`, linked C code using its own buffered stdio, and child
//!   processes that inherit the descriptors all end up in the capture.
//!
//! ```no_run
//! use std::io::Write;
//!
//! let output = stdcap::capture(|| {
//!     writeln!(stdcap::stdout(), "hello").unwrap();
//!     writeln!(stdcap::stderr(), "world").unwrap();
//! })?;
//! assert_eq!(output, "hello\nworld\n");
//! # Ok::<(), stdcap::Error>(())
//! ```
//!
//! Stdio is process-wide, so a capture also collects whatever other threads
//! write during the call. Bytes are handed over in one piece once the callback
//! has returned.

mod capture;
#[cfg(unix)]
mod descriptor;
mod error;
pub mod limits;
mod lock;
mod native;
mod output;
mod pipe;
#[cfg(unix)]
mod signal;
mod stream;

pub use capture::{capture, capture_with};
pub use error::{Error, RestoreFailure, Result};
pub use native::{capture_native, capture_native_with};
pub use output::CapturedOutput;
pub use stream::{Stream, StreamHandle, stderr, stdout};
