//! Error types for capture operations

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing or restoring stdio.
///
/// A callback panic is never turned into one of these: it is re-raised with
/// its original payload once cleanup has run.
#[derive(Error, Debug)]
pub enum Error {
    /// Pipe creation, descriptor duplication or draining failed.
    /// Process-wide stdio is untouched and the call can be retried.
    #[error("{op} failed: {source}")]
    Resource {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// One or more restoration steps failed. Every step was still attempted.
    #[error("restoring stdio failed: {}", RestoreList(.0))]
    Restore(Vec<RestoreFailure>),

    /// The native variant is not available on this platform.
    #[error("native stdio capture is not supported on {0}")]
    PlatformUnsupported(&'static str),

    /// A native capture was requested on a thread that is already capturing.
    #[error("native capture cannot be nested inside another capture on the same thread")]
    NestedCapture,

    /// Querying or changing a resource limit failed.
    #[error("{op} failed: {source}")]
    Limit {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn resource(op: &'static str, source: io::Error) -> Self {
        Error::Resource { op, source }
    }

    pub(crate) fn limit(op: &'static str, source: io::Error) -> Self {
        Error::Limit { op, source }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Resource { .. })
    }
}

/// A single failed restoration step.
#[derive(Debug)]
pub struct RestoreFailure {
    pub step: &'static str,
    pub source: io::Error,
}

impl fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.source)
    }
}

struct RestoreList<'a>(&'a [RestoreFailure]);

impl fmt::Display for RestoreList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

/// Collects failures from cleanup steps so none of them is dropped.
#[derive(Debug, Default)]
pub(crate) struct Cleanup {
    first: Option<Error>,
    failures: Vec<RestoreFailure>,
}

impl Cleanup {
    /// Record the outcome of one restoration step.
    pub(crate) fn step(&mut self, step: &'static str, result: io::Result<()>) {
        if let Err(source) = result {
            self.failures.push(RestoreFailure { step, source });
        }
    }

    /// Record an error from outside the restoration steps.
    pub(crate) fn fail(&mut self, err: Error) {
        match err {
            Error::Restore(failures) => self.failures.extend(failures),
            other if self.first.is_none() => self.first = Some(other),
            other => self.failures.extend(into_failures(other)),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.first.is_none()
    }

    /// Combine everything recorded into one error.
    pub(crate) fn finish(self) -> Result<()> {
        match (self.first, self.failures.is_empty()) {
            (None, true) => Ok(()),
            (None, false) => Err(Error::Restore(self.failures)),
            (Some(first), true) => Err(first),
            (Some(first), false) => {
                let mut failures = into_failures(first);
                failures.extend(self.failures);
                Err(Error::Restore(failures))
            }
        }
    }

    /// Record `err` and return everything combined.
    pub(crate) fn into_error(mut self, err: Error) -> Error {
        self.fail(err);
        match self.finish() {
            Err(combined) => combined,
            Ok(()) => unreachable!("a recorded failure always yields an error"),
        }
    }
}

fn into_failures(err: Error) -> Vec<RestoreFailure> {
    match err {
        Error::Resource { op, source } | Error::Limit { op, source } => {
            vec![RestoreFailure { step: op, source }]
        }
        Error::Restore(failures) => failures,
        other => vec![RestoreFailure {
            step: "capture",
            source: io::Error::other(other.to_string()),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_cleanup_is_ok() {
        let mut cleanup = Cleanup::default();
        cleanup.step("dup2 stdout", Ok(()));
        assert!(cleanup.is_clean());
        assert!(cleanup.finish().is_ok());
    }

    #[test]
    fn every_failed_step_is_kept() {
        let mut cleanup = Cleanup::default();
        cleanup.step("dup2 stdout", Err(io::Error::from_raw_os_error(libc::EBADF)));
        cleanup.step("close stdout copy", Ok(()));
        cleanup.step("dup2 stderr", Err(io::Error::from_raw_os_error(libc::EINTR)));

        match cleanup.finish() {
            Err(Error::Restore(failures)) => {
                let steps: Vec<_> = failures.iter().map(|f| f.step).collect();
                assert_eq!(steps, vec!["dup2 stdout", "dup2 stderr"]);
            }
            other => panic!("expected restore error, got {:?}", other),
        }
    }

    #[test]
    fn earlier_error_is_combined_with_restore_failures() {
        let mut cleanup = Cleanup::default();
        cleanup.fail(Error::resource("drain", io::Error::other("boom")));
        cleanup.step("dup2 stderr", Err(io::Error::from_raw_os_error(libc::EBADF)));

        let err = cleanup.finish().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("drain: boom"), "{}", message);
        assert!(message.contains("dup2 stderr"), "{}", message);
    }

    #[test]
    fn earlier_error_alone_is_returned_as_is() {
        let mut cleanup = Cleanup::default();
        cleanup.fail(Error::resource("pipe", io::Error::other("no fds")));
        let err = cleanup.finish().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn into_error_keeps_the_new_error_first() {
        let mut cleanup = Cleanup::default();
        cleanup.step("close saved stdout", Err(io::Error::from_raw_os_error(libc::EBADF)));
        match cleanup.into_error(Error::resource("dup2 pipe onto stdout", io::Error::other("x"))) {
            Error::Restore(failures) => {
                assert_eq!(failures[0].step, "dup2 pipe onto stdout");
                assert_eq!(failures[1].step, "close saved stdout");
            }
            other => panic!("expected restore error, got {:?}", other),
        }
    }

    #[test]
    fn display_lists_all_failures() {
        let err = Error::Restore(vec![
            RestoreFailure { step: "a", source: io::Error::other("x") },
            RestoreFailure { step: "b", source: io::Error::other("y") },
        ]);
        assert_eq!(err.to_string(), "restoring stdio failed: a: x; b: y");
        assert!(!err.is_retryable());
    }
}
