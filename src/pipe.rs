use std::io::{self, PipeReader, PipeWriter, Read};
use std::sync::mpsc;
use std::thread;

use crate::error::{Error, Result};

const DRAIN_CHUNK: usize = 8 * 1024;

/// Allocate the pipe for one capture. Both ends are close-on-exec.
pub(crate) fn open() -> Result<(PipeReader, PipeWriter)> {
    io::pipe().map_err(|e| Error::resource("pipe", e))
}

/// Background worker copying a pipe's read end into memory.
///
/// Draining runs concurrently with the callback: pipes only buffer a few
/// kilobytes in the kernel, after which writers block until someone reads.
pub(crate) struct Drain {
    done: mpsc::Receiver<io::Result<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl Drain {
    /// Start draining `reader` until every write end is closed.
    pub(crate) fn start(mut reader: PipeReader) -> Result<Self> {
        let (tx, done) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("stdcap-drain".into())
            .spawn(move || {
                let mut buf = Vec::new();
                let mut chunk = [0u8; DRAIN_CHUNK];
                let result = loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break Ok(buf),
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => break Err(e),
                    }
                };
                // The read end closes here, before the result is handed over.
                drop(reader);
                let _ = tx.send(result);
            })
            .map_err(|e| Error::resource("spawn drain worker", e))?;
        Ok(Self { done, handle })
    }

    /// Wait for end-of-stream and take the drained bytes.
    ///
    /// Only returns once every write end of the pipe has been closed.
    pub(crate) fn finish(self) -> Result<Vec<u8>> {
        let result = self.done.recv();
        let _ = self.handle.join();
        match result {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(Error::resource("drain", e)),
            Err(_) => Err(Error::resource(
                "drain",
                io::Error::other("drain worker exited without a result"),
            )),
        }
    }
}
