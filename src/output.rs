use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

/// Bytes written to stdout and stderr during one capture, in pipe order.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
}

impl CapturedOutput {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Decode as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Split into lines, without their terminators.
    pub fn lines(&self) -> impl Iterator<Item = Cow<'_, str>> {
        let body = self.bytes.strip_suffix(b"\n").unwrap_or(&self.bytes);
        let count = if self.bytes.is_empty() { 0 } else { usize::MAX };
        body.split(|&b| b == b'\n')
            .take(count)
            .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(line)))
    }
}

impl Deref for CapturedOutput {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for CapturedOutput {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<CapturedOutput> for Vec<u8> {
    fn from(output: CapturedOutput) -> Self {
        output.bytes
    }
}

impl PartialEq<[u8]> for CapturedOutput {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

impl PartialEq<&str> for CapturedOutput {
    fn eq(&self, other: &&str) -> bool {
        self.bytes == other.as_bytes()
    }
}

impl fmt::Debug for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Large captures are truncated so assertion messages stay readable.
        const PREVIEW: usize = 256;
        let shown = &self.bytes[..self.bytes.len().min(PREVIEW)];
        write!(f, "CapturedOutput({:?}", String::from_utf8_lossy(shown))?;
        if self.bytes.len() > PREVIEW {
            write!(f, " ... {} bytes total", self.bytes.len())?;
        }
        f.write_str(")")
    }
}
