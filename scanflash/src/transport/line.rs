//! Splitting a byte stream into acknowledgment lines.

/// Accumulates bytes and hands out complete lines.
///
/// Lines end in `\r\n`; a bare `\n` is accepted as well. The terminator is
/// stripped. Bytes that are not valid UTF-8 are replaced.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes received after the last terminator.
    pub fn partial(&self) -> &[u8] {
        &self.pending
    }
}
