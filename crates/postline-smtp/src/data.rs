//! DATA phase encoding.
//!
//! Message bodies arrive in arbitrary chunks, so line state has to survive
//! chunk boundaries: a `.` at the start of a line is doubled, a bare LF
//! becomes CRLF, and the terminator always starts on a fresh line.

/// Incremental encoder for the DATA phase.
#[derive(Debug, Clone)]
pub struct DataEncoder {
    at_line_start: bool,
    after_cr: bool,
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DataEncoder {
    /// Creates an encoder positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            at_line_start: true,
            after_cr: false,
        }
    }

    /// Encodes one chunk of message content.
    #[must_use]
    pub fn encode(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 64 + 2);
        for &byte in chunk {
            match byte {
                b'\n' => {
                    if !self.after_cr {
                        out.push(b'\r');
                    }
                    out.push(b'\n');
                    self.at_line_start = true;
                    self.after_cr = false;
                    continue;
                }
                b'.' if self.at_line_start => out.extend_from_slice(b".."),
                _ => out.push(byte),
            }
            self.after_cr = byte == b'\r';
            self.at_line_start = false;
        }
        out
    }

    /// Returns the end-of-data sequence, preceded by CRLF if the last line
    /// was left open.
    #[must_use]
    pub fn finish(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        if self.after_cr {
            out.push(b'\n');
        } else if !self.at_line_start {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        *self = Self::new();
        out
    }
}
