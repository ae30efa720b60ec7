//! Line codec for the controller serial protocol.
//!
//! Outbound: newline-terminated ASCII command lines.
//! Inbound: the controllers print free-form diagnostic text; `LineBuffer`
//! splits the byte stream into lines for logging. Inbound lines are never
//! correlated with outbound commands.

use crate::messages::{Action, ShutterCommand};
use thiserror::Error;

/// Partial inbound data kept before the oldest bytes are discarded.
const MAX_PARTIAL_LEN: usize = 8192;
const TRIMMED_PARTIAL_LEN: usize = 4096;

/// Errors that can occur during command encoding/decoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Command contains non-ASCII characters: {0:?}")]
    NonAscii(String),

    #[error("Command contains an embedded line break: {0:?}")]
    EmbeddedNewline(String),

    #[error("Malformed shutter command: {0:?}")]
    Malformed(String),
}

/// Validate a pre-formatted command and terminate it with `\n`.
pub fn encode_raw_command(text: &str) -> Result<String, CodecError> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    let body = body.strip_suffix('\r').unwrap_or(body);

    if body.trim().is_empty() {
        return Err(CodecError::EmptyCommand);
    }
    if !body.is_ascii() {
        return Err(CodecError::NonAscii(body.to_string()));
    }
    if body.contains(['\n', '\r']) {
        return Err(CodecError::EmbeddedNewline(body.to_string()));
    }

    Ok(format!("{body}\n"))
}

/// Parse a structured shutter command line such as `O6:1` or `O6:1\n`.
pub fn decode_shutter_command(line: &str) -> Result<ShutterCommand, CodecError> {
    let malformed = || CodecError::Malformed(line.to_string());

    let body = line.trim_end_matches(['\r', '\n']);
    let rest = body.strip_prefix('O').ok_or_else(malformed)?;
    let (address, action) = rest.split_once(':').ok_or_else(malformed)?;

    if address.is_empty() || !address.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let local_address = address.parse().map_err(|_| malformed())?;
    let action = action
        .parse::<u8>()
        .ok()
        .and_then(Action::from_code)
        .ok_or_else(|| CodecError::InvalidAction(action.to_string()))?;

    Ok(ShutterCommand::new(local_address, action))
}

/// Accumulates inbound bytes and yields complete, non-empty lines.
///
/// Bytes are buffered raw and decoded one complete line at a time, so a
/// multi-byte character split across reads survives intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    trims: u64,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the lines it completed, trimmed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n' || b == b'\r') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }

        if self.partial.len() > MAX_PARTIAL_LEN {
            let cut = self.partial.len() - TRIMMED_PARTIAL_LEN;
            self.partial.drain(..cut);
            self.trims += 1;
        }

        lines
    }

    /// Return any unterminated trailing text, clearing the buffer.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        decode_line(&rest)
    }

    /// Number of times the partial buffer overflowed and was trimmed.
    pub fn trims(&self) -> u64 {
        self.trims
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_raw_appends_newline() {
        assert_eq!(encode_raw_command("O6:1").unwrap(), "O6:1\n");
        assert_eq!(encode_raw_command("O6:1\n").unwrap(), "O6:1\n");
        assert_eq!(encode_raw_command("O6:1\r\n").unwrap(), "O6:1\n");
    }

    #[test]
    fn test_encode_raw_rejects_invalid() {
        assert_eq!(encode_raw_command(""), Err(CodecError::EmptyCommand));
        assert_eq!(encode_raw_command("  \n"), Err(CodecError::EmptyCommand));
        assert!(matches!(
            encode_raw_command("Ö1:1"),
            Err(CodecError::NonAscii(_))
        ));
        assert!(matches!(
            encode_raw_command("O1:1\nO2:1"),
            Err(CodecError::EmbeddedNewline(_))
        ));
    }

    #[test]
    fn test_decode_shutter_command() {
        let cmd = decode_shutter_command("O6:1\n").unwrap();
        assert_eq!(cmd, ShutterCommand::new(6, Action::Open));

        let cmd = decode_shutter_command("O14:0").unwrap();
        assert_eq!(cmd, ShutterCommand::new(14, Action::Close));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_shutter_command("X6:1"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_shutter_command("O6"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_shutter_command("O:1"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_shutter_command("O-1:1"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_shutter_command("O6:2"),
            Err(CodecError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_line_buffer_splits_chunks() {
        let mut buf = LineBuffer::new();

        assert!(buf.push(b"Shutter 6 ").is_empty());
        let lines = buf.push(b"opening\r\nready\n\npart");
        assert_eq!(lines, vec!["Shutter 6 opening", "ready"]);
        assert_eq!(buf.flush(), Some("part".to_string()));
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_line_buffer_trims_runaway_partial() {
        let mut buf = LineBuffer::new();
        let noise = vec![b'x'; MAX_PARTIAL_LEN + 10];

        assert!(buf.push(&noise).is_empty());
        assert_eq!(buf.trims(), 1);

        let lines = buf.push(b"\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), TRIMMED_PARTIAL_LEN);
    }

    #[test]
    fn test_line_buffer_keeps_split_multibyte_char() {
        let mut buf = LineBuffer::new();
        let line = "Temp 21°C\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC2).unwrap() + 1;

        assert!(buf.push(&line[..split]).is_empty());
        assert_eq!(buf.push(&line[split..]), vec!["Temp 21°C"]);
        assert_eq!(buf.trims(), 0);
    }
}
