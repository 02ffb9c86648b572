//! Wire codec for the line-oriented debug protocol.
//!
//! A frame is `<commandId>\t<seq>\t<payload>\n`. The command id and
//! sequence id are decimal integers; the payload grammar depends on the
//! command. Multi-field payloads join percent-encoded fields with tabs,
//! so splitting a frame stops after the second tab.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

/// Characters escaped inside a payload field: controls (tab, newline,
/// carriage return included) plus the escape character itself.
const FIELD_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');

/// A malformed frame. The offending message is logged and dropped; the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed message: {reason} in {frame:?}")]
pub struct MalformedMessageError {
    /// What was wrong with the frame.
    pub reason: &'static str,
    /// The raw frame, for the log.
    pub frame: String,
}

/// One protocol frame.
///
/// Command ids outside the known registry are preserved as-is so a
/// newer client's messages survive a round-trip through older tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Command id from the registry (or an unknown one, preserved).
    pub command: u32,
    /// Sequence id; odd = debugger-originated, even = daemon-originated.
    pub seq: i64,
    /// Command-specific payload, tab-joined escaped fields.
    pub payload: String,
}

impl WireMessage {
    /// Build a frame with a pre-assembled payload.
    #[must_use]
    pub fn new(command: u32, seq: i64, payload: impl Into<String>) -> Self {
        Self {
            command,
            seq,
            payload: payload.into(),
        }
    }

    /// Build a frame from individual payload fields, escaping each.
    #[must_use]
    pub fn from_fields(command: u32, seq: i64, fields: &[&str]) -> Self {
        let payload = fields
            .iter()
            .map(|field| escape_field(field))
            .collect::<Vec<_>>()
            .join("\t");
        Self::new(command, seq, payload)
    }

    /// Serialize to the newline-terminated frame text.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}\t{}\t{}\n", self.command, self.seq, self.payload)
    }

    /// Parse one frame (without its trailing newline).
    ///
    /// Splitting stops after the second tab, so tabs inside the payload
    /// separate payload fields rather than break the frame shape.
    pub fn decode(line: &str) -> Result<Self, MalformedMessageError> {
        let malformed = |reason| MalformedMessageError {
            reason,
            frame: line.to_string(),
        };
        let mut parts = line.splitn(3, '\t');
        let command = parts.next().ok_or_else(|| malformed("empty frame"))?;
        let seq = parts.next().ok_or_else(|| malformed("missing sequence id"))?;
        let payload = parts.next().ok_or_else(|| malformed("missing payload field"))?;

        let command: u32 = command
            .parse()
            .map_err(|_| malformed("non-numeric command id"))?;
        let seq: i64 = seq
            .parse()
            .map_err(|_| malformed("non-numeric sequence id"))?;
        Ok(Self::new(command, seq, payload))
    }

    /// Split the payload into unescaped fields.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        if self.payload.is_empty() {
            return Vec::new();
        }
        self.payload.split('\t').map(unescape_field).collect()
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd={} seq={}", self.command, self.seq)
    }
}

/// Percent-escape one payload field.
#[must_use]
pub fn escape_field(field: &str) -> String {
    utf8_percent_encode(field, FIELD_ESCAPES).to_string()
}

/// Reverse [`escape_field`]. Invalid escapes decode lossily rather
/// than failing; a payload field never aborts a frame.
#[must_use]
pub fn unescape_field(field: &str) -> String {
    percent_decode_str(field).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape_round_trips() {
        let msg = WireMessage::from_fields(111, 1, &["line", "main.vg", "14", "x > 3"]);
        let decoded = WireMessage::decode(msg.encode().trim_end()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.fields(), vec!["line", "main.vg", "14", "x > 3"]);
    }

    #[test]
    fn newlines_in_fields_are_escaped() {
        let msg = WireMessage::from_fields(113, 3, &["a\nb"]);
        assert!(!msg.payload.contains('\n'));
        assert_eq!(msg.fields(), vec!["a\nb"]);
    }

    #[test]
    fn garbage_is_malformed_not_fatal() {
        assert!(WireMessage::decode("not-a-number\t1\tx").is_err());
        assert!(WireMessage::decode("101").is_err());
        // Fewer than three top-level fields.
        assert!(WireMessage::decode("101\t1").is_err());
        assert!(WireMessage::decode("101\tNaN\t").is_err());
    }

    #[test]
    fn unknown_command_ids_are_preserved() {
        let decoded = WireMessage::decode("4242\t7\tfuture").unwrap();
        assert_eq!(decoded.command, 4242);
        assert_eq!(decoded.encode(), "4242\t7\tfuture\n");
    }
}
