//! Converts between raw bytes and [`irc_wire::Frame`] values, owning the
//! line-buffering discipline: chunks arrive in arbitrary byte boundaries,
//! lines are delimited by `\r\n`, `\r`, or `\n`, and a trailing fragment with
//! no terminator yet is held until the next chunk completes it.
//!
//! Byte-to-text decoding is delegated to a `Transcoder`, matching the
//! "external collaborator" carve-out: a real deployment with `encoding` set
//! to something other than UTF-8 plugs in its own transcoder.

use irc_wire::{parse_frame, Frame};

pub trait Transcoder {
    fn decode(&self, bytes: &[u8]) -> String;
}

pub struct Utf8Transcoder;

impl Transcoder for Utf8Transcoder {
    fn decode(&self, bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

pub struct FrameCodec {
    buf: String,
    strip_colors: bool,
    transcoder: Box<dyn Transcoder>,
}

impl FrameCodec {
    pub fn new(strip_colors: bool) -> Self {
        FrameCodec {
            buf: String::new(),
            strip_colors,
            transcoder: Box::new(Utf8Transcoder),
        }
    }

    pub fn with_transcoder(strip_colors: bool, transcoder: Box<dyn Transcoder>) -> Self {
        FrameCodec {
            buf: String::new(),
            strip_colors,
            transcoder,
        }
    }

    /// Feed one chunk of raw bytes off the wire, returning the `Frame`s that
    /// completed as a result (possibly none, if the chunk ended mid-line).
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let text = self.transcoder.decode(bytes);
        self.push_text(&text)
    }

    fn push_text(&mut self, text: &str) -> Vec<Frame> {
        self.buf.push_str(text);
        // Normalize all three line-ending styles to `\n` purely for the
        // purpose of locating boundaries; frame content itself never
        // legitimately contains a bare CR or LF.
        if self.buf.contains('\r') {
            self.buf = self.buf.replace("\r\n", "\n").replace('\r', "\n");
        }

        let Some(last_nl) = self.buf.rfind('\n') else {
            return Vec::new();
        };

        let complete = self.buf[..=last_nl].to_owned();
        self.buf = self.buf[last_nl + 1..].to_owned();

        complete
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| parse_frame(line, self.strip_colors))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_crlf_cr_and_lf_boundaries() {
        let mut codec = FrameCodec::new(false);
        let mut commands: Vec<String> = Vec::new();
        commands.extend(codec.push_bytes(b"A\r\nB\r").iter().map(|f| f.raw_command.clone()));
        commands.extend(codec.push_bytes(b"\nC\r\n").iter().map(|f| f.raw_command.clone()));
        assert_eq!(commands, vec!["A", "B", "C"]);
    }

    #[test]
    fn holds_a_trailing_fragment_until_terminated() {
        let mut codec = FrameCodec::new(false);
        let mut commands: Vec<String> = Vec::new();
        commands.extend(codec.push_bytes(b"A\n").iter().map(|f| f.raw_command.clone()));
        commands.extend(codec.push_bytes(b"B\r\n").iter().map(|f| f.raw_command.clone()));
        let more = codec.push_bytes(b"C");
        assert_eq!(commands, vec!["A", "B"]);
        assert!(more.is_empty());
        assert_eq!(codec.buf, "C");
    }

    #[test]
    fn empty_lines_are_dropped() {
        let mut codec = FrameCodec::new(false);
        let frames = codec.push_bytes(b"\r\n\r\nPING :x\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw_command, "PING");
    }
}
