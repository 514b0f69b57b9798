//! Worker stdout line protocol.
//!
//! The worker interleaves protocol lines with its own diagnostics, so any
//! line that is not a well-formed `PROGRESS:`, `SUBTITLE:` or `RESULT:`
//! record decodes to [`Message::Unrecognized`] and is ignored upstream.

use serde::Deserialize;

use crate::model::{ProgressState, WireCue};

const PROGRESS: &str = "PROGRESS:";
const SUBTITLE: &str = "SUBTITLE:";
const RESULT: &str = "RESULT:";

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Progress(ProgressState),
    Cue(WireCue),
    /// Full batch, only meaningful when no `Cue` messages arrived.
    Result(Vec<WireCue>),
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    #[serde(default)]
    subtitles: Vec<WireCue>,
}

pub fn decode_line(line: &str) -> Message {
    if let Some(payload) = line.strip_prefix(PROGRESS) {
        return serde_json::from_str(payload)
            .map(Message::Progress)
            .unwrap_or(Message::Unrecognized);
    }
    if let Some(payload) = line.strip_prefix(SUBTITLE) {
        return serde_json::from_str(payload)
            .map(Message::Cue)
            .unwrap_or(Message::Unrecognized);
    }
    if let Some(payload) = line.strip_prefix(RESULT) {
        return serde_json::from_str::<ResultPayload>(payload)
            .map(|r| Message::Result(r.subtitles))
            .unwrap_or(Message::Unrecognized);
    }
    Message::Unrecognized
}

/// Splits an arbitrarily chunked byte stream into lines and decodes them.
/// A trailing partial line is held until its newline arrives or
/// [`finish`](Self::finish) is called.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `chunk` and yields a message per completed line, lazily.
    pub fn feed<'a>(&'a mut self, chunk: &[u8]) -> impl Iterator<Item = Message> + use<'a> {
        self.pending.extend_from_slice(chunk);
        std::iter::from_fn(move || self.next_line().map(|l| decode_line(&l)))
    }

    /// End of stream: decodes whatever is left as a final line.
    pub fn finish(&mut self) -> Option<Message> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&line_text(&rest)))
    }

    fn next_line(&mut self) -> Option<String> {
        let nl = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=nl).collect();
        Some(line_text(&line[..nl]))
    }
}

fn line_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Verbatim capture of the worker's stderr, surfaced only on failure.
#[derive(Debug, Default)]
pub struct Diagnostics {
    buf: Vec<u8>,
}

impl Diagnostics {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}
