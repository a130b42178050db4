//! STOMP 1.2 frame codec.
//!
//! A frame is a command line, header lines, a blank line, a body and a
//! terminating NUL. Header names and values are escaped (`\\`, `\r`, `\n`,
//! `\c`) in every frame except `CONNECT` and `CONNECTED`. One WebSocket
//! message may carry several frames and bare EOLs between frames are
//! heart-beats.

use thiserror::Error;
use tracing::warn;

/// Decoding failures. A bad frame is skipped, the connection survives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has no command line")]
    MissingCommand,

    #[error("malformed header line '{0}'")]
    MalformedHeader(String),

    #[error("invalid escape sequence in '{0}'")]
    InvalidEscape(String),

    #[error("invalid content-length '{0}'")]
    InvalidLength(String),

    #[error("frame is not NUL-terminated")]
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    /// In wire order. Repeated names are allowed; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decodes every frame in `text`, skipping heart-beat EOLs.
///
/// A frame that fails to decode is logged and dropped; decoding resumes after
/// its NUL, so the frames around it are kept.
pub fn decode_frames(text: &str) -> Vec<StompFrame> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return frames;
        }
        match decode_one(rest) {
            Ok((frame, consumed)) => {
                frames.push(frame);
                rest = &rest[consumed..];
            }
            Err(e) => {
                warn!(error = %e, "Skipping undecodable STOMP frame");
                let Some(end) = rest.find('\0') else {
                    return frames;
                };
                rest = &rest[end + 1..];
            }
        }
    }
}

/// Decodes the frame at the start of `text`, returning it with the number of
/// bytes consumed (including the NUL).
fn decode_one(text: &str) -> Result<(StompFrame, usize), FrameError> {
    let mut offset = 0;
    let command = next_line(text, &mut offset).ok_or(FrameError::MissingCommand)?.to_string();
    if command.is_empty() || command.contains('\0') {
        return Err(FrameError::MissingCommand);
    }
    let escape = escapes_headers(&command);

    let mut headers = Vec::new();
    loop {
        let line = next_line(text, &mut offset).ok_or(FrameError::Unterminated)?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let frame_rest = &text[offset..];
    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| value.trim().parse::<usize>().map_err(|_| FrameError::InvalidLength(value.clone())))
        .transpose()?;

    let body_len = match content_length {
        Some(len) => {
            if frame_rest.as_bytes().get(len) != Some(&0) || !frame_rest.is_char_boundary(len) {
                return Err(FrameError::Unterminated);
            }
            len
        }
        None => frame_rest.find('\0').ok_or(FrameError::Unterminated)?,
    };

    let frame = StompFrame {
        command,
        headers,
        body: frame_rest[..body_len].to_string(),
    };
    Ok((frame, offset + body_len + 1))
}

/// The line starting at `offset`, without its EOL. Advances `offset` past it.
fn next_line<'a>(text: &'a str, offset: &mut usize) -> Option<&'a str> {
    let rest = &text[*offset..];
    let end = rest.find('\n')?;
    *offset += end + 1;
    let line = &rest[..end];
    Some(line.strip_suffix('\r').unwrap_or(line))
}

fn escapes_headers(command: &str) -> bool {
    !matches!(command, "CONNECT" | "CONNECTED")
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}
