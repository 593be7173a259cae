//! STOMP frame model and text codec.
//!
//! Header escaping follows STOMP 1.2: `\\`, `\n`, `\r` and `\c` (colon) are
//! escaped everywhere except in CONNECT and CONNECTED frames. When a header
//! is repeated the first occurrence wins.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::FrameError;

/// Protocol versions offered in every CONNECT frame.
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Heart-beating is not negotiated; the client never sends or expects beats.
pub const HEART_BEAT: &str = "0,0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "STOMP" => Ok(Command::Stomp),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Duplicates are kept; lookups return the first.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the value of the first header called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.get("destination")
    }

    /// Builds the CONNECT frame for `host`.
    ///
    /// `defaults` are merged over the protocol headers, so a configured
    /// `heart-beat` or `accept-version` replaces the built-in value.
    pub fn connect(host: &str, defaults: &BTreeMap<String, String>) -> Self {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", HEART_BEAT)
            .header("host", host);

        for (name, value) in defaults {
            match frame.headers.iter_mut().find(|(k, _)| k == name) {
                Some(existing) => existing.1 = value.clone(),
                None => frame.headers.push((name.clone(), value.clone())),
            }
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Unsubscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn send(destination: &str, body: &str, headers: &BTreeMap<String, String>) -> Self {
        let mut frame = Frame::new(Command::Send).header("destination", destination);
        for (name, value) in headers {
            if name == "destination" || name == "content-length" {
                continue;
            }
            frame = frame.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            frame = frame.header("content-length", body.len().to_string());
        }
        frame.with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serializes the frame, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());

        out.push_str(self.command.as_str());
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

/// Decodes every frame contained in one transport message.
///
/// Heart-beat EOLs between frames are skipped, so a message holding only
/// newlines decodes to an empty list.
pub fn decode(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start_matches(['\n', '\r']);
        if rest.is_empty() {
            break;
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }

    Ok(frames)
}

fn decode_one(input: &str) -> Result<(Frame, &str), FrameError> {
    let (command_line, mut rest) = split_line(input).ok_or(FrameError::MissingTerminator)?;
    let command_line = command_line.trim();
    if command_line.is_empty() {
        return Err(FrameError::MissingCommand);
    }
    let command: Command = command_line.parse()?;
    let escaped = command.escapes_headers();

    let mut frame = Frame::new(command);
    loop {
        let (line, remaining) = split_line(rest).ok_or(FrameError::MissingTerminator)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if escaped {
            frame
                .headers
                .push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = frame
        .get("content-length")
        .and_then(|v| v.trim().parse::<usize>().ok());

    let (body, remaining) = match content_length {
        Some(len) => {
            let body = rest.get(..len).ok_or(FrameError::MissingTerminator)?;
            let after = rest.get(len..).ok_or(FrameError::MissingTerminator)?;
            let after = after
                .strip_prefix('\0')
                .ok_or(FrameError::MissingTerminator)?;
            (body, after)
        }
        None => {
            let end = rest.find('\0').ok_or(FrameError::MissingTerminator)?;
            (&rest[..end], &rest[end + 1..])
        }
    };

    frame.body = body.to_string();
    Ok((frame, remaining))
}

/// Splits off one line, accepting both `\n` and `\r\n` endings.
fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = &input[..idx];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, &input[idx + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
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
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}
