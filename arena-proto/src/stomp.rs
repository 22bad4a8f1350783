//! STOMP 1.2 text frame codec.
//!
//! The real-time channel carries exactly one STOMP frame per WebSocket text
//! message. [`decode`] parses one frame (returning `None` for heart-beat
//! EOLs) and [`Frame::encode`] produces the wire text including the
//! trailing NUL.
//!
//! Header values are escaped per STOMP 1.2 (`\\`, `\n`, `\r`, `\c`) except
//! in `CONNECT` and `CONNECTED` frames, which the protocol exempts.

use std::fmt;

/// Header names used by the client and the development broker.
pub mod headers {
    /// Protocol versions offered on `CONNECT`.
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// Virtual host on `CONNECT`.
    pub const HOST: &str = "host";
    /// Heart-beat negotiation on `CONNECT` / `CONNECTED`.
    pub const HEART_BEAT: &str = "heart-beat";
    /// Negotiated version on `CONNECTED`.
    pub const VERSION: &str = "version";
    /// Bearer credential on `CONNECT`.
    pub const AUTHORIZATION: &str = "Authorization";
    /// Frame destination.
    pub const DESTINATION: &str = "destination";
    /// Subscription identifier.
    pub const ID: &str = "id";
    /// Subscription a `MESSAGE` was delivered for.
    pub const SUBSCRIPTION: &str = "subscription";
    /// Broker-assigned message identifier.
    pub const MESSAGE_ID: &str = "message-id";
    /// Body MIME type.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Body length in bytes.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Short error description on `ERROR`.
    pub const MESSAGE: &str = "message";
    /// Receipt request.
    pub const RECEIPT: &str = "receipt";
    /// Receipt acknowledgment.
    pub const RECEIPT_ID: &str = "receipt-id";
}

/// Errors produced while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The command line is not a known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// A header contains an escape sequence STOMP does not define.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    /// The header block or the body is not terminated.
    #[error("frame is not NUL-terminated")]
    Unterminated,

    /// `content-length` is not a number or disagrees with the frame.
    #[error("bad content-length: {0}")]
    ContentLength(String),
}

/// STOMP frame commands (client and server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// The command as written on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parses a command line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        Some(match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// Whether header escaping applies to frames with this command.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame with a text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; lookups return the first.
    pub headers: Vec<(String, String)>,
    /// Frame body.
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// `CONNECT` frame offering STOMP 1.1/1.2 with heart-beats disabled,
    /// followed by `extra` headers (authentication).
    #[must_use]
    pub fn connect(host: &str, extra: &[(String, String)]) -> Self {
        let mut frame = Self::new(Command::Connect)
            .header(headers::ACCEPT_VERSION, "1.2,1.1")
            .header(headers::HOST, host)
            .header(headers::HEART_BEAT, "0,0");
        frame.headers.extend(extra.iter().cloned());
        frame
    }

    /// `SUBSCRIBE` frame.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header(headers::ID, id)
            .header(headers::DESTINATION, destination)
    }

    /// `SEND` frame carrying a JSON body.
    #[must_use]
    pub fn send_json(destination: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .header(headers::DESTINATION, destination)
            .header(headers::CONTENT_TYPE, "application/json")
            .body(body)
    }

    /// `DISCONNECT` frame.
    #[must_use]
    pub const fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Returns the first value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encodes the frame to its wire text, adding `content-length` when the
    /// body is non-empty and the header is not already present.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            push_header_text(&mut out, name, escape);
            out.push(':');
            push_header_text(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.get(headers::CONTENT_LENGTH).is_none() {
            out.push_str(headers::CONTENT_LENGTH);
            out.push(':');
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn push_header_text(out: &mut String, text: &str, escape: bool) {
    if !escape {
        out.push_str(text);
        return;
    }
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape_header_text(text: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(text.to_string())),
        }
    }
    Ok(out)
}

/// Splits off one line (terminated by `\n`, optional preceding `\r`).
fn take_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = &input[..idx];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, &input[idx + 1..]))
}

/// Decodes one frame from a WebSocket text message.
///
/// Returns `Ok(None)` when the message holds only heart-beat EOLs.
///
/// # Errors
///
/// Returns [`FrameError`] when the text is not a well-formed STOMP frame.
pub fn decode(input: &str) -> Result<Option<Frame>, FrameError> {
    let rest = input.trim_start_matches(['\r', '\n']);
    if rest.is_empty() {
        return Ok(None);
    }

    let (command_line, mut rest) = take_line(rest).ok_or(FrameError::Unterminated)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;
    let escape = command.escapes_headers();

    let mut frame = Frame::new(command);
    loop {
        let (line, after) = take_line(rest).ok_or(FrameError::Unterminated)?;
        rest = after;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        let (name, value) = if escape {
            (unescape_header_text(name)?, unescape_header_text(value)?)
        } else {
            (name.to_string(), value.to_string())
        };
        frame.headers.push((name, value));
    }

    let body = match frame.get(headers::CONTENT_LENGTH) {
        Some(raw) => {
            let len: usize = raw
                .trim()
                .parse()
                .map_err(|_| FrameError::ContentLength(raw.to_string()))?;
            let body = rest.get(..len).ok_or_else(|| {
                FrameError::ContentLength(format!("{len} exceeds remaining {}", rest.len()))
            })?;
            if !rest[len..].starts_with('\0') {
                return Err(FrameError::Unterminated);
            }
            body
        }
        None => {
            let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
            &rest[..end]
        }
    };
    frame.body = body.to_string();
    Ok(Some(frame))
}
