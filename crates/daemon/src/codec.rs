// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codec for the IPC protocol.
//!
//! Frames are length-free and resynchronizable:
//!
//! ```text
//! COMMAND  := VERB [ ' ' SUB_VERB ] [ ' ' ARG ]* [ ' -- ' LEN '\n' BASE64 ] ';;'
//! RESPONSE := TYPE [ ' ' WORDS ]   [ ' -- ' LEN '\n' BASE64 ] ';;'
//! ```
//!
//! `LEN` is the base64 byte length and the terminator is the literal `;;`.
//! Base64 never contains `;`, so scanning for the terminator is safe. After
//! a parse error the reader calls [`Decoder::resync`] to skip to the next
//! terminator, letting the server reject one malformed request without
//! dropping the connection.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::protocol::{lookup_verb, verb_names, Command, ErrorCode, ProtocolError, Response};

/// Frame terminator.
pub const TERMINATOR: &str = ";;";

/// Payload marker, surrounded by single spaces.
const DATA_MARKER: &str = " -- ";

/// Maximum frame size (8 MiB).
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Default per-frame read/write timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn push_payload(out: &mut String, data: &[u8]) {
    let encoded = BASE64.encode(data);
    out.push_str(DATA_MARKER);
    out.push_str(&encoded.len().to_string());
    out.push('\n');
    out.push_str(&encoded);
}

/// Render a command as a wire frame, terminator included.
pub fn format_command(cmd: &Command) -> String {
    let mut out = cmd.verb.clone();
    if let Some(sub) = &cmd.sub {
        out.push(' ');
        out.push_str(sub);
    }
    for arg in &cmd.args {
        out.push(' ');
        out.push_str(arg);
    }
    if let Some(data) = &cmd.data {
        push_payload(&mut out, data);
    }
    out.push_str(TERMINATOR);
    out
}

/// Render a response as a wire frame, terminator included.
pub fn format_response(resp: &Response) -> String {
    let mut out = String::new();
    match resp {
        Response::Ok { message } => {
            out.push_str("OK");
            if let Some(msg) = message {
                out.push(' ');
                out.push_str(msg);
            }
        }
        Response::Err {
            code,
            message,
            detail,
        } => {
            out.push_str("ERR ");
            out.push_str(code.as_str());
            if !message.is_empty() {
                out.push(' ');
                out.push_str(message);
            }
            if let Some(detail) = detail {
                push_payload(&mut out, detail.to_string().as_bytes());
            }
        }
        Response::Json { body } => {
            out.push_str("JSON");
            push_payload(&mut out, body.to_string().as_bytes());
        }
        Response::Data { bytes } => {
            out.push_str("DATA");
            push_payload(&mut out, bytes);
        }
        Response::Chunk { bytes } => {
            out.push_str("CHUNK");
            push_payload(&mut out, bytes);
        }
        Response::End => out.push_str("END"),
        Response::Pong => out.push_str("PONG"),
    }
    out.push_str(TERMINATOR);
    out
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Split a frame into its head line and decoded payload.
fn split_payload(frame: &str) -> Result<(&str, Option<Vec<u8>>), ProtocolError> {
    let Some(marker) = frame.find(DATA_MARKER) else {
        return Ok((frame, None));
    };
    let head = &frame[..marker];
    let payload = &frame[marker + DATA_MARKER.len()..];

    let (len_str, encoded) = payload
        .split_once('\n')
        .ok_or_else(|| ProtocolError::BadData("missing newline after length".into()))?;
    let declared: usize = len_str
        .trim()
        .parse()
        .map_err(|_| ProtocolError::BadData(format!("bad payload length {len_str:?}")))?;
    if declared != encoded.len() {
        return Err(ProtocolError::BadDataLength {
            declared,
            actual: encoded.len(),
        });
    }
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| ProtocolError::BadData(e.to_string()))?;
    Ok((head, Some(decoded)))
}

/// Parse one command frame (without the terminator).
pub fn parse_command(frame: &str) -> Result<Command, ProtocolError> {
    let trimmed = frame.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        // Guard for misrouted callers writing raw JSON at the socket.
        return Err(ProtocolError::JsonInsteadOfCommand);
    }

    let (head, data) = split_payload(frame)?;
    let mut tokens = head.split_whitespace();
    let verb = tokens
        .next()
        .ok_or(ProtocolError::EmptyCommand)?
        .to_uppercase();
    let spec = lookup_verb(&verb).ok_or_else(|| ProtocolError::UnknownCommand {
        verb: verb.clone(),
        valid: verb_names(),
    })?;

    let rest: Vec<&str> = tokens.collect();
    let is_sub = rest
        .first()
        .is_some_and(|first| spec.subs.iter().any(|s| s.eq_ignore_ascii_case(first)));
    let (sub, args) = if is_sub {
        (
            rest.first().map(|s| s.to_uppercase()),
            rest[1..].iter().map(|s| s.to_string()).collect(),
        )
    } else {
        (None, rest.iter().map(|s| s.to_string()).collect())
    };

    Ok(Command {
        verb,
        sub,
        args,
        data,
    })
}

/// Parse one response frame (without the terminator).
pub fn parse_response(frame: &str) -> Result<Response, ProtocolError> {
    let (head, data) = split_payload(frame)?;
    let mut tokens = head.split_whitespace();
    let kind = tokens
        .next()
        .ok_or_else(|| ProtocolError::BadResponse("empty response".into()))?
        .to_uppercase();
    let words: Vec<&str> = tokens.collect();

    match kind.as_str() {
        "OK" => Ok(Response::Ok {
            message: if words.is_empty() {
                None
            } else {
                Some(words.join(" "))
            },
        }),
        "PONG" => Ok(Response::Pong),
        "END" => Ok(Response::End),
        "ERR" => {
            let code_str = words
                .first()
                .ok_or_else(|| ProtocolError::BadResponse("ERR without code".into()))?;
            let code = ErrorCode::parse(code_str)
                .ok_or_else(|| ProtocolError::BadResponse(format!("unknown code {code_str}")))?;
            let detail = match data {
                Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                None => None,
            };
            Ok(Response::Err {
                code,
                message: words[1..].join(" "),
                detail,
            })
        }
        "JSON" => {
            let bytes = data
                .ok_or_else(|| ProtocolError::BadResponse("JSON without payload".into()))?;
            Ok(Response::Json {
                body: serde_json::from_slice(&bytes)?,
            })
        }
        "DATA" => Ok(Response::Data {
            bytes: data.unwrap_or_default(),
        }),
        "CHUNK" => Ok(Response::Chunk {
            bytes: data.unwrap_or_default(),
        }),
        other => Err(ProtocolError::BadResponse(format!(
            "unknown response type {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Streaming decoder
// ---------------------------------------------------------------------------

/// Accumulates socket bytes and surfaces complete frames.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: Vec<u8>,
    /// Discard everything through the next terminator before resuming.
    resyncing: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete frame, without its terminator.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Fails fast on raw
    /// JSON (no terminator would ever arrive) and on oversized frames.
    pub fn next_frame(&mut self) -> Result<Option<String>, ProtocolError> {
        if self.resyncing && !self.drop_through_terminator() {
            return Ok(None);
        }

        match find_terminator(&self.buf) {
            Some(pos) => {
                let frame: Vec<u8> = self.buf.drain(..pos + TERMINATOR.len()).collect();
                let frame = String::from_utf8_lossy(&frame[..pos]).into_owned();
                Ok(Some(frame))
            }
            None => {
                let head = self.buf.iter().position(|b| !b.is_ascii_whitespace());
                if let Some(first) = head.map(|i| self.buf[i]) {
                    if first == b'{' || first == b'[' {
                        return Err(ProtocolError::JsonInsteadOfCommand);
                    }
                }
                if self.buf.len() > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: self.buf.len(),
                        max: MAX_FRAME_SIZE,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Skip to the byte after the next terminator, recovering from a
    /// malformed request without tearing down the connection.
    pub fn resync(&mut self) {
        self.resyncing = true;
        self.drop_through_terminator();
    }

    fn drop_through_terminator(&mut self) -> bool {
        match find_terminator(&self.buf) {
            Some(pos) => {
                self.buf.drain(..pos + TERMINATOR.len());
                self.resyncing = false;
                true
            }
            None => {
                self.buf.clear();
                false
            }
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == TERMINATOR.as_bytes())
}

// ---------------------------------------------------------------------------
// Async framing
// ---------------------------------------------------------------------------

/// Read one frame, filling `decoder` from `reader` as needed.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    decoder: &mut Decoder,
    timeout: Duration,
) -> Result<String, ProtocolError> {
    tokio::time::timeout(timeout, async {
        loop {
            if let Some(frame) = decoder.next_frame()? {
                return Ok(frame);
            }
            let mut chunk = [0u8; 4096];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            decoder.push(&chunk[..n]);
        }
    })
    .await
    .map_err(|_| ProtocolError::Timeout)?
}

/// Read and parse one command.
pub async fn read_command<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    decoder: &mut Decoder,
    timeout: Duration,
) -> Result<Command, ProtocolError> {
    let frame = read_frame(reader, decoder, timeout).await?;
    parse_command(&frame)
}

/// Read and parse one response.
pub async fn read_response<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    decoder: &mut Decoder,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    let frame = read_frame(reader, decoder, timeout).await?;
    parse_response(&frame)
}

/// Write a rendered frame with a timeout.
async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: String,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    tokio::time::timeout(timeout, async {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    })
    .await
    .map_err(|_| ProtocolError::Timeout)?
}

/// Write a command frame.
pub async fn write_command<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    cmd: &Command,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_frame(writer, format_command(cmd), timeout).await
}

/// Write a response frame.
pub async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    resp: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    write_frame(writer, format_response(resp), timeout).await
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
