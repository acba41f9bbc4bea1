//! Pure incremental STOMP frame parser.
//!
//! [`parse_frame_slice`] operates on an arbitrary prefix of the wire stream
//! and reports how many bytes it consumed; it keeps no state of its own, so
//! the caller (the session's parse buffer) owns all buffering and may
//! re-invoke it as more bytes arrive.

use crate::frame::{Command, Frame};
use crate::header::{self, Version};

/// Result of attempting to parse a prefix of the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The input does not yet hold a complete item. Nothing was consumed.
    NeedMoreData,
    /// A single NUL no-op frame; counts as an inbound heartbeat.
    Heartbeat { consumed: usize },
    /// A complete frame and the number of input bytes it occupied.
    Frame { frame: Frame, consumed: usize },
}

/// Parse a single STOMP frame (or heartbeat no-op) from a raw byte slice.
///
/// Stray EOL bytes between frames are skipped; a leading NUL is reported as
/// [`ParseOutcome::Heartbeat`]. Frames short on data return
/// [`ParseOutcome::NeedMoreData`] without consuming input. Protocol
/// violations (unknown command, malformed header line, bad content-length,
/// missing frame terminator) return `Err`.
pub fn parse_frame_slice(input: &[u8], version: Version) -> Result<ParseOutcome, String> {
    let mut pos = 0usize;
    let len = input.len();

    // EOL bytes between frames carry no meaning.
    while pos < len && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }
    if pos >= len {
        return Ok(ParseOutcome::NeedMoreData);
    }
    if input[pos] == 0 {
        return Ok(ParseOutcome::Heartbeat { consumed: pos + 1 });
    }

    // command line
    let cmd_end = match input[pos..].iter().position(|&b| b == b'\n') {
        Some(rel) => rel,
        None => return Ok(ParseOutcome::NeedMoreData),
    };
    let mut cmd_bytes = &input[pos..pos + cmd_end];
    if cmd_bytes.last() == Some(&b'\r') {
        cmd_bytes = &cmd_bytes[..cmd_bytes.len() - 1];
    }
    let name = std::str::from_utf8(cmd_bytes)
        .map_err(|e| format!("invalid utf8 in command: {}", e))?;
    let command =
        Command::from_name(name).ok_or_else(|| format!("unknown command: {:?}", name))?;
    pos += cmd_end + 1;

    // header lines until a blank line; the first content-length wins
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<usize> = None;
    loop {
        if pos >= len {
            return Ok(ParseOutcome::NeedMoreData);
        }
        let line_end = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(rel) => rel,
            None => return Ok(ParseOutcome::NeedMoreData),
        };
        let mut line = &input[pos..pos + line_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        pos += line_end + 1;
        if line.is_empty() {
            break;
        }
        let (key, val) = header::parse_header_line(line, version)?;
        if content_length.is_none() && key.eq_ignore_ascii_case("content-length") {
            content_length = Some(parse_content_length(&val)?);
        }
        headers.push((key, val));
    }

    // body: exact content-length bytes plus a mandatory NUL, or everything
    // up to the first NUL when the header is absent
    let body = match content_length {
        Some(content_len) => {
            let frame_end = content_len
                .checked_add(1)
                .and_then(|n| pos.checked_add(n))
                .ok_or_else(|| format!("content-length {} overflows frame bounds", content_len))?;
            if frame_end > len {
                return Ok(ParseOutcome::NeedMoreData);
            }
            let body = input[pos..pos + content_len].to_vec();
            pos += content_len;
            if input[pos] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            pos += 1;
            body
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                let body = input[pos..pos + nul_rel].to_vec();
                pos += nul_rel + 1;
                body
            }
            None => return Ok(ParseOutcome::NeedMoreData),
        },
    };

    Ok(ParseOutcome::Frame {
        frame: Frame {
            command,
            headers,
            body,
        },
        consumed: pos,
    })
}

fn parse_content_length(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid content-length {:?}", value));
    }
    trimmed
        .parse::<usize>()
        .map_err(|e| format!("invalid content-length {:?}: {}", value, e))
}
