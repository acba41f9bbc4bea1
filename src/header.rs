use std::fmt;

/// STOMP protocol versions supported by this crate.
///
/// The ordering matters: behaviors gated on "1.1 and later" (header
/// escaping, the `id` requirement on UNSUBSCRIBE) compare against
/// `Version::V1_1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse the `version` header of a CONNECTED frame.
    pub fn from_header(value: &str) -> Option<Version> {
        match value.trim() {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }

    /// Whether header keys and values use escape sequences on the wire.
    /// STOMP 1.0 transmits them verbatim.
    pub fn escapes(&self) -> bool {
        !matches!(self, Version::V1_0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape a header key or value for wire transmission.
///
/// Under 1.1+ the following characters are escaped:
/// - backslash (0x5c) → `\\`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\:`
///
/// Keys are escaped with the same table: an unescaped colon in a key would
/// corrupt the line.
pub fn escape_value(version: Version, input: &str) -> String {
    if !version.escapes() {
        return input.to_string();
    }
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\:"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse of [`escape_value`]. Fails on a trailing backslash or an escape
/// sequence outside the table.
pub fn unescape_value(version: Version, input: &[u8]) -> Result<Vec<u8>, String> {
    if !version.escapes() {
        return Ok(input.to_vec());
    }
    let mut result = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            result.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => result.push(b'\\'),
            Some(b'n') => result.push(b'\n'),
            Some(b':') => result.push(b':'),
            Some(&other) => {
                return Err(format!("invalid escape sequence '\\{}'", other as char));
            }
            None => return Err("incomplete escape at end of header".to_string()),
        }
    }
    Ok(result)
}

/// Locate the key/value separator: the first unescaped colon of a header
/// line. Under 1.0 nothing is escaped, so this is simply the first colon.
pub fn find_separator(version: Version, line: &[u8]) -> Option<usize> {
    if !version.escapes() {
        return line.iter().position(|&b| b == b':');
    }
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b'\\' => i += 2,
            b':' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Render a header list as wire bytes: `key:value\n` per pair, in insertion
/// order, escaped per `version`.
pub fn serialize_headers(headers: &[(String, String)], version: Version) -> Vec<u8> {
    let mut out = Vec::new();
    for (k, v) in headers {
        out.extend_from_slice(escape_value(version, k).as_bytes());
        out.push(b':');
        out.extend_from_slice(escape_value(version, v).as_bytes());
        out.push(b'\n');
    }
    out
}

/// Parse a complete header block (lines up to an empty line or end of
/// input), unescaping per `version`. Duplicate keys are preserved in order.
pub fn parse_headers(input: &[u8], version: Version) -> Result<Vec<(String, String)>, String> {
    let mut headers = Vec::new();
    for mut line in input.split(|&b| b == b'\n') {
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            break;
        }
        headers.push(parse_header_line(line, version)?);
    }
    Ok(headers)
}

/// Parse a single header line (no trailing EOL) into an unescaped pair.
pub fn parse_header_line(line: &[u8], version: Version) -> Result<(String, String), String> {
    let sep = find_separator(version, line).ok_or_else(|| {
        format!(
            "malformed header line: {:?}",
            String::from_utf8_lossy(line)
        )
    })?;
    let key = unescape_value(version, &line[..sep])?;
    let val = unescape_value(version, &line[sep + 1..])?;
    let key = String::from_utf8(key).map_err(|e| format!("invalid utf8 in header key: {}", e))?;
    let val = String::from_utf8(val).map_err(|e| format!("invalid utf8 in header value: {}", e))?;
    Ok((key, val))
}
