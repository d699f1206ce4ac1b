//! Squid external ACL line protocol.
//!
//! Requests arrive one per line as
//! `TOKEN PROTOCOL SOURCE METHOD TARGET`, with `TARGET` percent-encoded by
//! squid.  Every request gets exactly one reply line, `TOKEN OK` or
//! `TOKEN ERR`, in input order.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request line")]
    Empty,

    #[error("request {token:?} has {count} fields, expected 5")]
    FieldCount { token: String, count: usize },
}

impl ProtocolError {
    /// Token to answer with, when the line carried one.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::FieldCount { token, .. } => Some(token),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed percent escape at byte {offset}")]
    MalformedEscape { offset: usize },

    /// Such a request is answered `ERR` without being decided, so it never
    /// reaches the block log.
    #[error("decoded target is not valid UTF-8")]
    InvalidUtf8,
}

/// One parsed request line, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub token: &'a str,
    pub protocol: &'a str,
    pub source: &'a str,
    pub method: &'a str,
    /// Still percent-encoded; see [`decode_target`].
    pub target: &'a str,
}

impl<'a> RequestLine<'a> {
    pub fn parse(line: &'a str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => Err(ProtocolError::Empty),
            &[token, protocol, source, method, target] => Ok(Self {
                token,
                protocol,
                source,
                method,
                target,
            }),
            [token, ..] => Err(ProtocolError::FieldCount {
                token: token.to_string(),
                count: fields.len(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Err,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Err => "ERR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub token: String,
    pub verdict: Verdict,
}

impl Reply {
    pub fn new(token: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            token: token.into(),
            verdict,
        }
    }
}

/// Renders the reply without its trailing newline.
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.token, self.verdict.as_str())
    }
}

/// Undo squid's query-style escaping: `+` is a space and every `%` must be
/// followed by two hex digits.
pub fn decode_target(raw: &str) -> Result<Cow<'_, str>, DecodeError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return Err(DecodeError::MalformedEscape { offset: i });
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    if !raw.contains(['%', '+']) {
        return Ok(Cow::Borrowed(raw));
    }
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| Cow::Owned(s.into_owned()))
        .map_err(|_| DecodeError::InvalidUtf8)
}
