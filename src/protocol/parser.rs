//! Incremental RESP Reply Decoder
//!
//! Replies arrive over TCP in arbitrary chunks. The decoder works in two
//! passes over the read buffer:
//!
//! 1. measure the length of the first complete frame (or report that more
//!    data is needed) without allocating,
//! 2. split exactly that many bytes off the buffer and decode them, slicing
//!    bulk payloads out of the frozen chunk instead of copying them.
//!
//! A partial frame is left untouched in the buffer until more bytes arrive.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur during RESP decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Length or integer line is not a number
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Status or error line is not UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Negative length other than the -1 null marker
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Protocol violation (missing CRLF, too deep, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The frame exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for decoding operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateless decoder for reply frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Removes and returns the first complete frame in `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame.
    pub fn decode(&self, buf: &mut BytesMut) -> ParseResult<Option<RespValue>> {
        let len = match frame_len(buf, 0)? {
            Some(len) => len,
            None => return Ok(None),
        };

        let frame = buf.split_to(len).freeze();
        let (value, consumed) = decode_frame(&frame, 0)?;
        debug_assert_eq!(consumed, len);
        Ok(Some(value))
    }
}

/// Position of the first CRLF in `buf`.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Reads the header line at the start of `buf` (after the prefix byte).
///
/// Returns the line content and the offset just past its CRLF.
fn header(buf: &[u8]) -> Option<(&[u8], usize)> {
    find_crlf(&buf[1..]).map(|pos| (&buf[1..1 + pos], 1 + pos + 2))
}

fn parse_int(line: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: std::num::ParseIntError| ParseError::InvalidInteger(format!("{} ({})", s, e)))
}

fn bulk_len(len: i64) -> ParseResult<Option<usize>> {
    match len {
        -1 => Ok(None),
        n if n < 0 => Err(ParseError::InvalidLength(n)),
        n if n as usize > MAX_BULK_SIZE => Err(ParseError::MessageTooLarge {
            size: n as usize,
            max: MAX_BULK_SIZE,
        }),
        n => Ok(Some(n as usize)),
    }
}

/// Length of the first complete frame, or `None` if incomplete.
fn frame_len(buf: &[u8], depth: usize) -> ParseResult<Option<usize>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::ProtocolError(format!(
            "maximum nesting depth exceeded: {}",
            MAX_NESTING_DEPTH
        )));
    }

    let (line, body_start) = match header(buf) {
        Some(h) => h,
        None => return Ok(None),
    };

    match buf[0] {
        prefix::SIMPLE_STRING | prefix::ERROR | prefix::INTEGER => Ok(Some(body_start)),
        prefix::BULK_STRING => match bulk_len(parse_int(line)?)? {
            None => Ok(Some(body_start)),
            Some(len) => {
                let total = body_start + len + 2;
                if buf.len() < total {
                    Ok(None)
                } else {
                    Ok(Some(total))
                }
            }
        },
        prefix::ARRAY => {
            let count = parse_int(line)?;
            if count == -1 {
                return Ok(Some(body_start));
            }
            if count < 0 {
                return Err(ParseError::InvalidLength(count));
            }
            let mut offset = body_start;
            for _ in 0..count {
                match frame_len(&buf[offset..], depth + 1)? {
                    Some(len) => offset += len,
                    None => return Ok(None),
                }
            }
            Ok(Some(offset))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

fn text(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Decodes a frame known to be complete.
fn decode_frame(frame: &Bytes, depth: usize) -> ParseResult<(RespValue, usize)> {
    let (line, body_start) = header(frame)
        .ok_or_else(|| ParseError::ProtocolError("missing CRLF".to_string()))?;

    match frame[0] {
        prefix::SIMPLE_STRING => Ok((RespValue::SimpleString(text(line)?), body_start)),
        prefix::ERROR => Ok((RespValue::Error(text(line)?), body_start)),
        prefix::INTEGER => Ok((RespValue::Integer(parse_int(line)?), body_start)),
        prefix::BULK_STRING => match bulk_len(parse_int(line)?)? {
            None => Ok((RespValue::Null, body_start)),
            Some(len) => {
                let end = body_start + len;
                if &frame[end..end + 2] != CRLF {
                    return Err(ParseError::ProtocolError(
                        "bulk string missing trailing CRLF".to_string(),
                    ));
                }
                Ok((RespValue::BulkString(frame.slice(body_start..end)), end + 2))
            }
        },
        prefix::ARRAY => {
            let count = parse_int(line)?;
            if count == -1 {
                return Ok((RespValue::Null, body_start));
            }
            let mut values = Vec::with_capacity(count as usize);
            let mut offset = body_start;
            for _ in 0..count {
                let (value, used) = decode_frame(&frame.slice(offset..), depth + 1)?;
                values.push(value);
                offset += used;
            }
            Ok((RespValue::Array(values), offset))
        }
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Decodes a single frame from a complete byte slice.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<RespValue>> {
    let mut buf = BytesMut::from(buf);
    RespParser::new().decode(&mut buf)
}
