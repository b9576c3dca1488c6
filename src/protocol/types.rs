//! RESP (Redis Serialization Protocol) Frames
//!
//! The remote hash store speaks RESP. Requests are always arrays of bulk
//! strings; replies may be any frame type:
//!
//! - `+` Simple String: `+OK\r\n`, `+QUEUED\r\n`
//! - `-` Error: `-WRONGTYPE Operation against a key holding the wrong kind of value\r\n`
//! - `:` Integer: `:1\r\n`
//! - `$` Bulk String: `$5\r\nhello\r\n`, null as `$-1\r\n`
//! - `*` Array: `*2\r\n$1\r\na\r\n$1\r\nb\r\n`, null as `*-1\r\n`

use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply such as `OK` or `QUEUED`
    SimpleString(String),

    /// Error reply; the first word is the error class (`ERR`, `WRONGTYPE`, ...)
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Binary-safe payload
    BulkString(Bytes),

    /// Null bulk string or null array
    Null,

    /// Ordered sequence of frames
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Builds a request frame from a command name and its arguments.
    pub fn command(name: &str, args: impl IntoIterator<Item = Bytes>) -> Self {
        let mut parts = vec![RespValue::BulkString(Bytes::copy_from_slice(name.as_bytes()))];
        parts.extend(args.into_iter().map(RespValue::BulkString));
        RespValue::Array(parts)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Encodes the frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.encode(buf);
                }
            }
        }
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// True for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s == "OK")
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Payload of a bulk or simple string; `None` for null.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(values) => Some(values),
            _ => None,
        }
    }
}

fn write_line(buf: &mut BytesMut, prefix: u8, content: &[u8]) {
    buf.reserve(content.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(content);
    buf.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        let frame = RespValue::command(
            "HGET",
            vec![Bytes::from("users"), Bytes::from("name")],
        );
        assert_eq!(
            &frame.to_bytes()[..],
            b"*3\r\n$4\r\nHGET\r\n$5\r\nusers\r\n$4\r\nname\r\n"
        );
    }

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(&RespValue::simple_string("OK").to_bytes()[..], b"+OK\r\n");
        assert_eq!(&RespValue::error("ERR boom").to_bytes()[..], b"-ERR boom\r\n");
        assert_eq!(&RespValue::Integer(-42).to_bytes()[..], b":-42\r\n");
        assert_eq!(&RespValue::Null.to_bytes()[..], b"$-1\r\n");
    }

    #[test]
    fn test_binary_payload_encoding() {
        let frame = RespValue::bulk_string(Bytes::from_static(b"a\r\nb"));
        assert_eq!(&frame.to_bytes()[..], b"$4\r\na\r\nb\r\n");
    }

    #[test]
    fn test_accessors() {
        assert!(RespValue::simple_string("OK").is_ok());
        assert!(!RespValue::simple_string("QUEUED").is_ok());
        assert_eq!(RespValue::Integer(3).as_integer(), Some(3));
        assert_eq!(
            RespValue::bulk_string("v").into_bytes(),
            Some(Bytes::from("v"))
        );
        assert_eq!(RespValue::Null.into_bytes(), None);
        assert_eq!(
            RespValue::Array(vec![RespValue::Integer(1)]).into_array(),
            Some(vec![RespValue::Integer(1)])
        );
    }
}
