//! RESP Protocol Implementation
//!
//! Client-side codec for the Redis Serialization Protocol, used by
//! [`RespBackend`](crate::backend::RespBackend) to talk to Redis-compatible
//! hash stores.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` frame and its encoder
//! - `parser`: incremental reply decoder
//!
//! ## Example
//!
//! ```
//! use flashdict::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let request = RespValue::command("HGET", vec![Bytes::from("users"), Bytes::from("101")]);
//! let wire = request.to_bytes();
//! assert_eq!(parse_message(&wire).unwrap(), Some(request));
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
