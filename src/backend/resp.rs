//! Remote Hash Store over RESP
//!
//! [`RespBackend`] talks to any Redis-compatible server. It owns a single
//! connection, opened lazily and reopened after an I/O failure.
//!
//! ## Request Flow
//!
//! ```text
//!   execute([c1])          execute([c1, c2, ..., cn])
//!        │                          │
//!        ▼                          ▼
//!   write c1               write MULTI, c1..cn, EXEC   (one flush)
//!        │                          │
//!        ▼                          ▼
//!   read 1 reply           read +OK, n x +QUEUED, EXEC array
//! ```
//!
//! ## Buffer Management
//!
//! Replies are accumulated in a `BytesMut` buffer. TCP may split a reply
//! across reads or deliver several pipelined replies at once; the decoder
//! only consumes complete frames.

use crate::backend::{reply_error, Command, HashBackend, Reply};
use crate::error::{StoreError, StoreResult};
use crate::protocol::{RespParser, RespValue};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Maximum size for the read buffer (64 MB)
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Page size requested from `HSCAN`
const SCAN_COUNT: usize = 100;

/// One open connection to the server.
struct RespConnection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: RespParser,
}

impl RespConnection {
    async fn open(addr: &str, timeout: Duration) -> StoreResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                StoreError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out after {:?}", addr, timeout),
                ))
            })??;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
        })
    }

    /// Writes every frame, then flushes once.
    async fn send(&mut self, frames: &[RespValue]) -> StoreResult<usize> {
        let mut out = BytesMut::new();
        for frame in frames {
            frame.encode(&mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        trace!(frames = frames.len(), bytes = out.len(), "sent request");
        Ok(out.len())
    }

    /// Reads the next complete reply.
    async fn receive(&mut self) -> StoreResult<RespValue> {
        loop {
            if let Some(value) = self.parser.decode(&mut self.buffer)? {
                return Ok(value);
            }
            self.read_more_data().await?;
        }
    }

    async fn read_more_data(&mut self) -> StoreResult<()> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(StoreError::Backend(format!(
                "reply exceeds buffer limit of {} bytes",
                MAX_BUFFER_SIZE
            )));
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        trace!(bytes = n, "read data");
        Ok(())
    }
}

/// A [`HashBackend`] backed by a Redis-compatible server.
pub struct RespBackend {
    addr: String,
    timeout: Duration,
    conn: Mutex<Option<RespConnection>>,
    requests: AtomicU64,
}

impl std::fmt::Debug for RespBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespBackend")
            .field("addr", &self.addr)
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .finish()
    }
}

impl RespBackend {
    /// Connects to `addr` (`host:port`), failing after `timeout`.
    pub async fn connect(addr: impl Into<String>, timeout: Duration) -> StoreResult<Self> {
        let addr = addr.into();
        let conn = RespConnection::open(&addr, timeout).await?;
        info!(addr = %addr, "connected to hash store");

        Ok(Self {
            addr,
            timeout,
            conn: Mutex::new(Some(conn)),
            requests: AtomicU64::new(0),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends `frames` and reads `expected` replies on one connection.
    ///
    /// The connection is taken out of its slot for the exchange and only
    /// put back once every reply has been read. A failure, or a caller that
    /// stops polling midway, leaves the slot empty so the next call opens a
    /// fresh stream instead of reading a stale reply.
    async fn roundtrip(&self, frames: Vec<RespValue>, expected: usize) -> StoreResult<Vec<RespValue>> {
        let mut slot = self.conn.lock().await;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                debug!(addr = %self.addr, "reconnecting to hash store");
                RespConnection::open(&self.addr, self.timeout).await?
            }
        };

        self.requests.fetch_add(1, Ordering::Relaxed);
        let result = async {
            conn.send(&frames).await?;
            let mut replies = Vec::with_capacity(expected);
            for _ in 0..expected {
                replies.push(conn.receive().await?);
            }
            Ok::<_, StoreError>(replies)
        }
        .await;

        match &result {
            Ok(_) => *slot = Some(conn),
            Err(e) => warn!(addr = %self.addr, error = %e, "dropping connection after failure"),
        }
        result
    }

    /// Sends one request and returns its reply, turning error replies into `Err`.
    async fn request(&self, name: &str, args: Vec<Bytes>) -> StoreResult<RespValue> {
        let mut replies = self.roundtrip(vec![RespValue::command(name, args)], 1).await?;
        match replies.pop() {
            Some(RespValue::Error(message)) => Err(reply_error(&message)),
            Some(value) => Ok(value),
            None => Err(StoreError::Backend("missing reply".to_string())),
        }
    }

    async fn request_integer(&self, name: &str, args: Vec<Bytes>) -> StoreResult<i64> {
        let reply = self.request(name, args).await?;
        reply.as_integer().ok_or_else(|| unexpected(name, &reply))
    }

    async fn request_bytes(&self, name: &str, args: Vec<Bytes>) -> StoreResult<Option<Bytes>> {
        match self.request(name, args).await? {
            RespValue::Null => Ok(None),
            RespValue::BulkString(b) => Ok(Some(b)),
            other => Err(unexpected(name, &other)),
        }
    }

    async fn request_array(&self, name: &str, args: Vec<Bytes>) -> StoreResult<Vec<Bytes>> {
        match self.request(name, args).await? {
            RespValue::Null => Ok(Vec::new()),
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| item.clone().into_bytes().ok_or_else(|| unexpected(name, &item)))
                .collect(),
            other => Err(unexpected(name, &other)),
        }
    }
}

fn unexpected(name: &str, reply: &RespValue) -> StoreError {
    StoreError::Backend(format!("unexpected reply to {}: {:?}", name, reply))
}

fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn text(raw: Bytes) -> StoreResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| StoreError::Backend(format!("non UTF-8 key: {}", e)))
}

/// Converts a reply frame to a [`Reply`].
fn to_reply(value: RespValue) -> Reply {
    match value {
        RespValue::SimpleString(s) if s == "OK" => Reply::Ok,
        RespValue::SimpleString(s) if s == "QUEUED" => Reply::Queued,
        RespValue::SimpleString(s) => Reply::Bulk(Bytes::from(s)),
        RespValue::Error(message) => Reply::Error(message),
        RespValue::Integer(n) => Reply::Integer(n),
        RespValue::BulkString(b) => Reply::Bulk(b),
        RespValue::Null => Reply::Nil,
        RespValue::Array(items) => Reply::Error(format!("unexpected array reply of {} items", items.len())),
    }
}

#[async_trait]
impl HashBackend for RespBackend {
    async fn execute(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let count = commands.len();
        let frames: Vec<RespValue> = commands
            .iter()
            .map(|c| RespValue::command(c.name(), c.args()))
            .collect();

        match count {
            0 => Ok(Vec::new()),
            1 => {
                let replies = self.roundtrip(frames, 1).await?;
                Ok(replies.into_iter().map(to_reply).collect())
            }
            _ => {
                let mut pipeline = Vec::with_capacity(count + 2);
                pipeline.push(RespValue::command("MULTI", Vec::new()));
                pipeline.extend(frames);
                pipeline.push(RespValue::command("EXEC", Vec::new()));

                let mut replies = self.roundtrip(pipeline, count + 2).await?;
                let exec = replies.pop().unwrap_or(RespValue::Null);

                // A rejected command aborts the whole transaction
                if let Some(RespValue::Error(message)) =
                    replies.iter().find(|r| matches!(r, RespValue::Error(_)))
                {
                    return Err(reply_error(message));
                }

                match exec {
                    RespValue::Array(items) if items.len() == count => {
                        debug!(commands = count, "transaction committed");
                        Ok(items.into_iter().map(to_reply).collect())
                    }
                    RespValue::Error(message) => Err(reply_error(&message)),
                    other => Err(unexpected("EXEC", &other)),
                }
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.request_bytes("GET", vec![arg(key)]).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.request_integer("EXISTS", vec![arg(key)]).await? > 0)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.request_array("KEYS", vec![arg(pattern)])
            .await?
            .into_iter()
            .map(text)
            .collect()
    }

    async fn dbsize(&self) -> StoreResult<usize> {
        Ok(self.request_integer("DBSIZE", Vec::new()).await? as usize)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Bytes>> {
        self.request_bytes("HGET", vec![arg(key), arg(field)]).await
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.request_integer("HEXISTS", vec![arg(key), arg(field)]).await? == 1)
    }

    async fn hlen(&self, key: &str) -> StoreResult<usize> {
        Ok(self.request_integer("HLEN", vec![arg(key)]).await? as usize)
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<String>> {
        self.request_array("HKEYS", vec![arg(key)])
            .await?
            .into_iter()
            .map(text)
            .collect()
    }

    async fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<(String, Bytes)>)> {
        let count = if count == 0 { SCAN_COUNT } else { count };
        let args = vec![
            arg(key),
            Bytes::from(cursor.to_string()),
            arg("COUNT"),
            Bytes::from(count.to_string()),
        ];
        let reply = self.request("HSCAN", args).await?;

        let mut parts = reply.clone().into_array().unwrap_or_default().into_iter();
        let (Some(next), Some(RespValue::Array(flat))) = (parts.next(), parts.next()) else {
            return Err(unexpected("HSCAN", &reply));
        };
        let next = next
            .into_bytes()
            .and_then(|b| std::str::from_utf8(&b).ok().and_then(|s| s.parse().ok()))
            .ok_or_else(|| unexpected("HSCAN", &reply))?;

        let mut entries = Vec::with_capacity(flat.len() / 2);
        let mut flat = flat.into_iter();
        while let (Some(field), Some(value)) = (flat.next(), flat.next()) {
            match (field.into_bytes(), value.into_bytes()) {
                (Some(field), Some(value)) => entries.push((text(field)?, value)),
                _ => return Err(unexpected("HSCAN", &reply)),
            }
        }
        Ok((next, entries))
    }

    async fn sismember(&self, key: &str, member: &Bytes) -> StoreResult<bool> {
        Ok(self.request_integer("SISMEMBER", vec![arg(key), member.clone()]).await? == 1)
    }

    async fn scard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.request_integer("SCARD", vec![arg(key)]).await? as usize)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<Bytes>> {
        self.request_array("SMEMBERS", vec![arg(key)]).await
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        Ok(self.request_integer("LLEN", vec![arg(key)]).await? as usize)
    }

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<Bytes>> {
        self.request_bytes("LINDEX", vec![arg(key), Bytes::from(index.to_string())])
            .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Bytes>> {
        let args = vec![
            arg(key),
            Bytes::from(start.to_string()),
            Bytes::from(stop.to_string()),
        ];
        self.request_array("LRANGE", args).await
    }
}
