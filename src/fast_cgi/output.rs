use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::byte_queue::ByteQueue;
use super::connection::SharedStream;
use super::defs;
use super::defs::ProtocolStatus;
use super::error::ClientError;
use super::input::InputEngine;
use super::records::RecordWriter;
use super::status;

/// Product banner placed in the default `Server` header.
pub const SERVER_BANNER: &str =
    concat!("fcgi-responder/", env!("CARGO_PKG_VERSION"));

/// Response state that survives the handler: the worker holds clones so it
/// can finish a response the handler left open.
pub(crate) struct OutputChannel
{
    pub writer: RecordWriter,
    pub pending: ByteQueue,
}

impl OutputChannel {
    pub fn new() -> OutputChannel
    {
        OutputChannel {
            writer: RecordWriter::new(),
            pending: ByteQueue::new(),
        }
    }

    pub fn reset(&mut self)
    {
        self.pending.reset();
    }
}

/// Monotonic response flags, shared between the handler's `Response` and
/// the worker.
#[derive(Default)]
pub(crate) struct OutputFlags
{
    headers_sent: AtomicBool,
    ended: AtomicBool,
}

impl OutputFlags {
    pub fn headers_sent(&self) -> bool
    {
        self.headers_sent.load(Ordering::Acquire)
    }

    pub fn ended(&self) -> bool
    {
        self.ended.load(Ordering::Acquire)
    }

    pub fn reset(&self)
    {
        self.headers_sent.store(false, Ordering::Release);
        self.ended.store(false, Ordering::Release);
    }
}

/// What the handler sees of the response: status and header setters, body
/// writes, and `end`.
///
/// Body bytes accumulate in a queue; a full-capacity STDOUT record goes out
/// whenever 65535 bytes are pending, the rest at `end`.  Before the first
/// record reaches the socket any unread stdin is drained and discarded,
/// because the peer may refuse to read our response until it has finished
/// sending its request.
pub struct Response
{
    stream: SharedStream,
    input: Arc<Mutex<InputEngine>>,
    channel: Arc<Mutex<OutputChannel>>,
    flags: Arc<OutputFlags>,
    status: u16,
    headers: Vec<(String, String)>,
    request_id: u16,
    io_timeout: Duration,
}

impl Response {
    pub(crate) fn new(stream: SharedStream, input: Arc<Mutex<InputEngine>>,
                      channel: Arc<Mutex<OutputChannel>>,
                      flags: Arc<OutputFlags>, request_id: u16,
                      io_timeout: Duration) -> Response
    {
        let headers = vec![
            ("Content-Type".to_string(),
             "text/html; charset=utf-8".to_string()),
            ("Cache-Control".to_string(), "no-cache".to_string()),
            ("Date".to_string(), httpdate::fmt_http_date(SystemTime::now())),
            ("Server".to_string(), SERVER_BANNER.to_string()),
        ];
        Response {
            stream,
            input,
            channel,
            flags,
            status: 200,
            headers,
            request_id,
            io_timeout,
        }
    }

    /// Set the HTTP status code.  Ignored once the header block is out.
    pub fn set_status(&mut self, code: u16)
    {
        if !self.flags.headers_sent() {
            self.status = code;
        }
    }

    /// Set a response header; the last call for a name wins.  Ignored once
    /// the header block is out.
    pub fn set_header(&mut self, name: &str, value: &str)
    {
        if self.flags.headers_sent() {
            return;
        }
        for (existing, slot) in self.headers.iter_mut() {
            if existing.eq_ignore_ascii_case(name) {
                *slot = value.to_string();
                return;
            }
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn headers_sent(&self) -> bool
    {
        self.flags.headers_sent()
    }

    /// Append UTF-8 text to the response body.
    pub async fn write(&mut self, text: &str) -> Result<(), ClientError>
    {
        self.write_binary(text.as_bytes()).await
    }

    /// Append bytes to the response body.  The first write seals status and
    /// headers and enqueues the HTTP prefix ahead of the data.
    pub async fn write_binary(&mut self, data: &[u8])
                              -> Result<(), ClientError>
    {
        if self.flags.ended() {
            return Ok(());
        }
        let mut channel = self.channel.lock().await;
        let channel = &mut *channel;
        if !self.flags.headers_sent() {
            let prefix = self.header_prefix();
            channel.pending.append(prefix);
            self.flags.headers_sent.store(true, Ordering::Release);
        }
        channel.pending.append(Bytes::copy_from_slice(data));
        while channel.pending.len() >= defs::FCGI_MAX_CONTENT_LEN {
            self.flush_one(channel).await?;
        }
        Ok(())
    }

    /// Flush everything, close the STDOUT stream and send END_REQUEST.
    /// Idempotent; later body writes are ignored.
    pub async fn end(&mut self) -> Result<(), ClientError>
    {
        if self.flags.ended.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut channel = self.channel.lock().await;
        let channel = &mut *channel;
        if !self.flags.headers_sent() {
            let prefix = self.header_prefix();
            channel.pending.append(prefix);
            self.flags.headers_sent.store(true, Ordering::Release);
        }
        self.drain_unread_stdin().await?;
        let mut stream = self.stream.lock().await;
        while !channel.pending.is_empty() {
            channel
                .writer
                .write_stdout(&mut *stream, self.io_timeout, self.request_id,
                              &mut channel.pending)
                .await?;
        }
        channel
            .writer
            .write_stdout_end(&mut *stream, self.io_timeout, self.request_id)
            .await?;
        channel
            .writer
            .write_end_request(&mut *stream, self.io_timeout, self.request_id,
                               0, ProtocolStatus::RequestComplete)
            .await?;
        timeout(self.io_timeout, stream.flush())
            .await
            .map_err(|_| ClientError::IoTimeout)?
            .map_err(ClientError::Io)?;
        Ok(())
    }

    /// Emit one STDOUT record out of the pending queue.
    async fn flush_one(&self, channel: &mut OutputChannel)
                       -> Result<(), ClientError>
    {
        self.drain_unread_stdin().await?;
        let mut stream = self.stream.lock().await;
        channel
            .writer
            .write_stdout(&mut *stream, self.io_timeout, self.request_id,
                          &mut channel.pending)
            .await?;
        Ok(())
    }

    async fn drain_unread_stdin(&self) -> Result<(), ClientError>
    {
        let mut input = self.input.lock().await;
        if !input.stdin_complete() {
            let mut stream = self.stream.lock().await;
            input.discard_remaining(&mut *stream).await?;
        }
        Ok(())
    }

    /// `HTTP/1.1 <code> <reason>\r\n`, the headers, then a blank line.
    fn header_prefix(&self) -> Bytes
    {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(b"HTTP/1.1 ");
        buf.put_slice(self.status.to_string().as_bytes());
        if let Some(reason) = status::reason_phrase(self.status) {
            buf.put_u8(b' ');
            buf.put_slice(reason.as_bytes());
        }
        buf.put_slice(b"\r\n");
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}
