use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::byte_queue::ByteQueue;
use super::defs;
use super::defs::{ProtocolStatus, RecordType};
use super::error::ClientError;

/// One decoded FastCGI record.  Padding is stripped during decode.
#[derive(Debug)]
pub struct Record
{
    pub version: u8,
    pub rec_type: RecordType,
    pub request_id: u16,
    pub content: Bytes,
}

impl Record {
    pub fn content_len(&self) -> usize
    {
        self.content.len()
    }

    /// Role from a BEGIN_REQUEST body (big-endian u16 at content offset 0).
    pub fn role(&self) -> Result<u16, ClientError>
    {
        if self.content.len() < 8 {
            return Err(ClientError::Protocol(format!(
                "BEGIN_REQUEST body is {} bytes, expected 8",
                self.content.len()
            )));
        }
        let mut body = self.content.clone();
        Ok(body.get_u16())
    }

    /// KEEP_CONN bit from a BEGIN_REQUEST body (bit 0 of content byte 2).
    pub fn keep_connection(&self) -> bool
    {
        self.content.len() >= 3 && (self.content[2] & defs::FCGI_KEEP_CONN) != 0
    }
}

/// Record decoder with a rolling buffer.
///
/// The buffer survives across frames: bytes of the next record left behind
/// by one `read_record` call are the first bytes seen by the next call.  One
/// reader instance serves every request on its connection.
pub struct RecordReader
{
    buffer: BytesMut,
}

impl RecordReader {
    pub fn new() -> RecordReader
    {
        RecordReader {
            buffer: BytesMut::with_capacity(defs::FCGI_MAX_FRAME_LEN),
        }
    }

    /// Drop buffered bytes.  Only meaningful when the reader is handed a
    /// brand new connection; between keep-alive requests the buffer must be
    /// left alone so pipelined records survive.
    pub fn reset(&mut self)
    {
        self.buffer.clear();
    }

    pub fn has_buffered_bytes(&self) -> bool
    {
        !self.buffer.is_empty()
    }

    /// Read one complete record, suspending on the stream as needed.
    ///
    /// A connection close with an empty buffer is `PeerClosed`; close with
    /// a partial frame buffered is `Truncated`.
    pub async fn read_record<S>(&mut self, stream: &mut S, io_timeout: Duration)
                                -> Result<Record, ClientError>
        where S: AsyncRead + Unpin,
    {
        loop {
            if let Some(record) = self.take_frame()? {
                return Ok(record);
            }
            let read = timeout(io_timeout, stream.read_buf(&mut self.buffer))
                .await
                .map_err(|_| ClientError::IoTimeout)?
                .map_err(ClientError::Io)?;
            if read == 0 {
                return Err(if self.buffer.is_empty() {
                    ClientError::PeerClosed
                } else {
                    ClientError::Truncated
                });
            }
        }
    }

    /// Decode one frame out of the buffer if a whole one is present.
    fn take_frame(&mut self) -> Result<Option<Record>, ClientError>
    {
        if self.buffer.len() < defs::FCGI_HEADER_LEN {
            return Ok(None);
        }
        let content_len =
            usize::from(u16::from_be_bytes([self.buffer[4], self.buffer[5]]));
        let padding_len = usize::from(self.buffer[6]);
        let frame_len = defs::FCGI_HEADER_LEN + content_len + padding_len;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let version = self.buffer[0];
        let type_byte = self.buffer[1];
        let request_id = u16::from_be_bytes([self.buffer[2], self.buffer[3]]);
        let content = if content_len > 0 {
            Bytes::copy_from_slice(
                &self.buffer[defs::FCGI_HEADER_LEN..defs::FCGI_HEADER_LEN + content_len],
            )
        } else {
            Bytes::new()
        };
        self.buffer.advance(frame_len);

        if version != defs::FCGI_VERSION_1 {
            return Err(ClientError::Protocol(format!(
                "unsupported protocol version {}",
                version
            )));
        }
        let rec_type = RecordType::from_u8(type_byte).ok_or_else(|| {
            ClientError::Protocol(format!("unknown record type {}", type_byte))
        })?;

        Ok(Some(Record {
            version,
            rec_type,
            request_id,
            content,
        }))
    }
}

/// Record encoder.  Reuses one scratch buffer for header and content so a
/// frame goes out in a single write.
pub struct RecordWriter
{
    frame: BytesMut,
}

impl RecordWriter {
    pub fn new() -> RecordWriter
    {
        RecordWriter {
            frame: BytesMut::with_capacity(defs::FCGI_HEADER_LEN + 4096),
        }
    }

    fn start_frame(&mut self, rec_type: RecordType, request_id: u16,
                   content_len: usize)
    {
        self.frame.clear();
        self.frame.put_u8(defs::FCGI_VERSION_1);
        self.frame.put_u8(rec_type.to_u8());
        self.frame.put_u16(request_id);
        self.frame.put_u16(u16::try_from(content_len).unwrap());
        self.frame.put_u8(0);
        self.frame.put_u8(0);
    }

    async fn send<S>(&mut self, stream: &mut S, io_timeout: Duration)
                     -> Result<(), ClientError>
        where S: AsyncWrite + Unpin,
    {
        timeout(io_timeout, stream.write_all(&self.frame))
            .await
            .map_err(|_| ClientError::IoTimeout)?
            .map_err(ClientError::Io)
    }

    /// Drain up to 65535 bytes out of `source` and write them as one STDOUT
    /// record with zero padding.  Returns the number of bytes consumed; an
    /// empty source writes nothing.
    pub async fn write_stdout<S>(&mut self, stream: &mut S, io_timeout: Duration,
                                 request_id: u16, source: &mut ByteQueue)
                                 -> Result<usize, ClientError>
        where S: AsyncWrite + Unpin,
    {
        let take = source.len().min(defs::FCGI_MAX_CONTENT_LEN);
        if take == 0 {
            return Ok(0);
        }
        self.start_frame(RecordType::Stdout, request_id, take);
        source.drain_up_to(take, &mut self.frame);
        self.send(stream, io_timeout).await?;
        Ok(take)
    }

    /// Zero-length STDOUT record: the end-of-response-stream marker.
    pub async fn write_stdout_end<S>(&mut self, stream: &mut S,
                                     io_timeout: Duration, request_id: u16)
                                     -> Result<(), ClientError>
        where S: AsyncWrite + Unpin,
    {
        self.start_frame(RecordType::Stdout, request_id, 0);
        self.send(stream, io_timeout).await
    }

    /// One STDERR record; the web server relays it into its error log.
    /// Messages longer than a record are truncated.
    pub async fn write_stderr<S>(&mut self, stream: &mut S,
                                 io_timeout: Duration, request_id: u16,
                                 message: &str) -> Result<(), ClientError>
        where S: AsyncWrite + Unpin,
    {
        if message.is_empty() {
            return Ok(());
        }
        let content = &message.as_bytes()
            [..message.len().min(defs::FCGI_MAX_CONTENT_LEN)];
        self.start_frame(RecordType::Stderr, request_id, content.len());
        self.frame.put_slice(content);
        self.send(stream, io_timeout).await
    }

    /// END_REQUEST record closing the request.
    pub async fn write_end_request<S>(&mut self, stream: &mut S,
                                      io_timeout: Duration, request_id: u16,
                                      app_status: u32,
                                      protocol_status: ProtocolStatus)
                                      -> Result<(), ClientError>
        where S: AsyncWrite + Unpin,
    {
        self.start_frame(RecordType::EndRequest, request_id, 8);
        self.frame.put_u32(app_status);
        self.frame.put_u8(protocol_status.to_u8());
        self.frame.put_slice(&[0u8; 3]);
        self.send(stream, io_timeout).await
    }
}
