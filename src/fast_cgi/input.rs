use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

use super::byte_queue::ByteQueue;
use super::connection::SharedStream;
use super::defs;
use super::defs::{RecordType, Role};
use super::error::ClientError;
use super::records::{Record, RecordReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState
{
    ExpectBegin,
    ExpectParams,
    ExpectStdin,
    Closed,
}

/// Per-request record consumption state machine.
///
/// Owned by the connection worker and shared with the output side, which
/// needs to drain leftover stdin before it may flush a response.  One
/// engine serves every request on its connection; `reset` rewinds it
/// between keep-alive requests while the record reader keeps any pipelined
/// bytes it already buffered.
pub(crate) struct InputEngine
{
    reader: RecordReader,
    state: InputState,
    request_id: u16,
    keep_conn: bool,
    params: HashMap<String, String>,
    param_bytes: ByteQueue,
    stdin: ByteQueue,
    stdin_complete: bool,
    max_header_size: usize,
    io_timeout: Duration,
}

impl InputEngine {
    pub fn new(max_header_size: usize, io_timeout: Duration) -> InputEngine
    {
        InputEngine {
            reader: RecordReader::new(),
            state: InputState::ExpectBegin,
            request_id: 0,
            keep_conn: false,
            params: HashMap::new(),
            param_bytes: ByteQueue::new(),
            stdin: ByteQueue::new(),
            stdin_complete: false,
            max_header_size,
            io_timeout,
        }
    }

    /// Rewind for the next request on the same connection.
    pub fn reset(&mut self)
    {
        self.state = InputState::ExpectBegin;
        self.request_id = 0;
        self.keep_conn = false;
        self.params.clear();
        self.param_bytes.reset();
        self.stdin.reset();
        self.stdin_complete = false;
    }

    /// True while no record of a new request has been consumed.  A peer
    /// close in this state is a graceful end of the connection.
    pub fn is_idle(&self) -> bool
    {
        self.state == InputState::ExpectBegin && !self.reader.has_buffered_bytes()
    }

    pub fn request_id(&self) -> u16
    {
        self.request_id
    }

    pub fn keep_connection(&self) -> bool
    {
        self.keep_conn
    }

    pub fn stdin_complete(&self) -> bool
    {
        self.stdin_complete
    }

    pub fn take_params(&mut self) -> HashMap<String, String>
    {
        std::mem::take(&mut self.params)
    }

    pub fn take_stdin(&mut self) -> Bytes
    {
        self.stdin.take_all()
    }

    /// Advance through BEGIN_REQUEST and the PARAMS stream.  Returns once
    /// the parameter map is complete and the handler can run.
    pub async fn initialize<S>(&mut self, stream: &mut S)
                               -> Result<(), ClientError>
        where S: AsyncRead + Unpin,
    {
        while self.state == InputState::ExpectBegin
            || self.state == InputState::ExpectParams
        {
            let record = self.reader.read_record(stream, self.io_timeout).await?;
            self.step(record)?;
        }
        Ok(())
    }

    /// Consume STDIN records until the peer marks the body complete,
    /// buffering the content.
    pub async fn drain_to_end<S>(&mut self, stream: &mut S)
                                 -> Result<(), ClientError>
        where S: AsyncRead + Unpin,
    {
        while !self.stdin_complete {
            let record = self.reader.read_record(stream, self.io_timeout).await?;
            self.step(record)?;
        }
        Ok(())
    }

    /// Consume STDIN to completion without buffering, dropping anything
    /// already buffered as well.
    pub async fn discard_remaining<S>(&mut self, stream: &mut S)
                                      -> Result<(), ClientError>
        where S: AsyncRead + Unpin,
    {
        self.stdin.reset();
        while !self.stdin_complete {
            let record = self.reader.read_record(stream, self.io_timeout).await?;
            self.step(record)?;
            self.stdin.reset();
        }
        Ok(())
    }

    /// Apply one record to the state machine.
    fn step(&mut self, record: Record) -> Result<(), ClientError>
    {
        // Aborts and management requests end the request in every state.
        if record.rec_type == RecordType::AbortRequest {
            return Err(ClientError::Aborted);
        }
        if record.rec_type == RecordType::GetValues {
            return Err(ClientError::UnsupportedManagementRequest);
        }

        match self.state {
            InputState::ExpectBegin => match record.rec_type {
                RecordType::BeginRequest => {
                    let role = record.role()?;
                    // The id is captured before the role check so an
                    // UNKNOWN_ROLE reply can name the right request.
                    self.request_id = record.request_id;
                    self.keep_conn = record.keep_connection();
                    if Role::from_u16(role) != Some(Role::Responder) {
                        return Err(ClientError::UnknownRole(role));
                    }
                    self.state = InputState::ExpectParams;
                    Ok(())
                }
                other => Err(ClientError::Protocol(format!(
                    "expected BEGIN_REQUEST, got {:?}",
                    other
                ))),
            },
            InputState::ExpectParams | InputState::ExpectStdin => {
                if record.request_id != self.request_id {
                    if record.request_id == defs::FCGI_NULL_REQUEST_ID {
                        return Err(ClientError::Protocol(format!(
                            "unexpected management record {:?}",
                            record.rec_type
                        )));
                    }
                    return Err(ClientError::UnknownRequestId {
                        got: record.request_id,
                        expected: self.request_id,
                    });
                }
                match (self.state, record.rec_type) {
                    (InputState::ExpectParams, RecordType::Params) => {
                        if record.content_len() == 0 {
                            self.params =
                                self.param_bytes.decode_name_value_pairs()?;
                            self.state = InputState::ExpectStdin;
                        } else {
                            self.param_bytes.append(record.content);
                            if self.param_bytes.len() > self.max_header_size {
                                return Err(ClientError::HeaderTooLarge {
                                    size: self.param_bytes.len(),
                                    limit: self.max_header_size,
                                });
                            }
                        }
                        Ok(())
                    }
                    (InputState::ExpectStdin, RecordType::Stdin) => {
                        if record.content_len() == 0 {
                            self.stdin_complete = true;
                            self.state = InputState::Closed;
                        } else {
                            self.stdin.append(record.content);
                        }
                        Ok(())
                    }
                    (_, other) => Err(ClientError::Protocol(format!(
                        "out-of-order {:?} record",
                        other
                    ))),
                }
            }
            InputState::Closed => Err(ClientError::Protocol(format!(
                "{:?} record after end of request input",
                record.rec_type
            ))),
        }
    }
}

/// What the handler sees of an accepted request: the parameter map plus
/// pull access to the request body.
pub struct Request
{
    stream: SharedStream,
    engine: Arc<Mutex<InputEngine>>,
    params: HashMap<String, String>,
    request_id: u16,
    keep_conn: bool,
}

impl Request {
    pub(crate) fn new(stream: SharedStream, engine: Arc<Mutex<InputEngine>>,
                      params: HashMap<String, String>, request_id: u16,
                      keep_conn: bool) -> Request
    {
        Request {
            stream,
            engine,
            params,
            request_id,
            keep_conn,
        }
    }

    /// Request id chosen by the peer.
    pub fn request_id(&self) -> u16
    {
        self.request_id
    }

    /// Whether the peer asked to keep the connection for further requests.
    pub fn keep_connection(&self) -> bool
    {
        self.keep_conn
    }

    /// Look up one parameter; a name the peer never sent is an error, not
    /// an empty string.
    pub fn param(&self, name: &str) -> Result<&str, ClientError>
    {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ClientError::MissingParameter(name.to_string()))
    }

    pub fn params(&self) -> &HashMap<String, String>
    {
        &self.params
    }

    /// Read the body to completion and return it as UTF-8 text.
    pub async fn content(&mut self) -> Result<String, ClientError>
    {
        let data = self.binary_content().await?;
        String::from_utf8(data.to_vec()).map_err(|_| {
            ClientError::Encoding("request body is not UTF-8".to_string())
        })
    }

    /// Read the body to completion and return it as one contiguous block.
    pub async fn binary_content(&mut self) -> Result<Bytes, ClientError>
    {
        let mut engine = self.engine.lock().await;
        if !engine.stdin_complete() {
            let mut stream = self.stream.lock().await;
            engine.drain_to_end(&mut *stream).await?;
        }
        Ok(engine.take_stdin())
    }

    /// Drain the body without buffering it.  A handler that responds
    /// before looking at the body should call this first; the peer may not
    /// read our response until it finished sending.
    pub async fn read_all_and_discard(&mut self) -> Result<(), ClientError>
    {
        let mut engine = self.engine.lock().await;
        let mut stream = self.stream.lock().await;
        engine.discard_remaining(&mut *stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util;
    use super::*;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn engine() -> InputEngine
    {
        InputEngine::new(16 * 1024, TIMEOUT)
    }

    #[tokio::test]
    async fn initialize_collects_parameters()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::params(
                1,
                &[("REQUEST_METHOD", "GET"), ("QUERY_STRING", "x=2")],
            ))
            .await
            .unwrap();

        let mut engine = engine();
        engine.initialize(&mut server).await.unwrap();
        assert_eq!(engine.request_id(), 1);
        assert!(!engine.keep_connection());
        let params = engine.take_params();
        assert_eq!(params["REQUEST_METHOD"], "GET");
        assert_eq!(params["QUERY_STRING"], "x=2");
    }

    #[tokio::test]
    async fn params_may_arrive_in_many_records()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(5, 1, true))
            .await
            .unwrap();
        // Two content-bearing PARAMS records, split mid-pair.
        let mut content = bytes::BytesMut::new();
        super::super::encode::encode_name_value_pair(
            &mut content,
            b"CONTENT_LENGTH",
            b"5",
        );
        let content = content.freeze();
        client
            .write_all(&test_util::frame(RecordType::Params, 5, &content[..4]))
            .await
            .unwrap();
        client
            .write_all(&test_util::frame(RecordType::Params, 5, &content[4..]))
            .await
            .unwrap();
        client
            .write_all(&test_util::frame(RecordType::Params, 5, &[]))
            .await
            .unwrap();

        let mut engine = engine();
        engine.initialize(&mut server).await.unwrap();
        assert!(engine.keep_connection());
        assert_eq!(engine.take_params()["CONTENT_LENGTH"], "5");
    }

    #[tokio::test]
    async fn stdin_records_accumulate_until_empty_marker()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(7, 1, true))
            .await
            .unwrap();
        client
            .write_all(&test_util::params(7, &[("REQUEST_METHOD", "POST")]))
            .await
            .unwrap();
        client.write_all(&test_util::stdin(7, b"he")).await.unwrap();
        client.write_all(&test_util::stdin(7, b"ll")).await.unwrap();
        client.write_all(&test_util::stdin(7, b"o")).await.unwrap();
        client.write_all(&test_util::stdin(7, &[])).await.unwrap();

        let mut engine = engine();
        engine.initialize(&mut server).await.unwrap();
        engine.drain_to_end(&mut server).await.unwrap();
        assert!(engine.stdin_complete());
        assert_eq!(engine.take_stdin(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn discard_remaining_drops_the_body()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(2, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::params(2, &[("REQUEST_METHOD", "POST")]))
            .await
            .unwrap();
        client
            .write_all(&test_util::stdin(2, b"unwanted"))
            .await
            .unwrap();
        client.write_all(&test_util::stdin(2, &[])).await.unwrap();

        let mut engine = engine();
        engine.initialize(&mut server).await.unwrap();
        engine.discard_remaining(&mut server).await.unwrap();
        assert!(engine.stdin_complete());
        assert!(engine.take_stdin().is_empty());
    }

    #[tokio::test]
    async fn unknown_role_is_rejected_after_capturing_the_id()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(3, 2, false))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownRole(2)));
        assert_eq!(engine.request_id(), 3);
    }

    #[tokio::test]
    async fn oversized_params_fail()
    {
        let (mut client, mut server) = tokio::io::duplex(65536);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        let big = "v".repeat(4096);
        let writer = tokio::spawn(async move {
            let pairs: Vec<(String, String)> = (0..8)
                .map(|i| (format!("NAME_{}", i), big.clone()))
                .collect();
            let pair_refs: Vec<(&str, &str)> = pairs
                .iter()
                .map(|(n, v)| (n.as_str(), v.as_str()))
                .collect();
            let _ = client.write_all(&test_util::params(1, &pair_refs)).await;
        });

        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::HeaderTooLarge { .. }));
        writer.abort();
    }

    #[tokio::test]
    async fn abort_request_fails_the_request()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::frame(RecordType::AbortRequest, 1, &[]))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
    }

    #[tokio::test]
    async fn get_values_is_not_answered()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::frame(RecordType::GetValues, 0, &[]))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedManagementRequest));
    }

    #[tokio::test]
    async fn foreign_request_id_is_rejected()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::frame(RecordType::Params, 9, b"x"))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnknownRequestId { got: 9, expected: 1 }
        ));
    }

    #[tokio::test]
    async fn second_begin_request_cannot_multiplex()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::begin_request(2, 1, false))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownRequestId { .. }));
    }

    #[tokio::test]
    async fn stdin_before_params_complete_is_out_of_order()
    {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(&test_util::begin_request(1, 1, false))
            .await
            .unwrap();
        client
            .write_all(&test_util::stdin(1, b"early"))
            .await
            .unwrap();
        let mut engine = engine();
        let err = engine.initialize(&mut server).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn reset_allows_a_second_request()
    {
        let (mut client, mut server) = tokio::io::duplex(8192);
        client
            .write_all(&test_util::simple_request(
                1,
                true,
                &[("REQUEST_METHOD", "GET")],
            ))
            .await
            .unwrap();
        client
            .write_all(&test_util::simple_request(
                2,
                false,
                &[("REQUEST_METHOD", "HEAD")],
            ))
            .await
            .unwrap();

        let mut engine = engine();
        engine.initialize(&mut server).await.unwrap();
        engine.drain_to_end(&mut server).await.unwrap();
        assert_eq!(engine.request_id(), 1);

        engine.reset();
        engine.initialize(&mut server).await.unwrap();
        engine.drain_to_end(&mut server).await.unwrap();
        assert_eq!(engine.request_id(), 2);
        assert_eq!(engine.take_params()["REQUEST_METHOD"], "HEAD");
    }
}
