use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::defs::ProtocolStatus;
use super::error::{ClientError, HandlerError};
use super::input::{InputEngine, Request};
use super::observer::ConnectionObserver;
use super::output::{OutputChannel, OutputFlags, Response};
use super::records::RecordWriter;

/// The byte stream a connection runs on.  TCP in production, an in-memory
/// duplex pipe in tests.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// One connection's stream, shared between its input and output sides.
/// The mutex is never contended: a single task drives the connection.
pub(crate) type SharedStream = Arc<Mutex<Box<dyn Duplex>>>;

pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// The user's request handler: an async function value, invoked once per
/// accepted request with exclusive access to both sides of it.
pub type Handler = Arc<dyn Fn(Request, Response) -> HandlerFuture + Send + Sync>;

/// Serves every request of one accepted connection, then returns itself to
/// the server's idle pool.
pub struct ConnectionWorker
{
    slot: usize,
    handler: Handler,
    observer: Arc<dyn ConnectionObserver>,
    io_timeout: Duration,
    max_header_size: usize,
}

impl ConnectionWorker {
    pub fn new(slot: usize, handler: Handler,
               observer: Arc<dyn ConnectionObserver>, io_timeout: Duration,
               max_header_size: usize) -> ConnectionWorker
    {
        ConnectionWorker {
            slot,
            handler,
            observer,
            io_timeout,
            max_header_size,
        }
    }

    pub fn slot(&self) -> usize
    {
        self.slot
    }

    /// Run the per-connection loop: serve requests until the peer stops
    /// asking for keep-alive, closes, or violates the protocol.  Errors
    /// never leave this function; they are reported to the observer and
    /// collapse only this connection.
    pub async fn run(self, stream: Box<dyn Duplex>, peer: String)
                     -> ConnectionWorker
    {
        self.observer.connection_opened(&peer);
        let stream: SharedStream = Arc::new(Mutex::new(stream));
        let engine = Arc::new(Mutex::new(InputEngine::new(
            self.max_header_size,
            self.io_timeout,
        )));
        let channel = Arc::new(Mutex::new(OutputChannel::new()));
        let flags = Arc::new(OutputFlags::default());

        let mut served: u64 = 0;
        loop {
            match self
                .serve_request(&stream, &engine, &channel, &flags, &peer)
                .await
            {
                Ok(keep_conn) => {
                    served += 1;
                    if !keep_conn {
                        break;
                    }
                    engine.lock().await.reset();
                    channel.lock().await.reset();
                    flags.reset();
                }
                Err(err) => {
                    let idle_close =
                        err.is_clean_close() && engine.lock().await.is_idle();
                    if !idle_close {
                        self.observer.client_error(&peer, &err);
                        self.answer_rejection(&stream, &engine, &err).await;
                    }
                    break;
                }
            }
        }

        {
            let mut s = stream.lock().await;
            let _ = s.shutdown().await;
        }
        self.observer.connection_closed(&peer, served);
        self
    }

    /// Serve exactly one request.  Returns whether the connection should be
    /// kept for another.
    async fn serve_request(&self, stream: &SharedStream,
                           engine: &Arc<Mutex<InputEngine>>,
                           channel: &Arc<Mutex<OutputChannel>>,
                           flags: &Arc<OutputFlags>, peer: &str)
                           -> Result<bool, ClientError>
    {
        {
            let mut eng = engine.lock().await;
            let mut s = stream.lock().await;
            eng.initialize(&mut *s).await?;
        }
        let (request_id, keep_conn, params) = {
            let mut eng = engine.lock().await;
            (eng.request_id(), eng.keep_connection(), eng.take_params())
        };

        let request = Request::new(stream.clone(), engine.clone(), params,
                                   request_id, keep_conn);
        let response = Response::new(stream.clone(), engine.clone(),
                                     channel.clone(), flags.clone(),
                                     request_id, self.io_timeout);

        let handler_err = match (self.handler.as_ref())(request, response).await {
            Ok(()) => None,
            Err(err) => match err.downcast::<ClientError>() {
                // Input or output already failed; the connection is beyond
                // a well-formed close.
                Ok(client_err) => return Err(*client_err),
                Err(other) => {
                    Some(ClientError::HandlerFailed(other.to_string()))
                }
            },
        };

        // Hand the failure to the web server's error log as STDERR.
        if let Some(err) = handler_err.as_ref() {
            let mut chan = channel.lock().await;
            let mut s = stream.lock().await;
            let _ = chan
                .writer
                .write_stderr(&mut *s, self.io_timeout, request_id,
                              &err.to_string())
                .await;
        }

        // A handler that returns without end() is a bug; finish for it.
        // If it never sent headers this produces a 500 with an empty body.
        if !flags.ended() {
            let mut closer = Response::new(stream.clone(), engine.clone(),
                                           channel.clone(), flags.clone(),
                                           request_id, self.io_timeout);
            closer.set_status(500);
            closer.end().await?;
        }

        if let Some(err) = handler_err {
            return Err(err);
        }

        // Leave the connection at a record boundary for the next request.
        {
            let mut eng = engine.lock().await;
            if !eng.stdin_complete() {
                let mut s = stream.lock().await;
                eng.discard_remaining(&mut *s).await?;
            }
        }

        self.observer.request_completed(peer, request_id);
        Ok(keep_conn)
    }

    /// Best-effort wire answer for rejections that have one.
    async fn answer_rejection(&self, stream: &SharedStream,
                              engine: &Arc<Mutex<InputEngine>>,
                              err: &ClientError)
    {
        if let ClientError::UnknownRole(_) = err {
            let request_id = engine.lock().await.request_id();
            let mut writer = RecordWriter::new();
            let mut s = stream.lock().await;
            let _ = writer
                .write_end_request(&mut *s, self.io_timeout, request_id, 0,
                                   ProtocolStatus::UnknownRole)
                .await;
        }
    }
}
