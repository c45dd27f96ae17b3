use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::connection::ConnectionWorker;
use super::error::ConfigError;

#[derive(Debug, Error)]
pub enum ServerError
{
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Io(#[from] io::Error),
}

/// Accepts connections and dispatches each into a bounded pool of
/// connection workers.
///
/// The pool is the only back-pressure mechanism: while every worker is
/// busy the acceptor simply stops accepting and excess connections wait in
/// the listen backlog, which is sized at twice the pool.
pub struct Server
{
    config: ServerConfig,
}

impl Server {
    /// Validates the configuration; all failures here are startup failures.
    pub fn new(config: ServerConfig) -> Result<Server, ServerError>
    {
        config.validate()?;
        Ok(Server { config })
    }

    /// Bind the configured endpoint and serve forever.
    pub async fn run(self) -> Result<(), ServerError>
    {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address,
                                       self.config.port)
            .parse()
            .map_err(|_| {
                ConfigError::InvalidBindAddress(self.config.bind_address.clone())
            })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let backlog = u32::try_from(self.config.max_concurrent_requests * 2)
            .unwrap_or(u32::MAX);
        let listener = socket.listen(backlog)?;
        info!(%addr, max_concurrent = self.config.max_concurrent_requests,
              "fastcgi responder listening");
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: TcpListener)
                          -> Result<(), ServerError>
    {
        let handler =
            self.config.handler.clone().ok_or(ConfigError::MissingHandler)?;
        let observer = self.config.observer.clone();
        let max_concurrent = self.config.max_concurrent_requests;

        let new_worker = |slot: usize| {
            ConnectionWorker::new(slot, handler.clone(), observer.clone(),
                                  self.config.connection_timeout,
                                  self.config.max_header_size)
        };
        let mut idle: Vec<ConnectionWorker> =
            (0..max_concurrent).map(new_worker).collect();
        let mut active: JoinSet<ConnectionWorker> = JoinSet::new();
        let mut lost_slots = 0usize;

        loop {
            if idle.is_empty() {
                // Pool exhausted: wait for a worker, do not accept.
                match active.join_next().await {
                    Some(Ok(worker)) => idle.push(worker),
                    Some(Err(join_err)) => {
                        warn!(error = %join_err, "connection task failed");
                        idle.push(new_worker(max_concurrent + lost_slots));
                        lost_slots += 1;
                    }
                    None => {}
                }
                continue;
            }

            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let _ = stream.set_nodelay(true);
                            if let Some(worker) = idle.pop() {
                                active.spawn(worker.run(Box::new(stream),
                                                        peer.to_string()));
                            }
                        }
                        Err(err) if is_fatal_accept_error(&err) => {
                            return Err(ServerError::Io(err));
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
                Some(finished) = active.join_next(), if !active.is_empty() => {
                    match finished {
                        Ok(worker) => idle.push(worker),
                        Err(join_err) => {
                            warn!(error = %join_err, "connection task failed");
                            idle.push(new_worker(max_concurrent + lost_slots));
                            lost_slots += 1;
                        }
                    }
                }
            }
        }
    }
}

/// Errors that mean the listener itself is gone.
fn is_fatal_accept_error(err: &io::Error) -> bool
{
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput
    )
}
