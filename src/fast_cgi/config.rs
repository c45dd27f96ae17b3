use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::connection::{Handler, HandlerFuture};
use super::error::{ConfigError, HandlerError};
use super::input::Request;
use super::observer::{ConnectionObserver, LogObserver};
use super::output::Response;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_HEADER_SIZE: usize = 16 * 1024;

/// Everything the embedding entry point sets before the server starts.
/// Exactly one handler must be registered; the rest has defaults.
#[derive(Clone)]
pub struct ServerConfig
{
    pub bind_address: String,
    pub port: u16,
    pub max_concurrent_requests: usize,
    pub connection_timeout: Duration,
    pub max_header_size: usize,
    pub(crate) handler: Option<Handler>,
    pub(crate) observer: Arc<dyn ConnectionObserver>,
}

impl ServerConfig {
    pub fn new() -> ServerConfig
    {
        ServerConfig {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            handler: None,
            observer: Arc::new(LogObserver),
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>)
                             -> ServerConfig
    {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> ServerConfig
    {
        self.port = port;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> ServerConfig
    {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> ServerConfig
    {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_header_size(mut self, size: usize) -> ServerConfig
    {
        self.max_header_size = size;
        self
    }

    /// Register the request handler: an async function called once per
    /// request with both sides of it.
    pub fn with_handler<F, Fut>(mut self, handler: F) -> ServerConfig
        where F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
              Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |request, response| -> HandlerFuture {
            Box::pin(handler(request, response))
        }));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>)
                         -> ServerConfig
    {
        self.observer = observer;
        self
    }

    /// Startup checks; failures are fatal.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.bind_address.clone(),
            ));
        }
        if self.handler.is_none() {
            return Err(ConfigError::MissingHandler);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> ServerConfig
    {
        ServerConfig::new()
    }
}
