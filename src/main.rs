use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use fcgi_responder::fast_cgi as fcgi;
use fcgi::config::ServerConfig;
use fcgi::input::Request;
use fcgi::output::Response;
use fcgi::server::Server;

/// FastCGI responder serving a parameter/body echo, typically placed
/// behind nginx via fastcgi_pass.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args
{
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Maximum simultaneously handled connections
    #[arg(long, default_value_t = 256)]
    max_connections: usize,

    /// Per-connection receive/send timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Cap for accumulated request parameter bytes
    #[arg(long, default_value_t = 16 * 1024)]
    max_header_size: usize,
}

fn html_escape(text: &str) -> String
{
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Demo responder: POST bodies come back HTML-escaped, anything else gets
/// a JSON dump of the received FastCGI parameters.
async fn echo(mut request: Request, mut response: Response)
              -> std::result::Result<(), fcgi::error::HandlerError>
{
    let method = request.param("REQUEST_METHOD").unwrap_or("GET").to_string();
    if method == "POST" {
        let body = request.content().await?;
        response.write("<html><body><pre>").await?;
        response.write(&html_escape(&body)).await?;
        response.write("</pre></body></html>").await?;
    } else {
        let params = serde_json::json!(request.params());
        response.set_header("Content-Type", "application/json");
        response
            .write(&serde_json::to_string_pretty(&params)?)
            .await?;
    }
    response.end().await?;
    Ok(())
}

async fn run(args: Args) -> Result<()>
{
    let config = ServerConfig::new()
        .with_bind_address(args.bind)
        .with_port(args.port)
        .with_max_concurrent_requests(args.max_connections)
        .with_connection_timeout(Duration::from_millis(args.timeout_ms))
        .with_max_header_size(args.max_header_size)
        .with_handler(echo);
    let server = Server::new(config)?;
    server.run().await?;
    Ok(())
}

#[tokio::main]
async fn main()
{
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}
