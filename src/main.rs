//! `wirelink` command line client.
//!
//! # Commands
//!
//! ```text
//! wirelink get <url> [-H name:value]... [--timeout secs]
//!     one request through HttpClient, prints status line, headers and body
//!
//! wirelink ws <url> [--send text]... [--listen secs]
//!     WebSocket session; incoming messages are printed from the scheduler
//!     until the listen window ends, the peer closes, or Ctrl-C
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use wirelink::config::{load_config, ClientConfig};
use wirelink::http::headers::HeaderSet;
use wirelink::lifecycle::{signals, Scheduler, Shutdown, SocketCallbacks};
use wirelink::observability::logging;
use wirelink::{HttpClient, Request, WebSocket};

#[derive(Parser)]
#[command(name = "wirelink")]
#[command(about = "HTTP/1.1 and WebSocket client", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL
    Get {
        url: String,

        /// Extra header, `name:value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Open a WebSocket session
    Ws {
        url: String,

        /// Text message to send after connecting
        #[arg(short, long)]
        send: Vec<String>,

        /// Seconds to keep listening
        #[arg(short, long, default_value_t = 5)]
        listen: u64,

        /// Extra handshake header, `name:value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    logging::init(&config.observability);

    tracing::debug!(
        max_redirects = config.http.max_redirects,
        accept_gzip = config.http.accept_gzip,
        timeout_secs = config.http.timeout_secs,
        "Configuration loaded"
    );

    let client = HttpClient::new(config)?;
    let result = match cli.command {
        Commands::Get { url, headers, timeout } => get(&client, &url, &headers, timeout).await,
        Commands::Ws {
            url,
            send,
            listen,
            headers,
        } => ws(&client, &url, &send, listen, &headers).await,
    };
    client.shutdown();
    result
}

fn parse_headers(raw: &[String]) -> Result<HeaderSet, String> {
    let mut headers = HeaderSet::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| format!("header {entry:?} is not name:value"))?;
        headers.add(name.trim(), value.trim());
    }
    Ok(headers)
}

async fn get(
    client: &HttpClient,
    url: &str,
    raw_headers: &[String],
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = Request::get(url)?;
    for (name, value) in parse_headers(raw_headers)?.iter() {
        request = request.header(name, value);
    }
    if let Some(secs) = timeout {
        request = request.timeout(Duration::from_secs(secs));
    }

    let response = client.execute(request).await?;
    println!("{} {} {}", response.protocol, response.status, response.message);
    for (name, value) in response.headers.iter() {
        println!("{name}: {value}");
    }
    println!();
    println!("{}", response.text());
    Ok(())
}

async fn ws(
    client: &HttpClient,
    url: &str,
    messages: &[String],
    listen: u64,
    raw_headers: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let headers = parse_headers(raw_headers)?;
    let socket = WebSocket::connect_with_retry(client, url, headers.clone(), &client.config().reconnect).await?;
    tracing::info!(connection_id = %socket.connection_id(), url = %socket.url(), "Connected");

    for text in messages {
        socket.send_text(text.as_str())?;
    }

    let shutdown = Shutdown::new();
    let mut scheduler = Scheduler::new(&client.config().scheduler);
    let on_close = shutdown.clone();
    let redials = client.config().reconnect.enabled;
    scheduler.add_reconnecting_socket(
        client,
        socket.clone(),
        headers,
        SocketCallbacks::new()
            .text(|_, text| println!("< {text}"))
            .binary(|_, data| println!("< [{} bytes]", data.len()))
            .disconnect(move |_, clean, code, reason| {
                println!("disconnected clean={clean} code={code:?} reason={reason:?}");
                if clean || !redials {
                    on_close.trigger();
                }
            })
            .reconnect(|socket| println!("reconnected to {}", socket.url())),
    );

    let stop = shutdown.subscribe();
    tokio::spawn(signals::trigger_on_signal(shutdown.clone()));
    let timer = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(listen)).await;
        timer.trigger();
    });

    scheduler.run(stop).await;
    let state = tokio::time::timeout(client.config().websocket.close_timeout(), socket.closed()).await;
    tracing::debug!(state = ?state, "Session finished");
    Ok(())
}
