#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

use bytes::Bytes;
use clap::{Parser, Subcommand};
use resp3_lib::{Config, Connection, Request, DEFAULT_PORT};
use std::num::ParseIntError;
use std::str;
use std::time::Duration;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "resp3-cli", version, author, about = "Issue commands to a RESP3 server")]
struct CliCommand {
    #[clap(subcommand)]
    sub_cmd: Command,

    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Keepalive period in milliseconds.
    #[clap(long, default_value = "5000", value_parser = duration_from)]
    ping_delay: Duration,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the connection, optionally echoing a message.
    Ping { echo: Option<String> },
    /// Fetch the value of a key.
    Get { key: String },
    /// Store a value, with an optional expiration in milliseconds.
    Set {
        key: String,
        value: String,
        #[clap(value_parser = duration_from)]
        expires: Option<Duration>,
    },
    /// Publish a message to a channel.
    Publish { channel: String, message: String },
    /// Subscribe to channels and print everything the server pushes.
    Subscribe { channels: Vec<String> },
}

fn duration_from(src: &str) -> Result<Duration, ParseIntError> {
    let ms = src.parse::<u64>()?;
    Ok(Duration::from_millis(ms))
}

fn print_payload(payload: &[u8]) {
    if let Ok(string) = str::from_utf8(payload) {
        println!("\"{string}\"");
    } else {
        println!("{payload:?}");
    }
}

/// `flavor = "current_thread"` is used here to make the CLI lighter instead
/// of multi-threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Enable logging
    tracing_subscriber::fmt::try_init()?;

    let cli = CliCommand::parse();

    let cfg = Config {
        ping_delay: cli.ping_delay,
        ..Config::default()
    };
    let conn = Connection::new(cfg);

    // The run loop owns the socket; commands go through the cloned handle.
    let runner = conn.clone();
    let host = cli.host.clone();
    let port = cli.port;
    tokio::spawn(async move {
        if let Err(err) = runner.run(&host, port).await {
            error!(%err, "connection ended");
        }
    });

    match cli.sub_cmd {
        Command::Ping { echo } => {
            let mut req = Request::new();
            match &echo {
                Some(msg) => req.push("PING", &[msg.as_str()]),
                None => req.push("PING", &[] as &[&str]),
            };
            let (pong, _) = conn.exec::<Bytes>(req).await?;
            print_payload(&pong);
        }
        Command::Get { key } => {
            let mut req = Request::new();
            req.push("GET", &[key.as_str()]);
            let (value, _) = conn.exec::<Option<Bytes>>(req).await?;
            match value {
                Some(bytes) => print_payload(&bytes),
                None => println!("(nil)"),
            }
        }
        Command::Set {
            key,
            value,
            expires: None,
        } => {
            let mut req = Request::new();
            req.push("SET", &[key.as_str(), value.as_str()]);
            let (ok, _) = conn.exec::<String>(req).await?;
            println!("{ok}");
        }
        Command::Set {
            key,
            value,
            expires: Some(expires),
        } => {
            let ms = expires.as_millis().to_string();
            let mut req = Request::new();
            req.push("SET", &[key.as_str(), value.as_str(), "PX", ms.as_str()]);
            let (ok, _) = conn.exec::<String>(req).await?;
            println!("{ok}");
        }
        Command::Publish { channel, message } => {
            let mut req = Request::new();
            req.push("PUBLISH", &[channel.as_str(), message.as_str()]);
            let (subscribers, _) = conn.exec::<i64>(req).await?;
            println!("delivered to {subscribers} subscriber(s)");
        }
        Command::Subscribe { channels } => {
            if channels.is_empty() {
                return Err("channel(s) must be provided".into());
            }
            let args: Vec<&str> = channels.iter().map(String::as_str).collect();
            let mut req = Request::new();
            req.push("SUBSCRIBE", &args);
            // Completes once written; acknowledgements arrive as pushes.
            conn.exec::<()>(req).await?;

            loop {
                let msg = conn.read_push().await?;
                let items: Vec<String> = msg
                    .items()
                    .map(|node| String::from_utf8_lossy(&node.value).into_owned())
                    .collect();
                println!("got push: {items:?}");
            }
        }
    }

    Ok(())
}
