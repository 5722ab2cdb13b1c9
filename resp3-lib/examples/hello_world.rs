//! Hello world client.
//!
//! Runs the connection in a background task and pipelines a SET and a GET
//! through the shared handle. To keep the connection alive across server
//! restarts, loop on `run` with a short pause between attempts:
//!
//! ```ignore
//! loop {
//!     let _ = conn.run("127.0.0.1", 6379).await;
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//! }
//! ```

use bytes::Bytes;
use resp3_lib::{Config, Connection, Request, Result, DEFAULT_PORT};

#[tokio::main]
pub async fn main() -> Result<()> {
    let conn = Connection::new(Config::default());

    let runner = conn.clone();
    tokio::spawn(async move { runner.run("127.0.0.1", DEFAULT_PORT).await });

    let mut req = Request::new();
    req.push("SET", &["hello", "world"]).push("GET", &["hello"]);

    let ((_ok, value), _written) = conn
        .exec::<(String, Option<Bytes>)>(req)
        .await?;

    println!("got value from the server; success={:?}", value.is_some());

    Ok(())
}
