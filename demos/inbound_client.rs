//! Dials a local FreeSWITCH, runs `status`, and exits.
//!
//! ```text
//! cargo run --example inbound_client -- 127.0.0.1 ClueCon
//! ```
use std::env;

use eventsocket::InboundOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_owned());
    let password = args.next().unwrap_or_else(|| "ClueCon".to_owned());

    let opts = InboundOptions::new(host, password);
    let connection = eventsocket::connect(opts).await.expect("connect failed");

    let reply = connection.api("status").await.expect("api failed");
    println!("{}", reply.body().unwrap_or(""));

    connection.disconnect().await.ok();
}
