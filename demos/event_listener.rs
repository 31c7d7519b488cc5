//! Subscribes to channel lifecycle events and prints a running tally of
//! calls created versus calls hung up, until interrupted.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eventsocket::{connect, HandlerKey, InboundOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let opts = InboundOptions::new("127.0.0.1", "ClueCon");
    let connection = connect(opts).await.expect("connect failed");

    connection
        .event(&["CHANNEL_CREATE", "CHANNEL_HANGUP"])
        .await
        .expect("event subscription failed");

    let created = Arc::new(AtomicU64::new(0));
    let hungup = Arc::new(AtomicU64::new(0));

    {
        let created = created.clone();
        connection.on(HandlerKey::event_name("CHANNEL_CREATE"), move |event| {
            let created = created.clone();
            async move {
                let total = created.fetch_add(1, Ordering::SeqCst) + 1;
                println!("+ {} (total created: {})", event.header("Unique-ID").unwrap_or("?"), total);
            }
        });
    }
    {
        let hungup = hungup.clone();
        connection.on(HandlerKey::event_name("CHANNEL_HANGUP"), move |event| {
            let hungup = hungup.clone();
            async move {
                let total = hungup.fetch_add(1, Ordering::SeqCst) + 1;
                println!("- {} (total hung up: {})", event.header("Unique-ID").unwrap_or("?"), total);
            }
        });
    }

    while !connection.is_closed() {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}
