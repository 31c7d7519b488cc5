//! A minimal outbound (`socket`) application: answers the call and plays
//! back a greeting, then hangs up.
//!
//! Point a dialplan `socket` action at this listener's address.
use eventsocket::{listen, CallExecuteOptions, OutboundOptions};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let addr = "0.0.0.0:8084".parse().unwrap();
    let opts = OutboundOptions::new(addr).linger(true);

    listen(opts, |connection| async move {
        let unique_id = connection.channel_variable("Unique-ID").unwrap_or_default();
        tracing::info!(%unique_id, "handling new call leg");

        if let Err(e) = connection.call_execute("answer", CallExecuteOptions::new()).await {
            tracing::warn!(error = %e, "answer failed");
            return;
        }
        if let Err(e) = connection
            .call_execute("playback ivr/ivr-welcome.wav", CallExecuteOptions::new())
            .await
        {
            tracing::warn!(error = %e, "playback failed");
        }
        connection.disconnect().await.ok();
    })
    .await
    .expect("outbound listener failed");
}
