mod support;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventsocket::{listen, CallExecuteOptions, HandlerKey, OutboundOptions};
use support::MockPeer;

fn channel_data_body() -> String {
    "Channel-State: CS_EXECUTE\nUnique-ID: call-123\nCaller-Caller-ID-Number: 15551234\n".to_owned()
}

#[tokio::test]
async fn handshake_captures_channel_data_and_runs_handler() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound = listener.local_addr().unwrap();
    drop(listener); // free the port; OutboundOptions binds it again below

    let handled = Arc::new(AtomicBool::new(false));
    let handled_in_handler = handled.clone();

    let opts = OutboundOptions::new(bound).myevents(false);
    tokio::spawn(async move {
        listen(opts, move |connection| {
            let handled = handled_in_handler.clone();
            async move {
                assert_eq!(
                    connection.channel_variable("Unique-ID"),
                    Some("call-123".to_owned())
                );
                handled.store(true, Ordering::SeqCst);
                let _ = connection.call_execute("playback foo.wav", CallExecuteOptions::new()).await;
            }
        })
        .await
        .unwrap();
    });

    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut peer = MockPeer::connect(bound).await;
    let connect_cmd = peer.read_command().await;
    assert_eq!(connect_cmd, "connect");
    peer.reply_command_with_body("+OK", &channel_data_body()).await;

    let sendmsg = peer.read_command().await;
    assert!(sendmsg.starts_with("sendmsg"));
    assert!(sendmsg.contains("execute-app-name: playback"));
    peer.reply_command("+OK").await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn call_execute_binds_self_removing_start_and_end_handlers() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound = listener.local_addr().unwrap();
    drop(listener);

    let start_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let end_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let start_in_handler = start_count.clone();
    let end_in_handler = end_count.clone();

    let opts = OutboundOptions::new(bound).myevents(false);
    tokio::spawn(async move {
        listen(opts, move |connection| {
            let start_count = start_in_handler.clone();
            let end_count = end_in_handler.clone();
            async move {
                let opts = CallExecuteOptions::new()
                    .event_uuid("EVT-1")
                    .start_handler({
                        let start_count = start_count.clone();
                        move |_event| {
                            let start_count = start_count.clone();
                            async move {
                                start_count.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                    .end_handler({
                        let end_count = end_count.clone();
                        move |_event| {
                            let end_count = end_count.clone();
                            async move {
                                end_count.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                let _ = connection.call_execute("playback foo.wav", opts).await;
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        })
        .await
        .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut peer = MockPeer::connect(bound).await;
    let _ = peer.read_command().await; // connect
    peer.reply_command_with_body("+OK", &channel_data_body()).await;

    for _ in 0..2 {
        let sub = peer.read_command().await;
        assert!(sub == "event plain CHANNEL_EXECUTE" || sub == "event plain CHANNEL_EXECUTE_COMPLETE");
        peer.reply_command("+OK event listener enabled plain").await;
    }

    let sendmsg = peer.read_command().await;
    assert!(sendmsg.starts_with("sendmsg"));
    assert!(sendmsg.contains("execute-app-name: playback"));
    assert!(sendmsg.contains("event-uuid: EVT-1"));
    assert!(sendmsg.contains("content-type: text/plain"));
    peer.reply_command("+OK").await;

    // Fire each event twice; the self-removing wrapper should only fire
    // (and thus only increment the counter) on the first delivery.
    for _ in 0..2 {
        peer.send_event_plain("Event-Name: CHANNEL_EXECUTE\nApplication-UUID: EVT-1\n\n")
            .await;
    }
    for _ in 0..2 {
        peer.send_event_plain("Event-Name: CHANNEL_EXECUTE_COMPLETE\nApplication-UUID: EVT-1\n\n")
            .await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(start_count.load(Ordering::SeqCst), 1);
    assert_eq!(end_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn listen_closes_the_connection_after_the_handler_returns() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound = listener.local_addr().unwrap();
    drop(listener);

    let opts = OutboundOptions::new(bound).myevents(false);
    tokio::spawn(async move {
        listen(opts, |_connection| async move {}).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut peer = MockPeer::connect(bound).await;
    let _ = peer.read_command().await; // connect
    peer.reply_command_with_body("+OK", &channel_data_body()).await;

    // The handler returns immediately; the server side should close the
    // socket without the peer having to hang up first.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_millis(200), peer.read_raw(&mut buf))
        .await
        .expect("server should close promptly after the handler returns");
    assert_eq!(n, 0, "expected EOF once the server closed its side");
}

#[tokio::test]
async fn on_registers_handler_and_auto_subscribes_special_event() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let bound = listener.local_addr().unwrap();
    drop(listener);

    let observed = Arc::new(AtomicBool::new(false));
    let observed_in_handler = observed.clone();

    let opts = OutboundOptions::new(bound).myevents(false);
    tokio::spawn(async move {
        listen(opts, move |connection| {
            let observed = observed_in_handler.clone();
            async move {
                connection.on(HandlerKey::event_name("CHANNEL_HANGUP"), move |_event| {
                    let observed = observed.clone();
                    async move {
                        observed.store(true, Ordering::SeqCst);
                    }
                });
                // Keep the connection alive long enough for the test to
                // drive the rest of the script.
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
        .await
        .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut peer = MockPeer::connect(bound).await;
    let _ = peer.read_command().await; // connect
    peer.reply_command_with_body("+OK", &channel_data_body()).await;

    let sub = peer.read_command().await;
    assert_eq!(sub, "event plain CHANNEL_HANGUP");
    peer.reply_command("+OK event listener enabled plain").await;

    peer.send_event_plain("Event-Name: CHANNEL_HANGUP\nUnique-ID: call-123\n\n")
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.load(Ordering::SeqCst));
}
