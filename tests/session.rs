// Transport and session tests over an in-memory stream
//
// The test plays the hub: it reads raw request bytes and writes whatever
// byte sequences it likes back, including split and concatenated frames.

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{Duration, timeout};

use dooz_lan_bridge::event::event_channel;
use dooz_lan_bridge::protocol::Request;
use dooz_lan_bridge::transport::{DirectTransport, MessageBuffer};
use dooz_lan_bridge::{Address, DoozError, HubEvent};

/// Read requests until `count` complete frames have arrived.
async fn read_requests(hub: &mut DuplexStream, count: usize) -> Vec<Value> {
    let mut framer = MessageBuffer::new();
    let mut requests = Vec::new();
    let mut buf = vec![0u8; 4096];
    while requests.len() < count {
        let n = timeout(Duration::from_secs(5), hub.read(&mut buf))
            .await
            .expect("request not written within 5s")
            .unwrap();
        assert!(n > 0, "bridge closed the stream");
        framer.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        for text in framer.messages() {
            requests.push(serde_json::from_str(&text).unwrap());
        }
    }
    requests
}

fn answer(id: &Value, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
}

#[tokio::test]
async fn test_out_of_order_responses() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, Some(Duration::from_secs(5)), tx);
    let session = transport.session().clone();

    let first = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send(&Request::Get {
                    address: Address::new(0x0002),
                })
                .await
        })
    };
    let second = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .send(&Request::Get {
                    address: Address::new(0x0003),
                })
                .await
        })
    };

    let requests = read_requests(&mut hub, 2).await;
    assert_ne!(requests[0]["id"], requests[1]["id"]);

    // Both answers in one write, last request first
    let reply = format!(
        "{}{}",
        answer(&requests[1]["id"], json!({ "address": requests[1]["params"]["address"], "level": 2 })),
        answer(&requests[0]["id"], json!({ "address": requests[0]["params"]["address"], "level": 1 })),
    );
    hub.write_all(reply.as_bytes()).await.unwrap();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first["address"], "0002");
    assert_eq!(second["address"], "0003");
    assert_eq!(session.pending_count().await, 0);
}

#[tokio::test]
async fn test_response_split_across_writes() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, None, tx);
    let session = transport.session().clone();

    let pending = tokio::spawn(async move { session.send(&Request::DiscoverScenes).await });

    let requests = read_requests(&mut hub, 1).await;
    let reply = answer(
        &requests[0]["id"],
        json!({ "scenes": [{ "id": 4, "name": "Soirée \"cinéma\" {}", "address": null }] }),
    );
    let bytes = reply.as_bytes();
    // Split inside a multi-byte character as well as inside the string
    let cut = reply.find('é').unwrap() + 1;
    hub.write_all(&bytes[..cut]).await.unwrap();
    hub.flush().await.unwrap();
    tokio::task::yield_now().await;
    hub.write_all(&bytes[cut..]).await.unwrap();

    let result = pending.await.unwrap().unwrap();
    assert_eq!(result["scenes"][0]["name"], "Soirée \"cinéma\" {}");
}

#[tokio::test]
async fn test_batch_response() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, Some(Duration::from_secs(5)), tx);
    let session = transport.session().clone();

    let a = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&Request::Discover).await })
    };
    let b = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&Request::DiscoverGroups).await })
    };

    let requests = read_requests(&mut hub, 2).await;
    let batch = json!([
        { "jsonrpc": "2.0", "id": requests[0]["id"], "result": "first" },
        { "jsonrpc": "2.0", "id": requests[1]["id"], "result": "second" }
    ]);
    hub.write_all(batch.to_string().as_bytes()).await.unwrap();

    let mut results = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    results.sort_by_key(|v| v.as_str().unwrap_or_default().to_string());
    assert_eq!(results, vec![json!("first"), json!("second")]);
}

#[tokio::test]
async fn test_garbage_does_not_break_session() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, mut rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, Some(Duration::from_secs(5)), tx);
    let session = transport.session().clone();

    hub.write_all(b"{\"jsonrpc\": oops}").await.unwrap();
    let event = timeout(Duration::from_secs(5), async {
        loop {
            if let HubEvent::ProtocolError { code, .. } = rx.recv().await.unwrap() {
                return code;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, -32700);

    let pending = tokio::spawn(async move { session.send(&Request::DiscoverScenes).await });
    let requests = read_requests(&mut hub, 1).await;
    hub.write_all(answer(&requests[0]["id"], json!({ "scenes": [] })).as_bytes())
        .await
        .unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), json!({ "scenes": [] }));
}

#[tokio::test]
async fn test_error_answer() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, Some(Duration::from_secs(5)), tx);
    let session = transport.session().clone();

    let pending = tokio::spawn(async move { session.send(&Request::Discover).await });
    let requests = read_requests(&mut hub, 1).await;
    let error = json!({
        "jsonrpc": "2.0",
        "id": requests[0]["id"],
        "error": { "code": -32601, "message": "Method not found" }
    });
    hub.write_all(error.to_string().as_bytes()).await.unwrap();

    match pending.await.unwrap() {
        Err(DoozError::Rpc(e)) => {
            assert_eq!(e.code, -32601);
            assert_eq!(e.message, "Method not found");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_hub_closing_fails_pending() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, mut rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, None, tx);
    let session = transport.session().clone();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&Request::Discover).await })
    };
    read_requests(&mut hub, 1).await;
    drop(hub);

    let outcome = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(DoozError::Disconnected)));
    assert!(!session.is_connected().await);

    let disconnected = timeout(Duration::from_secs(5), async {
        loop {
            if matches!(rx.recv().await.unwrap(), HubEvent::Disconnected) {
                return true;
            }
        }
    })
    .await
    .unwrap();
    assert!(disconnected);

    let result = session.send(&Request::Discover).await;
    assert!(matches!(result, Err(DoozError::Disconnected)));
}

#[tokio::test]
async fn test_local_disconnect_fails_pending() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let mut transport = DirectTransport::from_stream(client, None, tx);
    let session = transport.session().clone();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&Request::DiscoverGroups).await })
    };
    read_requests(&mut hub, 1).await;

    transport.disconnect().await.unwrap();
    let outcome = timeout(Duration::from_secs(5), pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(DoozError::Disconnected)));
    assert_eq!(session.pending_count().await, 0);
}

#[tokio::test]
async fn test_notifications_interleaved_with_answers() {
    let (client, mut hub) = tokio::io::duplex(4096);
    let (tx, _rx) = event_channel(16);
    let transport = DirectTransport::from_stream(client, Some(Duration::from_secs(5)), tx);
    let session = transport.session().clone();
    let mut notifications = session.on_notification("notify_state").await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.send(&Request::Get { address: Address::new(2) }).await })
    };
    let requests = read_requests(&mut hub, 1).await;

    let stream = format!(
        "{}\n  {}{}",
        json!({ "jsonrpc": "2.0", "method": "notify_state", "params": { "address": "0002", "level": 10 } }),
        answer(&requests[0]["id"], json!({ "address": "0002", "level": 10 })),
        json!({ "jsonrpc": "2.0", "method": "notify_state", "params": { "address": "0003", "level": 90 } }),
    );
    hub.write_all(stream.as_bytes()).await.unwrap();

    assert_eq!(pending.await.unwrap().unwrap()["level"], 10);
    let first = notifications.recv().await.unwrap();
    let second = notifications.recv().await.unwrap();
    assert_eq!(first.params["address"], "0002");
    assert_eq!(second.params["address"], "0003");
}
