// MIT License - Copyright (c) 2026 Peter Wright
// JSON-RPC request/response correlation and notification routing

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, error, warn};

use crate::constants::rpc_code;
use crate::error::{DoozError, Result, RpcErrorObject};
use crate::event::{EventSender, HubEvent};
use crate::protocol::{Incoming, Notification, Request, encode_request};

type Responder = oneshot::Sender<Result<Value>>;

/// A request waiting for its response.
struct PendingRequest {
    method: String,
    issued_at: Instant,
    responder: Responder,
}

/// Outstanding requests plus the open flag, guarded together so that no
/// request can be registered after the session has been failed.
struct PendingTable {
    open: bool,
    requests: HashMap<u64, PendingRequest>,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Pairs outgoing requests with responses and routes notifications.
///
/// Any number of requests may be outstanding; each gets a unique id from a
/// monotonically increasing counter and is resolved by id, whatever order
/// the hub answers in.
pub struct RpcSession {
    next_id: AtomicU64,
    pending: Mutex<PendingTable>,
    writer: Mutex<Writer>,
    handlers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>>,
    request_timeout: Option<Duration>,
    event_tx: EventSender,
}

impl RpcSession {
    /// `request_timeout` of `None` waits until a response or a disconnect.
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        request_timeout: Option<Duration>,
        event_tx: EventSender,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable {
                open: true,
                requests: HashMap::new(),
            }),
            writer: Mutex::new(Box::new(writer)),
            handlers: Mutex::new(HashMap::new()),
            request_timeout,
            event_tx,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.pending.lock().await.open
    }

    pub async fn set_connected(&self, connected: bool) {
        self.pending.lock().await.open = connected;
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.requests.len()
    }

    /// Send a typed request and wait for its result.
    pub async fn send(&self, request: &Request) -> Result<Value> {
        self.request(request.method(), request.params()).await
    }

    /// Send a request and wait for its result.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if !pending.open {
                return Err(DoozError::Disconnected);
            }
            pending.requests.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                    responder: tx,
                },
            );
        }

        let text = encode_request(id, method, &params);
        debug!("Sending request {} ({})", id, method);

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(text.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            error!("Failed to write request {}: {}", id, e);
            self.pending.lock().await.requests.remove(&id);
            return Err(DoozError::Io(e));
        }

        let outcome = match self.request_timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().await.requests.remove(&id);
                    debug!("Request {} ({}) timed out", id, method);
                    return Err(DoozError::RequestTimeout {
                        method: method.to_string(),
                    });
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            // Responder dropped without an answer: the session went away.
            Err(_) => Err(DoozError::Disconnected),
        }
    }

    /// Register interest in a notification method.
    ///
    /// Every registration receives its own copy of each notification.
    pub async fn on_notification(&self, method: &str) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Parse, classify and dispatch one framed text from the hub.
    pub async fn handle_text(&self, text: &str) {
        let mut queue = VecDeque::from([Incoming::parse(text)]);
        while let Some(incoming) = queue.pop_front() {
            match incoming {
                Incoming::Batch(items) => {
                    debug!("Batch of {} messages", items.len());
                    queue.extend(items.into_iter().map(Incoming::classify));
                }
                Incoming::Response { id, result } => self.resolve(id, Ok(result)).await,
                Incoming::Error { id: Some(id), error } => {
                    self.resolve(id, Err(DoozError::Rpc(error))).await
                }
                Incoming::Error { id: None, error } => {
                    warn!("Hub error without id: {}", error);
                    self.report_protocol_error(&error);
                }
                Incoming::Notification(notification) => self.dispatch(notification).await,
                Incoming::Invalid(error) => {
                    warn!("{}", error);
                    self.report_protocol_error(&error);
                }
            }
        }
    }

    async fn resolve(&self, id: u64, outcome: Result<Value>) {
        let pending = self.pending.lock().await.requests.remove(&id);
        match pending {
            Some(request) => {
                debug!(
                    "Response for {} ({}) after {:?}",
                    id,
                    request.method,
                    request.issued_at.elapsed()
                );
                let _ = request.responder.send(outcome);
            }
            None => {
                warn!("Response for unknown request id {}", id);
                let error = match outcome {
                    Err(DoozError::Rpc(error)) => error,
                    _ => RpcErrorObject::new(
                        rpc_code::INVALID_REQUEST,
                        format!("Response for unknown request id {}", id),
                    ),
                };
                self.report_protocol_error(&error);
            }
        }
    }

    async fn dispatch(&self, notification: Notification) {
        let mut handlers = self.handlers.lock().await;
        let Some(subscribers) = handlers.get_mut(&notification.method) else {
            debug!("No handler for notification '{}'", notification.method);
            return;
        };
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    fn report_protocol_error(&self, error: &RpcErrorObject) {
        let _ = self.event_tx.send(HubEvent::ProtocolError {
            code: error.code,
            message: error.message.clone(),
        });
    }

    /// Fail every outstanding request with `Disconnected`.
    pub async fn fail_all_pending(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.requests.drain().map(|(_, request)| request).collect()
        };
        Self::fail(drained);
    }

    /// Mark the session closed and fail everything in flight.
    ///
    /// Closing and draining happen under one lock, so a request racing with
    /// the disconnect either lands in the drain or sees the session closed.
    pub async fn mark_disconnected(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.open = false;
            pending.requests.drain().map(|(_, request)| request).collect()
        };
        Self::fail(drained);
    }

    fn fail(requests: Vec<PendingRequest>) {
        if !requests.is_empty() {
            debug!("Failing {} pending requests", requests.len());
        }
        for request in requests {
            let _ = request.responder.send(Err(DoozError::Disconnected));
        }
    }

    /// Close the write side and fail everything in flight.
    pub async fn disconnect(&self) -> Result<()> {
        self.mark_disconnected().await;
        let mut writer = self.writer.lock().await;
        // Best-effort: the peer may already be gone.
        let _ = writer.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::event_channel;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    async fn read_request(hub: &mut tokio::io::DuplexStream) -> Value {
        let mut buf = vec![0u8; 1024];
        let n = hub.read(&mut buf).await.unwrap();
        serde_json::from_slice(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_request_resolved_by_id() {
        let (client, mut hub) = tokio::io::duplex(4096);
        let (tx, _rx) = event_channel(16);
        let session = Arc::new(RpcSession::new(client, None, tx));

        let s = session.clone();
        let call = tokio::spawn(async move { s.request("get", json!({"address": "0002"})).await });

        let req = read_request(&mut hub).await;
        assert_eq!(req["method"], "get");
        assert_eq!(req["jsonrpc"], "2.0");
        let id = req["id"].as_u64().unwrap();

        session
            .handle_text(&format!(r#"{{"jsonrpc":"2.0","id":{},"result":{{"level":12}}}}"#, id))
            .await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"level": 12}));
        assert_eq!(session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_error_response_rejects_request() {
        let (client, mut hub) = tokio::io::duplex(4096);
        let (tx, _rx) = event_channel(16);
        let session = Arc::new(RpcSession::new(client, None, tx));

        let s = session.clone();
        let call = tokio::spawn(async move { s.request("set", json!({})).await });
        let id = read_request(&mut hub).await["id"].as_u64().unwrap();

        session
            .handle_text(&format!(
                r#"{{"id":{},"error":{{"code":-32602,"message":"bad","data":7}}}}"#,
                id
            ))
            .await;
        match call.await.unwrap() {
            Err(DoozError::Rpc(e)) => {
                assert_eq!(e.code, -32602);
                assert_eq!(e.data, Some(json!(7)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_pending() {
        let (client, _hub) = tokio::io::duplex(4096);
        let (tx, _rx) = event_channel(16);
        let session = RpcSession::new(client, Some(Duration::from_millis(20)), tx);
        let err = session.request("get", Value::Null).await.unwrap_err();
        assert!(matches!(err, DoozError::RequestTimeout { .. }));
        assert_eq!(session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_fast() {
        let (client, _hub) = tokio::io::duplex(64);
        let (tx, _rx) = event_channel(16);
        let session = RpcSession::new(client, None, tx);
        session.set_connected(false).await;
        assert!(matches!(
            session.request("get", Value::Null).await,
            Err(DoozError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_request_after_disconnect_never_hangs() {
        // The peer keeps reading, so writes succeed after the close
        let (client, _hub) = tokio::io::duplex(1 << 16);
        let (tx, _rx) = event_channel(16);
        let session = RpcSession::new(client, None, tx);
        session.mark_disconnected().await;

        let outcome = timeout(Duration::from_secs(1), session.request("get", Value::Null)).await;
        assert!(matches!(outcome, Ok(Err(DoozError::Disconnected))));
        assert_eq!(session.pending_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_racing_requests_fails_all() {
        let (client, _hub) = tokio::io::duplex(1 << 16);
        let (tx, _rx) = event_channel(16);
        let session = Arc::new(RpcSession::new(client, None, tx));

        let calls: Vec<_> = (0..32)
            .map(|_| {
                let s = session.clone();
                tokio::spawn(async move { s.request("get", Value::Null).await })
            })
            .collect();
        session.mark_disconnected().await;

        for call in calls {
            let outcome = timeout(Duration::from_secs(2), call)
                .await
                .expect("request hung after disconnect")
                .unwrap();
            assert!(matches!(outcome, Err(DoozError::Disconnected)));
        }
        assert_eq!(session.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_id_reports_protocol_error() {
        let (client, _hub) = tokio::io::duplex(64);
        let (tx, mut rx) = event_channel(16);
        let session = RpcSession::new(client, None, tx);
        session.handle_text(r#"{"id":99,"result":true}"#).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(HubEvent::ProtocolError { code: -32600, .. })
        ));
    }

    #[tokio::test]
    async fn test_notification_routing() {
        let (client, _hub) = tokio::io::duplex(64);
        let (tx, _rx) = event_channel(16);
        let session = RpcSession::new(client, None, tx);
        let mut first = session.on_notification("notify_state").await;
        let mut second = session.on_notification("notify_state").await;
        let mut other = session.on_notification("other").await;

        session
            .handle_text(r#"{"jsonrpc":"2.0","method":"notify_state","params":{"address":"0002","level":3}}"#)
            .await;

        assert_eq!(first.recv().await.unwrap().params["level"], 3);
        assert_eq!(second.recv().await.unwrap().method, "notify_state");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_handler_is_pruned() {
        let (client, _hub) = tokio::io::duplex(64);
        let (tx, _rx) = event_channel(16);
        let session = RpcSession::new(client, None, tx);
        drop(session.on_notification("notify_state").await);
        session.handle_text(r#"{"method":"notify_state","params":{}}"#).await;
        assert!(session.handlers.lock().await["notify_state"].is_empty());
    }
}
