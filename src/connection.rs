//! One child process's stdio connection.
//!
//! Owns the writer and reader tasks for a single tool server, the
//! monotonically increasing request-id counter, and the table of pending
//! requests awaiting a response. Responses are matched to requests by id,
//! not by send order, so concurrent outstanding requests may complete out
//! of order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::errors::HostError;
use crate::framing::MessageFramer;
use crate::protocol::{Notification, Request, Response, ServerMessage, ServerNotification};

/// A request awaiting its response. Inserted on send, removed on settle —
/// response, error, timeout, or connection loss. Never left behind.
struct PendingRequest {
    sent_at: Instant,
    tx: oneshot::Sender<Response>,
}

type PendingTable = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// Single point of interaction with one tool server's stdio.
pub struct Connection {
    server: String,
    next_id: AtomicU64,
    pending: PendingTable,
    writer_tx: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
}

impl Connection {
    /// Take ownership of a server's input/output streams and start the
    /// writer and reader tasks. `notifications`, when provided, receives
    /// every unsolicited server notification in arrival order.
    ///
    /// Generic over the stream types so tests can drive a connection over
    /// in-memory pipes; production callers pass the child's
    /// `ChildStdin`/`ChildStdout`.
    pub fn open<W, R>(
        server: impl Into<String>,
        writer: W,
        reader: R,
        notifications: Option<mpsc::UnboundedSender<ServerNotification>>,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let server = server.into();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed_rx) = watch::channel(false);
        let (writer_tx, writer_rx) = mpsc::channel::<String>(32);

        tokio::spawn(write_loop(writer, writer_rx));
        tokio::spawn(read_loop(
            server.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
            closed_tx,
            notifications,
        ));

        Self {
            server,
            next_id: AtomicU64::new(1),
            pending,
            writer_tx,
            closed,
            closed_rx,
        }
    }

    /// Server id this connection belongs to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Whether the connection has been lost. Once true, `send` and
    /// `request` fail fast with `ConnectionLost`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A signal that flips to `true` when the server's output stream closes
    /// or errors. The supervisor watches this to observe unexpected exits.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a notification — one line of JSON, no response implied.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<(), HostError> {
        if self.is_closed() {
            return Err(self.lost());
        }
        let note = Notification::new(method, params);
        let line = serde_json::to_string(&note).map_err(|err| {
            tracing::warn!(server = %self.server, error = %err, "failed to serialize notification");
            self.lost()
        })?;
        self.writer_tx
            .send(line + "\n")
            .await
            .map_err(|_| self.lost())
    }

    /// Send a request and await the response with the matching id.
    ///
    /// On timeout the pending entry is removed before returning, so a
    /// response that arrives later finds nothing to resolve and is
    /// discarded — a slow server cannot resurrect an abandoned call.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, HostError> {
        if self.is_closed() {
            return Err(self.lost());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingRequest {
                sent_at: Instant::now(),
                tx,
            },
        );

        let req = Request::new(id, method, params);
        let line = match serde_json::to_string(&req) {
            Ok(line) => line,
            Err(err) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(server = %self.server, error = %err, "failed to serialize request");
                return Err(self.lost());
            }
        };
        if self.writer_tx.send(line + "\n").await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(self.lost());
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(HostError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            // Sender dropped: the reader task drained the table on EOF.
            Ok(Err(_)) => Err(self.lost()),
            Ok(Ok(response)) => {
                if let Some(err) = response.error {
                    return Err(HostError::ServerError {
                        code: err.code,
                        message: err.message,
                        data: err.data,
                    });
                }
                response.result.ok_or(HostError::ServerError {
                    code: -32603,
                    message: "response missing both result and error".into(),
                    data: None,
                })
            }
        }
    }

    fn lost(&self) -> HostError {
        HostError::ConnectionLost {
            server: self.server.clone(),
        }
    }
}

// ─── Writer Task ─────────────────────────────────────────────────────────────

/// Owns the server's input pipe. Serialized lines arrive over the channel;
/// the task ends when the channel closes or a write fails, dropping the
/// pipe and signalling EOF to the child.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

// ─── Reader Task ─────────────────────────────────────────────────────────────

/// Owns the server's output pipe. Feeds raw chunks through the framer,
/// resolves pending requests by id, and routes notifications. On EOF or
/// read error: rejects everything still pending (the dropped senders
/// surface as `ConnectionLost` at each caller), marks the connection
/// closed, and fires the close signal.
async fn read_loop<R>(
    server: String,
    mut reader: R,
    pending: PendingTable,
    closed: Arc<AtomicBool>,
    closed_tx: watch::Sender<bool>,
    notifications: Option<mpsc::UnboundedSender<ServerNotification>>,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = MessageFramer::new();
    let mut buf = vec![0u8; 8192];
    // Bytes held back when a read ends mid-way through a UTF-8 sequence.
    let mut carry: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let valid_len = match std::str::from_utf8(&carry) {
                    Ok(_) => carry.len(),
                    Err(err) => err.valid_up_to(),
                };
                if valid_len == 0 {
                    continue;
                }
                let chunk: String = String::from_utf8_lossy(&carry[..valid_len]).into_owned();
                carry.drain(..valid_len);
                for msg in framer.feed(&chunk) {
                    dispatch(&server, msg, &pending, &notifications).await;
                }
            }
            Err(err) => {
                tracing::debug!(server = %server, error = %err, "read error on server stdout");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let rejected = {
        let mut table = pending.lock().await;
        let count = table.len();
        table.clear();
        count
    };
    if rejected > 0 {
        tracing::warn!(server = %server, rejected, "connection lost with requests in flight");
    }
    let _ = closed_tx.send(true);
}

async fn dispatch(
    server: &str,
    msg: ServerMessage,
    pending: &PendingTable,
    notifications: &Option<mpsc::UnboundedSender<ServerNotification>>,
) {
    match msg {
        ServerMessage::Response(response) => {
            let entry = pending.lock().await.remove(&response.id);
            match entry {
                Some(entry) => {
                    tracing::trace!(
                        server = %server,
                        id = response.id,
                        elapsed_ms = entry.sent_at.elapsed().as_millis() as u64,
                        "response resolved pending request"
                    );
                    let _ = entry.tx.send(response);
                }
                None => {
                    // Late (post-timeout) or unsolicited. Dropping it is the
                    // contract, not an oversight.
                    tracing::debug!(
                        server = %server,
                        id = response.id,
                        "discarding response with no pending request"
                    );
                }
            }
        }
        ServerMessage::Notification(note) => match notifications {
            Some(tx) => {
                let _ = tx.send(note);
            }
            None => {
                tracing::debug!(server = %server, method = %note.method, "dropping notification");
            }
        },
        ServerMessage::Request(req) => {
            tracing::debug!(
                server = %server,
                method = %req.method,
                id = req.id,
                "ignoring server-initiated request"
            );
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    /// A connection wired to in-memory pipes, plus the "server" ends.
    struct Harness {
        conn: Connection,
        /// Reads what the connection writes (the server's stdin view).
        server_rx: BufReader<DuplexStream>,
        /// Writes what the connection reads (the server's stdout view).
        server_tx: DuplexStream,
    }

    fn harness(notifications: Option<mpsc::UnboundedSender<ServerNotification>>) -> Harness {
        let (client_writer, server_rx) = tokio::io::duplex(4096);
        let (server_tx, client_reader) = tokio::io::duplex(4096);
        let conn = Connection::open("test-server", client_writer, client_reader, notifications);
        Harness {
            conn,
            server_rx: BufReader::new(server_rx),
            server_tx,
        }
    }

    async fn read_request(rx: &mut BufReader<DuplexStream>) -> serde_json::Value {
        let mut line = String::new();
        rx.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn write_line(tx: &mut DuplexStream, value: serde_json::Value) {
        let line = serde_json::to_string(&value).unwrap() + "\n";
        tx.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increment() {
        let mut h = harness(None);

        let fut = h.conn.request("first", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            assert_eq!(req["id"], 1);
            assert_eq!(req["method"], "first");
            write_line(&mut h.server_tx, serde_json::json!({"id": 1, "result": "ok"})).await;
        };
        let (result, ()) = tokio::join!(fut, server);
        assert_eq!(result.unwrap(), "ok");

        let fut = h.conn.request("second", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            assert_eq!(req["id"], 2);
            write_line(&mut h.server_tx, serde_json::json!({"id": 2, "result": "ok"})).await;
        };
        let (result, ()) = tokio::join!(fut, server);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_order_responses_resolve_by_id() {
        let mut h = harness(None);

        let r1 = h.conn.request("one", None, Duration::from_secs(1));
        let r2 = h.conn.request("two", None, Duration::from_secs(1));
        let server = async {
            let a = read_request(&mut h.server_rx).await;
            let b = read_request(&mut h.server_rx).await;
            assert_eq!(a["id"], 1);
            assert_eq!(b["id"], 2);
            // Answer the second request first.
            write_line(&mut h.server_tx, serde_json::json!({"id": 2, "result": {"v": 2}})).await;
            write_line(&mut h.server_tx, serde_json::json!({"id": 1, "result": {"v": 1}})).await;
        };

        let (r1, r2, ()) = tokio::join!(r1, r2, server);
        assert_eq!(r1.unwrap()["v"], 1);
        assert_eq!(r2.unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_error_response_rejects_with_server_error() {
        let mut h = harness(None);

        let fut = h.conn.request("boom", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            write_line(
                &mut h.server_tx,
                serde_json::json!({
                    "id": req["id"],
                    "error": {"code": -32601, "message": "Method not found"}
                }),
            )
            .await;
        };
        let (result, ()) = tokio::join!(fut, server);
        match result.unwrap_err() {
            HostError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_response_missing_result_and_error_rejects() {
        let mut h = harness(None);

        let fut = h.conn.request("odd", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            write_line(&mut h.server_tx, serde_json::json!({"id": req["id"]})).await;
        };
        let (result, ()) = tokio::join!(fut, server);
        assert!(matches!(result.unwrap_err(), HostError::ServerError { code: -32603, .. }));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_and_late_response_is_discarded() {
        let mut h = harness(None);

        // Server reads the request but never answers within the deadline.
        let fut = h.conn.request("slow", None, Duration::from_millis(50));
        let server = read_request(&mut h.server_rx);
        let (result, req) = tokio::join!(fut, server);
        assert!(matches!(result.unwrap_err(), HostError::Timeout { .. }));
        assert_eq!(h.conn.pending_count().await, 0);

        // The late response must resolve nothing and break nothing.
        write_line(&mut h.server_tx, serde_json::json!({"id": req["id"], "result": "late"})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.conn.pending_count().await, 0);
        assert!(!h.conn.is_closed());

        // The connection is still usable afterwards.
        let fut = h.conn.request("next", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            write_line(&mut h.server_tx, serde_json::json!({"id": req["id"], "result": "ok"})).await;
        };
        let (result, ()) = tokio::join!(fut, server);
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_eof_rejects_all_pending_with_connection_lost() {
        let mut h = harness(None);

        let r1 = h.conn.request("a", None, Duration::from_secs(5));
        let r2 = h.conn.request("b", None, Duration::from_secs(5));
        let server = async {
            let _ = read_request(&mut h.server_rx).await;
            let _ = read_request(&mut h.server_rx).await;
            // Close the server's stdout without answering.
            drop(h.server_tx);
        };

        let (r1, r2, ()) = tokio::join!(r1, r2, server);
        assert!(matches!(r1.unwrap_err(), HostError::ConnectionLost { .. }));
        assert!(matches!(r2.unwrap_err(), HostError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_closed_connection_fails_fast() {
        let h = harness(None);
        drop(h.server_tx);

        let mut signal = h.conn.closed_signal();
        signal.changed().await.unwrap();
        assert!(h.conn.is_closed());

        let err = h
            .conn
            .request("anything", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::ConnectionLost { .. }));

        let err = h.conn.send("note", None).await.unwrap_err();
        assert!(matches!(err, HostError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_notifications_are_routed() {
        let (note_tx, mut note_rx) = mpsc::unbounded_channel();
        let mut h = harness(Some(note_tx));

        write_line(
            &mut h.server_tx,
            serde_json::json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
        )
        .await;

        let note = note_rx.recv().await.unwrap();
        assert_eq!(note.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_send_writes_a_notification_line() {
        let mut h = harness(None);

        h.conn.send("notifications/initialized", None).await.unwrap();
        let value = read_request(&mut h.server_rx).await;
        assert_eq!(value["method"], "notifications/initialized");
        assert!(value.get("id").is_none());
    }

    #[tokio::test]
    async fn test_interleaved_log_noise_does_not_break_correlation() {
        let mut h = harness(None);

        let fut = h.conn.request("ping", None, Duration::from_secs(1));
        let server = async {
            let req = read_request(&mut h.server_rx).await;
            let noise = b"provider booting...\nnot json at all\n";
            h.server_tx.write_all(noise).await.unwrap();
            write_line(&mut h.server_tx, serde_json::json!({"id": req["id"], "result": "pong"})).await;
        };
        let (result, ()) = tokio::join!(fut, server);
        assert_eq!(result.unwrap(), "pong");
    }
}
