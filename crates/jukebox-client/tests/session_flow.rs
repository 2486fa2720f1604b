//! End-to-end session tests against a local websocket server.
//!
//! The mock server accepts connections on a loopback port and hands each one
//! to the test as a `ServerConn`: frames the client sent come out of
//! `frames`, and `reply` pushes frames back.  Dropping a `ServerConn` closes
//! that connection from the server side.
//!
//! Run with: cargo test -p jukebox-client --test session_flow

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jukebox_client::{DispatchError, SessionCore, SessionHandle, SessionSnapshot};
use jukebox_proto::config::Config;
use jukebox_proto::session::SessionToken;
use jukebox_proto::state::SessionPhase;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

const UNVERIFIED: &str =
    r#"{"message":"StatusCheckResponse","status":"Unverified","password":"4821"}"#;

const VERIFIED: &str = r#"{"message":"StatusCheckResponse","status":"Verified",
    "playlists":[
        {"url":"u1","title":"Riffs","category":"Rock"},
        {"url":"u2","title":"Hits","category":"Pop"},
        {"url":"u3","title":"Ballads","category":"Rock"}],
    "playing":{"name":"Paranoid","artist":"Black Sabbath"},
    "currentQueue":[]}"#;

// ── Mock server ───────────────────────────────────────────────────────────────

struct MockServer {
    addr: SocketAddr,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

struct ServerConn {
    /// Request path and query the client connected with.
    path: String,
    frames: mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<WsMessage>,
}

impl MockServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let mut path = String::new();
                    let callback = |req: &Request, resp: Response| {
                        path = req.uri().to_string();
                        Ok::<_, ErrorResponse>(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let (frames_tx, frames) = mpsc::unbounded_channel();
                    let (replies, mut replies_rx) = mpsc::unbounded_channel();
                    if conn_tx
                        .send(ServerConn {
                            path,
                            frames,
                            replies,
                        })
                        .is_err()
                    {
                        return;
                    }

                    let (mut ws_tx, mut ws_rx) = ws.split();
                    loop {
                        tokio::select! {
                            reply = replies_rx.recv() => match reply {
                                Some(frame) => {
                                    if ws_tx.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                                    break;
                                }
                            },
                            incoming = ws_rx.next() => match incoming {
                                Some(Ok(WsMessage::Text(text))) => {
                                    let _ = frames_tx.send(text);
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self { addr, conns }
    }

    async fn next_conn(&mut self) -> ServerConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }
}

impl ServerConn {
    fn reply(&self, text: &str) {
        self.replies
            .send(WsMessage::Text(text.to_string()))
            .unwrap();
    }

    async fn next_frame(&mut self) -> Value {
        let text = timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame within timeout")
            .expect("connection closed");
        serde_json::from_str(&text).unwrap()
    }

    /// Next frame that is not a poll.
    async fn next_command(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame != json!({"message": "StatusCheck"}) {
                return frame;
            }
        }
    }

    /// Every frame received during `window`.
    async fn frames_for(&mut self, window: Duration) -> Vec<Value> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(text)) = tokio::time::timeout_at(deadline, self.frames.recv()).await {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config(addr: SocketAddr) -> Config {
    let mut config = Config::default();
    config.server.host = addr.to_string();
    config.server.secure = false;
    config.polling.interval_ms = 50;
    config.reconnect.jitter = false;
    config.reconnect.base_delay_ms = 300;
    config
}

fn token() -> SessionToken {
    SessionToken::new("abc123").unwrap()
}

async fn wait_for(
    handle: &SessionHandle,
    what: &str,
    pred: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = handle.subscribe();
    let result = timeout(WAIT, async { rx.wait_for(pred).await.map(|s| s.clone()) }).await;
    match result {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(_)) => panic!("session ended while waiting for {}", what),
        Err(_) => panic!(
            "timed out waiting for {}; last snapshot {:?}",
            what,
            handle.snapshot()
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unverified_session_becomes_verified_and_selects_playlist() {
    let mut server = MockServer::start().await;
    let (handle, core) = SessionCore::spawn(&config(server.addr), &token()).unwrap();

    let mut conn = server.next_conn().await;
    assert_eq!(conn.path, "/ws?s=abc123");
    assert_eq!(conn.next_frame().await, json!({"message": "StatusCheck"}));

    conn.reply(UNVERIFIED);
    let snap = wait_for(&handle, "unverified", |s| {
        s.phase == SessionPhase::Unauthenticated
    })
    .await;
    assert_eq!(snap.state.pending_password.as_deref(), Some("4821"));
    assert!(snap.view.is_empty());
    assert!(snap.last_status_at.is_some());

    conn.reply(VERIFIED);
    let snap = wait_for(&handle, "verified", |s| s.phase == SessionPhase::Authenticated).await;
    assert_eq!(snap.state.pending_password, None);
    assert_eq!(snap.view.categories().collect::<Vec<_>>(), vec!["Rock", "Pop"]);
    assert_eq!(snap.view.get("Rock").map(|p| p.len()), Some(2));
    assert_eq!(snap.state.playing.name, "Paranoid");

    handle.select_playlist("u2").unwrap();
    assert_eq!(
        conn.next_command().await,
        json!({"message": "MusicSelect", "type": "Playlist", "playlist": "u2"})
    );
    // Dispatch never touches local state; only the next reply would.
    assert_eq!(handle.snapshot().state, snap.state);

    handle.skip().unwrap();
    assert_eq!(
        conn.next_command().await,
        json!({"message": "MusicSelect", "type": "SkipSong"})
    );

    handle.shutdown().await;
    timeout(WAIT, core).await.unwrap().unwrap().unwrap();
    assert_eq!(handle.snapshot().phase, SessionPhase::Closed);

    // The client closed its socket, so the server side drains and ends.
    timeout(WAIT, async { while conn.frames.recv().await.is_some() {} })
        .await
        .expect("connection still open after shutdown");
}

#[tokio::test]
async fn garbage_and_unknown_frames_are_ignored() {
    let mut server = MockServer::start().await;
    let (handle, core) = SessionCore::spawn(&config(server.addr), &token()).unwrap();
    let mut conn = server.next_conn().await;

    conn.reply(VERIFIED);
    let before = wait_for(&handle, "verified", |s| s.phase == SessionPhase::Authenticated).await;

    conn.reply("{not json");
    conn.reply(r#"{"message":"Announcement","text":"maintenance at noon"}"#);
    conn.reply(r#"{"message":"StatusCheck"}"#);
    conn.replies
        .send(WsMessage::Binary(vec![1, 2, 3]))
        .unwrap();

    // Nothing is echoed back; only polls keep arriving.
    let frames = conn.frames_for(Duration::from_millis(300)).await;
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f == &json!({"message": "StatusCheck"})));

    let after = handle.snapshot();
    assert_eq!(after.phase, SessionPhase::Authenticated);
    assert_eq!(after.state, before.state);

    drop(handle);
    timeout(WAIT, core).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn lost_connection_reconnects_and_resumes_polling() {
    let mut server = MockServer::start().await;
    let (handle, core) = SessionCore::spawn(&config(server.addr), &token()).unwrap();

    let mut first = server.next_conn().await;
    assert_eq!(first.next_frame().await, json!({"message": "StatusCheck"}));
    first.reply(VERIFIED);
    wait_for(&handle, "verified", |s| s.phase == SessionPhase::Authenticated).await;

    drop(first);
    let snap = wait_for(&handle, "disconnect", |s| {
        matches!(s.phase, SessionPhase::Disconnected { attempt: 1, .. })
    })
    .await;
    assert!(!snap.connected());
    assert!(snap.last_error.is_some());
    assert!(matches!(
        handle.select_playlist("u1"),
        Err(DispatchError::Disconnected)
    ));

    let mut second = server.next_conn().await;
    assert_eq!(second.path, "/ws?s=abc123");
    assert_eq!(second.next_frame().await, json!({"message": "StatusCheck"}));

    second.reply(VERIFIED);
    let snap = wait_for(&handle, "verified again", |s| {
        s.phase == SessionPhase::Authenticated && s.last_error.is_none()
    })
    .await;
    assert!(snap.connected());

    handle.skip().unwrap();
    assert_eq!(
        second.next_command().await,
        json!({"message": "MusicSelect", "type": "SkipSong"})
    );

    handle.shutdown().await;
    timeout(WAIT, core).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    // Bind and release a port so every connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(addr);
    config.reconnect.base_delay_ms = 20;
    config.reconnect.max_attempts = 2;
    let (handle, core) = SessionCore::spawn(&config, &token()).unwrap();

    let snap = wait_for(&handle, "closed", |s| s.phase == SessionPhase::Closed).await;
    assert!(snap.last_error.is_some());
    assert!(!snap.connected());
    assert!(matches!(handle.skip(), Err(DispatchError::Disconnected)));

    handle.shutdown().await;
    timeout(WAIT, core).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn stalled_handshake_falls_into_backoff() {
    // The kernel completes the TCP handshake but nobody speaks websocket.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = config(addr);
    config.server.connect_timeout_ms = 150;
    config.reconnect.base_delay_ms = 100;
    config.reconnect.max_attempts = 1;
    let (handle, core) = SessionCore::spawn(&config, &token()).unwrap();

    let snap = wait_for(&handle, "first timeout", |s| {
        matches!(s.phase, SessionPhase::Disconnected { attempt: 1, .. })
    })
    .await;
    assert!(snap
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));

    let snap = wait_for(&handle, "closed", |s| s.phase == SessionPhase::Closed).await;
    assert!(snap
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));

    handle.shutdown().await;
    timeout(WAIT, core).await.unwrap().unwrap().unwrap();
    drop(listener);
}
