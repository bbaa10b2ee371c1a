//! Minimal realtime server speaking the JSON `{event, data}` frame protocol.
//!
//! Mirrors the backend's behavior: bearer-token check on upgrade, a
//! `connection_status` greeting, `pong` replies and room acknowledgements.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    CloseAll,
}

pub struct TestRealtimeServer {
    addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl TestRealtimeServer {
    pub async fn start(valid_token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (commands, _) = broadcast::channel(64);
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let expected = format!("Bearer {valid_token}");
        let task = {
            let commands = commands.clone();
            let received = received.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let expected = expected.clone();
                    let commands = commands.subscribe();
                    let received = received.clone();
                    let connections = connections.clone();
                    tokio::spawn(async move {
                        let check = move |request: &Request, response: Response| {
                            let authorized = request
                                .headers()
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                == Some(expected.as_str());
                            if request.uri().path() != "/realtime/ws" || !authorized {
                                let mut rejection = ErrorResponse::new(Some("invalid token".to_string()));
                                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                                return Err(rejection);
                            }
                            Ok(response)
                        };
                        let Ok(ws) = accept_hdr_async(stream, check).await else {
                            return;
                        };
                        connections.fetch_add(1, Ordering::SeqCst);
                        serve(ws, commands, received).await;
                    });
                }
            })
        };

        Self {
            addr,
            commands,
            received,
            connections,
            task,
        }
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Push an event to every connected client.
    pub fn broadcast(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        let _ = self.commands.send(Command::Push(frame));
    }

    /// Drop every open connection from the server side.
    pub fn close_all(&self) {
        let _ = self.commands.send(Command::CloseAll);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received_events(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.get("event").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

impl Drop for TestRealtimeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut commands: broadcast::Receiver<Command>,
    received: Arc<Mutex<Vec<Value>>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let greeting = json!({
        "event": "connection_status",
        "data": { "status": "connected", "user_id": "u1", "message": "Successfully connected to real-time updates" }
    });
    if sink.send(Message::Text(greeting.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Push(frame)) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Command::CloseAll) | Err(_) => {
                    let _ = sink.close().await;
                    return;
                }
            },
            frame = stream.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    match frame {
                        Some(Ok(_)) => continue,
                        _ => return,
                    }
                };
                let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                received.lock().unwrap().push(message.clone());
                if let Some(reply) = reply_for(&message) {
                    if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn reply_for(message: &Value) -> Option<Value> {
    let project = message
        .pointer("/data/project_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match message.get("event").and_then(Value::as_str)? {
        "ping" => Some(json!({ "event": "pong", "data": { "timestamp": 1700000000.0 } })),
        "join_project_room" => Some(json!({ "event": "room_joined", "data": { "room": format!("project_{project}") } })),
        "leave_project_room" => Some(json!({ "event": "room_left", "data": { "room": format!("project_{project}") } })),
        _ => None,
    }
}
