use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    http::{Request as HttpRequest, StatusCode, header::AUTHORIZATION},
};
use futures::{SinkExt, StreamExt};
use robocat_core::{Message, Request};
use robocat_server::{Credentials, Server, ServerConfig};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, client::IntoClientRequest, http::HeaderValue, protocol::frame::coding::CloseCode,
    },
};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(server: &Server) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.clone().serve(listener));
    addr
}

async fn dial(addr: SocketAddr, session: Option<&str>, protocol: bool) -> Socket {
    let url = match session {
        Some(token) => format!("ws://{addr}/?session={token}"),
        None => format!("ws://{addr}/"),
    };
    let mut request = url.into_client_request().unwrap();
    if protocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("robocat"));
    }
    connect_async(request).await.unwrap().0
}

async fn recv(socket: &mut Socket) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection ended")
            .unwrap();
        if let tungstenite::Message::Text(text) = frame {
            return Message::decode(&text).unwrap();
        }
    }
}

async fn send(socket: &mut Socket, text: &str) {
    socket
        .send(tungstenite::Message::Text(text.to_string()))
        .await
        .unwrap();
}

/// Connect fresh and return the issued session token.
async fn open(addr: SocketAddr) -> (Socket, String) {
    let mut socket = dial(addr, None, true).await;
    let session = recv(&mut socket).await;
    assert_eq!(session.name, "session");
    assert!(session.reference.is_empty());
    let token = session.text().unwrap();
    (socket, token)
}

fn config(session_timeout: Duration) -> ServerConfig {
    ServerConfig {
        session_timeout,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_ping_pong() {
    let server = Server::new(ServerConfig::default());
    let addr = start(&server).await;
    let (mut socket, token) = open(addr).await;
    assert_eq!(server.session_token().await, Some(token));

    send(&mut socket, r#"{"type":"command","name":"ping","ref":"r1"}"#).await;
    let pong = recv(&mut socket).await;
    assert_eq!(pong.name, "pong");
    assert_eq!(pong.reference, "r1");
    assert_eq!(
        pong.encode().unwrap(),
        r#"{"type":"update","name":"pong","ref":"r1"}"#
    );
}

#[tokio::test]
async fn test_protocol_errors_are_reported() {
    let server = Server::new(ServerConfig::default());
    let addr = start(&server).await;
    let (mut socket, _) = open(addr).await;

    send(&mut socket, r#"{"type":"command","name":"dance","ref":"r2"}"#).await;
    let error = recv(&mut socket).await;
    assert_eq!((error.name.as_str(), error.reference.as_str()), ("error", "r2"));
    assert_eq!(error.text().unwrap(), "unknown command: dance");

    send(&mut socket, r#"{"type":"update","name":"log","ref":"r3"}"#).await;
    let error = recv(&mut socket).await;
    assert_eq!((error.name.as_str(), error.reference.as_str()), ("error", "r3"));

    send(&mut socket, "not json").await;
    assert_eq!(recv(&mut socket).await.name, "error");

    socket
        .send(tungstenite::Message::Binary(vec![1, 2, 3]))
        .await
        .unwrap();
    let error = recv(&mut socket).await;
    assert_eq!(error.text().unwrap(), "binary messages are not supported");
}

#[tokio::test]
async fn test_replies_follow_their_reference() {
    let server = Server::new(ServerConfig::default());
    server.on_fn("echo", |request: Request| async move {
        let delay = request.message.body::<u64>().unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(delay)).await;
        request.reply.ok().await.unwrap();
    });
    let addr = start(&server).await;
    let (mut socket, _) = open(addr).await;

    for (reference, delay) in [("slow", 150), ("medium", 75), ("fast", 0)] {
        let command = Message::command("echo", Some(delay))
            .unwrap()
            .with_ref(reference);
        send(&mut socket, &command.encode().unwrap()).await;
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let reply = recv(&mut socket).await;
        assert_eq!(reply.text().unwrap(), "ok");
        order.push(reply.reference);
    }
    assert_eq!(order, vec!["fast", "medium", "slow"]);
}

#[tokio::test]
async fn test_missing_subprotocol_is_policy_violation() {
    let server = Server::new(ServerConfig::default());
    let addr = start(&server).await;
    let mut socket = dial(addr, None, false).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        tungstenite::Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Policy),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert_eq!(server.session_token().await, None);
}

#[tokio::test]
async fn test_rejections_happen_before_upgrade() {
    let credentials = Credentials::from_parts(Some("bot".into()), Some("secret".into())).unwrap();
    let server = Server::new(ServerConfig {
        credentials: Some(credentials.clone()),
        ..ServerConfig::default()
    });

    let response = server
        .router()
        .oneshot(HttpRequest::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Open a session so that token checks kick in.
    let addr = start(&server).await;
    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("robocat"));
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&credentials.header_value()).unwrap(),
    );
    let (mut socket, _) = connect_async(request).await.unwrap();
    let token = recv(&mut socket).await.text().unwrap();

    let response = server
        .router()
        .oneshot(
            HttpRequest::get("/?session=someone-else")
                .header(AUTHORIZATION, credentials.header_value())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(server.session_token().await, Some(token));
}

#[tokio::test]
async fn test_session_resume_keeps_token_and_state() {
    let server = Server::new(config(Duration::from_secs(5)));
    let (held_tx, mut held_rx) = mpsc::unbounded_channel();
    server.on_fn("hold", move |request: Request| {
        let held_tx = held_tx.clone();
        async move {
            request.scope.cancelled().await;
            held_tx.send(request.message.reference).unwrap();
        }
    });
    let addr = start(&server).await;

    let (mut socket, token) = open(addr).await;
    send(&mut socket, r#"{"type":"command","name":"hold","ref":"h1"}"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(socket);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut socket = dial(addr, Some(&token), true).await;
    send(&mut socket, r#"{"type":"command","name":"ping","ref":"p1"}"#).await;
    // No new session update: the first frame is the pong.
    assert_eq!(recv(&mut socket).await.name, "pong");
    assert_eq!(server.session_token().await, Some(token));
    assert!(held_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_session_expiry_aborts_work() {
    let server = Server::new(config(Duration::from_millis(100)));
    let (held_tx, mut held_rx) = mpsc::unbounded_channel();
    server.on_fn("hold", move |request: Request| {
        let held_tx = held_tx.clone();
        async move {
            request.scope.cancelled().await;
            held_tx.send(request.message.reference).unwrap();
        }
    });
    let addr = start(&server).await;

    let (mut socket, token) = open(addr).await;
    send(&mut socket, r#"{"type":"command","name":"hold","ref":"h1"}"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(socket);

    let aborted = tokio::time::timeout(Duration::from_secs(5), held_rx.recv()).await;
    assert_eq!(aborted.unwrap().as_deref(), Some("h1"));
    assert_eq!(server.session_token().await, None);

    let (_socket, fresh) = open_with(addr, &token).await;
    assert_ne!(fresh, token);
}

async fn open_with(addr: SocketAddr, stale: &str) -> (Socket, String) {
    let mut socket = dial(addr, Some(stale), true).await;
    let session = recv(&mut socket).await;
    assert_eq!(session.name, "session");
    (socket, session.text().unwrap())
}

#[tokio::test]
async fn test_close_frame_ends_session() {
    let server = Server::new(config(Duration::from_secs(60)));
    let addr = start(&server).await;
    let (mut socket, _) = open(addr).await;

    socket.close(None).await.unwrap();
    for _ in 0..100 {
        if server.session_token().await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session survived a close frame");
}

#[tokio::test]
async fn test_new_connection_takes_over() {
    let server = Server::new(config(Duration::from_secs(60)));
    let addr = start(&server).await;
    let (mut first, token) = open(addr).await;

    let mut second = dial(addr, Some(&token), true).await;

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(tungstenite::Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "old connection still open");

    send(&mut second, r#"{"type":"command","name":"ping","ref":"p2"}"#).await;
    assert_eq!(recv(&mut second).await.reference, "p2");
    assert_eq!(server.session_token().await, Some(token));
}
