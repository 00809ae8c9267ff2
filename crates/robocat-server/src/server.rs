//! WebSocket endpoint: authentication, session binding and the
//! per-connection read and write loops.

use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{
            CloseFrame, Message as WsMessage, WebSocket, close_code,
            rejection::WebSocketUpgradeRejection,
        },
    },
    http::{HeaderMap, HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use robocat_core::{
    CommandHandler, CommandName, Message, Registry, Replier, Request, UpdateName,
    protocol::SUBPROTOCOL,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    config::ServerConfig,
    session::{Attached, SessionSlot},
};

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Token of the session to resume.
    pub session: Option<String>,
}

struct ServerInner {
    config: ServerConfig,
    handlers: Registry<Request>,
    session: Arc<SessionSlot>,
}

/// Command server. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                handlers: Registry::new(),
                session: Arc::new(SessionSlot::default()),
            }),
        }
    }

    /// Route commands named `name` to `handler`.
    pub fn on(&self, name: &CommandName, handler: Arc<dyn CommandHandler>) {
        self.inner.handlers.subscribe(name.as_str(), move |request: Request| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(request).await }.boxed()
        });
    }

    /// Route commands named `name` to an async closure.
    pub fn on_fn<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .handlers
            .subscribe(name, move |request: Request| handler(request).boxed());
    }

    /// Token of the active session, if any.
    pub async fn session_token(&self) -> Option<String> {
        self.inner.session.token().await
    }

    /// HTTP router exposing the upgrade endpoint on `GET /`.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(upgrade))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Serve until the listener fails.
    ///
    /// # Errors
    /// Returns error if accepting connections fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        axum::serve(listener, self.router()).await
    }

    async fn connect(self, mut socket: WebSocket, requested: Option<String>) {
        if socket.protocol().is_none_or(|p| p.as_bytes() != SUBPROTOCOL.as_bytes()) {
            tracing::warn!("Client did not negotiate the {SUBPROTOCOL} sub-protocol");
            close_policy(&mut socket, format!("{SUBPROTOCOL} sub-protocol required")).await;
            return;
        }

        // The token was checked before the upgrade, but another connection
        // may have claimed the session since.
        let Some(attached) = self.inner.session.attach(requested.as_deref()).await else {
            close_policy(&mut socket, "session already active".to_string()).await;
            return;
        };
        let (mut sink, stream) = socket.split();

        if attached.fresh && !send_session(&mut sink, &attached.token).await {
            attached.connection.cancel();
        }

        tokio::join!(
            self.read_loop(stream, &attached),
            write_loop(&mut sink, &attached),
        );
        if let Err(e) = sink.close().await {
            tracing::debug!(session = %attached.token, "Unable to close connection: {e}");
        }

        self.inner
            .session
            .detach(&attached.token, attached.id, self.inner.config.session_timeout)
            .await;
    }

    async fn read_loop(&self, mut stream: SplitStream<WebSocket>, attached: &Attached) {
        loop {
            let frame = tokio::select! {
                () = attached.connection.cancelled() => break,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str(), attached),
                Some(Ok(WsMessage::Binary(_))) => {
                    tracing::debug!(session = %attached.token, "Rejecting binary frame");
                    reply_error(attached, String::new(), "binary messages are not supported");
                }
                Some(Ok(WsMessage::Close(_))) => {
                    tracing::debug!(session = %attached.token, "Client closed the session");
                    attached.scope.cancel();
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session = %attached.token, "Connection lost: {e}");
                    attached.connection.cancel();
                    break;
                }
                None => {
                    attached.connection.cancel();
                    break;
                }
            }
        }
    }

    fn dispatch(&self, text: &str, attached: &Attached) {
        let message = match Message::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session = %attached.token, "Malformed message: {e}");
                reply_error(attached, String::new(), e);
                return;
            }
        };
        let reference = message.reference.clone();
        let message = match message.as_command() {
            Ok(message) => message,
            Err(e) => {
                reply_error(attached, reference, e);
                return;
            }
        };

        let reply = Replier::new(attached.updates.clone(), attached.scope.clone(), &reference);
        tracing::debug!(session = %attached.token, reference = %reference, name = %message.name, "Received command");

        if message.command_name() == CommandName::Ping {
            tokio::spawn(async move {
                if let Err(e) = reply.send::<()>(UpdateName::Pong.as_str(), None).await {
                    tracing::debug!("Unable to send pong: {e}");
                }
            });
            return;
        }

        let name = message.name.clone();
        let request = Request {
            message,
            reply,
            scope: attached.scope.clone(),
        };
        if self.inner.handlers.dispatch(&name, request) == 0 {
            tracing::debug!(session = %attached.token, name = %name, "Unknown command");
            reply_error(attached, reference, format!("unknown command: {name}"));
        }
    }
}

async fn upgrade(
    State(server): State<Server>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(credentials) = &server.inner.config.credentials {
        if !credentials.verify(&headers) {
            tracing::debug!("Rejecting unauthenticated connection");
            return (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"robocat\""))],
            )
                .into_response();
        }
    }

    if let Some(token) = server.session_token().await {
        if params.session.as_deref() != Some(token.as_str()) {
            tracing::debug!("Rejecting connection with a foreign session token");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.protocols([SUBPROTOCOL])
        .max_message_size(server.inner.config.max_message_size)
        .on_upgrade(move |socket| server.connect(socket, params.session))
}

async fn close_policy(socket: &mut WebSocket, reason: String) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!("Unable to send close frame: {e}");
    }
}

async fn send_session(sink: &mut SplitSink<WebSocket, WsMessage>, token: &str) -> bool {
    let text = match Message::update(UpdateName::Session.as_str(), Some(token)).and_then(|m| m.encode()) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Unable to encode session update: {e}");
            return false;
        }
    };
    match sink.send(WsMessage::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(session = %token, "Unable to send session update: {e}");
            false
        }
    }
}

async fn write_loop(sink: &mut SplitSink<WebSocket, WsMessage>, attached: &Attached) {
    let mut queue = tokio::select! {
        () = attached.connection.cancelled() => return,
        queue = attached.queue.lock() => queue,
    };

    loop {
        let update = tokio::select! {
            () = attached.connection.cancelled() => break,
            update = queue.recv() => update,
        };
        let Some(update) = update else {
            break;
        };

        let text = match update.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(reference = %update.reference, "Dropping update: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            tracing::debug!(session = %attached.token, reference = %update.reference, "Dropping update: {e}");
            attached.connection.cancel();
            break;
        }
    }
}

fn reply_error(attached: &Attached, reference: String, error: impl std::fmt::Display) {
    let reply = Replier::new(attached.updates.clone(), attached.scope.clone(), reference);
    let message = error.to_string();
    tokio::spawn(async move { reply.error_or_log(message).await });
}
