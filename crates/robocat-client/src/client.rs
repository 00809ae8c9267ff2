//! Connection management, reconnects and request/response commands.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use robocat_core::{
    CommandName, FlowFile, Message, MessageKind, Registry, UpdateName,
    protocol::{STATUS_OK, SUBPROTOCOL},
};
use serde::Serialize;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{HeaderValue, header},
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::{backoff::Backoff, error::ClientError, flow::FlowBuilder, options::ClientOptions};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, tungstenite::Message>;

const SESSION_PARAM: &str = "session";

pub(crate) struct ClientInner {
    url: Url,
    options: ClientOptions,
    session: Mutex<Option<String>>,
    writer: tokio::sync::Mutex<Option<Sink>>,
    pub(crate) updates: Registry<Message>,
    pub(crate) scope: CancellationToken,
    flow_abort: broadcast::Sender<()>,
    backoff: Mutex<Backoff>,
}

/// Connection to a robocat server. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Dial `url` and start listening for updates.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the first dial fails.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let url = strip_session(Url::parse(url)?);
        let (flow_abort, _) = broadcast::channel(16);
        let backoff = Backoff::new(
            options.backoff_base,
            options.backoff_max,
            options.reconnect_attempts,
        );

        let inner = Arc::new(ClientInner {
            url,
            options,
            session: Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
            updates: Registry::new(),
            scope: CancellationToken::new(),
            flow_abort,
            backoff: Mutex::new(backoff),
        });

        let stream = inner.dial().await?;
        tokio::spawn(Arc::clone(&inner).read_loop(stream));

        Ok(Self { inner })
    }

    /// Token of the server session, once announced.
    #[must_use]
    pub fn session(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the client is still usable.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Send a command with a fresh correlation id and return that id.
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded or the write fails.
    pub async fn send_command<B: Serialize>(
        &self,
        name: &str,
        body: Option<B>,
    ) -> Result<String, ClientError> {
        let reference = Uuid::new_v4().to_string();
        let command = Message::command(name, body)?.with_ref(reference.clone());
        self.inner.send(&command).await?;
        Ok(reference)
    }

    /// Round trip a `ping`.
    ///
    /// # Errors
    /// Returns error if the reply is not a matching `pong`.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let reply = self.request::<()>(CommandName::Ping, None).await?;
        match reply.update_name() {
            UpdateName::Pong => Ok(()),
            _ => Err(unexpected(reply)),
        }
    }

    /// Stop the running flow. Flow handles of this client end as aborted.
    ///
    /// # Errors
    /// Returns error if nothing runs or the reply is unexpected.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let reply = self.request::<()>(CommandName::Stop, None).await?;
        expect_ok(reply)?;
        // No receivers simply means no flow handle is alive.
        let _ = self.inner.flow_abort.send(());
        Ok(())
    }

    /// Put `file` into the server's flow input directory.
    ///
    /// # Errors
    /// Returns error if the server rejects the file.
    pub async fn input(&self, file: &FlowFile) -> Result<(), ClientError> {
        let reply = self.request(CommandName::Input, Some(file)).await?;
        expect_ok(reply)
    }

    /// Prepare a run of `flow`.
    #[must_use]
    pub fn flow(&self, flow: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(self.clone(), flow)
    }

    /// End the server session with a normal close and stop the client.
    ///
    /// # Errors
    /// Returns error if the close frame cannot be written.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.inner.scope.cancel();
        let mut writer = self.inner.writer.lock().await;
        let Some(mut sink) = writer.take() else {
            return Ok(());
        };

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        sink.send(tungstenite::Message::Close(Some(frame))).await?;
        Ok(())
    }

    pub(crate) fn abort_signal(&self) -> broadcast::Receiver<()> {
        self.inner.flow_abort.subscribe()
    }

    /// Send a command and wait for exactly one update on its id.
    async fn request<B: Serialize>(
        &self,
        name: CommandName,
        body: Option<B>,
    ) -> Result<Message, ClientError> {
        let reference = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.updates.subscribe(reference.clone(), move |update: Message| {
            let _ = tx.send(update);
            async {}.boxed()
        });

        let result: Result<Message, ClientError> = async {
            let command = Message::command(name.as_str(), body)?.with_ref(reference.clone());
            self.inner.send(&command).await?;
            let reply = async {
                tokio::select! {
                    () = self.inner.scope.cancelled() => Err(ClientError::SessionClosed),
                    reply = rx.recv() => reply.ok_or(ClientError::SessionClosed),
                }
            };
            match self.inner.options.request_timeout {
                Some(timeout) => tokio::time::timeout(timeout, reply)
                    .await
                    .unwrap_or(Err(ClientError::RequestTimeout(timeout))),
                None => reply.await,
            }
        }
        .await;
        self.inner.updates.unsubscribe(&reference);

        let reply = result?;
        if reply.reference != reference {
            return Err(ClientError::CorrelationMismatch {
                expected: reference,
                actual: reply.reference,
            });
        }
        if reply.update_name() == UpdateName::Error {
            return Err(ClientError::Remote(reply.text_or_empty()));
        }
        Ok(reply)
    }
}

impl ClientInner {
    async fn dial(&self) -> Result<SplitStream<Socket>, ClientError> {
        let mut url = self.url.clone();
        if let Some(token) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            url.query_pairs_mut().append_pair(SESSION_PARAM, token);
        }

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(SUBPROTOCOL),
        );
        if let Some(credentials) = &self.options.credentials {
            let value = HeaderValue::from_str(&credentials.header_value())
                .map_err(|e| ClientError::Transport(tungstenite::Error::HttpFormat(e.into())))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut config = WebSocketConfig::default();
        config.max_message_size = self.options.max_message_size;
        config.max_frame_size = self.options.max_message_size;

        let (socket, _) = connect_async_with_config(request, Some(config), false).await?;
        tracing::debug!(url = %self.url, "Connected");

        let (sink, stream) = socket.split();
        *self.writer.lock().await = Some(sink);
        Ok(stream)
    }

    pub(crate) async fn send(&self, message: &Message) -> Result<(), ClientError> {
        let text = message.encode()?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(tungstenite::Message::Text(text)).await?;
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<Socket>) {
        loop {
            let frame = tokio::select! {
                () = self.scope.cancelled() => return,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(tungstenite::Message::Text(text))) => self.receive(&text),
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    tracing::info!(?frame, "Server closed the session");
                    self.scope.cancel();
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Connection lost: {e}");
                    match self.reconnect().await {
                        Some(next) => stream = next,
                        None => return,
                    }
                }
                None => {
                    tracing::warn!("Connection lost");
                    match self.reconnect().await {
                        Some(next) => stream = next,
                        None => return,
                    }
                }
            }
        }
    }

    fn receive(&self, text: &str) {
        let update = match Message::decode(text) {
            Ok(update) if update.kind == MessageKind::Update => update,
            Ok(other) => {
                tracing::debug!(name = %other.name, "Ignoring non-update message");
                return;
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed message: {e}");
                return;
            }
        };

        if update.update_name() == UpdateName::Session {
            let token = update.text_or_empty();
            tracing::debug!(session = %token, "Session established");
            *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
            return;
        }

        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.updates.dispatch_update(update);
    }

    /// Redial until it works, the budget runs out, or the client closes.
    async fn reconnect(&self) -> Option<SplitStream<Socket>> {
        self.writer.lock().await.take();

        loop {
            let (delay, attempt) = {
                let mut backoff = self.backoff.lock().unwrap_or_else(PoisonError::into_inner);
                if backoff.exhausted() {
                    tracing::error!("Giving up on reconnecting");
                    self.scope.cancel();
                    return None;
                }
                (backoff.next_delay(), backoff.attempt())
            };

            tokio::select! {
                () = self.scope.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            match self.dial().await {
                Ok(stream) => {
                    tracing::info!(attempt, "Reconnected");
                    return Some(stream);
                }
                Err(e) => tracing::warn!(attempt, "Reconnect failed: {e}"),
            }
        }
    }
}

fn strip_session(mut url: Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != SESSION_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url
}

fn expect_ok(reply: Message) -> Result<(), ClientError> {
    match (reply.update_name(), reply.text_or_empty().as_str()) {
        (UpdateName::Status, STATUS_OK) => Ok(()),
        _ => Err(unexpected(reply)),
    }
}

fn unexpected(reply: Message) -> ClientError {
    ClientError::UnexpectedReply {
        body: reply.text_or_empty(),
        name: reply.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_session() {
        let url = strip_session(Url::parse("ws://host/?session=abc&x=1").unwrap());
        assert_eq!(url.as_str(), "ws://host/?x=1");

        let url = strip_session(Url::parse("ws://host:8080/?session=abc").unwrap());
        assert_eq!(url.as_str(), "ws://host:8080/");
    }

    #[test]
    fn test_expect_ok() {
        let ok = Message::update("status", Some("ok")).unwrap();
        assert!(expect_ok(ok).is_ok());

        let success = Message::update("status", Some("success")).unwrap();
        assert!(matches!(
            expect_ok(success),
            Err(ClientError::UnexpectedReply { name, body }) if name == "status" && body == "success"
        ));
    }
}
