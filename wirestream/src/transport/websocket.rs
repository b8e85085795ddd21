//! Native WebSocket transport using tokio-tungstenite
//!
//! [`WebSocket`] presents a tokio-tungstenite client connection through the
//! callback-driven [`Socket`] interface. A background task owns the stream;
//! `send` and `close` are forwarded to it over a channel and every frame it
//! reads is dispatched to the installed callbacks.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, info, warn};

use super::{
    CloseCallback, CloseEvent, ErrorCallback, ErrorEvent, Handlers, Message, MessageCallback,
    OpenCallback, Socket, SocketFactory, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED,
};
use crate::error::{Error, Result};

const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// How long a closing handle waits for the peer's close reply.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Command {
    Send(Message),
    Close,
}

/// Factory building native [`WebSocket`]s; the default for
/// [`crate::ConnectOptions`].
pub fn factory() -> SocketFactory {
    Arc::new(|url: &str, protocols: &[String]| -> Result<Box<dyn Socket>> {
        Ok(Box::new(WebSocket::connect(url, protocols)?))
    })
}

/// WebSocket client connection
///
/// The handshake starts once an open callback is installed, so no event is
/// dispatched before the constructing code has wired its callbacks.
pub struct WebSocket {
    handlers: Arc<Mutex<Handlers>>,
    commands: mpsc::UnboundedSender<Command>,
    armed: Arc<Notify>,
}

impl WebSocket {
    /// Validate the address and spawn the connection task on the current
    /// tokio runtime.
    pub fn connect(url: &str, protocols: &[String]) -> Result<Self> {
        let request = build_request(url, protocols)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Connect(e.to_string()))?;

        let handlers = Arc::new(Mutex::new(Handlers::default()));
        let armed = Arc::new(Notify::new());
        let (commands, command_rx) = mpsc::unbounded_channel();

        runtime.spawn(drive(
            url.to_string(),
            request,
            Arc::clone(&handlers),
            Arc::clone(&armed),
            command_rx,
        ));

        Ok(Self {
            handlers,
            commands,
            armed,
        })
    }

    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        lock(&self.handlers)
    }
}

impl Socket for WebSocket {
    fn set_onopen(&mut self, callback: Option<OpenCallback>) {
        let mut handlers = self.handlers();
        handlers.set_onopen(callback);
        if handlers.has_onopen() {
            self.armed.notify_one();
        }
    }

    fn set_onmessage(&mut self, callback: Option<MessageCallback>) {
        self.handlers().set_onmessage(callback);
    }

    fn set_onerror(&mut self, callback: Option<ErrorCallback>) {
        self.handlers().set_onerror(callback);
    }

    fn set_onclose(&mut self, callback: Option<CloseCallback>) {
        self.handlers().set_onclose(callback);
    }

    fn send(&mut self, message: Message) -> Result<()> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| Error::NotConnected)
    }

    fn close(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

fn build_request(url: &str, protocols: &[String]) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Connect(e.to_string()))?;

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| Error::Connect(e.to_string()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

fn lock(handlers: &Mutex<Handlers>) -> MutexGuard<'_, Handlers> {
    handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.into()),
        Message::Binary(data) => Frame::Binary(data.to_vec().into()),
    }
}

async fn drive(
    url: String,
    request: Request,
    handlers: Arc<Mutex<Handlers>>,
    armed: Arc<Notify>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    // Wait for the owner to install its callbacks. Sends issued meanwhile are
    // held back; a close or a dropped handle cancels the attempt.
    let mut backlog = Vec::new();
    loop {
        tokio::select! {
            _ = armed.notified() => break,
            command = commands.recv() => match command {
                Some(Command::Send(message)) => backlog.push(message),
                Some(Command::Close) | None => {
                    debug!("WebSocket to {} closed before connecting", url);
                    return;
                }
            },
        }
    }

    let handshake = connect_async(request);
    tokio::pin!(handshake);
    let (stream, _response) = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok(pair) => break pair,
                Err(e) => {
                    warn!("WebSocket connect to {} failed: {}", url, e);
                    lock(&handlers).fire_error(ErrorEvent::new(e.to_string()));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(message)) => backlog.push(message),
                Some(Command::Close) | None => {
                    debug!("WebSocket to {} closed during handshake", url);
                    return;
                }
            },
        }
    };

    info!("WebSocket connected to {}", url);
    lock(&handlers).fire_open();

    let (mut write, mut read) = stream.split();
    for message in backlog {
        if let Err(e) = write.send(to_frame(message)).await {
            lock(&handlers).fire_error(ErrorEvent::new(e.to_string()));
            return;
        }
    }

    let close_timer = sleep(CLOSE_TIMEOUT);
    tokio::pin!(close_timer);
    let mut closing = false;
    loop {
        tokio::select! {
            _ = &mut close_timer, if closing => {
                debug!("WebSocket to {} did not answer close in time", url);
                return;
            }
            command = commands.recv(), if !closing => match command {
                Some(Command::Send(message)) => {
                    if let Err(e) = write.send(to_frame(message)).await {
                        warn!("WebSocket write to {} failed: {}", url, e);
                        lock(&handlers).fire_error(ErrorEvent::new(e.to_string()));
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    debug!("Closing WebSocket to {}", url);
                    closing = true;
                    close_timer.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                    if let Err(e) = write.close().await {
                        debug!("Close frame to {} not sent: {}", url, e);
                    }
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Frame::Text(text))) => {
                    lock(&handlers).fire_message(Message::Text(text.to_string()));
                }
                Some(Ok(Frame::Binary(data))) => {
                    lock(&handlers).fire_message(Message::Binary(Bytes::from(data)));
                }
                Some(Ok(Frame::Close(frame))) => {
                    let event = match frame {
                        Some(frame) => CloseEvent {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                            was_clean: true,
                        },
                        None => CloseEvent {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                            was_clean: true,
                        },
                    };
                    info!("WebSocket to {} closed with code {}", url, event.code);
                    lock(&handlers).fire_close(event);
                    return;
                }
                // Ping and pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket read from {} failed: {}", url, e);
                    lock(&handlers).fire_error(ErrorEvent::new(e.to_string()));
                    return;
                }
                None => {
                    lock(&handlers).fire_close(CloseEvent {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                        was_clean: false,
                    });
                    return;
                }
            },
        }
    }
}
