//! Transport layer abstraction
//!
//! A [`Socket`] is a callback-driven full-duplex connection handle in the
//! shape of a browser WebSocket: four settable event slots plus `send` and
//! `close`. The native implementation lives in [`websocket`]; tests use
//! [`crate::testing::FakeSocket`].

pub mod websocket;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Close code for a routine, intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// A single payload carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(data))
    }
}

/// Payload of an error event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Payload of a close event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: code == NORMAL_CLOSURE,
        }
    }
}

pub type OpenCallback = Box<dyn FnMut() + Send>;
pub type MessageCallback = Box<dyn FnMut(Message) + Send>;
pub type ErrorCallback = Box<dyn FnMut(ErrorEvent) + Send>;
pub type CloseCallback = Box<dyn FnMut(CloseEvent) + Send>;

/// A callback-driven connection handle.
///
/// Implementations must not dispatch an event from inside the setter that
/// installs its callback; events are observed after the call that caused
/// them. A handle may defer its I/O until the open callback is installed.
pub trait Socket: Send {
    fn set_onopen(&mut self, callback: Option<OpenCallback>);
    fn set_onmessage(&mut self, callback: Option<MessageCallback>);
    fn set_onerror(&mut self, callback: Option<ErrorCallback>);
    fn set_onclose(&mut self, callback: Option<CloseCallback>);

    /// Queue a message for the peer
    fn send(&mut self, message: Message) -> Result<()>;

    /// Begin the closing handshake
    fn close(&mut self);
}

/// Builds a connection handle for an address and a sub-protocol list.
pub type SocketFactory = Arc<dyn Fn(&str, &[String]) -> Result<Box<dyn Socket>> + Send + Sync>;

/// The four callback slots, shared by the socket implementations.
#[derive(Default)]
pub struct Handlers {
    onopen: Option<OpenCallback>,
    onmessage: Option<MessageCallback>,
    onerror: Option<ErrorCallback>,
    onclose: Option<CloseCallback>,
}

impl Handlers {
    pub fn set_onopen(&mut self, callback: Option<OpenCallback>) {
        self.onopen = callback;
    }

    pub fn set_onmessage(&mut self, callback: Option<MessageCallback>) {
        self.onmessage = callback;
    }

    pub fn set_onerror(&mut self, callback: Option<ErrorCallback>) {
        self.onerror = callback;
    }

    pub fn set_onclose(&mut self, callback: Option<CloseCallback>) {
        self.onclose = callback;
    }

    pub fn has_onopen(&self) -> bool {
        self.onopen.is_some()
    }

    pub fn fire_open(&mut self) {
        if let Some(callback) = self.onopen.as_mut() {
            callback();
        }
    }

    pub fn fire_message(&mut self, message: Message) {
        if let Some(callback) = self.onmessage.as_mut() {
            callback(message);
        }
    }

    pub fn fire_error(&mut self, event: ErrorEvent) {
        if let Some(callback) = self.onerror.as_mut() {
            callback(event);
        }
    }

    pub fn fire_close(&mut self, event: CloseEvent) {
        if let Some(callback) = self.onclose.as_mut() {
            callback(event);
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("onopen", &self.onopen.is_some())
            .field("onmessage", &self.onmessage.is_some())
            .field("onerror", &self.onerror.is_some())
            .field("onclose", &self.onclose.is_some())
            .finish()
    }
}
