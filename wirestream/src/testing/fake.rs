//! In-memory connection handle for testing.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::transport::{
    CloseCallback, CloseEvent, ErrorCallback, ErrorEvent, Handlers, Message, MessageCallback,
    OpenCallback, Socket, SocketFactory,
};

#[derive(Debug, Default)]
struct FakeState {
    handlers: Handlers,
    echo: bool,
    fail_with: Option<String>,
    send_error: Option<String>,
    constructed: usize,
    close_calls: usize,
    sent: Vec<Message>,
    last_url: Option<String>,
    last_protocols: Vec<String>,
}

/// The handle side, owned by the adapter.
///
/// Built through [`FakeRemote::factory`]. `send` records the message and,
/// for an echoing remote, immediately fires it back as a message event.
#[derive(Debug)]
pub struct FakeSocket {
    state: Arc<Mutex<FakeState>>,
}

/// The test side of a fake connection.
///
/// # Example
///
/// ```
/// use futures_util::StreamExt;
/// use wirestream::testing::FakeRemote;
/// use wirestream::{connect, ConnectOptions, Message};
///
/// # tokio_test::block_on(async {
/// let remote = FakeRemote::echoing();
/// let options = ConnectOptions { make_socket: remote.factory(), ..Default::default() };
/// let mut connections = connect("ws://example.test", options);
///
/// let opener = remote.clone();
/// let capability = futures_util::future::join(connections.next(), async move { opener.open() })
///     .await
///     .0
///     .unwrap()
///     .unwrap();
///
/// let mut messages = capability.bind(futures_util::stream::iter(["ping"])).unwrap();
/// assert_eq!(messages.next().await, Some(Ok(Message::from("ping"))));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    /// A remote that stays silent unless told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// A remote that echoes every sent message back.
    pub fn echoing() -> Self {
        let remote = Self::new();
        remote.lock().echo = true;
        remote
    }

    /// A remote whose factory refuses to construct a handle.
    pub fn failing(message: impl Into<String>) -> Self {
        let remote = Self::new();
        remote.lock().fail_with = Some(message.into());
        remote
    }

    /// A remote whose handles reject every `send` with a transport error.
    pub fn failing_sends(message: impl Into<String>) -> Self {
        let remote = Self::new();
        remote.lock().send_error = Some(message.into());
        remote
    }

    /// Factory handing out handles wired to this remote.
    pub fn factory(&self) -> SocketFactory {
        let state = Arc::clone(&self.state);
        Arc::new(move |url: &str, protocols: &[String]| -> Result<Box<dyn Socket>> {
            let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
            guard.constructed += 1;
            guard.last_url = Some(url.to_string());
            guard.last_protocols = protocols.to_vec();
            if let Some(message) = &guard.fail_with {
                return Err(Error::Connect(message.clone()));
            }
            drop(guard);
            Ok(Box::new(FakeSocket {
                state: Arc::clone(&state),
            }))
        })
    }

    pub fn open(&self) {
        self.lock().handlers.fire_open();
    }

    pub fn message(&self, message: impl Into<Message>) {
        self.lock().handlers.fire_message(message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.lock().handlers.fire_error(ErrorEvent::new(message));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.lock().handlers.fire_close(CloseEvent::new(code, reason));
    }

    /// Forget every installed callback, as a handle that lost its owner would.
    pub fn drop_callbacks(&self) {
        self.lock().handlers = Handlers::default();
    }

    /// Number of handles the factory built
    pub fn constructed(&self) -> usize {
        self.lock().constructed
    }

    /// Number of `close()` calls made on the handle
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Messages passed to `send`, in order
    pub fn sent(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.lock().last_url.clone()
    }

    pub fn last_protocols(&self) -> Vec<String> {
        self.lock().last_protocols.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl FakeSocket {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Socket for FakeSocket {
    fn set_onopen(&mut self, callback: Option<OpenCallback>) {
        self.lock().handlers.set_onopen(callback);
    }

    fn set_onmessage(&mut self, callback: Option<MessageCallback>) {
        self.lock().handlers.set_onmessage(callback);
    }

    fn set_onerror(&mut self, callback: Option<ErrorCallback>) {
        self.lock().handlers.set_onerror(callback);
    }

    fn set_onclose(&mut self, callback: Option<CloseCallback>) {
        self.lock().handlers.set_onclose(callback);
    }

    fn send(&mut self, message: Message) -> Result<()> {
        let mut state = self.lock();
        if let Some(reason) = &state.send_error {
            return Err(Error::Transport(reason.clone()));
        }
        state.sent.push(message.clone());
        if state.echo {
            state.handlers.fire_message(message);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.lock().close_calls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_records_construction() {
        let remote = FakeRemote::new();
        let factory = remote.factory();
        assert_eq!(remote.constructed(), 0);

        let _socket = factory("ws://a", &["x".to_string()]).unwrap();
        assert_eq!(remote.constructed(), 1);
        assert_eq!(remote.last_url().as_deref(), Some("ws://a"));
        assert_eq!(remote.last_protocols(), vec!["x".to_string()]);
    }

    #[test]
    fn test_failing_factory() {
        let remote = FakeRemote::failing("nope");
        let result = (remote.factory())("ws://a", &[]);
        assert_eq!(result.err(), Some(Error::Connect("nope".into())));
        assert_eq!(remote.constructed(), 1);
    }

    #[test]
    fn test_failing_sends_reject_without_recording() {
        let remote = FakeRemote::failing_sends("broken pipe");
        let mut socket = (remote.factory())("ws://a", &[]).unwrap();

        let result = socket.send(Message::from("hi"));
        assert_eq!(result, Err(Error::Transport("broken pipe".into())));
        assert!(remote.sent().is_empty());
    }

    #[test]
    fn test_echo_fires_message_callback() {
        let remote = FakeRemote::echoing();
        let mut socket = (remote.factory())("ws://a", &[]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        socket.set_onmessage(Some(Box::new(move |message| sink.lock().unwrap().push(message))));

        socket.send(Message::from("hi")).unwrap();
        socket.close();

        assert_eq!(*seen.lock().unwrap(), vec![Message::from("hi")]);
        assert_eq!(remote.sent(), vec![Message::from("hi")]);
        assert_eq!(remote.close_calls(), 1);
    }
}
