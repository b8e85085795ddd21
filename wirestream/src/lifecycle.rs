//! Connection lifecycle controller
//!
//! Owns one connection handle and drives it through
//! `Connecting -> Open -> Closed`. Transport callbacks only enqueue
//! [`SocketEvent`]s; the controller drains them while one of the streams
//! polls it, so state changes happen in poll order and never re-enter the
//! controller from inside a `send`.

use std::collections::VecDeque;
use std::task::{Context, Poll, Waker};

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::config::ConnectOptions;
use crate::error::Error;
use crate::transport::{CloseEvent, ErrorEvent, Message, Socket, NORMAL_CLOSURE};

/// Lifecycle of a single connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Open,
    Closed,
}

/// Event captured from a transport callback
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SocketEvent {
    Open,
    Message(Message),
    Error(ErrorEvent),
    Close(CloseEvent),
}

/// Classify a close event.
///
/// A close the consumer requested completes cleanly. Anything else is an
/// error: the normal closure code maps to [`Error::NormalClosure`], other
/// codes carry the peer's reason.
pub fn classify_close(forced_close: bool, event: &CloseEvent) -> Result<(), Error> {
    if forced_close {
        return Ok(());
    }
    if event.code == NORMAL_CLOSURE {
        return Err(Error::NormalClosure);
    }
    Err(Error::Closed {
        code: event.code,
        reason: event.reason.clone(),
    })
}

/// Outbound items forwarded per poll before yielding back to the executor.
pub(crate) const OUTBOUND_BUDGET: usize = 64;

pub(crate) struct Controller {
    url: String,
    state: LifecycleState,
    forced_close: bool,
    socket: Option<Box<dyn Socket>>,
    events: Option<UnboundedReceiver<SocketEvent>>,
    outbound: Option<BoxStream<'static, Message>>,
    bound: bool,
    capability_ready: bool,
    inbox: VecDeque<Message>,
    outcome: Option<Result<(), Error>>,
    availability_waker: Option<Waker>,
    message_waker: Option<Waker>,
}

impl Controller {
    /// Construct the handle and install its callbacks.
    pub(crate) fn start(url: &str, options: &ConnectOptions) -> Self {
        info!("Connecting to {}", url);
        let mut controller = Self {
            url: url.to_string(),
            state: LifecycleState::Connecting,
            forced_close: false,
            socket: None,
            events: None,
            outbound: None,
            bound: false,
            capability_ready: false,
            inbox: VecDeque::new(),
            outcome: None,
            availability_waker: None,
            message_waker: None,
        };

        match (options.make_socket)(url, options.protocols.as_slice()) {
            Ok(mut socket) => {
                let (tx, rx) = unbounded_channel();
                install_handlers(socket.as_mut(), tx);
                controller.socket = Some(socket);
                controller.events = Some(rx);
            }
            Err(e) => {
                warn!("Failed to construct connection to {}: {}", url, e);
                controller.finish(Err(e), false);
            }
        }

        controller
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn register_availability(&mut self, waker: &Waker) {
        self.availability_waker = Some(waker.clone());
    }

    pub(crate) fn register_messages(&mut self, waker: &Waker) {
        self.message_waker = Some(waker.clone());
    }

    pub(crate) fn wake_availability(&mut self) {
        wake(&mut self.availability_waker);
    }

    /// Hand out the send capability if open has been seen and it was not
    /// handed out yet.
    pub(crate) fn take_capability(&mut self) -> bool {
        std::mem::take(&mut self.capability_ready)
    }

    pub(crate) fn next_message(&mut self) -> Option<Message> {
        self.inbox.pop_front()
    }

    /// Terminal outcome, once the state is `Closed`.
    pub(crate) fn outcome(&self) -> Option<&Result<(), Error>> {
        self.outcome.as_ref()
    }

    /// Forward one batch of outbound items, then drain transport events
    /// until the channel would block or the connection is closed.
    pub(crate) fn pump(&mut self, cx: &mut Context<'_>) {
        if self.state == LifecycleState::Open {
            self.forward_outbound(cx);
        }

        while self.state != LifecycleState::Closed {
            let Some(events) = self.events.as_mut() else {
                break;
            };
            match events.poll_recv(cx) {
                Poll::Ready(Some(event)) => self.handle_event(event),
                Poll::Ready(None) => {
                    warn!("Connection handle for {} dropped its callbacks", self.url);
                    self.finish(Err(Error::NotConnected), false);
                }
                Poll::Pending => break,
            }
        }
    }

    fn forward_outbound(&mut self, cx: &mut Context<'_>) {
        let mut forwarded = 0;
        while let Some(outbound) = self.outbound.as_mut() {
            if forwarded == OUTBOUND_BUDGET {
                cx.waker().wake_by_ref();
                return;
            }
            match outbound.poll_next_unpin(cx) {
                Poll::Ready(Some(message)) => {
                    forwarded += 1;
                    let Some(socket) = self.socket.as_mut() else {
                        return;
                    };
                    debug!("Sending {} bytes to {}", message.len(), self.url);
                    if let Err(e) = socket.send(message) {
                        warn!("Send to {} failed: {}", self.url, e);
                        self.finish(Err(e), false);
                        return;
                    }
                }
                Poll::Ready(None) => {
                    debug!("Outbound stream for {} ended", self.url);
                    self.outbound = None;
                }
                Poll::Pending => return,
            }
        }
    }

    fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open => {
                if self.state != LifecycleState::Connecting {
                    debug!("Ignoring repeated open for {}", self.url);
                    return;
                }
                info!("Connection to {} open", self.url);
                self.state = LifecycleState::Open;
                self.capability_ready = true;
                wake(&mut self.availability_waker);
            }
            SocketEvent::Message(message) => {
                if self.state != LifecycleState::Open {
                    return;
                }
                debug!("Received {} bytes from {}", message.len(), self.url);
                self.inbox.push_back(message);
                wake(&mut self.message_waker);
            }
            SocketEvent::Error(event) => {
                warn!("Connection to {} failed: {}", self.url, event.message);
                self.finish(Err(Error::Transport(event.message)), false);
            }
            SocketEvent::Close(event) => {
                let outcome = classify_close(self.forced_close, &event);
                info!(
                    "Connection to {} closed, code {}, reason {:?}",
                    self.url, event.code, event.reason
                );
                self.finish(outcome, false);
            }
        }
    }

    /// Attach the consumer's outbound stream.
    pub(crate) fn bind(&mut self, outbound: BoxStream<'static, Message>) -> Result<(), Error> {
        if self.bound {
            warn!("Send capability for {} used twice", self.url);
            self.finish(Err(Error::AlreadyBound), true);
            return Err(Error::AlreadyBound);
        }
        self.bound = true;
        if self.state != LifecycleState::Closed {
            self.outbound = Some(outbound);
        }
        wake(&mut self.availability_waker);
        wake(&mut self.message_waker);
        Ok(())
    }

    /// Consumer-initiated teardown.
    pub(crate) fn cancel(&mut self) {
        if self.state == LifecycleState::Closed {
            return;
        }
        info!("Closing connection to {}", self.url);
        self.forced_close = true;
        self.inbox.clear();
        self.finish(Ok(()), true);
    }

    /// Enter `Closed` and release everything; runs once.
    fn finish(&mut self, outcome: Result<(), Error>, close_socket: bool) {
        if self.state == LifecycleState::Closed {
            return;
        }
        self.state = LifecycleState::Closed;
        self.outbound = None;
        self.events = None;

        if let Some(mut socket) = self.socket.take() {
            socket.set_onopen(None);
            socket.set_onmessage(None);
            socket.set_onerror(None);
            socket.set_onclose(None);
            if close_socket {
                socket.close();
            }
        }

        self.outcome = Some(outcome);
        wake(&mut self.availability_waker);
        wake(&mut self.message_waker);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn wake(slot: &mut Option<Waker>) {
    if let Some(waker) = slot.take() {
        waker.wake();
    }
}

fn install_handlers(socket: &mut dyn Socket, events: UnboundedSender<SocketEvent>) {
    let tx = events.clone();
    socket.set_onmessage(Some(Box::new(move |message| {
        let _ = tx.send(SocketEvent::Message(message));
    })));
    let tx = events.clone();
    socket.set_onerror(Some(Box::new(move |event| {
        let _ = tx.send(SocketEvent::Error(event));
    })));
    let tx = events.clone();
    socket.set_onclose(Some(Box::new(move |event| {
        let _ = tx.send(SocketEvent::Close(event));
    })));
    // Open goes last: a handle may start its handshake once it has an open callback.
    socket.set_onopen(Some(Box::new(move || {
        let _ = events.send(SocketEvent::Open);
    })));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRemote;
    use crate::transport::ABNORMAL_CLOSURE;
    use futures_util::stream;
    use futures_util::task::noop_waker_ref;

    fn start(remote: &FakeRemote) -> Controller {
        let options = ConnectOptions {
            make_socket: remote.factory(),
            ..Default::default()
        };
        Controller::start("ws://test", &options.with_protocols("chat"))
    }

    fn pump(controller: &mut Controller) {
        let mut cx = Context::from_waker(noop_waker_ref());
        controller.pump(&mut cx);
    }

    #[test]
    fn test_classify_forced_close_is_clean() {
        assert_eq!(classify_close(true, &CloseEvent::new(NORMAL_CLOSURE, "bye")), Ok(()));
        assert_eq!(classify_close(true, &CloseEvent::new(4000, "custom")), Ok(()));
    }

    #[test]
    fn test_classify_unrequested_close() {
        assert_eq!(
            classify_close(false, &CloseEvent::new(NORMAL_CLOSURE, "whatever")),
            Err(Error::NormalClosure)
        );
        let err = classify_close(false, &CloseEvent::new(9000, "Freakish closure")).unwrap_err();
        assert_eq!(err.to_string(), "Freakish closure");
        let err = classify_close(false, &CloseEvent::new(ABNORMAL_CLOSURE, "")).unwrap_err();
        assert_eq!(err.to_string(), "connection closed with code 1006");
    }

    #[test]
    fn test_classify_keeps_empty_reason() {
        let err = classify_close(false, &CloseEvent::new(ABNORMAL_CLOSURE, "")).unwrap_err();
        assert_eq!(
            err,
            Error::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            }
        );
    }

    #[test]
    fn test_start_records_address_and_protocols() {
        let remote = FakeRemote::new();
        let controller = start(&remote);
        assert_eq!(controller.state(), LifecycleState::Connecting);
        assert_eq!(remote.constructed(), 1);
        assert_eq!(remote.last_url().as_deref(), Some("ws://test"));
        assert_eq!(remote.last_protocols(), vec!["chat".to_string()]);
    }

    #[test]
    fn test_construction_failure_closes_immediately() {
        let remote = FakeRemote::failing("refused");
        let controller = start(&remote);
        assert_eq!(controller.state(), LifecycleState::Closed);
        assert_eq!(controller.outcome(), Some(&Err(Error::Connect("refused".into()))));
    }

    #[test]
    fn test_open_is_entered_once() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        remote.open();
        remote.open();
        pump(&mut controller);
        assert_eq!(controller.state(), LifecycleState::Open);
        assert!(controller.take_capability());
        assert!(!controller.take_capability());
    }

    #[test]
    fn test_events_after_close_are_ignored() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        remote.open();
        remote.error("boom");
        pump(&mut controller);
        remote.close(4001, "late");
        remote.message("late");
        pump(&mut controller);

        assert_eq!(controller.outcome(), Some(&Err(Error::Transport("boom".into()))));
        assert_eq!(controller.next_message(), None);
        assert_eq!(remote.close_calls(), 0);
    }

    #[test]
    fn test_close_while_connecting_is_an_error() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        remote.close(NORMAL_CLOSURE, "");
        pump(&mut controller);
        assert!(!controller.take_capability());
        assert_eq!(controller.outcome(), Some(&Err(Error::NormalClosure)));
    }

    #[test]
    fn test_cancel_before_open_closes_handle_once() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        controller.cancel();
        controller.cancel();
        drop(controller);
        assert_eq!(remote.close_calls(), 1);
    }

    #[test]
    fn test_outbound_forwarded_in_order() {
        let remote = FakeRemote::echoing();
        let mut controller = start(&remote);
        remote.open();
        pump(&mut controller);

        let outbound = stream::iter(["a", "b", "c"].map(Message::from)).boxed();
        controller.bind(outbound).unwrap();
        pump(&mut controller);

        assert_eq!(remote.sent(), ["a", "b", "c"].map(Message::from).to_vec());
        let echoed: Vec<_> = std::iter::from_fn(|| controller.next_message()).collect();
        assert_eq!(echoed, ["a", "b", "c"].map(Message::from).to_vec());
        assert_eq!(controller.state(), LifecycleState::Open);
    }

    #[test]
    fn test_ready_outbound_forwarded_in_batches() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        remote.open();
        pump(&mut controller);

        controller.bind(stream::repeat(Message::from("x")).boxed()).unwrap();
        pump(&mut controller);
        assert_eq!(remote.sent().len(), OUTBOUND_BUDGET);
        pump(&mut controller);
        assert_eq!(remote.sent().len(), 2 * OUTBOUND_BUDGET);

        remote.close(4000, "stop");
        pump(&mut controller);
        assert_eq!(controller.state(), LifecycleState::Closed);
        assert_eq!(remote.sent().len(), 3 * OUTBOUND_BUDGET);
    }

    #[test]
    fn test_second_bind_is_terminal() {
        let remote = FakeRemote::new();
        let mut controller = start(&remote);
        remote.open();
        pump(&mut controller);

        controller.bind(stream::empty().boxed()).unwrap();
        assert_eq!(controller.bind(stream::empty().boxed()), Err(Error::AlreadyBound));
        assert_eq!(controller.outcome(), Some(&Err(Error::AlreadyBound)));
        assert_eq!(remote.close_calls(), 1);
    }
}
