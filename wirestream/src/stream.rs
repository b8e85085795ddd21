//! Stream bridge
//!
//! [`Connections`] is the availability stream: polling it the first time
//! opens the connection, it yields one [`SendCapability`] once the handle is
//! open, and dropping it closes the connection. [`SendCapability::bind`]
//! attaches the outbound stream and returns the [`Messages`] stream.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::lifecycle::{Controller, LifecycleState};
use crate::transport::Message;

#[derive(Clone)]
struct Shared(Arc<Mutex<Controller>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Controller> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open a lazily-connected stream over `url`.
///
/// Nothing happens until the returned stream is first polled. Each call is an
/// independent connection attempt; reconnecting means calling `connect`
/// again.
pub fn connect(url: impl Into<String>, options: ConnectOptions) -> Connections {
    Connections {
        url: url.into(),
        options,
        shared: None,
        done: false,
    }
}

/// Availability stream of a single connection.
///
/// Yields at most one [`SendCapability`]. Ends with `None` after a clean
/// close, or with one `Err` followed by `None` after an abnormal one.
pub struct Connections {
    url: String,
    options: ConnectOptions,
    shared: Option<Shared>,
    done: bool,
}

impl Connections {
    /// Lifecycle state, or `None` before the first poll.
    pub fn state(&self) -> Option<LifecycleState> {
        self.shared.as_ref().map(|shared| shared.lock().state())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Stream for Connections {
    type Item = Result<SendCapability>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let this = &mut *self;
        let shared = match &this.shared {
            Some(shared) => shared.clone(),
            None => {
                let controller = Controller::start(&this.url, &this.options);
                let shared = Shared(Arc::new(Mutex::new(controller)));
                this.shared = Some(shared.clone());
                shared
            }
        };

        let mut controller = shared.lock();
        controller.register_availability(cx.waker());
        controller.pump(cx);

        if controller.take_capability() {
            drop(controller);
            return Poll::Ready(Some(Ok(SendCapability { shared })));
        }

        let outcome = controller.outcome().cloned();
        drop(controller);
        match outcome {
            Some(Ok(())) => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Connections {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.lock().cancel();
        }
    }
}

impl fmt::Debug for Connections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connections")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("done", &self.done)
            .finish()
    }
}

/// Permission to send on an open connection.
///
/// Clones refer to the same connection; only the first [`bind`] across all
/// of them succeeds.
///
/// [`bind`]: SendCapability::bind
#[derive(Clone)]
pub struct SendCapability {
    shared: Shared,
}

impl SendCapability {
    /// Forward every item of `outbound` to the connection and return the
    /// inbound message stream.
    ///
    /// A second call on the same connection fails with
    /// [`Error::AlreadyBound`] and terminates the connection with that error.
    pub fn bind<S>(&self, outbound: S) -> Result<Messages>
    where
        S: Stream + Send + 'static,
        S::Item: Into<Message>,
    {
        self.shared.lock().bind(outbound.map(Into::into).boxed())?;
        Ok(Messages {
            shared: self.shared.clone(),
            done: false,
        })
    }
}

impl fmt::Debug for SendCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendCapability").finish_non_exhaustive()
    }
}

/// Inbound messages of one open connection.
///
/// Terminates together with the availability stream and with the same
/// outcome.
pub struct Messages {
    shared: Shared,
    done: bool,
}

impl Stream for Messages {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let mut controller = self.shared.lock();
        controller.register_messages(cx.waker());
        controller.pump(cx);

        if let Some(message) = controller.next_message() {
            return Poll::Ready(Some(Ok(message)));
        }

        let outcome = controller.outcome().cloned();
        drop(controller);
        match outcome {
            Some(Ok(())) => {
                self.done = true;
                Poll::Ready(None)
            }
            Some(Err(e)) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Messages {
    fn drop(&mut self) {
        // The availability stream may now be the only poller left.
        self.shared.lock().wake_availability();
    }
}

impl fmt::Debug for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messages").field("done", &self.done).finish()
    }
}
