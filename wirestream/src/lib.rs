//! wirestream
//!
//! Turns a callback-driven full-duplex socket into two streams: an
//! availability stream that yields a one-shot [`SendCapability`] when the
//! connection opens, and the [`Messages`] stream of inbound payloads for that
//! open period.
//!
//! ```no_run
//! use futures_util::{stream, StreamExt};
//! use wirestream::{connect, ConnectOptions, Message};
//!
//! # async fn run() -> wirestream::Result<()> {
//! let mut connections = connect("ws://127.0.0.1:9001", ConnectOptions::default());
//! if let Some(capability) = connections.next().await {
//!     let mut messages = capability?.bind(stream::iter(["hello"]))?;
//!     while let Some(message) = messages.next().await {
//!         if let Message::Text(text) = message? {
//!             println!("{}", text);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod stream;
pub mod testing;
pub mod transport;

pub use config::{ConnectOptions, Protocols};
pub use error::{Error, Result};
pub use lifecycle::{classify_close, LifecycleState};
pub use stream::{connect, Connections, Messages, SendCapability};
pub use transport::{CloseEvent, ErrorEvent, Message, Socket, SocketFactory, NORMAL_CLOSURE};
