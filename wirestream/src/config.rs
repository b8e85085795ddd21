//! Connection options

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::transport::{websocket, Socket, SocketFactory};

/// Sub-protocols requested during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protocols(Vec<String>);

impl Protocols {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Protocols {
    fn from(protocol: &str) -> Self {
        Self(vec![protocol.to_string()])
    }
}

impl From<String> for Protocols {
    fn from(protocol: String) -> Self {
        Self(vec![protocol])
    }
}

impl From<Vec<String>> for Protocols {
    fn from(protocols: Vec<String>) -> Self {
        Self(protocols)
    }
}

impl From<Vec<&str>> for Protocols {
    fn from(protocols: Vec<&str>) -> Self {
        Self(protocols.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Protocols {
    fn from(protocols: [&str; N]) -> Self {
        Self(protocols.iter().map(|p| p.to_string()).collect())
    }
}

/// Options for [`crate::connect`]
#[derive(Clone)]
pub struct ConnectOptions {
    /// Sub-protocols to request
    pub protocols: Protocols,
    /// Builds the connection handle; defaults to the native WebSocket client
    pub make_socket: SocketFactory,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            protocols: Protocols::default(),
            make_socket: websocket::factory(),
        }
    }
}

impl ConnectOptions {
    pub fn with_protocols(mut self, protocols: impl Into<Protocols>) -> Self {
        self.protocols = protocols.into();
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str, &[String]) -> Result<Box<dyn Socket>> + Send + Sync + 'static,
    {
        self.make_socket = Arc::new(factory);
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("protocols", &self.protocols)
            .finish_non_exhaustive()
    }
}
