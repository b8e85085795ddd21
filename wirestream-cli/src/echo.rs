//! WebSocket echo server

use std::io;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info};

const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// Echoes every text and binary frame back to its sender
pub struct EchoServer {
    listener: TcpListener,
}

impl EchoServer {
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<String> {
        Ok(self.listener.local_addr()?.to_string())
    }

    /// Accept connections until the listener fails
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            stream.set_nodelay(true)?;
            info!("WebSocket connection from {}", peer);

            tokio::spawn(async move {
                match serve(stream).await {
                    Ok(()) => info!("{} disconnected", peer),
                    Err(e) => error!("{} failed: {}", peer, e),
                }
            });
        }
    }
}

async fn serve(stream: TcpStream) -> Result<(), tungstenite::Error> {
    let mut ws = accept_hdr_async(stream, negotiate).await?;

    while let Some(frame) = ws.next().await {
        let frame = frame?;
        if frame.is_text() || frame.is_binary() {
            debug!("Echoing {} bytes", frame.len());
            ws.send(frame).await?;
        }
    }

    Ok(())
}

/// Accept the first sub-protocol the client asks for.
fn negotiate(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let first = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|p| !p.is_empty()))
        .and_then(|protocol| HeaderValue::from_str(protocol).ok());

    if let Some(protocol) = first {
        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as Frame;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use wirestream::{ConnectOptions, Message};

    async fn start() -> String {
        let server = EchoServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_echo_bind() {
        let server = EchoServer::bind("127.0.0.1:0").await.unwrap();
        assert!(server.local_addr().unwrap().starts_with("127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_echo_frames() {
        let url = start().await;
        let (mut ws, _) = connect_async(&url).await.unwrap();

        ws.send(Frame::Text("ping".into())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply.to_text().unwrap(), "ping");

        ws.send(Frame::Binary(vec![7u8, 8].into())).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply.into_data().to_vec(), vec![7u8, 8]);
    }

    #[tokio::test]
    async fn test_echo_negotiates_first_protocol() {
        let url = start().await;
        let mut request = url.into_client_request().unwrap();
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static("chat, superchat"),
        );

        let (_ws, response) = connect_async(request).await.unwrap();
        let selected = response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap();
        assert_eq!(selected, "chat");
    }

    #[tokio::test]
    async fn test_adapter_against_echo_server() {
        let url = start().await;
        let options = ConnectOptions::default().with_protocols("chat");
        let mut connections = wirestream::connect(url, options);

        let capability = connections.next().await.unwrap().unwrap();
        let outbound = futures::stream::iter(["one", "two"]);
        let mut messages = capability.bind(outbound).unwrap();

        assert_eq!(messages.next().await, Some(Ok(Message::from("one"))));
        assert_eq!(messages.next().await, Some(Ok(Message::from("two"))));

        drop(connections);
        assert_eq!(messages.next().await, None);
    }
}
