//! Transport seam for the gateway.
//!
//! A [`GatewayConnector`] opens one duplex connection and hands back its
//! two halves. [`TungsteniteConnector`] is the production implementation.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::GatewayResult;

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// The peer closed the connection, with its close code if it sent one.
    Close(Option<u16>),
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> GatewayResult<()>;

    /// Send a close frame with `code`.
    async fn close(&mut self, code: u16) -> GatewayResult<()>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the connection is gone.
    async fn next_frame(&mut self) -> Option<GatewayResult<Frame>>;
}

/// The two halves of an open connection.
pub type Connection = (Box<dyn FrameSink>, Box<dyn FrameStream>);

/// Opens gateway connections.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> GatewayResult<Connection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`GatewayConnector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl GatewayConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> GatewayResult<Connection> {
        let (ws, _response) = connect_async(url).await?;
        let (writer, reader) = ws.split();
        Ok((
            Box::new(WsSink { writer }),
            Box::new(WsReader { reader }),
        ))
    }
}

struct WsSink {
    writer: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> GatewayResult<()> {
        self.writer.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16) -> GatewayResult<()> {
        let frame = CloseFrame {
            code: code.into(),
            reason: "closing".into(),
        };
        self.writer.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}

struct WsReader {
    reader: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    async fn next_frame(&mut self) -> Option<GatewayResult<Frame>> {
        loop {
            match self.reader.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Close(frame)) => {
                    return Some(Ok(Frame::Close(frame.map(|f| u16::from(f.code)))));
                },
                // Ping/pong handled by tungstenite; binary (ETF) is not spoken.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {},
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
