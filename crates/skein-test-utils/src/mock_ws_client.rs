// mock_ws_client: a raw frame-level subscriber for exercising the fan-out
// server without the real client's reconnect/dedup machinery in the way.
//
// Tests drive the protocol step by step: send hello, read server-hello,
// subscribe, assert on each frame.

use futures_util::{SinkExt, StreamExt};
use skein_protocol::{decode_server, encode, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Connect and complete the hello handshake in one step.
    pub async fn connect_and_handshake(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut client = Self::connect(url).await?;
        client
            .send_message(&ClientMessage::Hello {
                version: PROTOCOL_VERSION,
            })
            .await?;
        match client.recv_message().await? {
            ServerMessage::ServerHello { .. } => Ok(client),
            other => Err(format!("expected server-hello, got {other:?}").into()),
        }
    }

    pub async fn send_message(
        &mut self,
        msg: &ClientMessage,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(encode(msg).into())).await?;
        Ok(())
    }

    /// Next protocol frame; protocol pings are answered transparently.
    pub async fn recv_message(&mut self) -> Result<ServerMessage, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg = decode_server(&text)
                        .ok_or_else(|| format!("undecodable server frame: {text}"))?;
                    if let ServerMessage::Ping {} = msg {
                        self.send_message(&ClientMessage::Pong {}).await?;
                        continue;
                    }
                    return Ok(msg);
                }
                Some(Ok(Message::Ping(data))) => {
                    self.write.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Read `event` frames until the stream's `replay-end`, returning the
    /// seqs seen and the promotion watermark.
    pub async fn drain_replay(
        &mut self,
        stream_id: &str,
    ) -> Result<(Vec<u64>, u64), Box<dyn std::error::Error>> {
        let mut seqs = Vec::new();
        loop {
            match self.recv_message().await? {
                ServerMessage::Event { stream_id: sid, event } if sid == stream_id => {
                    seqs.push(event.seq);
                }
                ServerMessage::ReplayEnd { stream_id: sid, last_replay_seq } if sid == stream_id => {
                    return Ok((seqs, last_replay_seq));
                }
                other => return Err(format!("unexpected frame during replay: {other:?}").into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
