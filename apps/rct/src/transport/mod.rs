use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::{Message, WireError, decode_message, encode_message};

/// Upper bound on one frame's payload; decode never allocates past it.
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),
}

/// Cheap cloneable handle for writing frames to the peer.
#[derive(Clone)]
pub struct MessageSender {
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
    peer: SocketAddr,
}

impl MessageSender {
    /// Writes one complete frame atomically. A failure marks the socket
    /// closed so later sends fail fast.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let payload = encode_message(message);
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut writer = self.writer.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Err(error) = writer.write_all(&frame).await {
            self.closed.store(true, Ordering::SeqCst);
            return Err(error.into());
        }
        Ok(())
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Best-effort shutdown; idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Full-duplex message transport over one TCP connection. The write side is
/// available immediately through cloneable [`MessageSender`] handles; the
/// read side is claimed once by [`spawn_receiver`](Self::spawn_receiver).
pub struct MessageSocket {
    sender: MessageSender,
    reader: Mutex<Option<OwnedReadHalf>>,
}

impl MessageSocket {
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();
        Self {
            sender: MessageSender {
                writer: Arc::new(tokio::sync::Mutex::new(write_half)),
                closed: Arc::new(AtomicBool::new(false)),
                peer,
            },
            reader: Mutex::new(Some(read_half)),
        }
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        self.sender.send(message).await
    }

    pub async fn close(&self) {
        self.sender.close().await;
    }

    /// Starts the dedicated receive loop: reads frames, decodes, and invokes
    /// `on_message` per message until the socket closes. A decode failure or
    /// I/O error is reported once through `on_error`, after which the socket
    /// is closed from the receive task and the loop exits.
    pub fn spawn_receiver<M, E>(&self, on_message: M, on_error: E) -> JoinHandle<()>
    where
        M: Fn(Message) + Send + 'static,
        E: FnOnce(TransportError) + Send + 'static,
    {
        let mut reader = self
            .reader
            .lock()
            .take()
            .expect("receive loop already started");
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let error = loop {
                match read_frame(&mut reader).await {
                    Ok(payload) => match decode_message(&payload) {
                        Ok(message) => on_message(message),
                        Err(error) => break TransportError::Wire(error),
                    },
                    Err(error) => break error,
                }
            };
            debug!(peer = %sender.peer(), %error, "receive loop ended");
            sender.close().await;
            on_error(error);
        })
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>, TransportError> {
    let mut len_bytes = [0u8; 4];
    if let Err(error) = reader.read_exact(&mut len_bytes).await {
        return Err(if error.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            error.into()
        });
    }
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn socket_pair() -> (MessageSocket, MessageSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { MessageSocket::connect(addr).await.unwrap() });
        let (server_stream, _) = listener.accept().await.unwrap();
        let server = MessageSocket::from_stream(server_stream);
        (client.await.unwrap(), server)
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let (client, server) = socket_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.spawn_receiver(
            move |message| {
                let _ = tx.send(message);
            },
            |_| {},
        );

        client.send(&Message::ConnectionCheck).await.unwrap();
        client
            .send(&Message::StartCommand {
                process_id: 2,
                command_line: "ping".to_string(),
            })
            .await
            .unwrap();
        client.send(&Message::KeepaliveLocal).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Message::ConnectionCheck);
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::StartCommand {
                process_id: 2,
                command_line: "ping".to_string(),
            }
        );
        assert_eq!(rx.recv().await.unwrap(), Message::KeepaliveLocal);
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_transport_error() {
        let (client, server) = socket_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.spawn_receiver(
            |_| {},
            move |error| {
                let _ = tx.send(error);
            },
        );
        client.close().await;
        assert!(matches!(rx.recv().await.unwrap(), TransportError::Closed));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (client, _server) = socket_pair().await;
        client.close().await;
        assert!(matches!(
            client.send(&Message::ConnectionCheck).await,
            Err(TransportError::Closed)
        ));
    }
}
