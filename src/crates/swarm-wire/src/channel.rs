//! Framed message transport over a bidirectional byte stream.
//!
//! One frame is an 8-byte little-endian length followed by a byte area
//! holding a type-coded message. A [`Channel`] wraps any async stream
//! (Unix socket pair, TCP connection, in-memory duplex) together with the
//! registry used to decode inbound frames. Reads and writes are the only
//! suspension points of the coordination core.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::buffer::Buffer;
use crate::error::{Result, WireError};
use crate::message::{write_message, Message, MessageRegistry};

/// Upper bound on a single frame; messages are meant to be small.
pub const MAX_FRAME_LEN: u64 = 1 << 26;

/// A point-to-point message channel over a framed byte stream.
pub struct Channel<S> {
    stream: S,
    registry: Arc<MessageRegistry>,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel<S> {
    /// Wraps `stream`; `registry` decodes inbound messages.
    pub fn new(stream: S, registry: Arc<MessageRegistry>) -> Self {
        Channel {
            stream,
            registry,
            closed: false,
        }
    }

    /// The registry this channel decodes with.
    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Reads one framed message. `Ok(None)` is an explicit null message;
    /// a peer that went away surfaces as an I/O error classified by
    /// [`WireError::is_disconnect`].
    pub async fn read(&mut self) -> Result<Option<Box<dyn Message>>> {
        if self.closed {
            return Err(WireError::ChannelClosed);
        }
        let len = self.stream.read_u64_le().await?;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(len));
        }
        let mut body = vec![0u8; len as usize];
        self.stream.read_exact(&mut body).await?;
        trace!(frame_len = len, "read frame");

        let mut buffer = Buffer::from_vec(body);
        self.registry.read_message(&mut buffer)
    }

    /// Writes one framed message; `None` sends an explicit null message.
    pub async fn write(&mut self, message: Option<&dyn Message>) -> Result<()> {
        if self.closed {
            return Err(WireError::ChannelClosed);
        }
        let mut buffer = Buffer::new();
        write_message(&mut buffer, message)?;
        self.stream.write_u64_le(buffer.size() as u64).await?;
        self.stream.write_all(buffer.bytes()).await?;
        self.stream.flush().await?;
        trace!(frame_len = buffer.size(), "wrote frame");
        Ok(())
    }

    /// Shuts the stream down; later reads and writes fail with
    /// [`WireError::ChannelClosed`]. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown().await;
        }
    }

    /// True once [`Channel::close`] has run.
    pub fn closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageData;
    use std::any::Any;

    #[derive(Default)]
    struct Ping {
        seq: u32,
    }

    impl MessageData for Ping {
        const NAME: &'static str = "ping";

        fn write_data(&self, out: &mut Buffer) {
            out.write_u32(self.seq);
        }

        fn read_data(&mut self, input: &mut Buffer, _registry: &MessageRegistry) -> Result<()> {
            self.seq = input.read_u32()?;
            Ok(())
        }
    }

    fn registry() -> Arc<MessageRegistry> {
        let mut r = MessageRegistry::new();
        r.register::<Ping>().unwrap();
        Arc::new(r)
    }

    #[tokio::test]
    async fn frames_round_trip() {
        let registry = registry();
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = Channel::new(a, registry.clone());
        let mut rx = Channel::new(b, registry);

        tx.write(Some(&Ping { seq: 7 })).await.unwrap();
        tx.write(None).await.unwrap();

        let first = rx.read().await.unwrap().unwrap();
        let ping: &Ping = (first.as_ref() as &dyn Any).downcast_ref().unwrap();
        assert_eq!(ping.seq, 7);
        assert!(rx.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_close_reads_as_disconnect() {
        let registry = registry();
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = Channel::new(a, registry.clone());
        let mut rx = Channel::new(b, registry);

        tx.close().await;
        let err = rx.read().await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn closed_channel_rejects_io() {
        let registry = registry();
        let (a, _b) = tokio::io::duplex(1024);
        let mut chan = Channel::new(a, registry);
        chan.close().await;
        assert!(chan.closed());
        assert!(matches!(
            chan.write(None).await,
            Err(WireError::ChannelClosed)
        ));
        assert!(matches!(chan.read().await, Err(WireError::ChannelClosed)));
    }
}
