//! Packet channel over a single transport.
//!
//! The wire format has no delimiter other than the length prefix, so frames
//! from two concurrent sends must never interleave and two reads must never
//! race for the same bytes. `PacketChannel` splits the transport and guards
//! each half with its own lock: one writer, one reader, independent of each
//! other.

use crate::codec::Received;
use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::processor::{PacketProcessor, PacketSent};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, watch, Mutex};

/// Default capacity for the packet-sent event channel.
const SENT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// A transport carrying framed packets.
pub struct PacketChannel<S> {
    processor: Arc<PacketProcessor>,
    /// Write half; `None` once the channel is closed.
    writer: Mutex<Option<WriteHalf<S>>>,
    reader: Mutex<ReadHalf<S>>,
    /// Broadcast channel for packet-sent notifications.
    sent_events: broadcast::Sender<PacketSent>,
    closed: watch::Sender<bool>,
}

impl<S> PacketChannel<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, processor: Arc<PacketProcessor>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (sent_events, _) = broadcast::channel(SENT_EVENT_CHANNEL_CAPACITY);
        let (closed, _) = watch::channel(false);

        Self {
            processor,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(reader),
            sent_events,
            closed,
        }
    }

    pub fn processor(&self) -> &PacketProcessor {
        &self.processor
    }

    /// Subscribes to notifications for every frame this channel writes.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<PacketSent> {
        self.sent_events.subscribe()
    }

    /// Sends one packet. Concurrent callers are serialized frame by frame.
    pub async fn send(&self, packet: &dyn Packet) -> Result<PacketSent, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let mut closed = self.closed.subscribe();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;

        // Close wins over a write that is ready in the same poll
        let sent = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => return Err(ProtocolError::ConnectionClosed),
            result = self.processor.send(packet, writer) => result?,
        };
        drop(guard);

        // No subscribers is fine
        let _ = self.sent_events.send(sent);
        Ok(sent)
    }

    /// Receives one packet. Concurrent callers are served one frame each, in
    /// arrival order of the lock.
    pub async fn receive(&self) -> Result<Received, ProtocolError> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;

        // A frame already buffered must not be delivered after close
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(ProtocolError::ConnectionClosed),
            result = self.processor.receive(&mut *reader) => result,
        }
    }

    /// Closes the channel.
    ///
    /// Pending and future sends and receives fail with
    /// [`ProtocolError::ConnectionClosed`]. The write half is shut down so the
    /// peer observes end of stream.
    pub async fn close(&self) -> Result<(), ProtocolError> {
        self.closed.send_replace(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("shutting down packet channel writer");
            writer.shutdown().await?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
