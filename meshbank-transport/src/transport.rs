//! Framed message transport over a participant's channel table.
//!
//! Every operation is async and driven by the runtime's readiness events
//! instead of sleep-and-retry loops:
//!
//! - `send` writes the whole frame, waiting for write readiness as needed
//! - `receive` reads one complete frame from a known peer
//! - `receive_any` waits for the first readable peer, then reads the rest of
//!   that peer's frame
//!
//! # Fairness
//!
//! `receive_any` scans peers in ascending id order, starting right after the
//! peer that delivered the previous message. Each scan visits every open peer
//! once, so a peer that always has data cannot starve the others.
//!
//! # Runtime
//!
//! [`Transport::new`] registers descriptors with the current tokio runtime.
//! In a forked participant, build the runtime after `fork`, then the
//! transport inside it.

use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};

use meshbank_core::ParticipantId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;

use crate::error::{TransportError, TransportResult};
use crate::fabric::ChannelTable;
use crate::message::Message;
use crate::wire::{FrameHeader, HEADER_SIZE, decode_body, serialize_message};

/// Both directions of the channel to one peer.
struct PeerLink {
    id: ParticipantId,
    reader: pipe::Receiver,
    writer: pipe::Sender,
    /// Peer closed its write end at a frame boundary.
    read_closed: bool,
}

/// A participant's view of the mesh.
pub struct Transport {
    local: ParticipantId,
    links: Vec<Option<PeerLink>>,
    /// Index where the next `receive_any` scan starts.
    cursor: usize,
}

impl Transport {
    /// Wrap a channel table. Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Io` if a descriptor cannot be registered with the runtime.
    pub fn new(mut table: ChannelTable) -> TransportResult<Self> {
        let local = table.owner();
        let peers: Vec<ParticipantId> = table.peers().collect();
        let mut links: Vec<Option<PeerLink>> =
            (0..table.participant_count()).map(|_| None).collect();

        for peer in peers {
            let Some(channel) = table.take(peer) else {
                continue;
            };
            let (read_fd, write_fd) = channel.into_parts();
            let io_error = |source| TransportError::Io { peer, source };
            let reader = pipe::Receiver::from_owned_fd(read_fd).map_err(io_error)?;
            let writer = pipe::Sender::from_owned_fd(write_fd).map_err(io_error)?;
            links[peer.index()] = Some(PeerLink {
                id: peer,
                reader,
                writer,
                read_closed: false,
            });
        }

        tracing::debug!(
            local = %local,
            peers = links.iter().flatten().count(),
            "transport ready"
        );

        Ok(Self {
            local,
            links,
            cursor: 0,
        })
    }

    /// Id of the local participant.
    pub fn local_id(&self) -> ParticipantId {
        self.local
    }

    /// Number of participants in the run, local included.
    pub fn participant_count(&self) -> usize {
        self.links.len()
    }

    /// Peer ids, ascending.
    pub fn peers(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.links.iter().flatten().map(|link| link.id)
    }

    fn link_mut(&mut self, peer: ParticipantId) -> TransportResult<&mut PeerLink> {
        if peer == self.local {
            return Err(TransportError::SelfAddressed(peer));
        }
        self.links
            .get_mut(peer.index())
            .and_then(Option::as_mut)
            .ok_or(TransportError::UnknownPeer(peer))
    }

    /// Send one message to `dst`.
    ///
    /// # Errors
    ///
    /// - `SelfAddressed` / `UnknownPeer`: precondition violations, nothing is written
    /// - `Wire`: message too large to frame
    /// - `Io`: the pipe is broken
    pub async fn send(&mut self, dst: ParticipantId, msg: &Message) -> TransportResult<()> {
        let frame =
            serialize_message(msg).map_err(|source| TransportError::Wire { peer: dst, source })?;
        self.write_frame(dst, &frame).await?;
        tracing::debug!(
            local = %self.local,
            dst = %dst,
            kind = %msg.kind(),
            time = msg.logical_time,
            bytes = frame.len(),
            "sent message"
        );
        Ok(())
    }

    /// Send `msg` to every peer in ascending id order.
    ///
    /// Stops at the first failure. Peers earlier in the order have already
    /// received the message; nothing is rolled back.
    ///
    /// # Errors
    ///
    /// The first error returned by a single-peer send.
    pub async fn send_multicast(&mut self, msg: &Message) -> TransportResult<()> {
        let frame = serialize_message(msg).map_err(|source| TransportError::Wire {
            peer: self.local,
            source,
        })?;
        let peers: Vec<ParticipantId> = self.peers().collect();
        for peer in peers {
            self.write_frame(peer, &frame).await?;
        }
        tracing::debug!(
            local = %self.local,
            kind = %msg.kind(),
            time = msg.logical_time,
            "multicast message"
        );
        Ok(())
    }

    async fn write_frame(&mut self, dst: ParticipantId, frame: &[u8]) -> TransportResult<()> {
        let link = self.link_mut(dst)?;
        link.writer
            .write_all(frame)
            .await
            .map_err(|source| TransportError::Io { peer: dst, source })
    }

    /// Receive the next message from `from`, waiting until it is complete.
    ///
    /// # Errors
    ///
    /// - `SelfAddressed` / `UnknownPeer`: precondition violations
    /// - `Wire`: bad magic or malformed frame (fatal, stream desynchronized)
    /// - `PeerClosed`: peer closed its end
    /// - `Io`: the pipe is broken
    pub async fn receive(&mut self, from: ParticipantId) -> TransportResult<Message> {
        let link = self.link_mut(from)?;
        let mut header = [0u8; HEADER_SIZE];
        let msg = finish_frame(link, &mut header, 0).await?;
        tracing::debug!(
            local = %self.local,
            from = %from,
            kind = %msg.kind(),
            time = msg.logical_time,
            "received message"
        );
        Ok(msg)
    }

    /// Receive the next message from whichever peer is ready first.
    ///
    /// Peers that closed their end at a frame boundary are skipped from then
    /// on.
    ///
    /// # Errors
    ///
    /// - `AllPeersClosed`: no peer can ever send again
    /// - `Wire`: bad magic or malformed frame (fatal, stream desynchronized)
    /// - `PeerClosed` / `Io`: the winning peer's pipe failed mid-frame
    pub async fn receive_any(&mut self) -> TransportResult<(ParticipantId, Message)> {
        let mut header = [0u8; HEADER_SIZE];
        let (from, filled) = poll_fn(|cx| self.poll_first_bytes(cx, &mut header)).await?;
        let link = self.link_mut(from)?;
        let msg = finish_frame(link, &mut header, filled).await?;
        tracing::debug!(
            local = %self.local,
            from = %from,
            kind = %msg.kind(),
            time = msg.logical_time,
            "received message from any"
        );
        Ok((from, msg))
    }

    /// One scan over the open peers, starting at the cursor.
    ///
    /// Returns the first peer that yields header bytes and how many it
    /// yielded. Every pending peer registers the task's waker before the scan
    /// returns `Pending`.
    fn poll_first_bytes(
        &mut self,
        cx: &mut Context<'_>,
        header: &mut [u8; HEADER_SIZE],
    ) -> Poll<TransportResult<(ParticipantId, usize)>> {
        let count = self.links.len();
        let mut open = 0usize;

        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let Some(link) = self.links[index].as_mut() else {
                continue;
            };
            if link.read_closed {
                continue;
            }
            let peer = link.id;
            open += 1;

            loop {
                match link.reader.poll_read_ready(cx) {
                    Poll::Pending => break,
                    Poll::Ready(Err(source)) => {
                        return Poll::Ready(Err(TransportError::Io { peer, source }));
                    }
                    Poll::Ready(Ok(())) => match link.reader.try_read(&mut header[..]) {
                        Ok(0) => {
                            tracing::debug!(local = %self.local, peer = %peer, "peer closed channel");
                            link.read_closed = true;
                            open -= 1;
                            break;
                        }
                        Ok(n) => {
                            self.cursor = (index + 1) % count;
                            return Poll::Ready(Ok((peer, n)));
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::Interrupted =>
                        {
                            continue;
                        }
                        Err(source) => {
                            return Poll::Ready(Err(TransportError::Io { peer, source }));
                        }
                    },
                }
            }
        }

        if open == 0 {
            Poll::Ready(Err(TransportError::AllPeersClosed))
        } else {
            Poll::Pending
        }
    }
}

/// Complete a frame whose first `filled` header bytes are already in `header`.
///
/// The magic is validated before any payload byte is read.
async fn finish_frame(
    link: &mut PeerLink,
    header: &mut [u8; HEADER_SIZE],
    filled: usize,
) -> TransportResult<Message> {
    let peer = link.id;
    let wire_error = |source| TransportError::Wire { peer, source };

    read_exact(link, &mut header[filled..]).await?;
    let parsed = FrameHeader::deserialize(&header[..]).map_err(wire_error)?;
    let kind = parsed.validate().map_err(wire_error)?;

    let mut payload = vec![0u8; parsed.payload_len as usize];
    read_exact(link, &mut payload).await?;
    let body = decode_body(kind, &payload).map_err(wire_error)?;

    Ok(Message::new(parsed.logical_time, body))
}

async fn read_exact(link: &mut PeerLink, buf: &mut [u8]) -> TransportResult<()> {
    if buf.is_empty() {
        return Ok(());
    }
    match link.reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            link.read_closed = true;
            Err(TransportError::PeerClosed(link.id))
        }
        Err(source) => Err(TransportError::Io {
            peer: link.id,
            source,
        }),
    }
}
