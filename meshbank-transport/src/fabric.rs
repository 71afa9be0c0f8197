//! Full-mesh pipe fabric.
//!
//! [`ChannelFabric::build`] creates one pipe per direction for every pair of
//! participants. Each participant then keeps exactly its own row with
//! [`ChannelFabric::into_table`]; dropping the fabric closes every descriptor
//! the participant is not an endpoint of, so peers observe end-of-stream when
//! the real owner exits.
//!
//! ```text
//!            pipe i->j
//!   i.writer ---------> j.reader
//!   i.reader <--------- j.writer
//!            pipe j->i
//! ```

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use meshbank_core::{MAX_PARTICIPANTS, ParticipantId};

use crate::error::FabricError;

/// One logical duplex channel to a peer, made of two OS pipes.
#[derive(Debug)]
pub struct Channel {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl Channel {
    /// Read end of the pipe the peer writes into.
    pub fn reader(&self) -> &OwnedFd {
        &self.reader
    }

    /// Write end of the pipe the peer reads from.
    pub fn writer(&self) -> &OwnedFd {
        &self.writer
    }

    /// Split into `(reader, writer)`.
    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.reader, self.writer)
    }
}

/// Descriptor numbers of one participant's channel, for the pipes log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Participant holding the descriptors.
    pub owner: ParticipantId,
    /// Participant at the other end.
    pub peer: ParticipantId,
    /// Read descriptor.
    pub read_fd: RawFd,
    /// Write descriptor.
    pub write_fd: RawFd,
}

/// The channels owned by one participant, indexed by peer id.
#[derive(Debug)]
pub struct ChannelTable {
    owner: ParticipantId,
    channels: Vec<Option<Channel>>,
}

impl ChannelTable {
    /// Participant owning this table.
    pub fn owner(&self) -> ParticipantId {
        self.owner
    }

    /// Number of participants in the run, owner included.
    pub fn participant_count(&self) -> usize {
        self.channels.len()
    }

    /// Peers with a channel still present in the table, ascending.
    pub fn peers(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.is_some())
            .filter_map(|(index, _)| ParticipantId::from_index(index))
    }

    /// Remove and return the channel to `peer`.
    pub fn take(&mut self, peer: ParticipantId) -> Option<Channel> {
        self.channels.get_mut(peer.index()).and_then(Option::take)
    }

    /// Descriptor numbers of every channel in the table.
    pub fn descriptors(&self) -> Vec<ChannelDescriptor> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(index, channel)| {
                let channel = channel.as_ref()?;
                Some(ChannelDescriptor {
                    owner: self.owner,
                    peer: ParticipantId::from_index(index)?,
                    read_fd: channel.reader.as_raw_fd(),
                    write_fd: channel.writer.as_raw_fd(),
                })
            })
            .collect()
    }
}

/// Every participant's channel table for one run.
#[derive(Debug)]
pub struct ChannelFabric {
    tables: Vec<ChannelTable>,
}

impl ChannelFabric {
    /// Create the full mesh for `participant_count` participants.
    ///
    /// Every descriptor is non-blocking and close-on-exec. If any allocation
    /// fails, every descriptor created so far is closed before returning.
    ///
    /// # Errors
    ///
    /// - `TooFewParticipants` / `TooManyParticipants`: count outside `2..=MAX_PARTICIPANTS`
    /// - `Allocation`: `pipe(2)` or `fcntl(2)` failed
    pub fn build(participant_count: usize) -> Result<Self, FabricError> {
        if participant_count < 2 {
            return Err(FabricError::TooFewParticipants {
                count: participant_count,
            });
        }
        if participant_count > MAX_PARTICIPANTS {
            return Err(FabricError::TooManyParticipants {
                count: participant_count,
            });
        }

        let ids: Vec<ParticipantId> = (0..participant_count)
            .filter_map(ParticipantId::from_index)
            .collect();

        let mut tables: Vec<ChannelTable> = ids
            .iter()
            .map(|&owner| ChannelTable {
                owner,
                channels: (0..participant_count).map(|_| None).collect(),
            })
            .collect();

        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                let allocation = |source| FabricError::Allocation { a, b, source };
                let (a_to_b_read, a_to_b_write) = nonblocking_pipe().map_err(allocation)?;
                let (b_to_a_read, b_to_a_write) = nonblocking_pipe().map_err(allocation)?;

                tracing::debug!(
                    a = %a,
                    b = %b,
                    a_read = b_to_a_read.as_raw_fd(),
                    a_write = a_to_b_write.as_raw_fd(),
                    b_read = a_to_b_read.as_raw_fd(),
                    b_write = b_to_a_write.as_raw_fd(),
                    "opened duplex channel"
                );

                tables[a.index()].channels[b.index()] = Some(Channel {
                    reader: b_to_a_read,
                    writer: a_to_b_write,
                });
                tables[b.index()].channels[a.index()] = Some(Channel {
                    reader: a_to_b_read,
                    writer: b_to_a_write,
                });
            }
        }

        Ok(Self { tables })
    }

    /// Number of participants.
    pub fn participant_count(&self) -> usize {
        self.tables.len()
    }

    /// Descriptor numbers of every channel of every participant.
    pub fn descriptors(&self) -> Vec<ChannelDescriptor> {
        self.tables
            .iter()
            .flat_map(ChannelTable::descriptors)
            .collect()
    }

    /// Keep only `id`'s table, closing every other participant's descriptors.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParticipant` if `id` is not part of this fabric; the
    /// whole fabric is closed in that case.
    pub fn into_table(self, id: ParticipantId) -> Result<ChannelTable, FabricError> {
        let mut tables = self.tables;
        if id.index() >= tables.len() {
            return Err(FabricError::UnknownParticipant(id));
        }
        let table = tables.swap_remove(id.index());
        let released: usize = tables.iter().map(|t| t.descriptors().len() * 2).sum();
        drop(tables);
        tracing::debug!(
            participant = %id,
            released,
            "closed descriptors of other participants"
        );
        Ok(table)
    }

    /// Split into every participant's table, in id order.
    ///
    /// Used when all participants run inside one process.
    pub fn into_tables(self) -> Vec<ChannelTable> {
        self.tables
    }
}

/// Create a pipe with both ends non-blocking and close-on-exec.
fn nonblocking_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // Safety: fds is a valid two-element array for pipe(2) to fill.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    // Safety: pipe(2) succeeded, both descriptors are open and unowned.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    configure(&read)?;
    configure(&write)?;
    Ok((read, write))
}

fn configure(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // Safety: raw is an open descriptor owned by `fd` for the whole call.
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(raw, libc::F_GETFD);
        if fd_flags == -1 || libc::fcntl(raw, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: i8) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn is_nonblocking(fd: &OwnedFd) -> bool {
        // Safety: fd is open for the duration of the call.
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        flags != -1 && flags & libc::O_NONBLOCK != 0
    }

    #[test]
    fn test_participant_bounds() {
        assert!(matches!(
            ChannelFabric::build(1),
            Err(FabricError::TooFewParticipants { count: 1 })
        ));
        assert!(matches!(
            ChannelFabric::build(MAX_PARTICIPANTS + 1),
            Err(FabricError::TooManyParticipants { .. })
        ));
    }

    #[test]
    fn test_full_mesh_shape() {
        let fabric = ChannelFabric::build(4).expect("build");
        assert_eq!(fabric.participant_count(), 4);
        // 4 participants * 3 peers, each with a read and write descriptor.
        assert_eq!(fabric.descriptors().len(), 12);

        for table in fabric.into_tables() {
            let peers: Vec<_> = table.peers().collect();
            assert_eq!(peers.len(), 3);
            assert!(!peers.contains(&table.owner()));
            for descriptor in table.descriptors() {
                assert_ne!(descriptor.read_fd, descriptor.write_fd);
            }
        }
    }

    #[test]
    fn test_descriptors_are_nonblocking() {
        let mut table = ChannelFabric::build(2)
            .expect("build")
            .into_table(id(1))
            .expect("table");
        let channel = table.take(id(0)).expect("channel to coordinator");
        assert!(is_nonblocking(channel.reader()));
        assert!(is_nonblocking(channel.writer()));
    }

    #[test]
    fn test_into_table_closes_foreign_descriptors() {
        use std::io::{Read, Write};

        let fabric = ChannelFabric::build(3).expect("build");
        let mut table = fabric.into_table(id(2)).expect("table");
        assert_eq!(table.owner(), id(2));
        assert_eq!(table.peers().collect::<Vec<_>>(), vec![id(0), id(1)]);

        // Participant 0's write end was released, so the pipe reports end-of-stream.
        let (reader, writer) = table.take(id(0)).expect("channel").into_parts();
        let mut buf = [0u8; 1];
        let read = std::fs::File::from(reader).read(&mut buf).expect("read");
        assert_eq!(read, 0);

        // Participant 0's read end was released too.
        let err = std::fs::File::from(writer)
            .write_all(b"x")
            .expect_err("no reader left");
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_channel_pairs_are_connected() {
        use std::io::{Read, Write};

        let mut tables = ChannelFabric::build(3).expect("build").into_tables();
        let to_two = tables[0].take(id(2)).expect("0->2");
        let from_zero = tables[2].take(id(0)).expect("2<-0");

        let mut writer = std::fs::File::from(to_two.into_parts().1);
        writer.write_all(b"ping").expect("write");

        let mut reader = std::fs::File::from(from_zero.into_parts().0);
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_unknown_participant() {
        let fabric = ChannelFabric::build(2).expect("build");
        assert!(matches!(
            fabric.into_table(id(5)),
            Err(FabricError::UnknownParticipant(_))
        ));
    }
}
