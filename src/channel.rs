//! Channel table: one socket pair per multiplexed channel.
//!
//! Each channel owns a connected `UnixStream` pair created up front. The
//! external half is what the kernel's 9p client reads and writes after a
//! `trans=fd` mount; the internal half is the only descriptor the two
//! forwarding threads ever touch. The table's structure is immutable once
//! built; only the allocation cursor moves, and only on the mount path.

use std::os::unix::net::UnixStream;
use std::sync::Mutex;

use crate::error::TunnelError;
use crate::wire::MAX_CHANNELS;

struct ChannelPair {
    /// Handed to the mount call (via its raw descriptor); kept open for the
    /// life of the process so the 9p client's fd never goes stale.
    external: UnixStream,
    /// Owned by the tunnel engine: the inbound thread writes it, the
    /// outbound thread reads it.
    internal: UnixStream,
}

/// Fixed-capacity table of channel endpoint pairs plus the allocation
/// cursor.
pub struct ChannelTable {
    channels: Vec<ChannelPair>,
    cursor: Mutex<usize>,
}

impl ChannelTable {
    /// Build a full table of [`MAX_CHANNELS`] socket pairs.
    ///
    /// Fails fast on the first pair that cannot be created; a partially
    /// initialized table is never returned.
    pub fn new() -> Result<Self, TunnelError> {
        Self::with_capacity(MAX_CHANNELS)
    }

    /// Build a table with fewer slots.
    ///
    /// The wire protocol still caps channels at [`MAX_CHANNELS`]; smaller
    /// tables exist for tests and descriptor-constrained deployments.
    ///
    /// # Panics
    /// Panics if `capacity` exceeds [`MAX_CHANNELS`].
    pub fn with_capacity(capacity: usize) -> Result<Self, TunnelError> {
        assert!(
            capacity <= MAX_CHANNELS,
            "channel table capacity {capacity} exceeds protocol limit {MAX_CHANNELS}"
        );
        let mut channels = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let (external, internal) = UnixStream::pair().map_err(TunnelError::ChannelSetup)?;
            channels.push(ChannelPair { external, internal });
        }
        Ok(Self {
            channels,
            cursor: Mutex::new(0),
        })
    }

    /// Number of slots in this table.
    pub fn capacity(&self) -> usize {
        self.channels.len()
    }

    /// Reserve the next unused channel index.
    ///
    /// Channels are handed out monotonically and never reused. Fails with
    /// [`TunnelError::ChannelsExhausted`] without consuming a slot once the
    /// table is full.
    pub fn allocate(&self) -> Result<u8, TunnelError> {
        let mut cursor = self.cursor.lock().unwrap();
        if *cursor >= self.channels.len() {
            return Err(TunnelError::ChannelsExhausted);
        }
        let channel = *cursor as u8;
        *cursor += 1;
        Ok(channel)
    }

    /// The engine-side endpoint of `channel`, bounds-checked.
    ///
    /// The channel id can come straight off the wire, so an out-of-range
    /// value is a protocol error, never an index panic.
    pub fn internal(&self, channel: u8) -> Result<&UnixStream, TunnelError> {
        self.channels
            .get(usize::from(channel))
            .map(|pair| &pair.internal)
            .ok_or(TunnelError::UnknownChannel { channel })
    }

    /// The mount-side endpoint of `channel`, bounds-checked.
    pub fn external(&self, channel: u8) -> Result<&UnixStream, TunnelError> {
        self.channels
            .get(usize::from(channel))
            .map(|pair| &pair.external)
            .ok_or(TunnelError::UnknownChannel { channel })
    }
}
