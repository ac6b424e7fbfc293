//! Tunnel error types.

use std::io;

use crate::wire::{MAX_CHANNELS, MAX_PACKET_SIZE};

/// Errors produced by the tunnel engine, channel table and mount binder.
///
/// The taxonomy follows where an error can be contained:
/// - framing errors ([`OversizedFrame`](Self::OversizedFrame),
///   [`UnknownChannel`](Self::UnknownChannel),
///   [`TruncatedFrame`](Self::TruncatedFrame)) and transport I/O errors are
///   fatal to the forwarding thread that hit them;
/// - per-channel endpoint errors are absorbed inside the outbound
///   multiplexer and never surface here;
/// - setup and mount errors are returned to the caller that triggered them.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// All `MAX_CHANNELS` channels have been handed out.
    #[error("channel capacity exhausted ({MAX_CHANNELS} channels in use)")]
    ChannelsExhausted,

    /// A frame header announced a payload larger than the protocol allows.
    #[error("frame length {length} exceeds maximum packet size {MAX_PACKET_SIZE}")]
    OversizedFrame { length: u16 },

    /// A frame was addressed to a channel outside the table.
    #[error("frame addressed to unknown channel {channel}")]
    UnknownChannel { channel: u8 },

    /// The transport closed in the middle of a frame.
    #[error("transport closed mid-frame")]
    TruncatedFrame,

    /// Creating a channel's socket pair failed during table construction.
    #[error("creating channel socket pair: {0}")]
    ChannelSetup(#[source] io::Error),

    /// Spawning one of the two forwarding threads failed.
    #[error("spawning tunnel thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// Registering descriptors with the readiness set failed.
    #[error("registering with readiness set: {0}")]
    Readiness(#[source] nix::Error),

    /// The blocking readiness wait failed with a non-transient error.
    #[error("readiness wait failed: {0}")]
    Wait(#[source] nix::Error),

    /// I/O on the shared transport failed.
    #[error("transport I/O: {0}")]
    Transport(#[from] io::Error),

    /// The external 9p mount call failed; the errno is reported verbatim.
    #[error("9p mount failed: {0}")]
    Mount(#[source] nix::Error),
}
