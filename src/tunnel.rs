//! The two-threaded forwarding engine.
//!
//! One thread per direction, both spawned by [`start`]:
//!
//! - **inbound** reads frames off the shared transport and writes each
//!   payload to the internal endpoint of the channel named in the header;
//! - **outbound** blocks on an epoll set covering every internal endpoint,
//!   and on readiness frames whatever a channel has buffered back onto the
//!   shared transport.
//!
//! The channel table is fully built before either thread starts and its
//! structure never changes afterwards; each internal endpoint is written by
//! exactly one thread and read by exactly one thread, so no per-channel
//! locking is needed. A dedicated shutdown pipe sits in the epoll set so
//! the outbound loop can be stopped deterministically instead of only by
//! process exit.

use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::channel::ChannelTable;
use crate::error::TunnelError;
use crate::exact::{read_exact_or_eof, write_exact, ReadOutcome};
use crate::wire::{decode_length, encode_header, MAX_PACKET_SIZE};

/// Epoll user-data token marking the shutdown pipe.
const SHUTDOWN_TOKEN: u64 = u64::MAX;

/// Raises the shutdown signal for the outbound multiplexer.
pub struct ShutdownSignal {
    pipe_tx: OwnedFd,
}

impl ShutdownSignal {
    /// Ask the outbound thread to exit after its current iteration.
    ///
    /// Idempotent; the inbound thread is unaffected (it stops on transport
    /// EOF).
    pub fn raise(&self) {
        let _ = nix::unistd::write(&self.pipe_tx, &[0]);
    }
}

/// Handles to a running tunnel.
pub struct TunnelHandle {
    /// Inbound demultiplexer thread. `Ok(())` means the transport reached
    /// clean end-of-stream.
    pub inbound: JoinHandle<Result<(), TunnelError>>,
    /// Outbound multiplexer thread. `Ok(())` means the shutdown signal was
    /// raised.
    pub outbound: JoinHandle<Result<(), TunnelError>>,
    /// Stops the outbound thread.
    pub shutdown: ShutdownSignal,
}

/// Start both forwarding threads over the given transport halves.
///
/// `reader` and `writer` are the two directions of the single shared
/// transport (clone the descriptor to get independent halves). Internal
/// endpoints are registered with the readiness set here so registration
/// failures surface to the caller rather than inside the thread.
pub fn start<R, W>(
    table: Arc<ChannelTable>,
    reader: R,
    writer: W,
) -> Result<TunnelHandle, TunnelError>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(TunnelError::Readiness)?;
    for channel in 0..table.capacity() {
        let endpoint = table.internal(channel as u8)?;
        epoll
            .add(endpoint, EpollEvent::new(EpollFlags::EPOLLIN, channel as u64))
            .map_err(TunnelError::Readiness)?;
    }

    let (pipe_rx, pipe_tx) = nix::unistd::pipe().map_err(TunnelError::Readiness)?;
    epoll
        .add(&pipe_rx, EpollEvent::new(EpollFlags::EPOLLIN, SHUTDOWN_TOKEN))
        .map_err(TunnelError::Readiness)?;

    let inbound_table = Arc::clone(&table);
    let inbound = thread::Builder::new()
        .name("p9-inbound".to_string())
        .spawn(move || inbound_loop(reader, &inbound_table))
        .map_err(TunnelError::ThreadSpawn)?;

    let outbound = thread::Builder::new()
        .name("p9-outbound".to_string())
        .spawn(move || {
            // The read end of the pipe must outlive the loop or epoll would
            // report it ready with no writer behind it.
            let _pipe_rx = pipe_rx;
            outbound_loop(writer, &table, &epoll)
        })
        .map_err(TunnelError::ThreadSpawn)?;

    Ok(TunnelHandle {
        inbound,
        outbound,
        shutdown: ShutdownSignal { pipe_tx },
    })
}

/// Transport → channels. Runs until clean EOF on the transport (`Ok`) or
/// the first framing/IO error (fatal).
fn inbound_loop<R: Read>(mut reader: R, table: &ChannelTable) -> Result<(), TunnelError> {
    let mut payload = vec![0u8; MAX_PACKET_SIZE];

    loop {
        // EOF is only legitimate on a frame boundary, i.e. before the
        // channel byte of the next frame.
        let mut channel_buf = [0u8; 1];
        if read_exact_or_eof(&mut reader, &mut channel_buf)? == ReadOutcome::Eof {
            tracing::info!(target: "p9-tunnel::in", "transport closed, stopping demultiplexer");
            return Ok(());
        }
        let channel = channel_buf[0];

        let mut len_buf = [0u8; 2];
        read_frame_part(&mut reader, &mut len_buf)?;
        let length = decode_length(len_buf);

        // Bounds the scratch buffer before trusting the host-supplied size.
        if usize::from(length) > MAX_PACKET_SIZE {
            return Err(TunnelError::OversizedFrame { length });
        }

        let frame = &mut payload[..usize::from(length)];
        read_frame_part(&mut reader, frame)?;

        tracing::trace!(target: "p9-tunnel::in", channel, length, "frame received");

        // Bounds-checked lookup: a bad channel id is a protocol error, not
        // an index.
        let endpoint = table.internal(channel)?;
        write_exact(&mut (&*endpoint), frame)?;
    }
}

/// Read a frame field past the first byte: any end-of-stream here, clean
/// or mid-buffer, means the transport died inside a frame.
fn read_frame_part<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TunnelError> {
    match read_exact_or_eof(reader, buf) {
        Ok(ReadOutcome::Filled) => Ok(()),
        Ok(ReadOutcome::Eof) => Err(TunnelError::TruncatedFrame),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TunnelError::TruncatedFrame),
        Err(e) => Err(e.into()),
    }
}

/// Channels → transport. Runs until the shutdown signal (`Ok`) or a fatal
/// wait/transport error.
fn outbound_loop<W: Write>(
    mut writer: W,
    table: &ChannelTable,
    epoll: &Epoll,
) -> Result<(), TunnelError> {
    tracing::debug!(
        target: "p9-tunnel::mux",
        channels = table.capacity(),
        "multiplexer waiting on readiness set"
    );
    let mut payload = vec![0u8; MAX_PACKET_SIZE];
    let mut events = [EpollEvent::empty(); 8];

    loop {
        let ready = match epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(TunnelError::Wait(e)),
        };

        for event in &events[..ready] {
            let token = event.data();
            if token == SHUTDOWN_TOKEN {
                tracing::info!(target: "p9-tunnel::mux", "shutdown signal, stopping multiplexer");
                return Ok(());
            }
            forward_channel(token as u8, table, &mut writer, epoll, &mut payload)?;
        }
    }
}

/// Drain one readiness notification for `channel`.
///
/// Per-channel failures are logged and absorbed here: one closed or
/// misbehaving channel must not halt multiplexing of the others. Only a
/// write failure on the shared transport is fatal, since there is nothing
/// per-channel about the transport.
fn forward_channel<W: Write>(
    channel: u8,
    table: &ChannelTable,
    writer: &mut W,
    epoll: &Epoll,
    payload: &mut [u8],
) -> Result<(), TunnelError> {
    let endpoint = match table.internal(channel) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            // Tokens come from our own registrations, so this would be an
            // internal inconsistency rather than peer input.
            tracing::warn!(target: "p9-tunnel::mux", channel, error = %e, "readiness for unknown channel");
            return Ok(());
        }
    };

    let n = match (&*endpoint).read(payload) {
        Ok(0) => {
            tracing::info!(target: "p9-tunnel::mux", channel, "channel peer closed, deregistering");
            if let Err(e) = epoll.delete(endpoint) {
                tracing::warn!(target: "p9-tunnel::mux", channel, error = %e, "deregister failed");
            }
            return Ok(());
        }
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(target: "p9-tunnel::mux", channel, error = %e, "channel read failed, skipping");
            return Ok(());
        }
    };

    tracing::trace!(target: "p9-tunnel::mux", channel, length = n, "frame sent");

    // One reader per endpoint caps n at the scratch size, which fits u16.
    let header = encode_header(channel, n as u16);
    write_exact(writer, &header)?;
    write_exact(writer, &payload[..n])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    #[test]
    fn shutdown_signal_stops_outbound_thread() {
        let (guest, _host) = UnixStream::pair().unwrap();
        let reader = guest.try_clone().unwrap();
        let table = Arc::new(ChannelTable::with_capacity(2).unwrap());

        let handle = start(Arc::clone(&table), reader, guest).unwrap();
        handle.shutdown.raise();
        assert!(handle.outbound.join().unwrap().is_ok());
    }

    #[test]
    fn inbound_reports_clean_eof() {
        let (guest, host) = UnixStream::pair().unwrap();
        let reader = guest.try_clone().unwrap();
        let table = Arc::new(ChannelTable::with_capacity(1).unwrap());

        let handle = start(Arc::clone(&table), reader, guest).unwrap();
        drop(host);

        assert!(handle.inbound.join().unwrap().is_ok());
        handle.shutdown.raise();
        assert!(handle.outbound.join().unwrap().is_ok());
    }

    #[test]
    fn inbound_write_targets_the_named_channel() {
        let (guest, mut host) = UnixStream::pair().unwrap();
        let reader = guest.try_clone().unwrap();
        let table = Arc::new(ChannelTable::with_capacity(2).unwrap());

        let handle = start(Arc::clone(&table), reader, guest).unwrap();

        let mut frame = Vec::from(encode_header(1, 3));
        frame.extend_from_slice(b"abc");
        std::io::Write::write_all(&mut host, &frame).unwrap();

        let external = table.external(1).unwrap();
        external
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 3];
        (&*external).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        drop(host);
        assert!(handle.inbound.join().unwrap().is_ok());
        handle.shutdown.raise();
        assert!(handle.outbound.join().unwrap().is_ok());
    }
}
