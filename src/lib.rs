//! Guest-side 9p channel tunnel.
//!
//! Inside a microVM guest the only path to the host is a single virtio
//! serial port, but every 9p volume the guest mounts expects its own
//! private stream socket. `p9-tunnel` bridges the two:
//!
//! - **Wire**: frames on the shared port carry `[channel][length][payload]`
//! - **Channels**: a fixed table of socket pairs, one per volume; the
//!   external half goes to the kernel's 9p client via `trans=fd`
//! - **Engine**: one thread demultiplexes host frames onto channel sockets,
//!   one thread epoll-waits on all channel sockets and frames their data
//!   back to the host
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use p9_tunnel::{mount_volume, start, ChannelTable};
//!
//! # fn main() -> Result<(), p9_tunnel::TunnelError> {
//! let device = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .open("/dev/vport0p1")?;
//! let reader = device.try_clone()?;
//!
//! let table = Arc::new(ChannelTable::new()?);
//! let tunnel = start(Arc::clone(&table), reader, device)?;
//!
//! mount_volume(&table, "vol0", std::path::Path::new("/mnt/vol0"))?;
//! # let _ = tunnel;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod exact;
pub mod mount;
pub mod tunnel;
pub mod wire;

pub use channel::ChannelTable;
pub use error::TunnelError;
pub use mount::{mount_volume, transport_options};
pub use tunnel::{start, ShutdownSignal, TunnelHandle};
pub use wire::{MAX_CHANNELS, MAX_PACKET_SIZE};
