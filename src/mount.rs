//! 9p mount binder.
//!
//! Reserves a channel and hands its external endpoint to the kernel's 9p
//! client via a `trans=fd` mount. From the kernel's point of view the
//! endpoint is an ordinary connected stream socket; the tunnel behind it is
//! invisible.

use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::mount::MsFlags;

use crate::channel::ChannelTable;
use crate::error::TunnelError;

/// Protocol version negotiated by the 9p client.
pub const P9_VERSION: &str = "9p2000.L";

/// Filesystem type passed to the mount call.
pub const P9_FS_TYPE: &str = "9p";

/// Build the 9p `trans=fd` option string for a channel endpoint.
///
/// The endpoint is bidirectional, so the same descriptor serves as both the
/// read and the write fd.
pub fn transport_options(fd: RawFd) -> String {
    format!("trans=fd,rfdno={fd},wfdno={fd},version={P9_VERSION}")
}

/// Reserve the next channel and mount the volume `tag` at `path` over it.
///
/// Returns the channel that now carries the volume's traffic. A mount
/// failure surfaces the errno verbatim and the channel stays consumed; the
/// table never rolls back an allocation. Allocation must not race itself
/// (one mount in flight at a time), but runs safely alongside the
/// forwarding threads.
pub fn mount_volume(table: &ChannelTable, tag: &str, path: &Path) -> Result<u8, TunnelError> {
    let channel = table.allocate()?;
    let fd = table.external(channel)?.as_raw_fd();
    let options = transport_options(fd);

    tracing::info!(
        target: "p9-tunnel::mount",
        channel,
        tag,
        path = %path.display(),
        "mounting 9p volume"
    );

    nix::mount::mount(
        Some(tag),
        path,
        Some(P9_FS_TYPE),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .map_err(|e| {
        tracing::warn!(target: "p9-tunnel::mount", channel, tag, errno = %e, "9p mount failed");
        TunnelError::Mount(e)
    })?;

    tracing::info!(target: "p9-tunnel::mount", channel, tag, "9p volume mounted");
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelTable;

    #[test]
    fn options_use_one_fd_for_both_directions() {
        assert_eq!(
            transport_options(7),
            "trans=fd,rfdno=7,wfdno=7,version=9p2000.L"
        );
    }

    #[test]
    fn exhausted_table_fails_before_the_mount_call() {
        // Zero capacity: allocation fails first, so no mount syscall is
        // ever attempted.
        let table = ChannelTable::with_capacity(0).unwrap();
        assert!(matches!(
            mount_volume(&table, "vol0", Path::new("/mnt/vol0")),
            Err(TunnelError::ChannelsExhausted)
        ));
    }
}
