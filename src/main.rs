use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use p9_tunnel::{mount_volume, start, ChannelTable};

#[derive(Parser, Debug)]
#[command(name = "p9-tunnel", version, about = "Tunnel 9p volumes over a shared virtio serial port")]
struct Args {
    /// Virtio serial port shared with the host.
    #[arg(long, default_value = "/dev/vport0p1")]
    device: PathBuf,

    /// Volume to mount, as TAG:PATH. May be repeated.
    #[arg(long = "volume", value_name = "TAG:PATH")]
    volumes: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.device)
        .with_context(|| format!("opening transport device {}", args.device.display()))?;
    let reader = device
        .try_clone()
        .context("cloning transport descriptor")?;

    let table = Arc::new(ChannelTable::new().context("building channel table")?);
    let tunnel = start(Arc::clone(&table), reader, device).context("starting tunnel threads")?;

    for spec in &args.volumes {
        let (tag, path) = spec
            .split_once(':')
            .with_context(|| format!("invalid volume spec {spec:?}, expected TAG:PATH"))?;
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating mount point {path}"))?;
        let channel = mount_volume(&table, tag, Path::new(path))
            .with_context(|| format!("mounting volume {tag} at {path}"))?;
        tracing::info!(channel, tag, path, "volume attached");
    }

    // The transport closing is the host telling us we are done.
    match tunnel.inbound.join() {
        Ok(Ok(())) => tracing::info!("transport closed, exiting"),
        Ok(Err(e)) => {
            tunnel.shutdown.raise();
            return Err(e).context("inbound demultiplexer failed");
        }
        Err(_) => anyhow::bail!("inbound demultiplexer panicked"),
    }

    tunnel.shutdown.raise();
    match tunnel.outbound.join() {
        Ok(result) => result.context("outbound multiplexer failed")?,
        Err(_) => anyhow::bail!("outbound multiplexer panicked"),
    }

    Ok(())
}
