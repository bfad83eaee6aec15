#![forbid(unsafe_code)]
//! `amifs` — mount an Amiga ADF disk image as a POSIX filesystem.

use amifs_block::ImageDevice;
use amifs_core::Volume;
use amifs_fuse::MountOptions;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "amifs",
    about = "Mount Amiga ADF disk images as POSIX filesystems",
    version
)]
struct Cli {
    /// Path to the ADF disk image.
    adf_file: PathBuf,

    /// Directory to mount the volume at.
    mount_point: PathBuf,

    /// Mount read-only even when the image is writable.
    #[arg(long)]
    read_only: bool,

    /// Allow other users to access the mount.
    #[arg(long)]
    allow_other: bool,

    /// Keep the mount after the process exits (no auto-unmount).
    #[arg(long)]
    no_auto_unmount: bool,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let device = if cli.read_only {
        ImageDevice::open_read_only(&cli.adf_file)
    } else {
        ImageDevice::open(&cli.adf_file)
    }
    .with_context(|| format!("failed to open ADF file {}", cli.adf_file.display()))?;

    let volume = Volume::open(device)
        .with_context(|| format!("failed to parse ADF file {}", cli.adf_file.display()))?;

    let access = if volume.read_only() {
        "READ-ONLY"
    } else {
        "READ-WRITE"
    };
    println!(
        "Mounted ADF volume: {} ({}) [{}]",
        volume.volume_name(),
        volume.flavor(),
        access
    );

    let options = MountOptions {
        read_only: volume.read_only(),
        allow_other: cli.allow_other,
        auto_unmount: !cli.no_auto_unmount,
    };
    debug!(?options, mountpoint = %cli.mount_point.display(), "entering FUSE loop");

    amifs_fuse::mount(volume, &cli.mount_point, &options)
        .with_context(|| format!("mount at {} failed", cli.mount_point.display()))?;
    Ok(())
}
