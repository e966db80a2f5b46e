//! Device wiring profiles.
//!
//! The engine core is variant-agnostic; everything that differs
//! between the two plugins (ring sizing, minimum packet size, realign
//! policy, TX framing, concrete pool and frontend construction) lives
//! here.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use rfx_core::Direction;
use rfx_dma::chardev::{CharDevPool, Packetizer};
use rfx_dma::streamfd::StreamFdPool;
use rfx_frontend::iio::IioFrontend;
use rfx_frontend::rfdc::RfdcFrontend;
use rfx_frontend::tiles::FirmwareTiles;
use rfx_wire::preamble::TxFraming;

use crate::args::Args;
use crate::engine::Engine;
use crate::error::{RadioError, Result};
use crate::streamer::RealignPolicy;

pub const DEV_MEM: &str = "/dev/mem";
pub const RFDC_RX_DMA_DEV: &str = "/dev/srs_rx_dma";
pub const RFDC_TX_DMA_DEV: &str = "/dev/srs_tx_dma";

pub const IIO_SYSFS_ROOT: &str = "/sys/bus/iio/devices";
pub const IIO_PHY_NAME: &str = "ad9361-phy";
pub const IIO_RX_STREAM_NAME: &str = "cf-ad9361-lpc";
pub const IIO_TX_STREAM_NAME: &str = "cf-ad9361-dds-core-lpc";

/// Everything the engine needs to know about one device variant.
#[derive(Debug, Clone)]
pub struct Profile {
    pub device_name: &'static str,
    /// Smallest DMA payload in IQ pairs.
    pub min_data_samples: u32,
    pub rx_ring_bytes: usize,
    pub tx_ring_bytes: usize,
    pub pool_buffers: u32,
    pub nof_channels: u32,
    pub realign: RealignPolicy,
    pub tx_framing: TxFraming,
}

impl Profile {
    /// Industrial-I/O transceiver profile.
    pub fn iio() -> Self {
        Self {
            device_name: "iio",
            min_data_samples: 1920,
            rx_ring_bytes: 1500 * 1920,
            tx_ring_bytes: 200 * 1920,
            pool_buffers: 4,
            nof_channels: 1,
            realign: RealignPolicy::Scan,
            tx_framing: TxFraming::Plain,
        }
    }

    /// Integrated RF data converter profile.
    pub fn rfdc(nof_channels: u32) -> Self {
        Self {
            device_name: "RFdc",
            min_data_samples: 1000,
            rx_ring_bytes: 50000 * 1920,
            tx_ring_bytes: 200 * 1920,
            pool_buffers: 8,
            nof_channels,
            realign: RealignPolicy::Abort { limit: 20 },
            tx_framing: TxFraming::LengthTagged,
        }
    }
}

/// Finds an industrial-I/O device by its `name` attribute.
///
/// Returns the device's sysfs directory and its character device node.
pub fn resolve_iio_device(sysfs_root: &Path, name: &str) -> Result<(PathBuf, PathBuf)> {
    let entries = fs::read_dir(sysfs_root)
        .map_err(|e| RadioError::Config(format!("{}: {e}", sysfs_root.display())))?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let matches = fs::read_to_string(dir.join("name"))
            .map(|s| s.trim() == name)
            .unwrap_or(false);
        if matches {
            let node = PathBuf::from("/dev").join(entry.file_name());
            return Ok((dir, node));
        }
    }
    Err(RadioError::Config(format!("iio device '{name}' not found")))
}

/// Opens the transceiver-backed engine.
///
/// The statistics register window only exists on embedded setups; any
/// non-default `context` skips it, mirroring remote backends that
/// cannot reach `/dev/mem`.
pub fn open_iio(args_str: &str) -> Result<Engine> {
    let args = Args::parse(args_str);
    let sysfs_root = Path::new(IIO_SYSFS_ROOT);

    let (phy_dir, _) = resolve_iio_device(sysfs_root, IIO_PHY_NAME)?;
    let (rx_dir, rx_node) = resolve_iio_device(sysfs_root, IIO_RX_STREAM_NAME)?;
    let (tx_dir, tx_node) = resolve_iio_device(sysfs_root, IIO_TX_STREAM_NAME)?;

    let embedded = args.context == "default";
    let regs = if embedded {
        Some(IioFrontend::open_status_window(Path::new(DEV_MEM))?)
    } else {
        None
    };
    let frontend = IioFrontend::new(phy_dir, regs);

    let rx_pool = Arc::new(StreamFdPool::open(
        &rx_node,
        Direction::Rx,
        Some(rx_dir.join("buffer")),
    )?);
    let tx_pool = Arc::new(StreamFdPool::open(
        &tx_node,
        Direction::Tx,
        Some(tx_dir.join("buffer")),
    )?);

    Engine::open(&args, Profile::iio(), Box::new(frontend), rx_pool, tx_pool)
}

/// Opens the data-converter-backed engine.
pub fn open_rfdc(args_str: &str, nof_channels: u32) -> Result<Engine> {
    let args = Args::parse(args_str);
    let nof_channels = match nof_channels {
        0 => {
            warn!("nof_channels 0 requested, using 1");
            1
        }
        1 | 2 => nof_channels,
        n => {
            return Err(RadioError::Config(format!(
                "only 1 or 2 rf channels are supported (requested {n})"
            )));
        }
    };

    let devmem = Path::new(DEV_MEM);
    let status = RfdcFrontend::open_status_window(devmem)?;
    let frontend = RfdcFrontend::new(Box::new(FirmwareTiles::new()), status, args.clock)?;

    let provisioned = frontend.provisioned_rx_channels();
    if provisioned != nof_channels {
        return Err(RadioError::Config(format!(
            "requested {nof_channels} rx channels but the image provisions {provisioned}"
        )));
    }

    let packetizer = Packetizer::open(devmem)?;
    let rx_pool = Arc::new(CharDevPool::open(
        Path::new(RFDC_RX_DMA_DEV),
        Direction::Rx,
        Some(packetizer),
    )?);
    let tx_pool = Arc::new(CharDevPool::open(Path::new(RFDC_TX_DMA_DEV), Direction::Tx, None)?);

    Engine::open(
        &args,
        Profile::rfdc(nof_channels),
        Box::new(frontend),
        rx_pool,
        tx_pool,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_iio_device_by_name() {
        let root = tempfile::tempdir().unwrap();
        for (dir, name) in [
            ("iio:device0", "adm1177"),
            ("iio:device1", "ad9361-phy"),
            ("iio:device2", "cf-ad9361-lpc"),
        ] {
            let d = root.path().join(dir);
            fs::create_dir(&d).unwrap();
            fs::write(d.join("name"), format!("{name}\n")).unwrap();
        }

        let (dir, node) = resolve_iio_device(root.path(), "ad9361-phy").unwrap();
        assert_eq!(dir, root.path().join("iio:device1"));
        assert_eq!(node, PathBuf::from("/dev/iio:device1"));

        assert!(matches!(
            resolve_iio_device(root.path(), "missing-dev"),
            Err(RadioError::Config(_))
        ));
    }

    #[test]
    fn test_profiles() {
        let iio = Profile::iio();
        assert_eq!(iio.min_data_samples, 1920);
        assert_eq!(iio.realign, RealignPolicy::Scan);
        assert_eq!(iio.tx_framing, TxFraming::Plain);

        let rfdc = Profile::rfdc(2);
        assert_eq!(rfdc.min_data_samples, 1000);
        assert_eq!(rfdc.nof_channels, 2);
        assert_eq!(rfdc.realign, RealignPolicy::Abort { limit: 20 });
        assert_eq!(rfdc.tx_framing, TxFraming::LengthTagged);
    }

    #[test]
    fn test_rfdc_rejects_channel_overflow() {
        assert!(matches!(
            open_rfdc("n_prb=6", 3),
            Err(RadioError::Config(_))
        ));
    }
}
