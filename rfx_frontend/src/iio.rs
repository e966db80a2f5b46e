//! Industrial-I/O transceiver frontend.
//!
//! The transceiver exposes its PHY controls as sysfs attribute files.
//! Rates below the chip's direct floor are programmed eightfold with
//! hardware decimation making up the difference; the TX gain attribute
//! is offset by -89 dB relative to the API's dB scale.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use rfx_core::RegisterWindow;

use crate::backend::{Frontend, StatusPort, StatusRegister};
use crate::error::{FrontendError, Result};

/// Lowest rate the chip can run without decimation.
pub const LOW_RATE_FLOOR_HZ: f64 = 25e6 / 48.0;

/// dB offset between the API scale and the TX hardwaregain attribute.
pub const TX_GAIN_OFFSET_DB: i64 = 89;

/// Physical base and size of the statistics window on embedded setups.
pub const STATUS_BASE_ADDR: u64 = 0x5000_0000;
pub const STATUS_WINDOW_LEN: usize = 0x1000;

/// Word indices into the statistics window. ABI with the FPGA image.
pub const REG_OVERFLOW: usize = 2;
pub const REG_LATE: usize = 4;

const ATTR_SAMPLING_FREQUENCY: &str = "in_voltage0_sampling_frequency";
const ATTR_RX_LO_FREQUENCY: &str = "out_altvoltage0_frequency";
const ATTR_TX_LO_FREQUENCY: &str = "out_altvoltage1_frequency";
const ATTR_RX_GAIN: &str = "in_voltage0_hardwaregain";
const ATTR_TX_GAIN: &str = "out_voltage0_hardwaregain";

struct IioStatus {
    regs: Option<Arc<RegisterWindow>>,
}

impl StatusPort for IioStatus {
    fn status(&self, reg: StatusRegister) -> u32 {
        match (&self.regs, reg) {
            // The transceiver's baseband clock follows the rate write
            // synchronously; report it locked.
            (_, StatusRegister::MmcmLock) => 1,
            (_, StatusRegister::RxChannels) => 1,
            (Some(regs), StatusRegister::Late) => regs.read(REG_LATE),
            (Some(regs), StatusRegister::Overflow) => regs.read(REG_OVERFLOW),
            (None, _) => 0,
        }
    }
}

/// [`Frontend`] over transceiver sysfs attributes.
pub struct IioFrontend {
    phy_dir: PathBuf,
    regs: Option<Arc<RegisterWindow>>,
    sample_rate: u64,
}

impl IioFrontend {
    /// Binds to the PHY device's attribute directory. The statistics
    /// window is only present on embedded setups; remote contexts pass
    /// `None`.
    pub fn new(phy_dir: PathBuf, regs: Option<RegisterWindow>) -> Self {
        Self {
            phy_dir,
            regs: regs.map(Arc::new),
            sample_rate: 0,
        }
    }

    /// Maps the statistics window from `path` (normally `/dev/mem`).
    pub fn open_status_window(path: &Path) -> Result<RegisterWindow> {
        RegisterWindow::open(path, STATUS_BASE_ADDR, STATUS_WINDOW_LEN)
            .map_err(|e| FrontendError::Backend(e.to_string()))
    }

    fn write_attr(&self, name: &str, value: i64) -> Result<()> {
        std::fs::write(self.phy_dir.join(name), value.to_string())
            .map_err(|e| FrontendError::Backend(format!("{name}: {e}")))
    }

    fn read_attr(&self, name: &str) -> Result<i64> {
        let text = std::fs::read_to_string(self.phy_dir.join(name))
            .map_err(|e| FrontendError::Backend(format!("{name}: {e}")))?;
        text.trim()
            .parse()
            .map_err(|e| FrontendError::Backend(format!("{name}: {e}")))
    }
}

impl Frontend for IioFrontend {
    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<u64> {
        let mut device_rate = rate_hz;
        if (rate_hz as f64) < LOW_RATE_FLOOR_HZ {
            if (rate_hz as f64) * 8.0 < LOW_RATE_FLOOR_HZ {
                return Err(FrontendError::UnsupportedRate(rate_hz));
            }
            // The chip decimates by 8 back down to the requested rate.
            device_rate = rate_hz * 8;
            info!("rate {rate_hz} Hz below direct floor, decimating from {device_rate} Hz");
        }
        self.write_attr(ATTR_SAMPLING_FREQUENCY, device_rate as i64)?;
        self.sample_rate = rate_hz;
        Ok(rate_hz)
    }

    fn set_rx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        if channel != 0 {
            warn!("transceiver has a single LO per direction, ignoring channel {channel}");
        }
        self.write_attr(ATTR_RX_LO_FREQUENCY, freq_hz as i64)?;
        Ok(freq_hz / 1e6)
    }

    fn set_tx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        if channel != 0 {
            warn!("transceiver has a single LO per direction, ignoring channel {channel}");
        }
        self.write_attr(ATTR_TX_LO_FREQUENCY, freq_hz as i64)?;
        Ok(freq_hz / 1e6)
    }

    fn set_rx_gain(&mut self, gain_db: f64) -> Result<()> {
        self.write_attr(ATTR_RX_GAIN, gain_db as i64)
    }

    fn set_tx_gain(&mut self, gain_db: f64) -> Result<()> {
        self.write_attr(ATTR_TX_GAIN, gain_db as i64 - TX_GAIN_OFFSET_DB)
    }

    fn rx_gain(&self) -> Result<f64> {
        Ok(self.read_attr(ATTR_RX_GAIN).unwrap_or(0) as f64)
    }

    fn tx_gain(&self) -> Result<f64> {
        Ok(self.read_attr(ATTR_TX_GAIN).map(|g| g + TX_GAIN_OFFSET_DB).unwrap_or(0) as f64)
    }

    fn current_sample_rate(&self) -> Option<u64> {
        if self.sample_rate > 0 {
            return Some(self.sample_rate);
        }
        // Fall back to the rate the device is already running.
        self.read_attr(ATTR_SAMPLING_FREQUENCY)
            .ok()
            .filter(|&r| r > 0)
            .map(|r| r as u64)
    }

    fn status_port(&self) -> Arc<dyn StatusPort> {
        Arc::new(IioStatus {
            regs: self.regs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend() -> (tempfile::TempDir, IioFrontend) {
        let dir = tempfile::tempdir().unwrap();
        let frontend = IioFrontend::new(dir.path().to_path_buf(), None);
        (dir, frontend)
    }

    fn attr(dir: &tempfile::TempDir, name: &str) -> String {
        std::fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_direct_rate_is_written_verbatim() {
        let (dir, mut frontend) = frontend();
        assert_eq!(frontend.set_sample_rate(1_920_000).unwrap(), 1_920_000);
        assert_eq!(attr(&dir, ATTR_SAMPLING_FREQUENCY), "1920000");
        assert_eq!(frontend.current_sample_rate(), Some(1_920_000));
    }

    #[test]
    fn test_low_rate_decimates_by_eight() {
        let (dir, mut frontend) = frontend();
        assert_eq!(frontend.set_sample_rate(240_000).unwrap(), 240_000);
        assert_eq!(attr(&dir, ATTR_SAMPLING_FREQUENCY), "1920000");
    }

    #[test]
    fn test_rate_below_decimated_floor_is_rejected() {
        let (_dir, mut frontend) = frontend();
        assert_eq!(
            frontend.set_sample_rate(32_000).unwrap_err(),
            FrontendError::UnsupportedRate(32_000)
        );
    }

    #[test]
    fn test_lo_frequencies_use_separate_attributes() {
        let (dir, mut frontend) = frontend();
        frontend.set_rx_freq(0, 2_400_000_000.0).unwrap();
        frontend.set_tx_freq(0, 2_410_000_000.0).unwrap();
        assert_eq!(attr(&dir, ATTR_RX_LO_FREQUENCY), "2400000000");
        assert_eq!(attr(&dir, ATTR_TX_LO_FREQUENCY), "2410000000");
    }

    #[test]
    fn test_tx_gain_offset() {
        let (dir, mut frontend) = frontend();
        frontend.set_tx_gain(80.0).unwrap();
        assert_eq!(attr(&dir, ATTR_TX_GAIN), "-9");
        assert_eq!(frontend.tx_gain().unwrap(), 80.0);

        frontend.set_rx_gain(40.0).unwrap();
        assert_eq!(attr(&dir, ATTR_RX_GAIN), "40");
        assert_eq!(frontend.rx_gain().unwrap(), 40.0);
    }

    #[test]
    fn test_status_without_window_reads_zero_but_locked() {
        let (_dir, frontend) = frontend();
        let port = frontend.status_port();
        assert_eq!(port.status(StatusRegister::Late), 0);
        assert_eq!(port.status(StatusRegister::Overflow), 0);
        assert_eq!(port.status(StatusRegister::MmcmLock), 1);
    }
}
