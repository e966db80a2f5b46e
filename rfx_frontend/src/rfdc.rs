//! Integrated RF data converter frontend.
//!
//! Rate changes are programmed as an FFT size into the FPGA's control
//! window; frequency changes translate the requested carrier into a
//! fine-mixer NCO offset against the converter PLL. Tile bring-up lives
//! behind [`TilePort`].

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};
use rfx_core::{Direction, RegisterWindow};

use crate::backend::{ClockSource, Frontend, StatusPort, StatusRegister};
use crate::error::{FrontendError, Result};
use crate::tiles::TilePort;

/// Converter PLL frequency in MHz.
pub const PLL_FREQ_MHZ: f64 = 1966.08;

/// Reference clock handed to the converter tiles, in kHz.
pub const REF_SAMPLE_FREQ_KHZ: f64 = 245_760.0;

/// Physical base and size of the status/control window.
pub const STATUS_BASE_ADDR: u64 = 0xA004_0000;
pub const STATUS_WINDOW_LEN: usize = 0x1F40;

/// Word indices into the status window. ABI with the FPGA image.
pub const REG_NFFT: usize = 4;
pub const REG_LATE: usize = 224;
pub const REG_MMCM_LOCK: usize = 263;
pub const REG_RX_CHANNELS: usize = 264;

/// Baseband FFT sizes the FPGA image accepts.
const SYMBOL_SIZES: [u32; 8] = [128, 256, 384, 512, 768, 1024, 1536, 2048];

/// Computes the NCO offset (MHz) that centers `freq_hz` in baseband.
///
/// Positive sign covers carriers in `[0, F_pll)`, the mirrored form
/// covers `[F_pll, 2 F_pll)`; the TX path negates the result.
pub fn nco_offset_mhz(freq_hz: f64) -> f64 {
    let freq_mhz = freq_hz / 1e6;
    if freq_mhz < 2.0 * PLL_FREQ_MHZ {
        PLL_FREQ_MHZ - freq_mhz
    } else {
        2.0 * PLL_FREQ_MHZ - freq_mhz
    }
}

struct RfdcStatus {
    regs: Arc<RegisterWindow>,
}

impl StatusPort for RfdcStatus {
    fn status(&self, reg: StatusRegister) -> u32 {
        match reg {
            StatusRegister::Late => self.regs.read(REG_LATE),
            // RX overruns surface through ring accounting, not a register.
            StatusRegister::Overflow => 0,
            StatusRegister::MmcmLock => self.regs.read(REG_MMCM_LOCK),
            StatusRegister::RxChannels => self.regs.read(REG_RX_CHANNELS),
        }
    }
}

/// [`Frontend`] over the RF data converter.
pub struct RfdcFrontend {
    tiles: Box<dyn TilePort>,
    regs: Arc<RegisterWindow>,
    sample_rate: u64,
}

impl RfdcFrontend {
    /// Configures the converter against `clock` and wakes both tiles.
    pub fn new(mut tiles: Box<dyn TilePort>, regs: RegisterWindow, clock: ClockSource) -> Result<Self> {
        tiles.configure(clock, REF_SAMPLE_FREQ_KHZ)?;
        tiles.start(Direction::Rx)?;
        tiles.start(Direction::Tx)?;
        info!("data converter configured ({clock:?} reference)");
        Ok(Self {
            tiles,
            regs: Arc::new(regs),
            sample_rate: 0,
        })
    }

    /// Maps the status window from `path` (normally `/dev/mem`).
    pub fn open_status_window(path: &Path) -> Result<RegisterWindow> {
        RegisterWindow::open(path, STATUS_BASE_ADDR, STATUS_WINDOW_LEN)
            .map_err(|e| FrontendError::Backend(e.to_string()))
    }

    /// RX DMA channels provisioned by the FPGA image; 0 is coerced to 1.
    pub fn provisioned_rx_channels(&self) -> u32 {
        let n = self.regs.read(REG_RX_CHANNELS);
        if n == 0 {
            warn!("device reports 0 rx dma channels, assuming 1");
            1
        } else {
            n
        }
    }

    fn clamp_channel(channel: u32) -> u32 {
        if channel > 1 {
            warn!("channel {channel} out of range, using channel 0");
            0
        } else {
            channel
        }
    }
}

impl Frontend for RfdcFrontend {
    fn set_sample_rate(&mut self, rate_hz: u64) -> Result<u64> {
        let subframe_samples = rate_hz / 1000;
        let symbol_sz = (subframe_samples / 15) as u32;
        if !SYMBOL_SIZES.contains(&symbol_sz) {
            return Err(FrontendError::UnsupportedRate(rate_hz));
        }
        self.regs.write(REG_NFFT, symbol_sz);
        info!("baseband NFFT = {}", self.regs.read(REG_NFFT));
        self.sample_rate = rate_hz;
        Ok(rate_hz)
    }

    fn set_rx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        let channel = Self::clamp_channel(channel);
        let nco_mhz = nco_offset_mhz(freq_hz);
        self.tiles.set_mixer_freq(Direction::Rx, channel, nco_mhz)?;
        let applied = self.tiles.mixer_freq(Direction::Rx, channel)?;
        info!("adc{channel} mixer frequency set to {applied:.3} MHz");
        Ok(applied)
    }

    fn set_tx_freq(&mut self, channel: u32, freq_hz: f64) -> Result<f64> {
        let channel = Self::clamp_channel(channel);
        // The DAC mixer runs the inverse of the RX rule.
        let nco_mhz = -nco_offset_mhz(freq_hz);
        self.tiles.set_mixer_freq(Direction::Tx, channel, nco_mhz)?;
        let applied = self.tiles.mixer_freq(Direction::Tx, channel)?;
        info!("dac{channel} mixer frequency set to {applied:.3} MHz");
        Ok(applied)
    }

    fn set_rx_gain(&mut self, _gain_db: f64) -> Result<()> {
        // Not supported by the converter; accepted for API compatibility.
        Ok(())
    }

    fn set_tx_gain(&mut self, _gain_db: f64) -> Result<()> {
        Ok(())
    }

    fn rx_gain(&self) -> Result<f64> {
        Ok(50.0)
    }

    fn tx_gain(&self) -> Result<f64> {
        Ok(60.0)
    }

    fn current_sample_rate(&self) -> Option<u64> {
        (self.sample_rate > 0).then_some(self.sample_rate)
    }

    fn status_port(&self) -> Arc<dyn StatusPort> {
        Arc::new(RfdcStatus {
            regs: Arc::clone(&self.regs),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::tiles::FirmwareTiles;

    fn status_window() -> (tempfile::NamedTempFile, RegisterWindow) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; STATUS_WINDOW_LEN]).unwrap();
        f.flush().unwrap();
        let regs = RegisterWindow::open(f.path(), 0, STATUS_WINDOW_LEN).unwrap();
        (f, regs)
    }

    fn frontend() -> (tempfile::NamedTempFile, RfdcFrontend) {
        let (f, regs) = status_window();
        let frontend = RfdcFrontend::new(
            Box::new(FirmwareTiles::new()),
            regs,
            ClockSource::Internal,
        )
        .unwrap();
        (f, frontend)
    }

    #[test]
    fn test_nco_rule_below_twice_pll() {
        // 2.4 GHz sits below 2 F_pll: offset is F_pll - f.
        assert!((nco_offset_mhz(2_400_000_000.0) - (-433.92)).abs() < 1e-9);
        assert!((nco_offset_mhz(2_457_600_000.0) - (-491.52)).abs() < 1e-9);
    }

    #[test]
    fn test_nco_rule_above_twice_pll() {
        let f = 2.5 * PLL_FREQ_MHZ * 1e6;
        assert!((nco_offset_mhz(f) - (-0.5 * PLL_FREQ_MHZ)).abs() < 1e-9);
    }

    #[test]
    fn test_set_rx_freq_programs_mixer() {
        let (_f, mut frontend) = frontend();
        let applied = frontend.set_rx_freq(0, 2_400_000_000.0).unwrap();
        assert!((applied - (-433.92)).abs() < 1e-9);
    }

    #[test]
    fn test_set_tx_freq_negates_nco() {
        let (_f, mut frontend) = frontend();
        let applied = frontend.set_tx_freq(0, 2_400_000_000.0).unwrap();
        assert!((applied - 433.92).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_channel_falls_back_to_zero() {
        let (_f, mut frontend) = frontend();
        let applied = frontend.set_rx_freq(7, 2_400_000_000.0).unwrap();
        assert!((applied - (-433.92)).abs() < 1e-9);
    }

    #[test]
    fn test_sample_rate_writes_nfft() {
        let (f, mut frontend) = frontend();
        assert_eq!(frontend.set_sample_rate(1_920_000).unwrap(), 1_920_000);
        let view = RegisterWindow::open(f.path(), 0, STATUS_WINDOW_LEN).unwrap();
        assert_eq!(view.read(REG_NFFT), 128);

        assert_eq!(frontend.set_sample_rate(7_680_000).unwrap(), 7_680_000);
        assert_eq!(view.read(REG_NFFT), 512);
    }

    #[test]
    fn test_invalid_sample_rate_is_rejected() {
        let (_f, mut frontend) = frontend();
        assert_eq!(
            frontend.set_sample_rate(1_000_000).unwrap_err(),
            FrontendError::UnsupportedRate(1_000_000)
        );
        assert_eq!(frontend.current_sample_rate(), None);
    }

    #[test]
    fn test_status_port_maps_words() {
        let (f, frontend) = frontend();
        let view = RegisterWindow::open(f.path(), 0, STATUS_WINDOW_LEN).unwrap();
        view.write(REG_LATE, 3);
        view.write(REG_MMCM_LOCK, 1);
        view.write(REG_RX_CHANNELS, 2);

        let port = frontend.status_port();
        assert_eq!(port.status(StatusRegister::Late), 3);
        assert_eq!(port.status(StatusRegister::MmcmLock), 1);
        assert_eq!(port.status(StatusRegister::RxChannels), 2);
        assert_eq!(port.status(StatusRegister::Overflow), 0);
        assert_eq!(frontend.provisioned_rx_channels(), 2);
    }
}
