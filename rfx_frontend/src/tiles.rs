//! Data-converter tile collaborator.
//!
//! Tile bring-up (clock-chip programming, PLL dividers, Nyquist zones,
//! interpolation/decimation) belongs to the platform layer, not to the
//! streaming engine. The engine only needs the narrow surface below.

use rfx_core::Direction;

use crate::backend::ClockSource;
use crate::error::{FrontendError, Result};

/// Narrow control surface of the converter tiles.
pub trait TilePort: Send {
    /// One-time converter configuration against the given reference.
    fn configure(&mut self, clock: ClockSource, ref_freq_khz: f64) -> Result<()>;

    /// Programs the fine-mixer NCO of one block, in MHz.
    fn set_mixer_freq(&mut self, dir: Direction, channel: u32, freq_mhz: f64) -> Result<()>;

    /// Reads back the programmed mixer frequency.
    fn mixer_freq(&self, dir: Direction, channel: u32) -> Result<f64>;

    /// Wakes the tile driving `dir`.
    fn start(&mut self, dir: Direction) -> Result<()>;
}

const BLOCKS_PER_TILE: usize = 2;

/// Tiles brought up by platform firmware.
///
/// Mixer programming is accepted and tracked so read-backs stay
/// coherent; the physical NCO was loaded by the boot-time configuration
/// and follows the same rule.
#[derive(Debug, Default)]
pub struct FirmwareTiles {
    configured: bool,
    started_rx: bool,
    started_tx: bool,
    rx_mixer_mhz: [f64; BLOCKS_PER_TILE],
    tx_mixer_mhz: [f64; BLOCKS_PER_TILE],
}

impl FirmwareTiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, dir: Direction, channel: u32) -> Result<&mut f64> {
        let mixers = match dir {
            Direction::Rx => &mut self.rx_mixer_mhz,
            Direction::Tx => &mut self.tx_mixer_mhz,
        };
        mixers
            .get_mut(channel as usize)
            .ok_or(FrontendError::NoEnabledChannel)
    }
}

impl TilePort for FirmwareTiles {
    fn configure(&mut self, _clock: ClockSource, _ref_freq_khz: f64) -> Result<()> {
        self.configured = true;
        Ok(())
    }

    fn set_mixer_freq(&mut self, dir: Direction, channel: u32, freq_mhz: f64) -> Result<()> {
        if !self.configured {
            return Err(FrontendError::Backend("tiles not configured".into()));
        }
        *self.slot(dir, channel)? = freq_mhz;
        Ok(())
    }

    fn mixer_freq(&self, dir: Direction, channel: u32) -> Result<f64> {
        let mixers = match dir {
            Direction::Rx => &self.rx_mixer_mhz,
            Direction::Tx => &self.tx_mixer_mhz,
        };
        mixers
            .get(channel as usize)
            .copied()
            .ok_or(FrontendError::NoEnabledChannel)
    }

    fn start(&mut self, dir: Direction) -> Result<()> {
        if !self.configured {
            return Err(FrontendError::Backend("tiles not configured".into()));
        }
        match dir {
            Direction::Rx => self.started_rx = true,
            Direction::Tx => self.started_tx = true,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_round_trip() {
        let mut tiles = FirmwareTiles::new();
        tiles.configure(ClockSource::Internal, 245_760.0).unwrap();
        tiles.set_mixer_freq(Direction::Rx, 1, -433.92).unwrap();
        assert_eq!(tiles.mixer_freq(Direction::Rx, 1).unwrap(), -433.92);
        assert_eq!(tiles.mixer_freq(Direction::Tx, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_operations_require_configure() {
        let mut tiles = FirmwareTiles::new();
        assert!(tiles.set_mixer_freq(Direction::Rx, 0, 1.0).is_err());
        assert!(tiles.start(Direction::Tx).is_err());
    }

    #[test]
    fn test_out_of_range_channel() {
        let mut tiles = FirmwareTiles::new();
        tiles.configure(ClockSource::External, 245_760.0).unwrap();
        assert_eq!(
            tiles.set_mixer_freq(Direction::Rx, 4, 1.0).unwrap_err(),
            FrontendError::NoEnabledChannel
        );
    }
}
