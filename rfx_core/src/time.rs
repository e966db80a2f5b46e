//! Hardware timestamp mapping.
//!
//! The FPGA counts samples; user code speaks (seconds, fractional
//! seconds). Both views meet at the current sample rate.

/// Converts a wall-time instant to an integer tick count at `rate_hz`.
pub fn ticks_from_time(secs: u64, frac_secs: f64, rate_hz: u64) -> u64 {
    debug_assert!(rate_hz > 0);
    rate_hz * secs + (rate_hz as f64 * frac_secs).round() as u64
}

/// Converts an integer tick count back to (seconds, fractional seconds).
pub fn time_from_ticks(ticks: u64, rate_hz: u64) -> (u64, f64) {
    debug_assert!(rate_hz > 0);
    let secs = ticks / rate_hz;
    let frac = (ticks % rate_hz) as f64 / rate_hz as f64;
    (secs, frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATES: [u64; 4] = [1_920_000, 3_840_000, 7_680_000, 11_520_000];

    #[test]
    fn test_exact_round_trip_on_tick_boundaries() {
        for &rate in &RATES {
            for &(secs, frac) in &[(0u64, 0.0f64), (1, 0.0), (1, 0.5), (3, 0.001), (100, 0.9995)] {
                let ticks = ticks_from_time(secs, frac, rate);
                let (s, f) = time_from_ticks(ticks, rate);
                // frac values above land on whole ticks for these rates
                assert_eq!(s, secs);
                assert!((f - frac).abs() < 1e-9, "rate={rate} frac={frac} f={f}");
            }
        }
    }

    #[test]
    fn test_non_integral_frac_within_one_tick() {
        let rate = 1_920_000;
        let frac = 0.123_456_789;
        let ticks = ticks_from_time(5, frac, rate);
        let (s, f) = time_from_ticks(ticks, rate);
        assert_eq!(s, 5);
        assert!((f - frac).abs() <= 1.0 / rate as f64);
    }

    #[test]
    fn test_ticks_are_idempotent_through_time() {
        let rate = 7_680_000;
        for ticks in [0u64, 1, 7_679_999, 7_680_000, 123_456_789] {
            let (s, f) = time_from_ticks(ticks, rate);
            assert_eq!(ticks_from_time(s, f, rate), ticks);
        }
    }

    #[test]
    fn test_scenario_one_subframe_at_one_second() {
        // 1920 samples sent at t = (1, 0.0) with a 1.92 MHz clock start
        // at tick 1_920_000.
        assert_eq!(ticks_from_time(1, 0.0, 1_920_000), 1_920_000);
    }
}
