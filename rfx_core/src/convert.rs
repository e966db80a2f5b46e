//! q15 sample conversion.
//!
//! Baseband samples cross the DMA path as interleaved signed 16-bit I/Q
//! pairs (q15 fixed point); user code works in `f32`. The TX multiplier
//! stays just below full scale so +1.0 cannot overflow the 16-bit range.

/// Divisor applied when widening q15 samples to `f32`.
pub const Q15_SCALE: f32 = 32768.0;

/// Multiplier applied when quantizing `f32` samples to q15.
pub const Q15_TX_SCALE: f32 = 32767.999;

/// Quantizes interleaved `f32` samples to q15.
///
/// Values outside [-1.0, 1.0] saturate at the 16-bit limits.
pub fn f32_to_q15(src: &[f32], dst: &mut [i16]) {
    assert_eq!(src.len(), dst.len());
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        // `as` saturates on out-of-range floats, which is the clamp we want.
        *d = (s * Q15_TX_SCALE) as i16;
    }
}

/// Widens interleaved q15 samples to `f32` in [-1.0, 1.0).
pub fn q15_to_f32(src: &[i16], dst: &mut [f32]) {
    assert_eq!(src.len(), dst.len());
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = s as f32 / Q15_SCALE;
    }
}

/// Views a q15 slice as raw little-endian bytes for ring transfers.
pub fn q15_as_bytes(samples: &[i16]) -> &[u8] {
    // SAFETY: i16 has no padding and alignment 2 >= 1; the byte view
    // covers exactly the same memory.
    unsafe { std::slice::from_raw_parts(samples.as_ptr() as *const u8, samples.len() * 2) }
}

/// Mutable byte view of a q15 slice.
pub fn q15_as_bytes_mut(samples: &mut [i16]) -> &mut [u8] {
    // SAFETY: as above; any byte pattern is a valid i16.
    unsafe { std::slice::from_raw_parts_mut(samples.as_mut_ptr() as *mut u8, samples.len() * 2) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_error_bound() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let inputs: Vec<f32> = (0..4096)
            .map(|_| rng.gen_range(-1.0f32..=(1.0 - 1.0 / 32768.0)))
            .collect();
        let mut q = vec![0i16; inputs.len()];
        let mut back = vec![0.0f32; inputs.len()];

        f32_to_q15(&inputs, &mut q);
        q15_to_f32(&q, &mut back);

        for (&x, &y) in inputs.iter().zip(back.iter()) {
            assert!((x - y).abs() <= 1.0 / 32767.0, "x={x} y={y}");
        }
    }

    #[test]
    fn test_saturation() {
        let mut q = [0i16; 4];
        f32_to_q15(&[2.0, -2.0, 1.0, -1.0], &mut q);
        assert_eq!(q[0], i16::MAX);
        assert_eq!(q[1], i16::MIN);
        assert_eq!(q[2], i16::MAX);
        assert_eq!(q[3], -32767);
    }

    #[test]
    fn test_byte_view_is_little_endian() {
        let samples = [0x0102i16, -1];
        let bytes = q15_as_bytes(&samples);
        assert_eq!(bytes, &[0x02, 0x01, 0xFF, 0xFF]);
    }
}
