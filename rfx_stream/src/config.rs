//! Packet sizing.
//!
//! DMA packet sizes follow the configured resource-block count: small
//! cells ride on the minimum packet, mid-size cells double it, larger
//! cells move to subframe-derived packets so packet rate stays bounded.

/// Rate applied when a stream starts before any rate was configured.
pub const DEFAULT_SAMPLE_RATE: u64 = 1_920_000;

/// Capacity of the engine-side conversion scratch buffers, in 16-bit
/// sample components.
pub const CONVERT_BUFFER_SAMPLES: usize = 1 << 20;

/// Baseband symbol size for a resource-block count.
pub fn symbol_size(n_prb: u32) -> Option<u32> {
    match n_prb {
        0 => None,
        1..=6 => Some(128),
        7..=15 => Some(256),
        16..=25 => Some(384),
        26..=52 => Some(768),
        53..=79 => Some(1024),
        80..=110 => Some(1536),
        _ => None,
    }
}

/// Samples in one 1 ms subframe for a resource-block count.
pub fn subframe_samples(n_prb: u32) -> Option<u32> {
    symbol_size(n_prb).map(|sz| 15 * sz)
}

/// IQ pairs per DMA packet (metadata prefix excluded).
pub fn data_buffer_samples(n_prb: u32, min_data_samples: u32) -> Option<u32> {
    if n_prb <= 6 {
        Some(min_data_samples)
    } else if n_prb <= 15 {
        Some(2 * min_data_samples)
    } else if n_prb <= 25 {
        subframe_samples(n_prb)
    } else {
        subframe_samples(n_prb).map(|sf| sf / 2)
    }
}
