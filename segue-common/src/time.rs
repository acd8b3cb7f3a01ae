//! Time unit helpers
//!
//! Engine positions and lengths are nanoseconds in `u64`; settings carry
//! milliseconds.

pub const NSEC_PER_MSEC: u64 = 1_000_000;
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

pub fn ms_to_nanos(ms: u64) -> u64 {
    ms.saturating_mul(NSEC_PER_MSEC)
}

/// Number of interleaved frames covering `nanos` at `sample_rate`.
pub fn nanos_to_frames(nanos: u64, sample_rate: u32) -> u64 {
    ((nanos as u128 * sample_rate as u128) / NSEC_PER_SEC as u128) as u64
}

pub fn frames_to_nanos(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    ((frames as u128 * NSEC_PER_SEC as u128) / sample_rate as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_nanos_conversion() {
        assert_eq!(ms_to_nanos(100), 100_000_000);
        assert_eq!(ms_to_nanos(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_frame_conversion() {
        assert_eq!(nanos_to_frames(NSEC_PER_SEC, 44_100), 44_100);
        assert_eq!(nanos_to_frames(500 * NSEC_PER_MSEC, 48_000), 24_000);
        assert_eq!(frames_to_nanos(44_100, 44_100), NSEC_PER_SEC);
        assert_eq!(frames_to_nanos(10, 0), 0);
    }
}
