//! Frame-rate resampling: the encoder is always fed exactly the
//! nominal clip duration worth of frames regardless of how many the
//! decoder produced.

/// Frames the encoder expects for one clip.
pub fn target_frame_count(duration_secs: u64, fps: u32) -> usize {
    (duration_secs as f64 * fps as f64).round() as usize
}

/// Nearest-index lookup into a decoded sequence of length `decoded`,
/// duplicating or dropping frames so the result has length exactly
/// `target`.
pub fn resample_indices(decoded: usize, target: usize) -> Vec<usize> {
    if decoded == 0 || target == 0 {
        return Vec::new();
    }
    (0..target)
        .map(|i| {
            let index = (i as f64 * decoded as f64 / target as f64).round() as usize;
            index.min(decoded - 1)
        })
        .collect()
}
