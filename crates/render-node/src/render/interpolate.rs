//! Detection matching and box interpolation between the two keyframes
//! of a clip.

use common::detections::Detection;

/// Greedy nearest-center assignment between the first-keyframe and
/// last-keyframe detection sets: repeatedly take the unmatched pair
/// with the smallest center distance until one side runs out. Returns
/// `(first_index, last_index)` pairs.
pub fn match_detections(first: &[Detection], last: &[Detection]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(first.len().min(last.len()));
    let mut used_first = vec![false; first.len()];
    let mut used_last = vec![false; last.len()];
    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for (i, a) in first.iter().enumerate() {
            if used_first[i] {
                continue;
            }
            for (j, b) in last.iter().enumerate() {
                if used_last[j] {
                    continue;
                }
                let distance = a.bbox.center_distance(&b.bbox);
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some((i, j, distance));
                }
            }
        }
        match best {
            Some((i, j, _)) => {
                used_first[i] = true;
                used_last[j] = true;
                pairs.push((i, j));
            }
            None => break,
        }
    }
    pairs
}

fn lerp(a: f32, b: f32, w: f32) -> f32 {
    a + (b - a) * w
}

/// Box interpolated between a matched pair. Identity fields follow the
/// last keyframe's detection, since that is the more recent sighting.
fn lerp_detection(a: &Detection, b: &Detection, w: f32) -> Detection {
    let mut out = b.clone();
    out.bbox.x = lerp(a.bbox.x, b.bbox.x, w);
    out.bbox.y = lerp(a.bbox.y, b.bbox.y, w);
    out.bbox.width = lerp(a.bbox.width, b.bbox.width, w);
    out.bbox.height = lerp(a.bbox.height, b.bbox.height, w);
    out
}

/// Per-frame detection sets for a clip of `total_frames` frames whose
/// first and last frames were actually run through the detector.
///
/// Frame 0 carries `first` verbatim and frame `total_frames - 1`
/// carries `last` verbatim. Each intermediate frame k (0-indexed among
/// the intermediates) gets matched pairs interpolated with weight
/// `(k + 1) / (total_frames - 1)`, plus any unmatched last-keyframe
/// detection held at its final position as a newly appeared object.
pub fn interpolate_window(
    first: &[Detection],
    last: &[Detection],
    total_frames: usize,
) -> Vec<Vec<Detection>> {
    match total_frames {
        0 => return Vec::new(),
        1 => return vec![first.to_vec()],
        _ => {}
    }

    let pairs = match_detections(first, last);
    let mut matched_last = vec![false; last.len()];
    for &(_, j) in &pairs {
        matched_last[j] = true;
    }
    let appeared: Vec<usize> = (0..last.len()).filter(|&j| !matched_last[j]).collect();

    let mut frames = Vec::with_capacity(total_frames);
    frames.push(first.to_vec());
    for k in 0..total_frames - 2 {
        let w = (k + 1) as f32 / (total_frames - 1) as f32;
        let mut detections = Vec::with_capacity(pairs.len() + appeared.len());
        for &(i, j) in &pairs {
            detections.push(lerp_detection(&first[i], &last[j], w));
        }
        for &j in &appeared {
            detections.push(last[j].clone());
        }
        frames.push(detections);
    }
    frames.push(last.to_vec());
    frames
}
