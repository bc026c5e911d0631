//! Temporal context for a sparsely sampled frame batch.
//!
//! A batch covers `duration_seconds` of wall-clock time with only a handful
//! of frames, so the frames have to be mapped back onto a time axis before
//! the vision model sees them.  The model groups consecutive frames into
//! fixed-size temporal patches ("merge groups"); [`compute_timestamps`]
//! reproduces that grouping so each patch can be labelled with one time.

use crate::protocol::BatchMetadata;

/// Natural-language preamble describing the segment's span.
///
/// Empty when the segment starts at the beginning of the source; the
/// duration alone frames the clip in that case.
pub fn describe(start_time: f64, duration_seconds: f64) -> String {
    if start_time > 0.0 {
        let end_time = start_time + duration_seconds;
        format!("This video segment spans from {start_time:.1}s to {end_time:.1}s. ")
    } else {
        String::new()
    }
}

/// One representative timestamp (seconds) per merge group.
///
/// The index sequence `0..frame_count` is right-padded with its last index
/// up to a multiple of `merge_size`, so padding duplicates the final instant
/// rather than inventing new time.  Each group is represented by the mean of
/// its first and last timestamp.
pub fn compute_timestamps(frame_count: usize, effective_fps: f64, merge_size: usize) -> Vec<f64> {
    if frame_count == 0 {
        return Vec::new();
    }
    let merge_size = merge_size.max(1);

    let mut indices: Vec<usize> = (0..frame_count).collect();
    let remainder = indices.len() % merge_size;
    if remainder != 0 {
        let last = frame_count - 1;
        indices.extend(std::iter::repeat(last).take(merge_size - remainder));
    }

    let timestamps: Vec<f64> = indices
        .iter()
        .map(|&i| i as f64 / effective_fps)
        .collect();

    timestamps
        .chunks(merge_size)
        .map(|group| (group[0] + group[group.len() - 1]) / 2.0)
        .collect()
}

/// Frame rate used to map frame index to elapsed time.
///
/// Metadata `fps` wins when it is positive.  Otherwise the rate is derived
/// so that the first and last frames span the full duration, and
/// `fallback` covers batches with a single frame or no duration.
pub fn effective_fps(metadata: &BatchMetadata, frame_count: usize, fallback: f64) -> f64 {
    if let Some(fps) = metadata.fps.filter(|f| f.is_finite() && *f > 0.0) {
        return fps;
    }
    if metadata.duration_seconds > 0.0 && frame_count > 1 {
        (frame_count - 1) as f64 / metadata.duration_seconds
    } else {
        fallback
    }
}

/// Everything the model needs to place a batch in time.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalContext {
    pub preamble: String,
    pub effective_fps: f64,
    /// One entry per merge group, in group order.
    pub timestamps: Vec<f64>,
}

impl TemporalContext {
    pub fn build(
        metadata: &BatchMetadata,
        frame_count: usize,
        merge_size: usize,
        fallback_fps: f64,
    ) -> TemporalContext {
        let fps = effective_fps(metadata, frame_count, fallback_fps);
        TemporalContext {
            preamble: describe(metadata.start_time, metadata.duration_seconds),
            effective_fps: fps,
            timestamps: compute_timestamps(frame_count, fps, merge_size),
        }
    }
}
