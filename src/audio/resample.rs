//! Sample-rate conversion between the wire (8 kHz), the models (16 kHz),
//! and the synthesizer (24 kHz).
//!
//! Linear interpolation and decimation are deliberate: they run in
//! microseconds per frame and produce deterministic output lengths, which
//! the frame pipeline depends on (every inbound 160-sample frame becomes
//! exactly 320 samples at 16 kHz).

/// Upsample 8 kHz PCM to 16 kHz by 2x linear interpolation.
///
/// Output length is exactly `2 * input.len()`.
pub fn upsample_8k_to_16k(audio: &[i16]) -> Vec<i16> {
    let n = audio.len();
    if n == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(n * 2);
    for i in 0..n {
        let current = audio[i];
        out.push(current);
        // Midpoint with the next sample; the last sample is held.
        let next = if i + 1 < n { audio[i + 1] } else { current };
        let mid = (i32::from(current) + i32::from(next)) / 2;
        out.push(mid as i16);
    }
    out
}

/// Downsample 16 kHz PCM to 8 kHz by taking every other sample.
pub fn downsample_16k_to_8k(audio: &[i16]) -> Vec<i16> {
    audio.iter().step_by(2).copied().collect()
}

/// Downsample 24 kHz PCM to 8 kHz by taking every third sample.
pub fn downsample_24k_to_8k(audio: &[i16]) -> Vec<i16> {
    audio.iter().step_by(3).copied().collect()
}
