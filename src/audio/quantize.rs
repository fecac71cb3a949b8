// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Duration quantization: rewrites a clip to an exact frame count anchored at its onset.

use std::collections::TryReserveError;

use thiserror::Error;
use tracing::debug;

use super::buffer::AudioBuffer;
use super::error::BufferError;
use super::onset::OnsetDetector;

/// Longest target the quantizer will allocate, in frames per channel.
pub const MAX_TARGET_FRAMES: usize = 1 << 31;

#[derive(Debug, Error)]
pub enum QuantizationError {
    #[error("target duration must be a positive, finite number of seconds (got {0})")]
    InvalidTarget(f64),

    #[error("target of {frames} frames exceeds the {max} frame limit")]
    TargetTooLong { frames: f64, max: usize },

    #[error("unable to allocate quantized buffer: {0}")]
    Allocation(#[from] TryReserveError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Frame count for a duration, rounded to the nearest frame.
pub fn target_frames(target_seconds: f64, sample_rate: u32) -> Result<usize, QuantizationError> {
    if !target_seconds.is_finite() || target_seconds <= 0.0 {
        return Err(QuantizationError::InvalidTarget(target_seconds));
    }
    let frames = (target_seconds * sample_rate as f64).round();
    if frames > MAX_TARGET_FRAMES as f64 {
        return Err(QuantizationError::TargetTooLong {
            frames,
            max: MAX_TARGET_FRAMES,
        });
    }
    Ok(frames as usize)
}

/// Trims or pads buffers to an exact length starting at their first transient.
#[derive(Clone, Copy, Debug, Default)]
pub struct Quantizer {
    detector: OnsetDetector,
}

impl Quantizer {
    pub fn new(detector: OnsetDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &OnsetDetector {
        &self.detector
    }

    /// Produces a new buffer of exactly `target_seconds`, copied from the detected onset
    /// (or frame 0 when detection is off). Short sources are padded with silence, long
    /// ones trimmed. The source buffer is left untouched.
    pub fn quantize(
        &self,
        buffer: &AudioBuffer,
        target_seconds: f64,
        detect_onset: bool,
    ) -> Result<AudioBuffer, QuantizationError> {
        let onset = if detect_onset {
            self.detector.detect_frame(buffer)
        } else {
            0
        };
        self.quantize_from(buffer, target_seconds, onset)
    }

    /// Same as [`Quantizer::quantize`] with an explicit start frame.
    pub fn quantize_from(
        &self,
        buffer: &AudioBuffer,
        target_seconds: f64,
        start_frame: usize,
    ) -> Result<AudioBuffer, QuantizationError> {
        let target = target_frames(target_seconds, buffer.sample_rate())?;
        let available = buffer.frame_count().saturating_sub(start_frame);
        let copied = available.min(target);

        let mut channels = Vec::new();
        channels.try_reserve_exact(buffer.channel_count())?;
        for source in buffer.channels() {
            let mut channel = Vec::new();
            channel.try_reserve_exact(target)?;
            if copied > 0 {
                channel.extend_from_slice(&source[start_frame..start_frame + copied]);
            }
            channel.resize(target, 0.0);
            channels.push(channel);
        }

        if copied < target {
            debug!(
                start_frame,
                target_frames = target,
                padded_frames = target - copied,
                "Padding clip with silence"
            );
        } else if available > target {
            debug!(
                start_frame,
                target_frames = target,
                trimmed_frames = available - target,
                "Trimming clip"
            );
        }

        Ok(AudioBuffer::new(buffer.sample_rate(), channels)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{constant, index_ramp, silence_then_tone};

    #[test]
    fn test_exact_length_for_longer_and_shorter_sources() {
        let quantizer = Quantizer::default();
        for source_frames in [0usize, 1, 1000, 44100, 300_000] {
            let source = constant(44100, 2, source_frames, 0.5);
            for target in [0.001, 0.5, 1.0, 2.4, 4.8, 7.123_456] {
                let out = quantizer.quantize(&source, target, true).unwrap();
                assert_eq!(
                    out.frame_count(),
                    (target * 44100.0_f64).round() as usize,
                    "source {source_frames} target {target}"
                );
                assert_eq!(out.channel_count(), 2);
                assert_eq!(out.sample_rate(), 44100);
            }
        }
    }

    #[test]
    fn test_padding_is_silent() {
        let source = constant(1000, 1, 300, 0.75);
        let out = Quantizer::default().quantize(&source, 0.5, false).unwrap();
        assert_eq!(out.frame_count(), 500);
        assert!(out.channel(0)[..300].iter().all(|&s| s == 0.75));
        assert!(out.channel(0)[300..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_trim_keeps_leading_frames() {
        let source = index_ramp(1000, 2000);
        let out = Quantizer::default().quantize(&source, 1.0, false).unwrap();
        assert_eq!(out.channel(0), &source.channel(0)[..1000]);
    }

    #[test]
    fn test_explicit_start_frame() {
        let source = index_ramp(1000, 2000);
        let out = Quantizer::default()
            .quantize_from(&source, 0.5, 1800)
            .unwrap();
        assert_eq!(&out.channel(0)[..200], &source.channel(0)[1800..]);
        assert!(out.channel(0)[200..].iter().all(|&s| s == 0.0));

        let past_end = Quantizer::default()
            .quantize_from(&source, 0.5, 5000)
            .unwrap();
        assert!(past_end.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_source_is_not_mutated() {
        let source = index_ramp(1000, 100);
        let before = source.clone();
        let out = Quantizer::default().quantize(&source, 0.05, false).unwrap();
        assert_eq!(source, before);
        assert!(!out.shares_storage(&source));
    }

    #[test]
    fn test_invalid_targets() {
        let source = constant(1000, 1, 10, 0.0);
        let quantizer = Quantizer::default();
        for target in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                quantizer.quantize(&source, target, true),
                Err(QuantizationError::InvalidTarget(_))
            ));
        }
        assert!(matches!(
            quantizer.quantize(&source, 1e12, true),
            Err(QuantizationError::TargetTooLong { .. })
        ));
    }

    #[test]
    fn test_generated_clip_anchors_on_onset() {
        // 3.2 s clip with 0.4 s of leading silence, one 2-bar loop at 100 bpm.
        let clip = silence_then_tone(44100, 2, 0.4, 2.8, 0.5);
        assert_eq!(clip.frame_count(), (3.2_f64 * 44100.0).round() as usize);

        let loop_seconds = 2.0 * 4.0 * 60.0 / 100.0;
        let out = Quantizer::default().quantize(&clip, loop_seconds, true).unwrap();

        assert_eq!(out.frame_count(), (4.8_f64 * 44100.0).round() as usize);
        let onset = Quantizer::default().detector().detect_frame(&clip);
        assert!((onset as f64 / 44100.0 - 0.4).abs() <= 128.0 / 44100.0);

        // The body after the onset is shorter than the loop, so the tail is padding.
        let copied = clip.frame_count() - onset;
        assert_eq!(out.channel(0)[..copied], clip.channel(0)[onset..]);
        assert!(out.channel(1)[copied..].iter().all(|&s| s == 0.0));
    }
}
