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

//! First-transient detection.
//!
//! Generated clips routinely start with a variable stretch of silence or a slow
//! fade. The detector finds where audible energy begins so the quantizer can
//! anchor the loop there.

use serde::{Deserialize, Serialize};

use super::buffer::AudioBuffer;

/// Default RMS level a window must exceed to count as sound.
pub const DEFAULT_THRESHOLD_RMS: f32 = 0.02;

/// Default analysis window in frames.
pub const DEFAULT_WINDOW_SIZE: usize = 512;

/// Sliding-window RMS onset detector operating on channel 0.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnsetDetector {
    threshold_rms: f32,
    window_size: usize,
}

impl Default for OnsetDetector {
    fn default() -> Self {
        Self {
            threshold_rms: DEFAULT_THRESHOLD_RMS,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl OnsetDetector {
    pub fn new(threshold_rms: f32, window_size: usize) -> Self {
        Self {
            threshold_rms,
            window_size: window_size.max(1),
        }
    }

    pub fn threshold_rms(&self) -> f32 {
        self.threshold_rms
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Distance between successive analysis windows.
    pub fn hop_size(&self) -> usize {
        (self.window_size / 4).max(1)
    }

    /// Start frame of the first full window whose RMS exceeds the threshold.
    pub fn first_loud_window(&self, buffer: &AudioBuffer) -> Option<usize> {
        let samples = buffer.channel(0);
        let window = self.window_size;
        let threshold = self.threshold_rms as f64;

        let mut start = 0;
        while start + window < samples.len() {
            if rms(&samples[start..start + window]) > threshold {
                return Some(start);
            }
            start += self.hop_size();
        }
        None
    }

    /// Frame index at which sound begins, or 0 when nothing crosses the threshold.
    ///
    /// The first loud window is refined to the first sample inside it whose magnitude
    /// reaches the threshold, so the result sits within one hop of the true onset even
    /// when the window straddles the leading silence.
    pub fn detect_frame(&self, buffer: &AudioBuffer) -> usize {
        let Some(start) = self.first_loud_window(buffer) else {
            return 0;
        };
        let samples = &buffer.channel(0)[start..start + self.window_size];
        samples
            .iter()
            .position(|s| s.abs() >= self.threshold_rms)
            .map_or(start, |offset| start + offset)
    }

    /// Onset position in seconds.
    pub fn detect(&self, buffer: &AudioBuffer) -> f64 {
        self.detect_frame(buffer) as f64 / buffer.sample_rate() as f64
    }
}

/// Convenience wrapper matching the detector's default-argument form.
pub fn detect_onset(buffer: &AudioBuffer, threshold_rms: f32, window_size: usize) -> f64 {
    OnsetDetector::new(threshold_rms, window_size).detect(buffer)
}

fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}
