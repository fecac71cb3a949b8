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

//! Immutable planar PCM buffers.
//!
//! Sample data lives behind an `Arc` so a buffer can be handed to any number of
//! voices (and to the audio thread) without copying.

use std::fmt;
use std::sync::Arc;

use super::error::BufferError;

/// An immutable block of floating-point PCM audio, one sample vector per channel.
#[derive(Clone, PartialEq)]
pub struct AudioBuffer {
    /// Planar sample data, all channels the same length.
    channels: Arc<Vec<Vec<f32>>>,
    /// Sample rate in Hz.
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a buffer from planar channel data.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, BufferError> {
        if sample_rate == 0 {
            return Err(BufferError::ZeroSampleRate);
        }
        let expected = match channels.first() {
            Some(first) => first.len(),
            None => return Err(BufferError::NoChannels),
        };
        if let Some((channel, data)) = channels
            .iter()
            .enumerate()
            .find(|(_, data)| data.len() != expected)
        {
            return Err(BufferError::RaggedChannels {
                channel,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            channels: Arc::new(channels),
            sample_rate,
        })
    }

    /// Creates a buffer by splitting interleaved samples into channels.
    pub fn from_interleaved(
        sample_rate: u32,
        channel_count: usize,
        samples: &[f32],
    ) -> Result<Self, BufferError> {
        if channel_count == 0 {
            return Err(BufferError::NoChannels);
        }
        if samples.len() % channel_count != 0 {
            return Err(BufferError::PartialFrame {
                samples: samples.len(),
                channels: channel_count,
            });
        }

        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    /// Creates a silent buffer of the given shape.
    pub fn silent(
        sample_rate: u32,
        channel_count: usize,
        frames: usize,
    ) -> Result<Self, BufferError> {
        if channel_count == 0 {
            return Err(BufferError::NoChannels);
        }
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Samples for one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Returns the samples interleaved frame by frame.
    pub fn interleaved(&self) -> Vec<f32> {
        let channel_count = self.channel_count();
        let mut samples = Vec::with_capacity(self.frame_count() * channel_count);
        for frame in 0..self.frame_count() {
            for channel in self.channels.iter() {
                samples.push(channel[frame]);
            }
        }
        samples
    }

    /// Returns true if both buffers share the same sample storage.
    pub fn shares_storage(&self, other: &AudioBuffer) -> bool {
        Arc::ptr_eq(&self.channels, &other.channels)
    }
}

impl fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("channels", &self.channel_count())
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frame_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_shapes() {
        assert_eq!(AudioBuffer::new(44100, vec![]), Err(BufferError::NoChannels));
        assert_eq!(
            AudioBuffer::new(0, vec![vec![0.0]]),
            Err(BufferError::ZeroSampleRate)
        );
        assert_eq!(
            AudioBuffer::new(44100, vec![vec![0.0; 4], vec![0.0; 3]]),
            Err(BufferError::RaggedChannels {
                channel: 1,
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_interleaving() {
        let buffer =
            AudioBuffer::from_interleaved(48000, 2, &[0.1, -0.1, 0.2, -0.2, 0.3, -0.3]).unwrap();
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 3);
        assert_eq!(buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.interleaved(), vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);

        assert_eq!(
            AudioBuffer::from_interleaved(48000, 2, &[0.0; 3]),
            Err(BufferError::PartialFrame {
                samples: 3,
                channels: 2
            })
        );
    }

    #[test]
    fn test_duration_and_sharing() {
        let buffer = AudioBuffer::silent(44100, 1, 22050).unwrap();
        assert!((buffer.duration_seconds() - 0.5).abs() < 1e-12);

        let clone = buffer.clone();
        assert!(clone.shares_storage(&buffer));
        let other = AudioBuffer::silent(44100, 1, 22050).unwrap();
        assert!(!other.shares_storage(&buffer));
        assert_eq!(other, buffer);
    }
}
