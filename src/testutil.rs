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

//! Signal generators shared by the unit tests.

use std::f32::consts::PI;

use crate::audio::AudioBuffer;

/// Frames covering the given number of seconds.
pub fn frames_for(sample_rate: u32, seconds: f64) -> usize {
    (seconds * sample_rate as f64).round() as usize
}

/// A sine tone on every channel.
pub fn tone(
    sample_rate: u32,
    channels: usize,
    frequency: f32,
    amplitude: f32,
    seconds: f64,
) -> AudioBuffer {
    let frames = frames_for(sample_rate, seconds);
    let plane: Vec<f32> = (0..frames)
        .map(|i| amplitude * (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
        .collect();
    AudioBuffer::new(sample_rate, vec![plane; channels]).unwrap()
}

/// Leading digital silence followed by a 440 Hz tone.
pub fn silence_then_tone(
    sample_rate: u32,
    channels: usize,
    silence_seconds: f64,
    tone_seconds: f64,
    amplitude: f32,
) -> AudioBuffer {
    let silence = frames_for(sample_rate, silence_seconds);
    let body = tone(sample_rate, 1, 440.0, amplitude, tone_seconds);
    let mut plane = vec![0.0; silence];
    plane.extend_from_slice(body.channel(0));
    AudioBuffer::new(sample_rate, vec![plane; channels]).unwrap()
}

/// A buffer whose every sample holds the constant `value`.
pub fn constant(sample_rate: u32, channels: usize, frames: usize, value: f32) -> AudioBuffer {
    AudioBuffer::new(sample_rate, vec![vec![value; frames]; channels]).unwrap()
}

/// A mono buffer where sample `i` is `i as f32 / frames`, handy for checking offsets.
pub fn index_ramp(sample_rate: u32, frames: usize) -> AudioBuffer {
    let plane = (0..frames).map(|i| i as f32 / frames as f32).collect();
    AudioBuffer::new(sample_rate, vec![plane]).unwrap()
}
