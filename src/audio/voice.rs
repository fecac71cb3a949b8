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

//! Render-side playback voices.
//!
//! A [`Voice`] is owned by the mixer on the audio thread. The control side keeps an
//! `Arc<VoiceControl>` to retune or stop it without taking any lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::buffer::AudioBuffer;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// An `f32` shared between the control and audio threads.
pub struct SharedLevel(AtomicU32);

impl SharedLevel {
    pub fn new(value: f32) -> Arc<SharedLevel> {
        Arc::new(SharedLevel(AtomicU32::new(value.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Lock-free handle to a sounding voice.
pub struct VoiceControl {
    id: u64,
    /// Playback-rate multiplier stored as `f64` bits.
    rate: AtomicU64,
    stopped: AtomicBool,
    finished: AtomicBool,
}

impl VoiceControl {
    pub fn new(rate: f64) -> Arc<VoiceControl> {
        Arc::new(VoiceControl {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::Relaxed),
            rate: AtomicU64::new(rate.to_bits()),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Asks the mixer to drop the voice at the start of its next block.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True once the voice has played out or been dropped by the mixer.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        !self.is_stopped() && !self.is_finished()
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl fmt::Debug for VoiceControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceControl")
            .field("id", &self.id)
            .field("rate", &self.rate())
            .field("stopped", &self.is_stopped())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// One playback instance of a buffer, read with linear interpolation.
pub struct Voice {
    buffer: AudioBuffer,
    control: Arc<VoiceControl>,
    gain: Arc<SharedLevel>,
    /// Read position in source frames.
    position: f64,
    /// Absolute transport frame at which output begins.
    start_at_frame: u64,
    looping: bool,
}

impl Voice {
    pub fn new(
        buffer: AudioBuffer,
        control: Arc<VoiceControl>,
        gain: Arc<SharedLevel>,
        start_at_frame: u64,
        looping: bool,
    ) -> Voice {
        Voice {
            buffer,
            control,
            gain,
            position: 0.0,
            start_at_frame,
            looping,
        }
    }

    pub fn control(&self) -> &Arc<VoiceControl> {
        &self.control
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Adds this voice into an interleaved block whose first frame sits at transport
    /// frame `first_frame`. Output channel `c` reads source channel `c % source_channels`.
    /// Returns false once the voice is done and should be dropped.
    pub fn render(
        &mut self,
        out: &mut [f32],
        channels: usize,
        first_frame: u64,
        output_rate: u32,
    ) -> bool {
        if self.control.is_stopped() || channels == 0 {
            self.control.finish();
            return false;
        }

        let frames = self.buffer.frame_count();
        let step = self.control.rate() * self.buffer.sample_rate() as f64 / output_rate as f64;
        if frames == 0 || !step.is_finite() || step <= 0.0 {
            self.control.finish();
            return false;
        }

        let skip = self.start_at_frame.saturating_sub(first_frame);
        let block_frames = out.len() / channels;
        if skip >= block_frames as u64 {
            return true;
        }

        let gain = self.gain.get();
        let source_channels = self.buffer.channel_count();
        for frame in out.chunks_exact_mut(channels).skip(skip as usize) {
            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = if index + 1 < frames {
                index + 1
            } else if self.looping {
                0
            } else {
                index
            };

            for (c, sample) in frame.iter_mut().enumerate() {
                let data = self.buffer.channel(c % source_channels);
                let a = data[index];
                let b = data[next];
                *sample += (a + (b - a) * frac) * gain;
            }

            self.position += step;
            if self.position >= frames as f64 {
                if self.looping {
                    self.position %= frames as f64;
                } else {
                    self.control.finish();
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Debug for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voice")
            .field("id", &self.control.id())
            .field("buffer", &self.buffer)
            .field("position", &self.position)
            .field("start_at_frame", &self.start_at_frame)
            .field("looping", &self.looping)
            .finish()
    }
}
