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
// Core mixing logic, independent of the audio backend.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use thiserror::Error;

use super::voice::Voice;
use crate::clock::Clock;
use crate::playsync::CancelHandle;

/// Voices the mixer can hold before pushing a new one reallocates.
const VOICE_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MixerError {
    #[error("mixer command queue is full")]
    QueueFull,

    #[error("mixer is no longer running")]
    Disconnected,
}

impl<T> From<TrySendError<T>> for MixerError {
    fn from(value: TrySendError<T>) -> Self {
        match value {
            TrySendError::Full(_) => MixerError::QueueFull,
            TrySendError::Disconnected(_) => MixerError::Disconnected,
        }
    }
}

/// Commands sent from control threads to the audio thread.
pub enum MixerCommand {
    Play(Voice),
    Capture(Capture),
}

/// A window of mixed output copied out of the audio thread.
#[derive(Clone, Debug)]
pub struct CapturedTake {
    pub start_frame: u64,
    pub channels: usize,
    pub sample_rate: u32,
    /// Interleaved samples, exactly `frames * channels` long.
    pub samples: Vec<f32>,
}

/// A pending capture. Its sample storage is allocated by the requester so the audio
/// thread only copies into it.
pub struct Capture {
    start_frame: u64,
    frames: u64,
    /// Grid spacing used to push a late capture to the next boundary.
    realign_every: u64,
    /// Mirrors `start_frame` back to the requester.
    shared_start: Arc<AtomicU64>,
    samples: Vec<f32>,
    cancel: CancelHandle,
    done: Sender<CapturedTake>,
}

impl Capture {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.frames
    }

    /// Moves the start to the first grid boundary at or after `frame`.
    fn realign(&mut self, frame: u64) {
        if self.start_frame < frame && self.realign_every > 0 {
            let behind = frame - self.start_frame;
            self.start_frame += behind.div_ceil(self.realign_every) * self.realign_every;
            self.shared_start.store(self.start_frame, Ordering::Release);
        }
    }

    /// Copies the overlapping part of a block. Returns true once the window is complete.
    fn write(&mut self, block: &[f32], channels: usize, first_frame: u64) -> bool {
        let block_end = first_frame + (block.len() / channels) as u64;
        let from = self.start_frame.max(first_frame);
        let to = self.end_frame().min(block_end);
        if from < to {
            let src = ((from - first_frame) as usize) * channels;
            let dst = ((from - self.start_frame) as usize) * channels;
            let len = ((to - from) as usize) * channels;
            self.samples[dst..dst + len].copy_from_slice(&block[src..src + len]);
        }
        block_end >= self.end_frame()
    }
}

/// The requesting side of a capture.
pub struct PendingCapture {
    start_frame: Arc<AtomicU64>,
    done: Receiver<CapturedTake>,
}

impl PendingCapture {
    /// First frame of the window, including any realignment made by the audio thread.
    pub fn start_frame(&self) -> u64 {
        self.start_frame.load(Ordering::Acquire)
    }

    pub fn try_recv(&self) -> Result<CapturedTake, TryRecvError> {
        self.done.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<CapturedTake, RecvTimeoutError> {
        self.done.recv_timeout(timeout)
    }
}

/// Control-thread side of the mixer.
#[derive(Clone)]
pub struct MixerHandle {
    command_tx: Sender<MixerCommand>,
    channels: usize,
    sample_rate: u32,
}

impl MixerHandle {
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hands a voice to the audio thread.
    pub fn play(&self, voice: Voice) -> Result<(), MixerError> {
        self.command_tx.try_send(MixerCommand::Play(voice))?;
        Ok(())
    }

    /// Requests a copy of `frames` frames of output starting at transport frame
    /// `start_frame`. If that frame has already been rendered when the audio thread picks
    /// the request up, the window moves forward by whole multiples of `realign_every`.
    pub fn capture(
        &self,
        start_frame: u64,
        frames: u64,
        realign_every: u64,
        cancel: CancelHandle,
    ) -> Result<PendingCapture, MixerError> {
        let (done, done_rx) = crossbeam_channel::bounded(1);
        let shared_start = Arc::new(AtomicU64::new(start_frame));
        let capture = Capture {
            start_frame,
            frames,
            realign_every,
            shared_start: shared_start.clone(),
            samples: vec![0.0; frames as usize * self.channels],
            cancel,
            done,
        };
        self.command_tx.try_send(MixerCommand::Capture(capture))?;
        Ok(PendingCapture {
            start_frame: shared_start,
            done: done_rx,
        })
    }
}

impl fmt::Debug for MixerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixerHandle")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("queued", &self.command_tx.len())
            .finish()
    }
}

/// Sums every active voice into the output and advances the shared clock. Owned by
/// whichever thread drives the audio device.
pub struct Mixer {
    clock: Arc<Clock>,
    channels: usize,
    sample_rate: u32,
    voices: Vec<Voice>,
    captures: Vec<Capture>,
    command_rx: Receiver<MixerCommand>,
}

impl Mixer {
    /// Creates a mixer at the clock's sample rate and the handle used to feed it.
    pub fn new(clock: Arc<Clock>, channels: usize, queue_size: usize) -> (Mixer, MixerHandle) {
        let channels = channels.max(1);
        let sample_rate = clock.sample_rate();
        let (command_tx, command_rx) = crossbeam_channel::bounded(queue_size.max(1));
        let mixer = Mixer {
            clock,
            channels,
            sample_rate,
            voices: Vec::with_capacity(VOICE_CAPACITY),
            captures: Vec::with_capacity(4),
            command_rx,
        };
        let handle = MixerHandle {
            command_tx,
            channels,
            sample_rate,
        };
        (mixer, handle)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Renders one interleaved block. Muting silences the output but voices and the
    /// transport keep moving so loops stay in phase.
    pub fn render(&mut self, out: &mut [f32]) {
        let first_frame = self.clock.position_frames();
        self.drain_commands(first_frame);

        out.fill(0.0);
        let channels = self.channels;
        let sample_rate = self.sample_rate;
        self.voices
            .retain_mut(|voice| voice.render(out, channels, first_frame, sample_rate));

        if self.clock.is_muted() {
            out.fill(0.0);
        }

        self.captures.retain_mut(|capture| {
            if capture.cancel.is_cancelled() {
                return false;
            }
            if !capture.write(out, channels, first_frame) {
                return true;
            }
            let take = CapturedTake {
                start_frame: capture.start_frame,
                channels,
                sample_rate,
                samples: std::mem::take(&mut capture.samples),
            };
            // The receiver may have given up; nothing else to do with the take then.
            let _ = capture.done.try_send(take);
            false
        });

        self.clock.advance((out.len() / channels) as u64);
    }

    fn drain_commands(&mut self, first_frame: u64) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                MixerCommand::Play(voice) => self.voices.push(voice),
                MixerCommand::Capture(mut capture) => {
                    capture.realign(first_frame);
                    self.captures.push(capture);
                }
            }
        }
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("voices", &self.voices.len())
            .field("captures", &self.captures.len())
            .finish()
    }
}
