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

//! Bar-aligned performance capture and export.
//!
//! A session asks the mixer for two full loops of output starting at the next grid
//! boundary, then packages the take with a re-render of every ready cell and the
//! cells' snapshots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, span, warn, Level};

use crate::audio::error::{BufferError, EncodeError};
use crate::audio::mixer::{CapturedTake, MixerError, PendingCapture};
use crate::audio::{AudioBuffer, WavCodec};
use crate::cell::engine::CellInfo;
use crate::cell::Category;
use crate::clock::{Clock, ClockSnapshot};
use crate::controller::Controller;
use crate::playsync::CancelHandle;

/// Loops captured per take.
const LOOPS_PER_TAKE: f64 = 2.0;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("unable to start capture: {0}")]
    Mixer(#[from] MixerError),

    #[error("recording was discarded")]
    Discarded,

    #[error("recording already finished")]
    Finished,

    #[error("timed out waiting for the take")]
    Timeout,

    #[error("audio output stopped before the take completed")]
    Disconnected,

    #[error("unable to encode take: {0}")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("unable to write export: {0}")]
    Io(#[from] io::Error),

    #[error("unable to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Armed, waiting for the next bar boundary.
    Waiting,
    Recording,
    Processing,
    Ready,
    Failed,
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Capturing,
    Processing,
    Ready,
    Failed,
    Discarded,
}

/// One cell's current sound, rendered for export.
#[derive(Clone, Debug)]
pub struct Stem {
    pub slot: usize,
    pub category: Category,
    pub buffer: AudioBuffer,
    pub wav: Vec<u8>,
}

/// Description of an export written next to the audio.
#[derive(Clone, Debug, Serialize)]
pub struct Manifest {
    pub clock: ClockSnapshot,
    pub sample_rate: u32,
    pub channels: usize,
    pub start_frame: u64,
    pub frames: usize,
    pub duration_seconds: f64,
    pub cells: Vec<CellInfo>,
}

/// Everything a finished session produces.
#[derive(Clone, Debug)]
pub struct RecordingExport {
    pub master: AudioBuffer,
    pub master_wav: Vec<u8>,
    pub stems: Vec<Stem>,
    /// Snapshot image per slot, as it was when the session started.
    pub snapshots: Vec<Option<Arc<Vec<u8>>>>,
    pub manifest: Manifest,
}

impl RecordingExport {
    /// Writes `performance.wav`, `sounds/`, `snapshots/` and `manifest.json` into
    /// `dir`, creating it if needed. Returns the path of the master take.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, RecordingError> {
        let sounds = dir.join("sounds");
        let snapshots = dir.join("snapshots");
        fs::create_dir_all(&sounds)?;
        fs::create_dir_all(&snapshots)?;

        let master = dir.join("performance.wav");
        fs::write(&master, &self.master_wav)?;
        for stem in &self.stems {
            let name = format!("cell_{}_{}.wav", stem.slot, stem.category.key());
            fs::write(sounds.join(name), &stem.wav)?;
        }
        for (slot, snapshot) in self.snapshots.iter().enumerate() {
            if let Some(snapshot) = snapshot {
                fs::write(snapshots.join(format!("cell_{slot}.bin")), snapshot.as_slice())?;
            }
        }
        fs::write(
            dir.join("manifest.json"),
            serde_json::to_vec_pretty(&self.manifest)?,
        )?;

        info!(dir = %dir.display(), stems = self.stems.len(), "Recording exported");
        Ok(master)
    }
}

/// A single capture of the mixed output.
pub struct RecordingSession {
    clock: Arc<Clock>,
    settings: ClockSnapshot,
    frames: u64,
    snapshots: Vec<Option<Arc<Vec<u8>>>>,
    cancel: CancelHandle,
    capture: PendingCapture,
    phase: Phase,
}

impl RecordingSession {
    /// Arms a capture of two loops starting at the next grid boundary.
    pub fn start(controller: &Controller) -> Result<RecordingSession, RecordingError> {
        let clock = controller.clock().clone();
        let settings = clock.snapshot();
        let loop_frames = clock.loop_frames();
        let frames =
            (LOOPS_PER_TAKE * settings.loop_duration_seconds() * clock.sample_rate() as f64).round() as u64;
        let start_frame = clock.next_bar_frame();
        let snapshots = controller
            .cells()
            .iter()
            .map(|cell| cell.lock().snapshot())
            .collect();

        let cancel = CancelHandle::new();
        let capture = controller
            .mixer()
            .capture(start_frame, frames, loop_frames, cancel.clone())?;

        info!(
            start_frame,
            frames,
            bpm = settings.bpm,
            bars = settings.bars_per_loop.bars(),
            "Recording armed"
        );
        Ok(RecordingSession {
            clock,
            settings,
            frames,
            snapshots,
            cancel,
            capture,
            phase: Phase::Capturing,
        })
    }

    pub fn state(&self) -> RecordingState {
        match self.phase {
            Phase::Capturing if self.clock.position_frames() < self.capture.start_frame() => {
                RecordingState::Waiting
            }
            Phase::Capturing => RecordingState::Recording,
            Phase::Processing => RecordingState::Processing,
            Phase::Ready => RecordingState::Ready,
            Phase::Failed => RecordingState::Failed,
            Phase::Discarded => RecordingState::Discarded,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames as f64 / self.clock.sample_rate() as f64
    }

    /// Seconds until capture begins, zero once it has.
    pub fn seconds_until_start(&self) -> f64 {
        self.capture
            .start_frame()
            .saturating_sub(self.clock.position_frames()) as f64
            / self.clock.sample_rate() as f64
    }

    /// Abandons the session. Cell playback is unaffected.
    pub fn discard(&mut self) {
        self.cancel.cancel();
        self.phase = Phase::Discarded;
        info!("Recording discarded");
    }

    /// Waits up to `timeout` for the take, then renders stems and encodes everything.
    /// A failure here ends the session but leaves every cell alone.
    pub fn finish(
        &mut self,
        controller: &Controller,
        timeout: Duration,
    ) -> Result<RecordingExport, RecordingError> {
        let span = span!(Level::INFO, "recording");
        let _enter = span.enter();

        match self.phase {
            Phase::Capturing => {}
            Phase::Discarded => return Err(RecordingError::Discarded),
            _ => return Err(RecordingError::Finished),
        }

        let result = match self.take(timeout) {
            Ok(take) => {
                self.phase = Phase::Processing;
                self.package(controller, take)
            }
            Err(e) => Err(e),
        };
        match &result {
            Ok(export) => {
                self.phase = Phase::Ready;
                info!(
                    frames = export.manifest.frames,
                    stems = export.stems.len(),
                    "Recording ready"
                );
            }
            Err(e) => {
                self.cancel.cancel();
                self.phase = Phase::Failed;
                warn!(error = %e, "Recording failed");
            }
        }
        result
    }

    fn take(&self, timeout: Duration) -> Result<CapturedTake, RecordingError> {
        self.capture.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => RecordingError::Timeout,
            RecvTimeoutError::Disconnected => RecordingError::Disconnected,
        })
    }

    fn package(
        &self,
        controller: &Controller,
        take: CapturedTake,
    ) -> Result<RecordingExport, RecordingError> {
        let master = AudioBuffer::from_interleaved(take.sample_rate, take.channels, &take.samples)?;
        let master_wav = WavCodec::encode(&master)?;

        let stems = controller
            .cells()
            .par_iter()
            .filter_map(|cell| {
                let cell = cell.lock();
                let buffer = cell.render_current()?;
                let category = cell.category()?;
                Some((cell.slot(), category, buffer))
            })
            .map(|(slot, category, buffer)| -> Result<Stem, EncodeError> {
                let wav = WavCodec::encode(&buffer)?;
                Ok(Stem {
                    slot,
                    category,
                    buffer,
                    wav,
                })
            })
            .collect::<Result<Vec<Stem>, EncodeError>>()?;

        let manifest = Manifest {
            clock: self.settings,
            sample_rate: master.sample_rate(),
            channels: master.channel_count(),
            start_frame: take.start_frame,
            frames: master.frame_count(),
            duration_seconds: master.duration_seconds(),
            cells: controller.cell_infos(),
        };

        Ok(RecordingExport {
            master,
            master_wav,
            stems,
            snapshots: self.snapshots.clone(),
            manifest,
        })
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.phase == Phase::Capturing {
            self.cancel.cancel();
        }
    }
}
