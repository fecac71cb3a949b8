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

//! Per-cell playback controller.
//!
//! A `CellEngine` owns one cell's buffer and playback mode. Voices are built here and
//! handed to the mixer; rates are recomputed from the clock whenever it changes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::category::Category;
use super::state::CellState;
use super::voice_bank::{voice_rate, Discipline, VoiceBank};
use super::{CellError, StaleDeliveryError};
use crate::audio::mixer::MixerHandle;
use crate::audio::voice::{SharedLevel, Voice, VoiceControl};
use crate::audio::AudioBuffer;
use crate::clock::{closest_semitones, Clock, ClockSnapshot, ClockState, Key};
use crate::playsync::LoadToken;

/// Per-cell tunables shared by every cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellSettings {
    pub default_volume: f32,
    pub speed_multipliers: Vec<f64>,
    pub max_instrument_voices: usize,
    pub discipline: Discipline,
}

impl Default for CellSettings {
    fn default() -> Self {
        CellSettings {
            default_volume: 0.8,
            speed_multipliers: vec![1.0, 1.5, 2.0, 3.0, 4.0],
            max_instrument_voices: 32,
            discipline: Discipline::Polyphonic,
        }
    }
}

/// Category-specific playback mode of a ready cell.
pub enum Playback {
    OneShot {
        speed_index: usize,
    },
    LoopingRhythm {
        original_bpm: u32,
        speed_index: usize,
    },
    Texture,
    Lead {
        original_bpm: u32,
        original_root: u8,
    },
    Instrument {
        bank: VoiceBank,
        original_root: u8,
    },
}

impl Playback {
    fn new(
        category: Category,
        buffer: &AudioBuffer,
        origin: &ClockSnapshot,
        current: &ClockState,
        gain: Arc<SharedLevel>,
        settings: &CellSettings,
    ) -> Playback {
        match category {
            Category::OneShotDrum => Playback::OneShot { speed_index: 0 },
            Category::LoopingRhythm => Playback::LoopingRhythm {
                original_bpm: origin.bpm,
                speed_index: 0,
            },
            Category::AutoLoopTexture => Playback::Texture,
            Category::AutoLoopLead => Playback::Lead {
                original_bpm: origin.bpm,
                original_root: origin.key.root(),
            },
            Category::PitchedInstrument => Playback::Instrument {
                bank: VoiceBank::new(
                    buffer.clone(),
                    gain,
                    transposition(origin.key.root(), current.key),
                    settings.discipline,
                    settings.max_instrument_voices,
                ),
                original_root: origin.key.root(),
            },
        }
    }

    /// Effective rate of the cell's main voice under the given clock. For the
    /// instrument this is the root voice.
    pub fn rate(&self, clock: &ClockState, speed_multipliers: &[f64]) -> f64 {
        match self {
            Playback::OneShot { speed_index } => speed(speed_multipliers, *speed_index),
            Playback::LoopingRhythm {
                original_bpm,
                speed_index,
            } => tempo_ratio(clock.bpm, *original_bpm) * speed(speed_multipliers, *speed_index),
            Playback::Texture => 1.0,
            Playback::Lead {
                original_bpm,
                original_root,
            } => {
                tempo_ratio(clock.bpm, *original_bpm)
                    * voice_rate(0, transposition(*original_root, clock.key))
            }
            Playback::Instrument { original_root, .. } => {
                voice_rate(0, transposition(*original_root, clock.key))
            }
        }
    }

    fn speed_index_mut(&mut self) -> Option<&mut usize> {
        match self {
            Playback::OneShot { speed_index } | Playback::LoopingRhythm { speed_index, .. } => {
                Some(speed_index)
            }
            _ => None,
        }
    }
}

/// Closest-path semitone shift from the clip's original root to the current key.
pub fn transposition(original_root: u8, current: Key) -> i32 {
    closest_semitones(original_root, current.root())
}

fn tempo_ratio(current_bpm: u32, original_bpm: u32) -> f64 {
    current_bpm as f64 / original_bpm.max(1) as f64
}

fn speed(multipliers: &[f64], index: usize) -> f64 {
    multipliers.get(index).copied().unwrap_or(1.0)
}

/// Serializable summary of a cell, used in export manifests.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellInfo {
    pub slot: usize,
    pub state: CellState,
    pub category: Option<Category>,
    pub volume: f32,
    pub original: Option<ClockSnapshot>,
    pub descriptor: Option<String>,
    pub frames: Option<usize>,
    pub sample_rate: Option<u32>,
}

/// Controller for one cell.
pub struct CellEngine {
    slot: usize,
    clock: Arc<Clock>,
    mixer: MixerHandle,
    settings: CellSettings,
    state: CellState,
    category: Option<Category>,
    generation: u64,
    token: Option<LoadToken>,
    origin: Option<ClockSnapshot>,
    source: Option<AudioBuffer>,
    playback: Option<Playback>,
    volume: Arc<SharedLevel>,
    loop_voice: Option<Arc<VoiceControl>>,
    one_shots: Vec<Arc<VoiceControl>>,
    descriptor: Option<String>,
    snapshot: Option<Arc<Vec<u8>>>,
}

impl CellEngine {
    pub fn new(
        slot: usize,
        clock: Arc<Clock>,
        mixer: MixerHandle,
        settings: CellSettings,
    ) -> CellEngine {
        let volume = SharedLevel::new(settings.default_volume.clamp(0.0, 1.0));
        CellEngine {
            slot,
            clock,
            mixer,
            settings,
            state: CellState::Empty,
            category: None,
            generation: 0,
            token: None,
            origin: None,
            source: None,
            playback: None,
            volume,
            loop_voice: None,
            one_shots: Vec::new(),
            descriptor: None,
            snapshot: None,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Clock values captured when loading began.
    pub fn origin(&self) -> Option<ClockSnapshot> {
        self.origin
    }

    pub fn source(&self) -> Option<&AudioBuffer> {
        self.source.as_ref()
    }

    pub fn playback(&self) -> Option<&Playback> {
        self.playback.as_ref()
    }

    pub fn descriptor(&self) -> Option<&str> {
        self.descriptor.as_deref()
    }

    pub fn snapshot(&self) -> Option<Arc<Vec<u8>>> {
        self.snapshot.clone()
    }

    /// The current load request, if any.
    pub fn token(&self) -> Option<&LoadToken> {
        self.token.as_ref()
    }

    pub fn info(&self) -> CellInfo {
        CellInfo {
            slot: self.slot,
            state: self.state,
            category: self.category,
            volume: self.volume(),
            original: self.origin,
            descriptor: self.descriptor.clone(),
            frames: self.source.as_ref().map(AudioBuffer::frame_count),
            sample_rate: self.source.as_ref().map(AudioBuffer::sample_rate),
        }
    }

    fn transition(&mut self, next: CellState) -> Result<(), CellError> {
        if !self.state.can_transition_to(next) {
            return Err(CellError::InvalidTransition {
                slot: self.slot,
                from: self.state,
                to: next,
            });
        }
        debug!(slot = self.slot, from = %self.state, to = %next, "Cell state change");
        self.state = next;
        Ok(())
    }

    /// Moves an empty cell into loading and returns the token the delivery must carry.
    pub fn begin_loading(&mut self, category: Category) -> Result<LoadToken, CellError> {
        self.transition(CellState::Loading)?;
        self.generation += 1;
        let token = LoadToken::new(self.slot, self.generation);
        self.token = Some(token.clone());
        self.category = Some(category);
        self.origin = Some(self.clock.snapshot());
        info!(slot = self.slot, category = %category, generation = self.generation, "Cell loading");
        Ok(token)
    }

    /// Abandons the in-flight request and returns the cell to empty.
    pub fn cancel_loading(&mut self) -> Result<(), CellError> {
        if self.state != CellState::Loading {
            return Err(CellError::InvalidTransition {
                slot: self.slot,
                from: self.state,
                to: CellState::Empty,
            });
        }
        self.reset();
        Ok(())
    }

    fn check_current(&self, token: &LoadToken) -> Result<(), StaleDeliveryError> {
        let current = self
            .token
            .as_ref()
            .is_some_and(|t| t.same_request(token) && !t.is_cancelled());
        if self.state == CellState::Loading && current {
            Ok(())
        } else {
            Err(StaleDeliveryError {
                slot: self.slot,
                generation: token.generation(),
            })
        }
    }

    /// Installs a processed buffer delivered for `token`. Looping categories start
    /// immediately (bar-aligned where required).
    pub fn commit(&mut self, token: &LoadToken, buffer: AudioBuffer) -> Result<(), StaleDeliveryError> {
        self.check_current(token)?;
        let Some(category) = self.category else {
            return Err(StaleDeliveryError {
                slot: self.slot,
                generation: token.generation(),
            });
        };
        let origin = self.origin.unwrap_or_else(|| self.clock.snapshot());
        let playback = Playback::new(
            category,
            &buffer,
            &origin,
            &self.clock.state(),
            self.volume.clone(),
            &self.settings,
        );

        info!(
            slot = self.slot,
            category = %category,
            frames = buffer.frame_count(),
            duration_ms = (buffer.duration_seconds() * 1000.0) as u64,
            "Cell ready"
        );
        self.source = Some(buffer);
        self.playback = Some(playback);
        self.token = None;
        self.state = CellState::Ready;

        if category.loops() {
            if let Err(e) = self.start() {
                warn!(slot = self.slot, error = %e, "Unable to start loop");
            }
        }
        Ok(())
    }

    /// Marks the in-flight request as failed.
    pub fn fail(&mut self, token: &LoadToken) -> Result<(), StaleDeliveryError> {
        self.check_current(token)?;
        self.token = None;
        self.state = CellState::Failed;
        warn!(slot = self.slot, "Cell failed to load");
        Ok(())
    }

    /// Stops all sound, discards any pending delivery, and empties the cell.
    pub fn reset(&mut self) {
        self.stop_voices();
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.state = CellState::Empty;
        self.category = None;
        self.origin = None;
        self.source = None;
        self.playback = None;
        self.descriptor = None;
        self.snapshot = None;
        self.volume.set(self.settings.default_volume.clamp(0.0, 1.0));
        info!(slot = self.slot, "Cell reset");
    }

    /// Attaches the prompt or description the generation pipeline used.
    pub fn set_descriptor(&mut self, descriptor: Option<String>) {
        self.descriptor = descriptor;
    }

    /// Attaches the visual snapshot captured alongside the sound.
    pub fn set_snapshot(&mut self, snapshot: Vec<u8>) {
        self.snapshot = Some(Arc::new(snapshot));
    }

    fn ready(&self) -> Result<(&AudioBuffer, &Playback), CellError> {
        match (&self.source, &self.playback) {
            (Some(source), Some(playback)) if self.state == CellState::Ready => {
                Ok((source, playback))
            }
            _ => Err(CellError::NotReady(self.slot)),
        }
    }

    fn unsupported(&self, operation: &'static str) -> CellError {
        match self.category {
            Some(category) => CellError::Unsupported {
                operation,
                category,
            },
            None => CellError::NotReady(self.slot),
        }
    }

    /// Current rate of the cell's main voice.
    pub fn current_rate(&self) -> Option<f64> {
        self.playback
            .as_ref()
            .map(|p| p.rate(&self.clock.state(), &self.settings.speed_multipliers))
    }

    /// Fires a one-shot from frame 0, overlapping anything still ringing. Looping cells
    /// start their loop.
    pub fn trigger(&mut self) -> Result<(), CellError> {
        let (source, playback) = self.ready()?;
        if matches!(playback, Playback::Instrument { .. }) {
            return Err(self.unsupported("trigger"));
        }
        if !matches!(playback, Playback::OneShot { .. }) {
            return self.start();
        }

        let rate = playback.rate(&self.clock.state(), &self.settings.speed_multipliers);
        let control = VoiceControl::new(rate);
        let voice = Voice::new(
            source.clone(),
            control.clone(),
            self.volume.clone(),
            self.clock.position_frames(),
            false,
        );
        self.mixer.play(voice)?;
        self.one_shots.retain(|c| c.is_active());
        self.one_shots.push(control);
        Ok(())
    }

    /// Starts the loop if it is not already running. Rhythmic and melodic loops wait
    /// for the next bar boundary; textures start at once.
    pub fn start(&mut self) -> Result<(), CellError> {
        if self.loop_voice.as_ref().is_some_and(|c| c.is_active()) {
            return Ok(());
        }
        let (source, playback) = self.ready()?;
        if matches!(playback, Playback::OneShot { .. }) {
            return self.trigger();
        }
        if matches!(playback, Playback::Instrument { .. }) {
            return Err(self.unsupported("start"));
        }

        let bar_aligned = self.category.is_some_and(|c| c.bar_aligned());
        let start_at = if bar_aligned {
            self.clock.next_bar_frame()
        } else {
            self.clock.position_frames()
        };
        let rate = playback.rate(&self.clock.state(), &self.settings.speed_multipliers);
        let control = VoiceControl::new(rate);
        let voice = Voice::new(
            source.clone(),
            control.clone(),
            self.volume.clone(),
            start_at,
            true,
        );
        self.mixer.play(voice)?;
        debug!(slot = self.slot, start_at, rate, "Loop scheduled");
        self.loop_voice = Some(control);
        Ok(())
    }

    /// Stops everything this cell is playing.
    pub fn stop(&mut self) {
        self.stop_voices();
    }

    fn stop_voices(&mut self) {
        if let Some(control) = self.loop_voice.take() {
            control.stop();
        }
        for control in self.one_shots.drain(..) {
            control.stop();
        }
        if let Some(Playback::Instrument { bank, .. }) = self.playback.as_mut() {
            bank.stop_all();
        }
    }

    pub fn is_playing(&self) -> bool {
        let looping = self.loop_voice.as_ref().is_some_and(|c| c.is_active());
        let ringing = self.one_shots.iter().any(|c| c.is_active());
        let notes = match &self.playback {
            Some(Playback::Instrument { bank, .. }) => bank.sounding() > 0,
            _ => false,
        };
        looping || ringing || notes
    }

    pub fn note_on(&mut self, semitone: u8) -> Result<(), CellError> {
        self.ready()?;
        let start_at = self.clock.position_frames();
        let mixer = &self.mixer;
        match self.playback.as_mut() {
            Some(Playback::Instrument { bank, .. }) => {
                bank.note_on(semitone, start_at, |voice| mixer.play(voice))?;
                Ok(())
            }
            _ => Err(self.unsupported("note on")),
        }
    }

    pub fn note_off(&mut self, semitone: u8) -> Result<(), CellError> {
        self.ready()?;
        match self.playback.as_mut() {
            Some(Playback::Instrument { bank, .. }) => {
                bank.note_off(semitone)?;
                Ok(())
            }
            _ => Err(self.unsupported("note off")),
        }
    }

    /// Sets the instrument discipline. Stored even when the cell holds no instrument so
    /// a later instrument picks it up.
    pub fn set_discipline(&mut self, discipline: Discipline) {
        self.settings.discipline = discipline;
        if let Some(Playback::Instrument { bank, .. }) = self.playback.as_mut() {
            bank.set_discipline(discipline);
        }
    }

    /// Sets the cell volume, clamped to 0..=1. Applies to sounding voices at once.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume.set(volume.clamp(0.0, 1.0));
    }

    /// Advances to the next speed multiplier and returns it.
    pub fn cycle_speed(&mut self) -> Result<f64, CellError> {
        self.ready()?;
        let len = self.settings.speed_multipliers.len().max(1);
        let index = match self.playback.as_mut().and_then(Playback::speed_index_mut) {
            Some(index) => {
                *index = (*index + 1) % len;
                *index
            }
            None => return Err(self.unsupported("speed cycle")),
        };
        self.retune();
        Ok(speed(&self.settings.speed_multipliers, index))
    }

    /// Recomputes every live rate from the clock. Buffers are never touched.
    pub fn retune(&mut self) {
        let clock = self.clock.state();
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        if let Playback::Instrument {
            bank,
            original_root,
        } = playback
        {
            bank.set_transposition(transposition(*original_root, clock.key));
            return;
        }

        let rate = playback.rate(&clock, &self.settings.speed_multipliers);
        if let Some(control) = &self.loop_voice {
            control.set_rate(rate);
        }
        for control in &self.one_shots {
            control.set_rate(rate);
        }
    }

    /// Renders the cell's sound as it would play now (tempo, speed and key applied),
    /// at unity gain. Loops render exactly one cycle.
    pub fn render_current(&self) -> Option<AudioBuffer> {
        let (source, playback) = self.ready().ok()?;
        let rate = playback.rate(&self.clock.state(), &self.settings.speed_multipliers);
        if rate == 1.0 {
            return Some(source.clone());
        }
        let looping = self.category.is_some_and(|c| c.loops());
        let frames = if looping {
            (source.frame_count() as f64 / rate).round() as usize
        } else {
            (source.frame_count() as f64 / rate).ceil() as usize
        };
        render_offline(source, rate, frames, looping)
    }
}

/// Plays `buffer` at `rate` into a fresh buffer of `frames` frames.
fn render_offline(buffer: &AudioBuffer, rate: f64, frames: usize, looping: bool) -> Option<AudioBuffer> {
    let channels = buffer.channel_count();
    let mut out = vec![0.0; frames * channels];
    let mut voice = Voice::new(
        buffer.clone(),
        VoiceControl::new(rate),
        SharedLevel::new(1.0),
        0,
        looping,
    );
    voice.render(&mut out, channels, 0, buffer.sample_rate());
    AudioBuffer::from_interleaved(buffer.sample_rate(), channels, &out).ok()
}

impl std::fmt::Debug for CellEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellEngine")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("category", &self.category)
            .field("generation", &self.generation)
            .field("source", &self.source)
            .field("volume", &self.volume())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mixer::{Mixer, MixerHandle};
    use crate::clock::{BarsPerLoop, Mode};
    use crate::testutil::constant;

    struct Rig {
        clock: Arc<Clock>,
        mixer: Mixer,
        handle: MixerHandle,
        cell: CellEngine,
    }

    fn rig() -> Rig {
        let clock = Arc::new(
            Clock::new(
                1000,
                ClockState {
                    bpm: 120,
                    bars_per_loop: BarsPerLoop::One,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let (mixer, handle) = Mixer::new(clock.clone(), 1, 64);
        let cell = CellEngine::new(4, clock.clone(), handle.clone(), CellSettings::default());
        Rig {
            clock,
            mixer,
            handle,
            cell,
        }
    }

    fn load(cell: &mut CellEngine, category: Category, buffer: AudioBuffer) {
        let token = cell.begin_loading(category).unwrap();
        cell.commit(&token, buffer).unwrap();
    }

    #[test]
    fn test_happy_path_and_reset() {
        let mut rig = rig();
        assert_eq!(rig.cell.state(), CellState::Empty);
        let token = rig.cell.begin_loading(Category::OneShotDrum).unwrap();
        assert_eq!(rig.cell.state(), CellState::Loading);
        assert_eq!(rig.cell.origin().unwrap().bpm, 120);

        rig.cell.commit(&token, constant(1000, 1, 10, 0.5)).unwrap();
        assert_eq!(rig.cell.state(), CellState::Ready);
        assert_eq!(rig.cell.info().frames, Some(10));

        rig.cell.reset();
        assert_eq!(rig.cell.state(), CellState::Empty);
        assert!(rig.cell.source().is_none());
        assert!(rig.cell.info().category.is_none());
    }

    #[test]
    fn test_stale_deliveries_are_rejected() {
        let mut rig = rig();
        let old = rig.cell.begin_loading(Category::OneShotDrum).unwrap();
        rig.cell.cancel_loading().unwrap();
        assert_eq!(rig.cell.state(), CellState::Empty);
        assert!(old.is_cancelled());

        // Late delivery to an empty cell.
        assert!(rig.cell.commit(&old, constant(1000, 1, 10, 0.5)).is_err());
        assert_eq!(rig.cell.state(), CellState::Empty);

        // A newer request supersedes the old token.
        let new = rig.cell.begin_loading(Category::OneShotDrum).unwrap();
        assert_eq!(
            rig.cell.commit(&old, constant(1000, 1, 10, 0.5)),
            Err(StaleDeliveryError {
                slot: 4,
                generation: old.generation()
            })
        );
        assert_eq!(rig.cell.state(), CellState::Loading);
        rig.cell.commit(&new, constant(1000, 1, 10, 0.5)).unwrap();

        // Duplicate delivery to a ready cell.
        assert!(rig.cell.commit(&new, constant(1000, 1, 20, 0.5)).is_err());
        assert_eq!(rig.cell.source().unwrap().frame_count(), 10);
    }

    #[test]
    fn test_failed_only_resets() {
        let mut rig = rig();
        let token = rig.cell.begin_loading(Category::AutoLoopTexture).unwrap();
        rig.cell.fail(&token).unwrap();
        assert_eq!(rig.cell.state(), CellState::Failed);
        assert!(rig.cell.fail(&token).is_err());
        assert!(matches!(
            rig.cell.begin_loading(Category::AutoLoopTexture),
            Err(CellError::InvalidTransition { .. })
        ));
        rig.cell.reset();
        assert!(rig.cell.begin_loading(Category::AutoLoopTexture).is_ok());
    }

    #[test]
    fn test_begin_loading_requires_empty() {
        let mut rig = rig();
        load(&mut rig.cell, Category::OneShotDrum, constant(1000, 1, 10, 0.5));
        assert_eq!(
            rig.cell.begin_loading(Category::OneShotDrum).unwrap_err(),
            CellError::InvalidTransition {
                slot: 4,
                from: CellState::Ready,
                to: CellState::Loading
            }
        );
        assert!(rig.cell.cancel_loading().is_err());
    }

    #[test]
    fn test_one_shots_overlap() {
        let mut rig = rig();
        load(&mut rig.cell, Category::OneShotDrum, constant(1000, 1, 100, 0.25));
        rig.cell.trigger().unwrap();
        rig.cell.trigger().unwrap();

        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(rig.cell.is_playing());

        rig.cell.stop();
        assert!(!rig.cell.is_playing());
    }

    #[test]
    fn test_loop_waits_for_next_bar() {
        let mut rig = rig();
        // One bar at 120 bpm and 1 kHz is 2000 frames.
        rig.clock.seek(500);
        load(&mut rig.cell, Category::LoopingRhythm, constant(1000, 1, 2000, 1.0));
        assert!(rig.cell.is_playing());

        let mut out = vec![0.0; 1500];
        rig.mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        let mut out = vec![0.0; 10];
        rig.mixer.render(&mut out);
        assert!(out.iter().all(|&s| (s - 0.8).abs() < 1e-6));
    }

    /// A mono buffer that is silent except for `value` on its first frame.
    fn click(frames: usize, value: f32) -> AudioBuffer {
        let mut plane = vec![0.0; frames];
        plane[0] = value;
        AudioBuffer::new(1000, vec![plane]).unwrap()
    }

    #[test]
    fn test_loops_stay_in_phase_across_tempo_change() {
        let mut rig = rig();
        load(&mut rig.cell, Category::LoopingRhythm, click(2000, 0.25));
        rig.cell.set_volume(1.0);

        // 1100 frames into the second 2000-frame loop.
        rig.mixer.render(&mut vec![0.0; 3100]);

        rig.clock.set_bpm(240).unwrap();
        rig.cell.retune();
        assert_eq!(rig.cell.current_rate(), Some(2.0));

        // A loop generated at the new tempo is one 1000-frame bar.
        let mut second = CellEngine::new(
            5,
            rig.clock.clone(),
            rig.handle.clone(),
            CellSettings::default(),
        );
        load(&mut second, Category::LoopingRhythm, click(1000, 0.5));
        second.set_volume(1.0);

        let mut out = vec![0.0; 2000];
        rig.mixer.render(&mut out);
        let downbeats: Vec<(usize, f32)> = out
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != 0.0)
            .map(|(i, s)| (i, *s))
            .collect();
        // Both loops land on frames 3550 and 4550 together.
        assert_eq!(downbeats.len(), 2);
        for ((frame, sample), expected) in downbeats.into_iter().zip([450, 1450]) {
            assert_eq!(frame, expected);
            assert!((sample - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn test_texture_starts_immediately_at_unity() {
        let mut rig = rig();
        rig.clock.seek(500);
        load(&mut rig.cell, Category::AutoLoopTexture, constant(1000, 1, 30, 1.0));
        rig.cell.set_volume(1.0);
        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out);
        assert_eq!(out, vec![1.0; 4]);

        rig.clock.set_bpm(60).unwrap();
        rig.cell.retune();
        assert_eq!(rig.cell.current_rate(), Some(1.0));
    }

    #[test]
    fn test_loop_rate_follows_tempo_and_speed() {
        let mut rig = rig();
        load(&mut rig.cell, Category::LoopingRhythm, constant(1000, 1, 2000, 1.0));
        assert_eq!(rig.cell.current_rate(), Some(1.0));

        rig.clock.set_bpm(180).unwrap();
        rig.cell.retune();
        assert_eq!(rig.cell.current_rate(), Some(1.5));

        assert_eq!(rig.cell.cycle_speed().unwrap(), 1.5);
        assert_eq!(rig.cell.current_rate(), Some(2.25));
        for expected in [2.0, 3.0, 4.0, 1.0] {
            assert_eq!(rig.cell.cycle_speed().unwrap(), expected);
        }
    }

    #[test]
    fn test_lead_combines_tempo_and_key() {
        let mut rig = rig();
        load(&mut rig.cell, Category::AutoLoopLead, constant(1000, 1, 2000, 1.0));
        rig.clock.set_bpm(60).unwrap();
        rig.clock.set_key(Key::new(7, Mode::Major)).unwrap();
        rig.cell.retune();
        let expected = 0.5 * voice_rate(0, -5);
        assert!((rig.cell.current_rate().unwrap() - expected).abs() < 1e-12);
        assert!(matches!(
            rig.cell.cycle_speed(),
            Err(CellError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_instrument_retunes_by_closest_path() {
        let mut rig = rig();
        rig.clock.set_key(Key::new(9, Mode::Minor)).unwrap();
        load(&mut rig.cell, Category::PitchedInstrument, constant(1000, 1, 500, 0.5));

        rig.clock.set_key(Key::new(2, Mode::Minor)).unwrap();
        rig.cell.retune();
        match rig.cell.playback().unwrap() {
            Playback::Instrument { bank, .. } => assert_eq!(bank.transposition(), 5),
            _ => panic!("expected instrument"),
        }

        rig.cell.note_on(12).unwrap();
        rig.cell.note_on(12).unwrap();
        assert_eq!(rig.mixer.active_voices(), 0);
        rig.mixer.render(&mut vec![0.0; 1]);
        assert_eq!(rig.mixer.active_voices(), 1);

        assert!(matches!(
            rig.cell.trigger(),
            Err(CellError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_discipline_forwarded_to_instrument() {
        let mut rig = rig();
        load(&mut rig.cell, Category::PitchedInstrument, constant(1000, 1, 500, 0.5));
        rig.cell.note_on(0).unwrap();
        assert!(rig.cell.is_playing());
        rig.cell.set_discipline(Discipline::Monophonic);
        assert!(!rig.cell.is_playing());

        rig.cell.note_on(0).unwrap();
        rig.cell.note_on(4).unwrap();
        rig.cell.note_off(4).unwrap();
        assert!(!rig.cell.is_playing());
    }

    #[test]
    fn test_operations_need_ready_cell() {
        let mut rig = rig();
        assert_eq!(rig.cell.trigger(), Err(CellError::NotReady(4)));
        assert_eq!(rig.cell.note_on(0), Err(CellError::NotReady(4)));
        assert!(rig.cell.render_current().is_none());
    }

    #[test]
    fn test_render_current() {
        let mut rig = rig();
        let source = constant(1000, 2, 2000, 0.5);
        load(&mut rig.cell, Category::LoopingRhythm, source.clone());
        assert!(rig.cell.render_current().unwrap().shares_storage(&source));

        rig.clock.set_bpm(240).unwrap();
        let rendered = rig.cell.render_current().unwrap();
        assert_eq!(rendered.frame_count(), 1000);
        assert_eq!(rendered.channel_count(), 2);
        assert!(rendered.channel(1).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_volume_is_clamped_and_live() {
        let mut rig = rig();
        assert_eq!(rig.cell.volume(), 0.8);
        rig.cell.set_volume(3.0);
        assert_eq!(rig.cell.volume(), 1.0);
        rig.cell.set_volume(-1.0);
        assert_eq!(rig.cell.volume(), 0.0);
    }
}
