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

//! The pitched instrument: one octave of rate-shifted voices over a single buffer.
//!
//! Handles note-on/note-off, monophonic and polyphonic discipline, and voice stealing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CellError;
use crate::audio::mixer::MixerError;
use crate::audio::voice::{SharedLevel, Voice, VoiceControl};
use crate::audio::AudioBuffer;

/// Semitone offsets 0..=12 inclusive.
pub const VOICE_COUNT: usize = 13;

/// Playback rate for a semitone offset under a transposition: `2^((offset + T) / 12)`.
pub fn voice_rate(offset: i32, transposition: i32) -> f64 {
    2f64.powf((offset + transposition) as f64 / 12.0)
}

/// How overlapping notes behave.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// Every note-on starts its own voice; note-off lets it ring out.
    #[default]
    Polyphonic,
    /// A note-on silences whatever is sounding; releasing the held key stops it.
    Monophonic,
}

/// A note that is currently sounding.
struct Sounding {
    semitone: u8,
    control: Arc<VoiceControl>,
}

/// Thirteen pitch-shifted voices sharing one buffer.
pub struct VoiceBank {
    buffer: AudioBuffer,
    gain: Arc<SharedLevel>,
    transposition: i32,
    discipline: Discipline,
    /// Keys currently held down, used to ignore key repeat.
    pressed: [bool; VOICE_COUNT],
    /// Sounding voices, oldest first.
    sounding: Vec<Sounding>,
    max_voices: usize,
}

impl VoiceBank {
    pub fn new(
        buffer: AudioBuffer,
        gain: Arc<SharedLevel>,
        transposition: i32,
        discipline: Discipline,
        max_voices: usize,
    ) -> VoiceBank {
        VoiceBank {
            buffer,
            gain,
            transposition,
            discipline,
            pressed: [false; VOICE_COUNT],
            sounding: Vec::new(),
            max_voices: max_voices.max(1),
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn transposition(&self) -> i32 {
        self.transposition
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Rate of the voice at `semitone` under the current transposition.
    pub fn playback_rate(&self, semitone: u8) -> f64 {
        voice_rate(semitone as i32, self.transposition)
    }

    /// Rates of all thirteen voices.
    pub fn rates(&self) -> [f64; VOICE_COUNT] {
        std::array::from_fn(|offset| self.playback_rate(offset as u8))
    }

    pub fn is_pressed(&self, semitone: u8) -> bool {
        self.pressed.get(semitone as usize).copied().unwrap_or(false)
    }

    /// Number of voices still sounding.
    pub fn sounding(&self) -> usize {
        self.sounding.iter().filter(|s| s.control.is_active()).count()
    }

    /// Starts the voice for `semitone` from frame 0 and hands it to `play`. Returns
    /// false when the key is already held (key repeat). The bank only records the note,
    /// and only silences other voices, once `play` has accepted the voice.
    pub fn note_on<F>(&mut self, semitone: u8, start_at_frame: u64, play: F) -> Result<bool, CellError>
    where
        F: FnOnce(Voice) -> Result<(), MixerError>,
    {
        let index = semitone as usize;
        if index >= VOICE_COUNT {
            return Err(CellError::SemitoneOutOfRange(semitone));
        }
        if self.pressed[index] {
            return Ok(false);
        }

        let control = VoiceControl::new(self.playback_rate(semitone));
        play(Voice::new(
            self.buffer.clone(),
            control.clone(),
            self.gain.clone(),
            start_at_frame,
            false,
        ))?;
        self.pressed[index] = true;

        self.sounding.retain(|s| s.control.is_active());
        if self.discipline == Discipline::Monophonic {
            self.stop_sounding();
        } else if self.sounding.len() >= self.max_voices {
            let oldest = self.sounding.remove(0);
            oldest.control.stop();
            warn!(
                max_voices = self.max_voices,
                semitone = oldest.semitone,
                "Instrument voice limit reached, stealing oldest"
            );
        }

        debug!(semitone, rate = control.rate(), "Note on");
        self.sounding.push(Sounding { semitone, control });
        Ok(true)
    }

    /// Releases a key. In monophonic mode this also stops the voice it started.
    /// Returns the number of voices stopped.
    pub fn note_off(&mut self, semitone: u8) -> Result<usize, CellError> {
        let index = semitone as usize;
        if index >= VOICE_COUNT {
            return Err(CellError::SemitoneOutOfRange(semitone));
        }
        self.pressed[index] = false;

        if self.discipline == Discipline::Polyphonic {
            return Ok(0);
        }
        let mut stopped = 0;
        self.sounding.retain(|s| {
            if s.semitone == semitone {
                s.control.stop();
                stopped += 1;
                false
            } else {
                true
            }
        });
        Ok(stopped)
    }

    /// Switches discipline. Everything sounding is stopped and held keys are forgotten
    /// in the same step, so no note can outlive the switch.
    pub fn set_discipline(&mut self, discipline: Discipline) {
        self.stop_all();
        self.discipline = discipline;
    }

    /// Stops every voice and clears held keys.
    pub fn stop_all(&mut self) {
        self.stop_sounding();
        self.pressed = [false; VOICE_COUNT];
    }

    /// Retunes every sounding voice for a new transposition.
    pub fn set_transposition(&mut self, transposition: i32) {
        self.transposition = transposition;
        for sounding in &self.sounding {
            sounding
                .control
                .set_rate(voice_rate(sounding.semitone as i32, transposition));
        }
    }

    fn stop_sounding(&mut self) {
        for sounding in self.sounding.drain(..) {
            sounding.control.stop();
        }
    }
}

impl std::fmt::Debug for VoiceBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBank")
            .field("buffer", &self.buffer)
            .field("transposition", &self.transposition)
            .field("discipline", &self.discipline)
            .field("sounding", &self.sounding())
            .field("max_voices", &self.max_voices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(discipline: Discipline, max_voices: usize) -> VoiceBank {
        let buffer = AudioBuffer::new(1000, vec![vec![0.5; 1000]]).unwrap();
        VoiceBank::new(buffer, SharedLevel::new(1.0), 0, discipline, max_voices)
    }

    fn on(bank: &mut VoiceBank, semitone: u8) -> Arc<VoiceControl> {
        let mut played = None;
        let started = bank
            .note_on(semitone, 0, |voice| {
                played = Some(voice.control().clone());
                Ok(())
            })
            .unwrap();
        assert!(started);
        played.unwrap()
    }

    fn accept(_: Voice) -> Result<(), MixerError> {
        Ok(())
    }

    #[test]
    fn test_voice_rates() {
        assert_eq!(voice_rate(12, 0), 2.0);
        assert_eq!(voice_rate(0, 0), 1.0);
        assert_eq!(voice_rate(-12, 0), 0.5);
        assert!((voice_rate(7, -5) - voice_rate(2, 0)).abs() < 1e-12);

        let bank = bank(Discipline::Polyphonic, 32);
        let rates = bank.rates();
        assert_eq!(rates.len(), 13);
        assert_eq!(rates[0], 1.0);
        assert_eq!(rates[12], 2.0);
        assert!(rates.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_transposition_retunes_sounding_voices() {
        let mut bank = bank(Discipline::Polyphonic, 32);
        let c = on(&mut bank, 0);
        let g = on(&mut bank, 7);

        bank.set_transposition(-5);
        assert!((c.rate() - voice_rate(0, -5)).abs() < 1e-12);
        assert!((g.rate() - voice_rate(2, 0)).abs() < 1e-12);
        assert_eq!(bank.playback_rate(12), voice_rate(7, 0));
    }

    #[test]
    fn test_polyphonic_voices_overlap() {
        let mut bank = bank(Discipline::Polyphonic, 32);
        let a = on(&mut bank, 0);
        let b = on(&mut bank, 4);
        assert!(a.is_active() && b.is_active());
        assert_ne!(a.id(), b.id());

        // Releasing lets the voice ring.
        assert_eq!(bank.note_off(0).unwrap(), 0);
        assert!(a.is_active());

        // Once released, the same key starts a fresh instance alongside the old one.
        let a2 = on(&mut bank, 0);
        assert!(a.is_active() && a2.is_active());
        assert_eq!(bank.sounding(), 3);
    }

    #[test]
    fn test_key_repeat_is_ignored() {
        let mut bank = bank(Discipline::Polyphonic, 32);
        on(&mut bank, 3);
        assert!(bank.is_pressed(3));
        assert!(!bank.note_on(3, 0, accept).unwrap());
        assert_eq!(bank.sounding(), 1);
    }

    #[test]
    fn test_monophonic_discipline() {
        let mut bank = bank(Discipline::Monophonic, 32);
        let a = on(&mut bank, 0);
        let b = on(&mut bank, 5);
        assert!(a.is_stopped());
        assert!(b.is_active());

        // Releasing a key that no longer owns the sound does nothing.
        assert_eq!(bank.note_off(0).unwrap(), 0);
        assert!(b.is_active());

        assert_eq!(bank.note_off(5).unwrap(), 1);
        assert!(b.is_stopped());
    }

    #[test]
    fn test_discipline_switch_stops_everything() {
        let mut bank = bank(Discipline::Polyphonic, 32);
        let a = on(&mut bank, 0);
        let b = on(&mut bank, 12);
        bank.set_discipline(Discipline::Monophonic);

        assert!(a.is_stopped() && b.is_stopped());
        assert!(!bank.is_pressed(0) && !bank.is_pressed(12));
        assert_eq!(bank.sounding(), 0);
        // Held keys were forgotten, so pressing again is not treated as a repeat.
        assert!(bank.note_on(0, 0, accept).unwrap());
    }

    #[test]
    fn test_voice_stealing() {
        let mut bank = bank(Discipline::Polyphonic, 2);
        let a = on(&mut bank, 0);
        let b = on(&mut bank, 1);
        let c = on(&mut bank, 2);
        assert!(a.is_stopped());
        assert!(b.is_active() && c.is_active());
    }

    #[test]
    fn test_rejected_voice_leaves_bank_untouched() {
        let mut bank = bank(Discipline::Monophonic, 32);
        let held = on(&mut bank, 0);

        assert_eq!(
            bank.note_on(5, 0, |_| Err(MixerError::QueueFull)).unwrap_err(),
            CellError::Mixer(MixerError::QueueFull)
        );
        assert!(!bank.is_pressed(5));
        assert!(held.is_active());
        assert_eq!(bank.sounding(), 1);

        // The key is not stuck: the next press goes through.
        let next = on(&mut bank, 5);
        assert!(next.is_active());
        assert!(held.is_stopped());
    }

    #[test]
    fn test_out_of_range_semitone() {
        let mut bank = bank(Discipline::Polyphonic, 2);
        assert_eq!(
            bank.note_on(13, 0, accept).unwrap_err(),
            CellError::SemitoneOutOfRange(13)
        );
        assert_eq!(
            bank.note_off(200).unwrap_err(),
            CellError::SemitoneOutOfRange(200)
        );
    }
}
