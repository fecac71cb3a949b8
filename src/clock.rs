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

//! The shared musical clock.
//!
//! Tempo, key, and loop length are guarded by a read-write lock and written only by
//! the controller. The transport position and the mute flag are atomics, so the audio
//! thread never takes a lock.
//!
//! The loop grid is anchored to the transport rather than to frame zero. A tempo
//! change keeps the musical phase at the moment of the change, which is where
//! running loops are when their rates are updated.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const MIN_BPM: u32 = 60;
pub const MAX_BPM: u32 = 300;
pub const BEATS_PER_BAR: u32 = 4;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("bpm {0} is outside 60..=300")]
    BpmOutOfRange(u32),

    #[error("{0} bars per loop is not one of 1, 2, 4, 8, 16")]
    InvalidBarsPerLoop(u32),

    #[error("unable to parse key '{0}'")]
    InvalidKey(String),

    #[error("{0} cannot change while any cell holds a sound")]
    Locked(&'static str),
}

/// Loop length in bars.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BarsPerLoop {
    One,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl BarsPerLoop {
    pub const ALL: [BarsPerLoop; 5] = [
        BarsPerLoop::One,
        BarsPerLoop::Two,
        BarsPerLoop::Four,
        BarsPerLoop::Eight,
        BarsPerLoop::Sixteen,
    ];

    pub fn bars(&self) -> u32 {
        match self {
            BarsPerLoop::One => 1,
            BarsPerLoop::Two => 2,
            BarsPerLoop::Four => 4,
            BarsPerLoop::Eight => 8,
            BarsPerLoop::Sixteen => 16,
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|b| b == self).unwrap_or(0)
    }

    /// The next longer loop length, saturating at 16.
    pub fn longer(&self) -> BarsPerLoop {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    /// The next shorter loop length, saturating at 1.
    pub fn shorter(&self) -> BarsPerLoop {
        Self::ALL[self.index().saturating_sub(1)]
    }
}

impl TryFrom<u32> for BarsPerLoop {
    type Error = ClockError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|b| b.bars() == value)
            .ok_or(ClockError::InvalidBarsPerLoop(value))
    }
}

impl From<BarsPerLoop> for u32 {
    fn from(value: BarsPerLoop) -> Self {
        value.bars()
    }
}

impl fmt::Display for BarsPerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bars())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

/// A root pitch class (0 = C) and mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Key {
    root: u8,
    mode: Mode,
}

impl Default for Key {
    fn default() -> Self {
        Key {
            root: 0,
            mode: Mode::Major,
        }
    }
}

impl Key {
    /// Creates a key; roots wrap around the octave.
    pub fn new(root: u8, mode: Mode) -> Key {
        Key {
            root: root % 12,
            mode,
        }
    }

    pub fn root(&self) -> u8 {
        self.root
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Moves the root by `semitones`, keeping the mode.
    pub fn transposed(&self, semitones: i32) -> Key {
        Key::new((self.root as i32 + semitones).rem_euclid(12) as u8, self.mode)
    }

    pub fn with_mode(&self, mode: Mode) -> Key {
        Key::new(self.root, mode)
    }
}

impl FromStr for Key {
    type Err = ClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClockError::InvalidKey(s.to_string());
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
        let natural: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return Err(invalid()),
        };

        let rest = chars.as_str();
        let (accidental, rest) = if let Some(rest) = rest.strip_prefix(['#', '♯']) {
            (1, rest)
        } else if let Some(rest) = rest.strip_prefix(['b', '♭']) {
            (-1, rest)
        } else {
            (0, rest)
        };

        let mode = match rest.trim().to_ascii_lowercase().as_str() {
            "" | "major" | "maj" => Mode::Major,
            "minor" | "min" | "m" => Mode::Minor,
            _ => return Err(invalid()),
        };

        Ok(Key::new((natural + accidental).rem_euclid(12) as u8, mode))
    }
}

impl TryFrom<String> for Key {
    type Error = ClockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(value: Key) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Major => write!(f, "{}", NOTE_NAMES[self.root as usize]),
            Mode::Minor => write!(f, "{} minor", NOTE_NAMES[self.root as usize]),
        }
    }
}

/// Signed semitone distance from `from` to `to` along the shorter way round the octave.
/// A tritone resolves to -6.
pub fn closest_semitones(from: u8, to: u8) -> i32 {
    (to as i32 - from as i32 + 6).rem_euclid(12) - 6
}

/// Loop length in seconds at the given tempo, in 4/4.
pub fn loop_duration_seconds(bars: BarsPerLoop, bpm: u32) -> f64 {
    (bars.bars() * BEATS_PER_BAR) as f64 * 60.0 / bpm as f64
}

fn check_bpm(bpm: u32) -> Result<u32, ClockError> {
    if (MIN_BPM..=MAX_BPM).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(ClockError::BpmOutOfRange(bpm))
    }
}

/// The musical settings, without transport position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    pub bpm: u32,
    pub key: Key,
    pub bars_per_loop: BarsPerLoop,
    pub mute_all: bool,
}

impl Default for ClockState {
    fn default() -> Self {
        ClockState {
            bpm: 120,
            key: Key::default(),
            bars_per_loop: BarsPerLoop::Four,
            mute_all: false,
        }
    }
}

impl ClockState {
    pub fn loop_duration_seconds(&self) -> f64 {
        loop_duration_seconds(self.bars_per_loop, self.bpm)
    }
}

/// Clock values captured when a cell starts loading, used for later retuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub bpm: u32,
    pub key: Key,
    pub bars_per_loop: BarsPerLoop,
}

impl ClockSnapshot {
    pub fn loop_duration_seconds(&self) -> f64 {
        loop_duration_seconds(self.bars_per_loop, self.bpm)
    }
}

/// Loop length in whole frames.
fn frames_per_loop(state: &ClockState, sample_rate: u32) -> u64 {
    ((state.loop_duration_seconds() * sample_rate as f64).round() as u64).max(1)
}

/// Placement of the loop grid. Boundaries fall at `origin + k * loop_frames` for
/// every integer `k`; the origin may lie before frame zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Grid {
    origin: i64,
    loop_frames: u64,
}

impl Grid {
    /// Frames elapsed since the last boundary at or before `frame`.
    fn offset(&self, frame: u64) -> u64 {
        (frame as i64 - self.origin).rem_euclid(self.loop_frames as i64) as u64
    }

    fn next_boundary(&self, frame: u64) -> u64 {
        match self.offset(frame) {
            0 => frame,
            offset => frame + (self.loop_frames - offset),
        }
    }

    /// The grid for a new loop length that keeps the current phase at `frame`.
    fn rescaled(&self, frame: u64, loop_frames: u64) -> Grid {
        let phase = self.offset(frame) as f64 / self.loop_frames as f64;
        let elapsed = (phase * loop_frames as f64).round() as i64;
        Grid {
            origin: frame as i64 - elapsed,
            loop_frames,
        }
    }
}

/// The shared clock. Pass it around in an `Arc`; every method takes `&self`.
pub struct Clock {
    state: RwLock<ClockState>,
    /// Always written while `state` is write-locked.
    grid: RwLock<Grid>,
    sample_rate: u32,
    position: AtomicU64,
    locked: AtomicBool,
    muted: AtomicBool,
}

impl Clock {
    pub fn new(sample_rate: u32, state: ClockState) -> Result<Clock, ClockError> {
        check_bpm(state.bpm)?;
        let sample_rate = sample_rate.max(1);
        Ok(Clock {
            grid: RwLock::new(Grid {
                origin: 0,
                loop_frames: frames_per_loop(&state, sample_rate),
            }),
            muted: AtomicBool::new(state.mute_all),
            state: RwLock::new(state),
            sample_rate,
            position: AtomicU64::new(0),
            locked: AtomicBool::new(false),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> ClockState {
        *self.state.read()
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let state = self.state.read();
        ClockSnapshot {
            bpm: state.bpm,
            key: state.key,
            bars_per_loop: state.bars_per_loop,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.state.read().bpm
    }

    pub fn key(&self) -> Key {
        self.state.read().key
    }

    pub fn bars_per_loop(&self) -> BarsPerLoop {
        self.state.read().bars_per_loop
    }

    /// Safe to call from the audio thread.
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Length of one loop of the bar grid: `barsPerLoop * 4 * 60 / bpm`.
    pub fn bar_duration_seconds(&self) -> f64 {
        self.state.read().loop_duration_seconds()
    }

    /// The loop grid in whole frames.
    pub fn loop_frames(&self) -> u64 {
        self.grid.read().loop_frames
    }

    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.sample_rate as f64
    }

    /// Time until the next grid boundary. On an exact boundary this is a full loop.
    pub fn seconds_until_next_bar(&self) -> f64 {
        let grid = *self.grid.read();
        let remaining = grid.loop_frames - grid.offset(self.position_frames());
        remaining as f64 / self.sample_rate as f64
    }

    /// First grid boundary at or after the current position, in frames.
    pub fn next_bar_frame(&self) -> u64 {
        self.grid.read().next_boundary(self.position_frames())
    }

    /// Re-anchors the grid after a loop-length change. The caller holds the state
    /// write lock.
    fn regrid(&self, state: &ClockState) {
        let loop_frames = frames_per_loop(state, self.sample_rate);
        let mut grid = self.grid.write();
        if grid.loop_frames != loop_frames {
            *grid = grid.rescaled(self.position_frames(), loop_frames);
        }
    }

    /// Moves the transport forward. Called by the mixer after each rendered block.
    pub fn advance(&self, frames: u64) {
        self.position.fetch_add(frames, Ordering::AcqRel);
    }

    /// Jumps the transport to an absolute frame.
    pub fn seek(&self, frame: u64) {
        self.position.store(frame, Ordering::Release);
    }

    /// Locks key and loop length. The controller sets this while any cell is ready.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Sets the tempo. Tempo stays adjustable while locked; loops retune through the
    /// tempo ratio.
    pub fn set_bpm(&self, bpm: u32) -> Result<(), ClockError> {
        let bpm = check_bpm(bpm)?;
        let mut state = self.state.write();
        state.bpm = bpm;
        self.regrid(&state);
        info!(bpm, "Tempo changed");
        Ok(())
    }

    /// Nudges the tempo, clamping to the legal range.
    pub fn nudge_bpm(&self, delta: i32) -> u32 {
        let mut state = self.state.write();
        state.bpm = (state.bpm as i64 + delta as i64).clamp(MIN_BPM as i64, MAX_BPM as i64) as u32;
        self.regrid(&state);
        state.bpm
    }

    pub fn set_key(&self, key: Key) -> Result<(), ClockError> {
        if self.is_locked() {
            return Err(ClockError::Locked("key"));
        }
        self.state.write().key = key;
        info!(key = %key, "Key changed");
        Ok(())
    }

    pub fn set_bars_per_loop(&self, bars: BarsPerLoop) -> Result<(), ClockError> {
        if self.is_locked() {
            return Err(ClockError::Locked("bars per loop"));
        }
        let mut state = self.state.write();
        state.bars_per_loop = bars;
        self.regrid(&state);
        info!(bars = bars.bars(), "Loop length changed");
        Ok(())
    }

    pub fn set_mute_all(&self, mute_all: bool) {
        self.state.write().mute_all = mute_all;
        self.muted.store(mute_all, Ordering::Release);
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("state", &self.state())
            .field("sample_rate", &self.sample_rate)
            .field("position_frames", &self.position_frames())
            .field("locked", &self.is_locked())
            .finish()
    }
}
