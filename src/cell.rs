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

//! The nine performable cells.
//!
//! Each cell owns one source buffer and a category-specific playback mode. See
//! [`engine::CellEngine`] for the per-cell controller and [`voice_bank::VoiceBank`] for
//! the pitched instrument.

use thiserror::Error;

use crate::audio::mixer::MixerError;

pub mod category;
pub mod engine;
pub mod state;
pub mod voice_bank;

pub use category::Category;
pub use engine::{CellEngine, CellSettings, Playback};
pub use state::CellState;
pub use voice_bank::{voice_rate, Discipline, VoiceBank, VOICE_COUNT};

/// Number of cells in the grid.
pub const CELL_COUNT: usize = 9;

#[derive(Debug, Error, PartialEq)]
pub enum CellError {
    #[error("cell {slot} cannot move from {from} to {to}")]
    InvalidTransition {
        slot: usize,
        from: CellState,
        to: CellState,
    },

    #[error("slot {0} is outside 0..9")]
    SlotOutOfRange(usize),

    #[error("slot {0} already holds the pitched instrument")]
    InstrumentTaken(usize),

    #[error("cell {0} has no sound loaded")]
    NotReady(usize),

    #[error("{operation} is not available for {category} cells")]
    Unsupported {
        operation: &'static str,
        category: Category,
    },

    #[error("semitone {0} is outside 0..=12")]
    SemitoneOutOfRange(u8),

    #[error(transparent)]
    Mixer(#[from] MixerError),
}

/// A buffer or failure arrived for a cell that is no longer waiting for it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("discarding stale delivery for cell {slot} (request {generation})")]
pub struct StaleDeliveryError {
    pub slot: usize,
    pub generation: u64,
}
