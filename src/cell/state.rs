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
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    #[default]
    Empty,
    Loading,
    Ready,
    Failed,
}

impl CellState {
    /// Legal moves: empty to loading; loading to ready, failed, or back to empty;
    /// anything to empty on reset.
    pub fn can_transition_to(&self, next: CellState) -> bool {
        matches!(
            (self, next),
            (CellState::Empty, CellState::Loading)
                | (CellState::Loading, CellState::Ready)
                | (CellState::Loading, CellState::Failed)
                | (_, CellState::Empty)
        )
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellState::Empty => "empty",
            CellState::Loading => "loading",
            CellState::Ready => "ready",
            CellState::Failed => "failed",
        };
        f.write_str(name)
    }
}
