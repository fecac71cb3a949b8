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

//! A tempo-locked sample engine.
//!
//! Generated clips are decoded, trimmed to the bar grid at their first transient, and
//! loaded into nine cells that play against one shared clock. The mixed output can be
//! captured as a two-loop take and exported as canonical 16-bit WAV.

pub mod audio;
pub mod cell;
pub mod clock;
pub mod config;
pub mod controller;
pub mod playsync;
pub mod recording;

#[cfg(test)]
mod testutil;
