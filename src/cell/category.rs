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
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::ClockSnapshot;

/// Nominal request length for one-shot drums.
const ONE_SHOT_SECONDS: f64 = 1.5;
/// Nominal request length for instrument timbres.
const INSTRUMENT_SECONDS: f64 = 4.0;
/// Nominal request length for textures.
const TEXTURE_SECONDS: f64 = 10.0;

/// What kind of sound a cell holds. Serialized with the keys the generation pipeline uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "drum_loop")]
    LoopingRhythm,
    #[serde(rename = "drum_one_shot")]
    OneShotDrum,
    #[serde(rename = "synth_timbre")]
    PitchedInstrument,
    #[serde(rename = "texture")]
    AutoLoopTexture,
    #[serde(rename = "lead_line")]
    AutoLoopLead,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::LoopingRhythm,
        Category::OneShotDrum,
        Category::PitchedInstrument,
        Category::AutoLoopTexture,
        Category::AutoLoopLead,
    ];

    /// The pipeline key, e.g. `drum_loop`.
    pub fn key(&self) -> &'static str {
        match self {
            Category::LoopingRhythm => "drum_loop",
            Category::OneShotDrum => "drum_one_shot",
            Category::PitchedInstrument => "synth_timbre",
            Category::AutoLoopTexture => "texture",
            Category::AutoLoopLead => "lead_line",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::LoopingRhythm => "Drum Loop",
            Category::OneShotDrum => "Drum Sample",
            Category::PitchedInstrument => "Synth",
            Category::AutoLoopTexture => "Texture",
            Category::AutoLoopLead => "Melody",
        }
    }

    /// Rhythmic and melodic loops are cut to exactly one loop of the bar grid.
    pub fn needs_quantize(&self) -> bool {
        matches!(self, Category::LoopingRhythm | Category::AutoLoopLead)
    }

    /// Categories that loop and start on their own once loaded.
    pub fn loops(&self) -> bool {
        matches!(
            self,
            Category::LoopingRhythm | Category::AutoLoopTexture | Category::AutoLoopLead
        )
    }

    /// Loop starts wait for the next bar boundary.
    pub fn bar_aligned(&self) -> bool {
        self.needs_quantize()
    }

    pub fn has_speed_cycle(&self) -> bool {
        matches!(self, Category::LoopingRhythm | Category::OneShotDrum)
    }

    /// Duration to ask the generator for, given the clock at request time.
    pub fn requested_duration_seconds(&self, snapshot: &ClockSnapshot) -> f64 {
        match self {
            Category::LoopingRhythm | Category::AutoLoopLead => snapshot.loop_duration_seconds(),
            Category::OneShotDrum => ONE_SHOT_SECONDS,
            Category::PitchedInstrument => INSTRUMENT_SECONDS,
            Category::AutoLoopTexture => TEXTURE_SECONDS,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.key() == s)
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}
