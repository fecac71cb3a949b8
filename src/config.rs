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
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::audio::onset::OnsetDetector;
use crate::cell::{CellSettings, Discipline};
use crate::clock::{BarsPerLoop, ClockState, Key, MAX_BPM, MIN_BPM};

pub mod error;

pub use error::ConfigError;

/// Prefix for environment overrides, e.g. `THINGBEAT_SAMPLE_RATE=48000`.
const ENV_PREFIX: &str = "THINGBEAT";

/// Engine configuration. Every field has a default, so an empty file is valid.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine and output sample rate in Hz.
    sample_rate: u32,

    /// Mixer output channels.
    output_channels: usize,

    /// RMS level a window must exceed to count as the onset.
    onset_threshold: f32,

    /// Onset analysis window in frames.
    onset_window: usize,

    /// Volume a cell starts at.
    default_volume: f32,

    /// Polyphony ceiling for the instrument. The oldest voice is stolen past this.
    max_instrument_voices: usize,

    /// Speed-cycle table for drum cells.
    speed_multipliers: Vec<f64>,

    /// Conform decoded clips to `sample_rate` before quantizing.
    resample_on_load: bool,

    initial_bpm: u32,
    initial_key: Key,
    initial_bars_per_loop: BarsPerLoop,

    /// Capacity of the control to audio thread queue.
    source_queue_size: usize,

    /// Priority of the audio callback thread (0-99).
    callback_thread_priority: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            output_channels: 2,
            onset_threshold: crate::audio::onset::DEFAULT_THRESHOLD_RMS,
            onset_window: crate::audio::onset::DEFAULT_WINDOW_SIZE,
            default_volume: 0.8,
            max_instrument_voices: 32,
            speed_multipliers: vec![1.0, 1.5, 2.0, 3.0, 4.0],
            resample_on_load: true,
            initial_bpm: 120,
            initial_key: Key::default(),
            initial_bars_per_loop: BarsPerLoop::Four,
            source_queue_size: 256,
            callback_thread_priority: 70,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from an optional YAML file, then applies
    /// `THINGBEAT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: EngineConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a YAML document. Environment overrides are not applied.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| Err(ConfigError::Invalid { field, reason });
        if self.sample_rate == 0 {
            return invalid("sample_rate", "must be greater than zero".into());
        }
        if !(1..=32).contains(&self.output_channels) {
            return invalid("output_channels", format!("{} is outside 1..=32", self.output_channels));
        }
        if !self.onset_threshold.is_finite() || self.onset_threshold < 0.0 {
            return invalid("onset_threshold", format!("{} is not a level", self.onset_threshold));
        }
        if self.onset_window == 0 {
            return invalid("onset_window", "must be greater than zero".into());
        }
        if !(0.0..=1.0).contains(&self.default_volume) {
            return invalid("default_volume", format!("{} is outside 0..=1", self.default_volume));
        }
        if self.max_instrument_voices == 0 {
            return invalid("max_instrument_voices", "must be greater than zero".into());
        }
        if self.speed_multipliers.is_empty() {
            return invalid("speed_multipliers", "must not be empty".into());
        }
        if let Some(bad) = self
            .speed_multipliers
            .iter()
            .find(|m| !m.is_finite() || **m <= 0.0)
        {
            return invalid("speed_multipliers", format!("{bad} is not a positive rate"));
        }
        if !(MIN_BPM..=MAX_BPM).contains(&self.initial_bpm) {
            return invalid("initial_bpm", format!("{} is outside 60..=300", self.initial_bpm));
        }
        if self.source_queue_size == 0 {
            return invalid("source_queue_size", "must be greater than zero".into());
        }
        if self.callback_thread_priority > 99 {
            return invalid(
                "callback_thread_priority",
                format!("{} is outside 0..=99", self.callback_thread_priority),
            );
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn resample_on_load(&self) -> bool {
        self.resample_on_load
    }

    pub fn source_queue_size(&self) -> usize {
        self.source_queue_size
    }

    pub fn callback_thread_priority(&self) -> u8 {
        self.callback_thread_priority
    }

    pub fn speed_multipliers(&self) -> &[f64] {
        &self.speed_multipliers
    }

    pub fn onset_detector(&self) -> OnsetDetector {
        OnsetDetector::new(self.onset_threshold, self.onset_window)
    }

    pub fn cell_settings(&self) -> CellSettings {
        CellSettings {
            default_volume: self.default_volume,
            speed_multipliers: self.speed_multipliers.clone(),
            max_instrument_voices: self.max_instrument_voices,
            discipline: Discipline::default(),
        }
    }

    /// Clock settings at startup.
    pub fn clock_state(&self) -> ClockState {
        ClockState {
            bpm: self.initial_bpm,
            key: self.initial_key,
            bars_per_loop: self.initial_bars_per_loop,
            mute_all: false,
        }
    }

    /// Overrides the sample rate, e.g. with the rate the output device reports.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> EngineConfig {
        self.sample_rate = sample_rate;
        self
    }

    /// Overrides the output channel count.
    pub fn with_output_channels(mut self, output_channels: usize) -> EngineConfig {
        self.output_channels = output_channels;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::clock::Mode;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.clock_state(), ClockState::default());
        assert_eq!(config.onset_detector(), OnsetDetector::default());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
            sample_rate: 48000
            output_channels: 1
            initial_bpm: 100
            initial_key: "A minor"
            initial_bars_per_loop: 2
            speed_multipliers: [1, 2]
            default_volume: 0.5
        "#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.output_channels(), 1);
        let clock = config.clock_state();
        assert_eq!(clock.bpm, 100);
        assert_eq!(clock.key, Key::new(9, Mode::Minor));
        assert_eq!(clock.bars_per_loop, BarsPerLoop::Two);
        assert_eq!(config.speed_multipliers(), &[1.0, 2.0]);
        assert_eq!(config.cell_settings().default_volume, 0.5);
        // Untouched fields keep their defaults.
        assert_eq!(config.source_queue_size(), 256);
        assert!(config.resample_on_load());
    }

    #[test]
    fn test_invalid_values() {
        for yaml in [
            "initial_bpm: 30",
            "initial_bars_per_loop: 3",
            "initial_key: H",
            "speed_multipliers: []",
            "speed_multipliers: [1, -2]",
            "default_volume: 1.5",
            "sample_rate: 0",
            "callback_thread_priority: 120",
        ] {
            assert!(EngineConfig::from_yaml(yaml).is_err(), "{yaml} should be rejected");
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "onset_threshold: 0.05\nonset_window: 256").unwrap();
        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.onset_detector(), OnsetDetector::new(0.05, 256));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            EngineConfig::load(Some(&missing)),
            Err(ConfigError::Load(_))
        ));
    }
}
