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

//! The top-level controller: owns the nine cells, the clock and the mixer handle.
//!
//! Every mutation of shared musical state goes through here, so the cross-cell rules
//! live here too: at most one instrument cell, and key and loop length locked while
//! any cell holds a sound.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::audio::mixer::{Mixer, MixerHandle};
use crate::audio::resample::resample;
use crate::audio::{AudioBuffer, DecodeError, Quantizer, ResampleError, WavCodec};
use crate::cell::engine::CellInfo;
use crate::cell::{Category, CellEngine, CellError, CellState, Discipline, CELL_COUNT};
use crate::clock::{BarsPerLoop, Clock, ClockError, ClockSnapshot, Key};
use crate::config::EngineConfig;
use crate::playsync::LoadToken;

pub mod keyboard;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Cell(#[from] CellError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("no cell holds the instrument")]
    NoInstrument,
}

/// Control-surface events.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Trigger(usize),
    Stop(usize),
    Reset(usize),
    SetVolume(usize, f32),
    CycleSpeed(usize),
    NoteOn(u8),
    NoteOff(u8),
    SetBpm(u32),
    NudgeBpm(i32),
    SetKey(Key),
    StepKey(i32),
    SetBarsPerLoop(BarsPerLoop),
    LongerLoop,
    ShorterLoop,
    ToggleMute,
    SetDiscipline(Discipline),
}

/// Produces control events, e.g. from the keyboard.
pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// What the external pipeline needs to generate a clip for a cell.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub token: LoadToken,
    pub category: Category,
    pub clock: ClockSnapshot,
    /// Nominal clip length to ask the generator for.
    pub duration_seconds: f64,
}

/// How a delivery ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ready,
    Failed,
    /// The cell no longer wanted this clip.
    Discarded,
}

pub struct Controller {
    clock: Arc<Clock>,
    mixer: MixerHandle,
    cells: Vec<Arc<Mutex<CellEngine>>>,
    pipeline: ClipPipeline,
    config: EngineConfig,
    discipline: Mutex<Discipline>,
    /// Serializes load requests so the instrument check and the state change are atomic.
    requests: Mutex<()>,
}

impl Controller {
    /// Builds the controller and the mixer the output device should drive.
    pub fn new(config: EngineConfig) -> Result<(Controller, Mixer), ClockError> {
        let clock = Arc::new(Clock::new(config.sample_rate(), config.clock_state())?);
        let (mixer, handle) = Mixer::new(
            clock.clone(),
            config.output_channels(),
            config.source_queue_size(),
        );
        let settings = config.cell_settings();
        let cells = (0..CELL_COUNT)
            .map(|slot| {
                Arc::new(Mutex::new(CellEngine::new(
                    slot,
                    clock.clone(),
                    handle.clone(),
                    settings.clone(),
                )))
            })
            .collect();

        info!(
            sample_rate = config.sample_rate(),
            channels = config.output_channels(),
            bpm = clock.bpm(),
            key = %clock.key(),
            bars = clock.bars_per_loop().bars(),
            "Controller created"
        );
        let controller = Controller {
            clock,
            mixer: handle,
            cells,
            pipeline: ClipPipeline::new(
                config.sample_rate(),
                config.resample_on_load(),
                Quantizer::new(config.onset_detector()),
            ),
            config,
            discipline: Mutex::new(settings.discipline),
            requests: Mutex::new(()),
        };
        Ok((controller, mixer))
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn mixer(&self) -> &MixerHandle {
        &self.mixer
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replaces the resampling stage applied to deliveries.
    pub fn with_resampler(mut self, resampler: ResampleFn) -> Controller {
        self.pipeline = self.pipeline.with_resampler(resampler);
        self
    }

    pub fn cell(&self, slot: usize) -> Result<&Arc<Mutex<CellEngine>>, CellError> {
        self.cells.get(slot).ok_or(CellError::SlotOutOfRange(slot))
    }

    pub fn cells(&self) -> &[Arc<Mutex<CellEngine>>] {
        &self.cells
    }

    pub fn cell_infos(&self) -> Vec<CellInfo> {
        self.cells.iter().map(|c| c.lock().info()).collect()
    }

    pub fn discipline(&self) -> Discipline {
        *self.discipline.lock()
    }

    /// The slot currently holding the instrument, in any non-empty state.
    pub fn instrument_slot(&self) -> Option<usize> {
        self.cells
            .iter()
            .position(|c| c.lock().category() == Some(Category::PitchedInstrument))
    }

    /// Starts loading a cell and returns what the generator should be asked for.
    pub fn request(
        &self,
        slot: usize,
        category: Category,
        descriptor: Option<String>,
    ) -> Result<LoadRequest, ControllerError> {
        let _guard = self.requests.lock();
        let cell = self.cell(slot)?;
        if category == Category::PitchedInstrument {
            if let Some(taken) = self.instrument_slot().filter(|s| *s != slot) {
                return Err(CellError::InstrumentTaken(taken).into());
            }
        }

        let mut cell = cell.lock();
        let token = cell.begin_loading(category)?;
        cell.set_descriptor(descriptor);
        let clock = cell.origin().unwrap_or_else(|| self.clock.snapshot());
        Ok(LoadRequest {
            token,
            category,
            clock,
            duration_seconds: category.requested_duration_seconds(&clock),
        })
    }

    /// Decodes, conforms and quantizes a delivered clip off the calling thread, then
    /// commits it if the request is still current.
    pub async fn deliver(
        &self,
        token: LoadToken,
        bytes: Vec<u8>,
        declared_duration: f64,
        hint: Option<String>,
    ) -> DeliveryOutcome {
        let slot = token.slot();
        let Ok(cell) = self.cell(slot) else {
            warn!(slot, "Delivery for unknown slot");
            return DeliveryOutcome::Discarded;
        };
        if token.is_cancelled() {
            debug!(slot, generation = token.generation(), "Dropping cancelled delivery");
            return DeliveryOutcome::Discarded;
        }
        let (category, origin) = {
            let cell = cell.lock();
            match (cell.category(), cell.origin()) {
                (Some(category), Some(origin)) if cell.state() == CellState::Loading => {
                    (category, origin)
                }
                _ => {
                    debug!(slot, generation = token.generation(), "Dropping stale delivery");
                    return DeliveryOutcome::Discarded;
                }
            }
        };

        let pipeline = self.pipeline;
        let prepared = tokio::task::spawn_blocking(move || {
            let buffer = pipeline.prepare(&bytes, hint.as_deref(), category, &origin)?;
            let drift = buffer.duration_seconds() - declared_duration;
            debug!(slot, declared_duration, drift, "Clip prepared");
            Ok::<AudioBuffer, DecodeError>(buffer)
        })
        .await;

        let outcome = {
            let mut cell = cell.lock();
            let result = match prepared {
                Ok(Ok(buffer)) => cell.commit(&token, buffer).map(|_| DeliveryOutcome::Ready),
                Ok(Err(e)) => {
                    warn!(slot, error = %e, "Unable to decode delivered clip");
                    cell.fail(&token).map(|_| DeliveryOutcome::Failed)
                }
                Err(e) => {
                    error!(slot, error = %e, "Clip processing task failed");
                    cell.fail(&token).map(|_| DeliveryOutcome::Failed)
                }
            };
            match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(slot, error = %e, "Discarding delivery");
                    DeliveryOutcome::Discarded
                }
            }
        };
        self.refresh_lock();
        outcome
    }

    /// Attaches the snapshot image for a cell.
    pub fn attach_snapshot(&self, slot: usize, snapshot: Vec<u8>) -> Result<(), CellError> {
        self.cell(slot)?.lock().set_snapshot(snapshot);
        Ok(())
    }

    fn refresh_lock(&self) {
        let any_ready = self
            .cells
            .iter()
            .any(|c| c.lock().state() == CellState::Ready);
        if any_ready != self.clock.is_locked() {
            info!(locked = any_ready, "Musical settings lock changed");
        }
        self.clock.set_locked(any_ready);
    }

    fn retune_all(&self) {
        for cell in &self.cells {
            cell.lock().retune();
        }
    }

    pub fn trigger(&self, slot: usize) -> Result<(), ControllerError> {
        Ok(self.cell(slot)?.lock().trigger()?)
    }

    pub fn stop(&self, slot: usize) -> Result<(), ControllerError> {
        self.cell(slot)?.lock().stop();
        Ok(())
    }

    /// Stops the cell, drops any pending delivery and empties it.
    pub fn reset(&self, slot: usize) -> Result<(), ControllerError> {
        self.cell(slot)?.lock().reset();
        self.refresh_lock();
        Ok(())
    }

    pub fn set_volume(&self, slot: usize, volume: f32) -> Result<(), ControllerError> {
        self.cell(slot)?.lock().set_volume(volume);
        Ok(())
    }

    pub fn cycle_speed(&self, slot: usize) -> Result<f64, ControllerError> {
        Ok(self.cell(slot)?.lock().cycle_speed()?)
    }

    fn instrument(&self) -> Result<&Arc<Mutex<CellEngine>>, ControllerError> {
        self.cells
            .iter()
            .find(|c| {
                let cell = c.lock();
                cell.category() == Some(Category::PitchedInstrument)
                    && cell.state() == CellState::Ready
            })
            .ok_or(ControllerError::NoInstrument)
    }

    pub fn note_on(&self, semitone: u8) -> Result<(), ControllerError> {
        Ok(self.instrument()?.lock().note_on(semitone)?)
    }

    pub fn note_off(&self, semitone: u8) -> Result<(), ControllerError> {
        Ok(self.instrument()?.lock().note_off(semitone)?)
    }

    pub fn set_discipline(&self, discipline: Discipline) {
        *self.discipline.lock() = discipline;
        for cell in &self.cells {
            cell.lock().set_discipline(discipline);
        }
        info!(?discipline, "Instrument discipline changed");
    }

    pub fn set_bpm(&self, bpm: u32) -> Result<(), ControllerError> {
        self.clock.set_bpm(bpm)?;
        self.retune_all();
        Ok(())
    }

    pub fn nudge_bpm(&self, delta: i32) -> u32 {
        let bpm = self.clock.nudge_bpm(delta);
        self.retune_all();
        bpm
    }

    pub fn set_key(&self, key: Key) -> Result<(), ControllerError> {
        self.clock.set_key(key)?;
        self.retune_all();
        Ok(())
    }

    /// Moves the key root by `semitones`, keeping the mode.
    pub fn step_key(&self, semitones: i32) -> Result<Key, ControllerError> {
        let key = self.clock.key().transposed(semitones);
        self.set_key(key)?;
        Ok(key)
    }

    pub fn set_bars_per_loop(&self, bars: BarsPerLoop) -> Result<(), ControllerError> {
        Ok(self.clock.set_bars_per_loop(bars)?)
    }

    pub fn toggle_mute(&self) -> bool {
        let muted = !self.clock.is_muted();
        self.clock.set_mute_all(muted);
        info!(muted, "Mute all");
        muted
    }

    /// Applies one control event.
    pub fn apply(&self, event: Event) -> Result<(), ControllerError> {
        match event {
            Event::Trigger(slot) => self.trigger(slot),
            Event::Stop(slot) => self.stop(slot),
            Event::Reset(slot) => self.reset(slot),
            Event::SetVolume(slot, volume) => self.set_volume(slot, volume),
            Event::CycleSpeed(slot) => self.cycle_speed(slot).map(|_| ()),
            Event::NoteOn(semitone) => self.note_on(semitone),
            Event::NoteOff(semitone) => self.note_off(semitone),
            Event::SetBpm(bpm) => self.set_bpm(bpm),
            Event::NudgeBpm(delta) => {
                self.nudge_bpm(delta);
                Ok(())
            }
            Event::SetKey(key) => self.set_key(key),
            Event::StepKey(delta) => self.step_key(delta).map(|_| ()),
            Event::SetBarsPerLoop(bars) => self.set_bars_per_loop(bars),
            Event::LongerLoop => self.set_bars_per_loop(self.clock.bars_per_loop().longer()),
            Event::ShorterLoop => self.set_bars_per_loop(self.clock.bars_per_loop().shorter()),
            Event::ToggleMute => {
                self.toggle_mute();
                Ok(())
            }
            Event::SetDiscipline(discipline) => {
                self.set_discipline(discipline);
                Ok(())
            }
        }
    }

    /// Applies events from the driver until it closes its channel.
    pub async fn run(self: Arc<Self>, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");
        async move {
            let (events_tx, mut events_rx) = mpsc::channel(16);
            let join_handle = driver.monitor_events(events_tx);
            info!("Controller started.");

            while let Some(event) = events_rx.recv().await {
                info!(event = ?event, "Received event.");
                if let Err(e) = self.apply(event) {
                    warn!(error = %e, "Unable to apply event");
                }
            }

            info!("Controller closing.");
            match join_handle.await {
                Ok(Err(e)) => error!(error = %e, "Event driver failed"),
                Err(e) => error!(error = %e, "Error waiting for event driver to stop"),
                Ok(Ok(())) => {}
            }
        }
        .instrument(span)
        .await
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("clock", &self.clock)
            .field("mixer", &self.mixer)
            .finish()
    }
}

/// A resampling stage: converts a buffer to the given rate.
pub type ResampleFn = fn(&AudioBuffer, u32) -> Result<AudioBuffer, ResampleError>;

/// Turns delivered bytes into a cell buffer: decode, conform to the engine rate, and
/// quantize rhythmic and melodic loops to one loop at the clip's original tempo.
/// Resampling and quantization failures degrade to the unprocessed buffer.
#[derive(Clone, Copy)]
pub struct ClipPipeline {
    engine_rate: u32,
    resample_on_load: bool,
    quantizer: Quantizer,
    resampler: ResampleFn,
}

impl ClipPipeline {
    pub fn new(engine_rate: u32, resample_on_load: bool, quantizer: Quantizer) -> ClipPipeline {
        ClipPipeline {
            engine_rate,
            resample_on_load,
            quantizer,
            resampler: resample,
        }
    }

    pub fn with_resampler(self, resampler: ResampleFn) -> ClipPipeline {
        ClipPipeline { resampler, ..self }
    }

    pub fn prepare(
        &self,
        bytes: &[u8],
        hint: Option<&str>,
        category: Category,
        origin: &ClockSnapshot,
    ) -> Result<AudioBuffer, DecodeError> {
        let decoded = WavCodec::decode_with_hint(bytes, hint)?;
        let conformed = if self.resample_on_load && decoded.sample_rate() != self.engine_rate {
            match (self.resampler)(&decoded, self.engine_rate) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!(
                        error = %e,
                        from = decoded.sample_rate(),
                        to = self.engine_rate,
                        "Unable to resample clip, keeping original rate"
                    );
                    decoded
                }
            }
        } else {
            decoded
        };

        if !category.needs_quantize() {
            return Ok(conformed);
        }
        match self
            .quantizer
            .quantize(&conformed, origin.loop_duration_seconds(), true)
        {
            Ok(quantized) => Ok(quantized),
            Err(e) => {
                warn!(error = %e, category = %category, "Quantization failed, using unquantized clip");
                Ok(conformed)
            }
        }
    }
}

impl std::fmt::Debug for ClipPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipPipeline")
            .field("engine_rate", &self.engine_rate)
            .field("resample_on_load", &self.resample_on_load)
            .field("quantizer", &self.quantizer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Mode;
    use crate::testutil::{constant, silence_then_tone};

    fn controller() -> (Controller, Mixer) {
        let config = EngineConfig::from_yaml(
            "sample_rate: 1000\noutput_channels: 1\ninitial_bars_per_loop: 1\nonset_window: 64",
        )
        .unwrap();
        Controller::new(config).unwrap()
    }

    fn wav(buffer: &AudioBuffer) -> Vec<u8> {
        WavCodec::encode(buffer).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drum_loop_is_quantized_and_started() {
        let (controller, mut mixer) = controller();
        let request = controller
            .request(0, Category::LoopingRhythm, Some("boom bap".into()))
            .unwrap();
        assert_eq!(request.duration_seconds, 2.0);

        let clip = silence_then_tone(1000, 1, 0.25, 3.0, 0.5);
        let outcome = controller
            .deliver(request.token, wav(&clip), 3.25, None)
            .await;
        assert_eq!(outcome, DeliveryOutcome::Ready);

        let cell = controller.cell(0).unwrap().lock();
        assert_eq!(cell.state(), CellState::Ready);
        assert_eq!(cell.source().unwrap().frame_count(), 2000);
        assert_eq!(cell.descriptor(), Some("boom bap"));
        assert!(cell.is_playing());
        drop(cell);

        assert!(controller.clock().is_locked());
        mixer.render(&mut [0.0; 8]);
        assert_eq!(mixer.active_voices(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_undecodable_delivery_fails_cell() {
        let (controller, _mixer) = controller();
        let request = controller.request(3, Category::OneShotDrum, None).unwrap();
        let outcome = controller
            .deliver(request.token, b"definitely not audio".to_vec(), 1.5, None)
            .await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(controller.cell(3).unwrap().lock().state(), CellState::Failed);
        assert!(!controller.clock().is_locked());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_discards_in_flight_delivery() {
        let (controller, _mixer) = controller();
        let old = controller.request(5, Category::AutoLoopTexture, None).unwrap();
        controller.reset(5).unwrap();
        let new = controller.request(5, Category::AutoLoopTexture, None).unwrap();

        let clip = wav(&constant(1000, 1, 100, 0.5));
        assert_eq!(
            controller.deliver(old.token, clip.clone(), 0.1, None).await,
            DeliveryOutcome::Discarded
        );
        assert_eq!(controller.cell(5).unwrap().lock().state(), CellState::Loading);
        assert_eq!(
            controller.deliver(new.token.clone(), clip.clone(), 0.1, None).await,
            DeliveryOutcome::Ready
        );
        // A duplicate of the committed delivery is ignored.
        assert_eq!(
            controller.deliver(new.token, clip, 0.1, None).await,
            DeliveryOutcome::Discarded
        );
    }

    #[test]
    fn test_single_instrument_slot() {
        let (controller, _mixer) = controller();
        controller.request(2, Category::PitchedInstrument, None).unwrap();
        assert!(matches!(
            controller.request(4, Category::PitchedInstrument, None),
            Err(ControllerError::Cell(CellError::InstrumentTaken(2)))
        ));
        controller.reset(2).unwrap();
        assert!(controller.request(4, Category::PitchedInstrument, None).is_ok());
        assert_eq!(controller.instrument_slot(), Some(4));
    }

    #[test]
    fn test_slot_out_of_range() {
        let (controller, _mixer) = controller();
        assert!(matches!(
            controller.request(9, Category::OneShotDrum, None),
            Err(ControllerError::Cell(CellError::SlotOutOfRange(9)))
        ));
        assert!(controller.trigger(12).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_settings_lock_follows_ready_cells() {
        let (controller, _mixer) = controller();
        controller.apply(Event::StepKey(2)).unwrap();
        assert_eq!(controller.clock().key(), Key::new(2, Mode::Major));

        let request = controller.request(1, Category::OneShotDrum, None).unwrap();
        controller
            .deliver(request.token, wav(&constant(1000, 1, 100, 0.5)), 0.1, None)
            .await;
        assert!(matches!(
            controller.apply(Event::LongerLoop),
            Err(ControllerError::Clock(ClockError::Locked(_)))
        ));
        assert!(controller.apply(Event::StepKey(1)).is_err());
        // Tempo stays adjustable.
        controller.apply(Event::SetBpm(90)).unwrap();
        assert_eq!(controller.nudge_bpm(500), 300);

        controller.reset(1).unwrap();
        controller.apply(Event::LongerLoop).unwrap();
        assert_eq!(controller.clock().bars_per_loop(), BarsPerLoop::Two);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_instrument_events() {
        let (controller, mut mixer) = controller();
        assert!(matches!(
            controller.apply(Event::NoteOn(0)),
            Err(ControllerError::NoInstrument)
        ));

        let request = controller.request(7, Category::PitchedInstrument, None).unwrap();
        controller
            .deliver(request.token, wav(&constant(1000, 1, 500, 0.5)), 4.0, None)
            .await;
        controller.apply(Event::NoteOn(0)).unwrap();
        controller.apply(Event::NoteOn(7)).unwrap();
        mixer.render(&mut [0.0; 4]);
        assert_eq!(mixer.active_voices(), 2);

        controller.apply(Event::SetDiscipline(Discipline::Monophonic)).unwrap();
        assert_eq!(controller.discipline(), Discipline::Monophonic);
        mixer.render(&mut [0.0; 4]);
        assert_eq!(mixer.active_voices(), 0);
    }

    /// Sends a fixed list of events, then closes the channel.
    struct Scripted(Vec<Event>);

    impl Driver for Scripted {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let events = self.0.clone();
            tokio::spawn(async move {
                for event in events {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_applies_driver_events() {
        let (controller, _mixer) = controller();
        let controller = Arc::new(controller);
        let driver = Scripted(vec![
            Event::SetBpm(90),
            // Fails without an instrument; the loop keeps going.
            Event::NoteOn(0),
            Event::ToggleMute,
        ]);
        controller.clone().run(Arc::new(driver)).await;
        assert_eq!(controller.clock().bpm(), 90);
        assert!(controller.clock().is_muted());
    }

    #[test]
    fn test_toggle_mute() {
        let (controller, _mixer) = controller();
        assert!(controller.toggle_mute());
        assert!(controller.clock().is_muted());
        controller.apply(Event::ToggleMute).unwrap();
        assert!(!controller.clock().is_muted());
    }

    fn origin() -> ClockSnapshot {
        ClockSnapshot {
            bpm: 120,
            key: Key::default(),
            bars_per_loop: BarsPerLoop::One,
        }
    }

    fn refuse_to_resample(_: &AudioBuffer, _: u32) -> Result<AudioBuffer, ResampleError> {
        Err(ResampleError::ZeroTargetRate)
    }

    #[test]
    fn test_pipeline_conforms_rate() {
        let clip = constant(2000, 2, 4000, 0.25);
        let pipeline = ClipPipeline::new(1000, true, Quantizer::default());
        let texture = pipeline
            .prepare(&wav(&clip), Some("wav"), Category::AutoLoopTexture, &origin())
            .unwrap();
        assert_eq!(texture.sample_rate(), 1000);
        assert_eq!(texture.channel_count(), 2);

        let looped = pipeline
            .prepare(&wav(&clip), None, Category::AutoLoopLead, &origin())
            .unwrap();
        assert_eq!(looped.frame_count(), 2000);
    }

    #[test]
    fn test_pipeline_keeps_source_rate_when_resampling_fails() {
        let clip = constant(2000, 1, 6000, 0.25);
        let pipeline =
            ClipPipeline::new(1000, true, Quantizer::default()).with_resampler(refuse_to_resample);

        let texture = pipeline
            .prepare(&wav(&clip), None, Category::AutoLoopTexture, &origin())
            .unwrap();
        assert_eq!(texture.sample_rate(), 2000);
        assert_eq!(texture.frame_count(), 6000);

        // Loops are still cut to one loop, counted at the source rate.
        let looped = pipeline
            .prepare(&wav(&clip), None, Category::LoopingRhythm, &origin())
            .unwrap();
        assert_eq!(looped.sample_rate(), 2000);
        assert_eq!(looped.frame_count(), 4000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cell_is_ready_after_resample_failure() {
        let (controller, _mixer) = controller();
        let controller = controller.with_resampler(refuse_to_resample);
        let request = controller.request(6, Category::AutoLoopTexture, None).unwrap();

        let clip = wav(&constant(2000, 1, 600, 0.5));
        assert_eq!(
            controller.deliver(request.token, clip, 0.3, None).await,
            DeliveryOutcome::Ready
        );
        let cell = controller.cell(6).unwrap().lock();
        assert_eq!(cell.state(), CellState::Ready);
        assert_eq!(cell.source().unwrap().sample_rate(), 2000);
        assert_eq!(cell.source().unwrap().frame_count(), 600);
        drop(cell);
        assert!(controller.clock().is_locked());
    }
}
