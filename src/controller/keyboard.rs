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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;
use crate::cell::Discipline;
use crate::clock::BarsPerLoop;

const HELP: &str = "trigger <slot>, stop <slot>, reset <slot>, volume <slot> <0-1>, \
speed <slot>, note <0-12>, release <0-12>, bpm <n|+n|-n>, key <name|+n|-n>, \
bars <n|+|->, mute, mono, poly";

/// A driver that reads one command per line from stdin.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "Command ({HELP}): ")?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        match parse_command(&input) {
            Some(event) => events_tx
                .blocking_send(event)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?,
            None => warn!(input = input.trim(), "Unrecognized input"),
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one command line into an event.
pub fn parse_command(input: &str) -> Option<Event> {
    let input = input.trim().to_lowercase();
    let (command, rest) = input.split_once(' ').unwrap_or((input.as_str(), ""));
    let rest = rest.trim();
    let slot = || rest.parse::<usize>().ok();

    match command {
        "trigger" | "t" => slot().map(Event::Trigger),
        "stop" => slot().map(Event::Stop),
        "reset" => slot().map(Event::Reset),
        "speed" => slot().map(Event::CycleSpeed),
        "volume" => {
            let (slot, volume) = rest.split_once(' ')?;
            Some(Event::SetVolume(slot.parse().ok()?, volume.trim().parse().ok()?))
        }
        "note" => rest.parse().ok().map(Event::NoteOn),
        "release" => rest.parse().ok().map(Event::NoteOff),
        "bpm" if rest.starts_with(['+', '-']) => rest.parse().ok().map(Event::NudgeBpm),
        "bpm" => rest.parse().ok().map(Event::SetBpm),
        "key" if rest.starts_with(['+', '-']) => rest.parse().ok().map(Event::StepKey),
        "key" => rest.parse().ok().map(Event::SetKey),
        "bars" => match rest {
            "+" => Some(Event::LongerLoop),
            "-" => Some(Event::ShorterLoop),
            _ => BarsPerLoop::try_from(rest.parse::<u32>().ok()?)
                .ok()
                .map(Event::SetBarsPerLoop),
        },
        "mute" => Some(Event::ToggleMute),
        "mono" => Some(Event::SetDiscipline(Discipline::Monophonic)),
        "poly" => Some(Event::SetDiscipline(Discipline::Polyphonic)),
        _ => None,
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}
            info!("Keyboard input closed.");
            Ok(())
        })
    }
}
