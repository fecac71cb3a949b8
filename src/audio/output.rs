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

//! The cpal output stream. The mixer is moved into the device callback and rendered
//! there directly; control threads reach it only through its handle.

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thread_priority::ThreadPriority;
use tracing::{error, info, span, Level};

use super::error::OutputError;
use super::mixer::Mixer;
use super::thread_priority::{configure_audio_thread_priority, rt_audio_enabled};

/// An output device and the format it will be driven at.
pub struct OutputDevice {
    name: String,
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
}

impl OutputDevice {
    /// The host's default output device in its default format.
    pub fn default_output() -> Result<OutputDevice, OutputError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;
        OutputDevice::from_cpal(device)
    }

    /// The first output device, on any host, whose name matches.
    pub fn find(name: &str) -> Result<OutputDevice, OutputError> {
        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(host) => host,
                Err(e) => {
                    error!(err = %e, host = host_id.name(), "Unable to open host");
                    continue;
                }
            };
            for device in host.output_devices()? {
                if device.name().is_ok_and(|n| n.trim() == name) {
                    return OutputDevice::from_cpal(device);
                }
            }
        }
        Err(OutputError::DeviceNotFound(name.to_string()))
    }

    fn from_cpal(device: cpal::Device) -> Result<OutputDevice, OutputError> {
        let name = device.name()?;
        let config = device.default_output_config()?;
        Ok(OutputDevice {
            name,
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.config.channels() as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    /// Builds and starts the stream. The mixer must have been created at this
    /// device's sample rate and channel count.
    pub fn start(self, mixer: Mixer, priority: ThreadPriority) -> Result<OutputStream, OutputError> {
        let span = span!(Level::INFO, "output stream");
        let _enter = span.enter();

        let stream_config = self.config.config();
        let rt_audio = rt_audio_enabled();
        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => {
                let mut callback = create_f32_callback(mixer, priority, rt_audio);
                self.device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], info: &cpal::OutputCallbackInfo| callback(data, info),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let mut callback = create_converting_callback::<i16>(mixer, priority, rt_audio);
                self.device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], info: &cpal::OutputCallbackInfo| callback(data, info),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                )?
            }
            cpal::SampleFormat::I32 => {
                let mut callback = create_converting_callback::<i32>(mixer, priority, rt_audio);
                self.device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i32], info: &cpal::OutputCallbackInfo| callback(data, info),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                )?
            }
            other => return Err(OutputError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play()?;
        info!(
            device = self.name,
            channels = self.channels(),
            sample_rate = self.sample_rate(),
            "Output stream started"
        );

        Ok(OutputStream {
            _stream: stream,
            name: self.name,
        })
    }
}

impl fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({} Hz)",
            self.name,
            self.channels(),
            self.sample_rate()
        )
    }
}

/// Lists the names of every output device across hosts.
pub fn list_devices() -> Result<Vec<String>, OutputError> {
    let mut names = Vec::new();
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        for device in host.output_devices()? {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

/// A running stream. Audio stops when this is dropped.
pub struct OutputStream {
    _stream: cpal::Stream,
    name: String,
}

impl OutputStream {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// f32 callback: the mixer renders straight into the device buffer.
fn create_f32_callback(
    mut mixer: Mixer,
    priority: ThreadPriority,
    rt_audio: bool,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut priority_set = false;
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        mixer.render(data);
    }
}

/// Integer callback: render into a scratch block and convert.
fn create_converting_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    mut mixer: Mixer,
    priority: ThreadPriority,
    rt_audio: bool,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut priority_set = false;
    let mut scratch: Vec<f32> = Vec::with_capacity(8192);
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
        // Only grows when the device asks for a larger block than before.
        scratch.resize(data.len(), 0.0);
        mixer.render(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}
