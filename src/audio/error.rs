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
use thiserror::Error;

/// Errors raised while constructing an audio buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("an audio buffer needs at least one channel")]
    NoChannels,

    #[error("sample rate must be greater than zero")]
    ZeroSampleRate,

    #[error("channel {channel} has {actual} frames, expected {expected}")]
    RaggedChannels {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("{samples} interleaved samples do not divide into {channels} channels")]
    PartialFrame { samples: usize, channels: usize },
}

/// Errors raised while decoding delivered audio bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no audio bytes were delivered")]
    Empty,

    #[error("unrecognized or unsupported audio format: {0}")]
    Unsupported(#[source] symphonia::core::errors::Error),

    #[error("no decodable audio track found")]
    NoAudioTrack,

    #[error("audio track does not declare a sample rate")]
    MissingSampleRate,

    #[error("decoded audio has no channels")]
    NoChannels,

    #[error("no audio could be decoded; {skipped} packets were corrupt")]
    Undecodable { skipped: usize },

    #[error("decoded packet has {actual} channels, stream started with {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("codec error: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Errors raised while encoding a buffer as WAV.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{bytes} bytes of PCM data exceed the RIFF size limit")]
    TooLarge { bytes: u64 },

    #[error("{channels} channels cannot be described in a WAV header")]
    TooManyChannels { channels: usize },
}

/// Errors raised while conforming a buffer to a new sample rate.
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("unable to build resampler from {from} Hz to {to} Hz: {source}")]
    Construction {
        from: u32,
        to: u32,
        #[source]
        source: rubato::ResamplerConstructionError,
    },

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),

    #[error("target sample rate must be greater than zero")]
    ZeroTargetRate,

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Errors raised while opening the output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no default output device is available")]
    NoDevice,

    #[error("no output device found with name {0}")]
    DeviceNotFound(String),

    #[error("sample format {0} is not supported for output")]
    UnsupportedFormat(String),

    #[error("unable to list devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("unable to read device name: {0}")]
    DeviceName(#[from] cpal::DeviceNameError),

    #[error("unable to query output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unable to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("unable to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}
