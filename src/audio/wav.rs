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

//! Canonical 16-bit PCM WAV encoding, and decoding of any format symphonia can probe.

use std::io::Cursor;

use symphonia::core::audio::{AudioBuffer as DecodedBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::buffer::AudioBuffer;
use super::error::{DecodeError, EncodeError};

/// Size of the canonical header written by [`WavCodec::encode`].
pub const HEADER_SIZE: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u16 = BITS_PER_SAMPLE / 8;
const PCM_FORMAT: u16 = 1;
const FULL_SCALE: f32 = 32767.0;

/// Encodes and decodes the interchange format.
pub struct WavCodec;

impl WavCodec {
    /// Encodes the buffer as a canonical RIFF/WAVE file: a 44-byte header followed by
    /// interleaved little-endian signed 16-bit samples.
    pub fn encode(buffer: &AudioBuffer) -> Result<Vec<u8>, EncodeError> {
        let channels = buffer.channel_count();
        let channel_field = u16::try_from(channels)
            .ok()
            .filter(|c| c.checked_mul(BYTES_PER_SAMPLE).is_some())
            .ok_or(EncodeError::TooManyChannels { channels })?;
        let block_align = channel_field * BYTES_PER_SAMPLE;

        let data_size = buffer.frame_count() as u64 * block_align as u64;
        let riff_size = data_size + 36;
        if riff_size > u32::MAX as u64 {
            return Err(EncodeError::TooLarge { bytes: data_size });
        }
        let byte_rate = buffer.sample_rate() as u64 * block_align as u64;
        let byte_rate =
            u32::try_from(byte_rate).map_err(|_| EncodeError::TooLarge { bytes: data_size })?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data_size as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(riff_size as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&PCM_FORMAT.to_le_bytes());
        bytes.extend_from_slice(&channel_field.to_le_bytes());
        bytes.extend_from_slice(&buffer.sample_rate().to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data_size as u32).to_le_bytes());

        for frame in 0..buffer.frame_count() {
            for channel in buffer.channels() {
                bytes.extend_from_slice(&quantize_sample(channel[frame]).to_le_bytes());
            }
        }

        Ok(bytes)
    }

    /// Decodes audio bytes of any supported container into a float buffer.
    pub fn decode(bytes: &[u8]) -> Result<AudioBuffer, DecodeError> {
        Self::decode_with_hint(bytes, None)
    }

    /// Decodes audio bytes, using the file extension (if known) to help the prober.
    pub fn decode_with_hint(
        bytes: &[u8],
        extension: Option<&str>,
    ) -> Result<AudioBuffer, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(DecodeError::Unsupported)?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let sample_rate = params.sample_rate.ok_or(DecodeError::MissingSampleRate)?;

        let decoder_opts: DecoderOptions = Default::default();
        let mut decoder = get_codecs().make(&params, &decoder_opts)?;

        // Some containers omit the channel layout; the first decoded packet fills it in.
        let mut planes: Vec<Vec<f32>> = match params.channels {
            Some(channels) => vec![Vec::new(); channels.count()],
            None => Vec::new(),
        };

        let mut skipped = 0;
        loop {
            let packet = match next_packet(format_reader.as_mut()) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                // The container is damaged from here on; keep what came before.
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = e, "Unreadable packet, ending stream");
                    skipped += 1;
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    decoder.decode(&packet)?
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = e, "Skipping undecodable packet");
                    skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            append_decoded(decoded, &mut planes)?;
        }

        check_skipped(planes.first().map_or(0, Vec::len), skipped)?;
        if planes.is_empty() {
            return Err(DecodeError::NoChannels);
        }
        Ok(AudioBuffer::new(sample_rate, planes)?)
    }
}

/// Converts a float sample into its 16-bit representation.
pub fn quantize_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * FULL_SCALE).round() as i16
}

/// Reads the next packet. `None` is a clean end of stream.
fn next_packet(format_reader: &mut dyn FormatReader) -> Result<Option<Packet>, SymphoniaError> {
    loop {
        match format_reader.next_packet() {
            Ok(packet) => return Ok(Some(packet)),
            Err(SymphoniaError::ResetRequired) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        }
    }
}

/// Corrupt packets are tolerated as long as some audio survived them.
fn check_skipped(frames: usize, skipped: usize) -> Result<(), DecodeError> {
    match (frames, skipped) {
        (_, 0) => Ok(()),
        (0, skipped) => Err(DecodeError::Undecodable { skipped }),
        (frames, skipped) => {
            warn!(skipped, frames, "Decoded clip after skipping corrupt packets");
            Ok(())
        }
    }
}

fn append_decoded(decoded: AudioBufferRef, planes: &mut Vec<Vec<f32>>) -> Result<(), DecodeError> {
    match decoded {
        AudioBufferRef::F32(buf) => append_planes(&buf, planes, |s| s),
        AudioBufferRef::F64(buf) => append_planes(&buf, planes, |s| s as f32),
        AudioBufferRef::S8(buf) => append_planes(&buf, planes, |s| s as f32 / 128.0),
        // 16-bit data is the inverse of `quantize_sample` so encoded buffers survive a round trip.
        AudioBufferRef::S16(buf) => append_planes(&buf, planes, |s| {
            (s as f32 / FULL_SCALE).clamp(-1.0, 1.0)
        }),
        AudioBufferRef::S24(buf) => {
            append_planes(&buf, planes, |s| s.inner() as f32 / (1i64 << 23) as f32)
        }
        AudioBufferRef::S32(buf) => {
            append_planes(&buf, planes, |s| s as f32 / (1i64 << 31) as f32)
        }
        AudioBufferRef::U8(buf) => {
            append_planes(&buf, planes, |s| (s as f32 / u8::MAX as f32) * 2.0 - 1.0)
        }
        AudioBufferRef::U16(buf) => {
            append_planes(&buf, planes, |s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
        }
        AudioBufferRef::U24(buf) => append_planes(&buf, planes, |s| {
            (s.inner() as f32 / ((1u32 << 24) - 1) as f32) * 2.0 - 1.0
        }),
        AudioBufferRef::U32(buf) => {
            append_planes(&buf, planes, |s| (s as f32 / u32::MAX as f32) * 2.0 - 1.0)
        }
    }
}

fn append_planes<T, F>(
    buf: &DecodedBuffer<T>,
    planes: &mut Vec<Vec<f32>>,
    convert: F,
) -> Result<(), DecodeError>
where
    T: Sample,
    F: Fn(T) -> f32,
{
    let channels = buf.spec().channels.count();
    if planes.is_empty() {
        planes.resize_with(channels, Vec::new);
    } else if planes.len() != channels {
        return Err(DecodeError::ChannelMismatch {
            expected: planes.len(),
            actual: channels,
        });
    }

    for (index, plane) in planes.iter_mut().enumerate() {
        plane.extend(buf.chan(index).iter().map(|&s| convert(s)));
    }
    Ok(())
}
