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
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::buffer::AudioBuffer;
use super::error::ResampleError;

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = 1024;

/// Converts a whole buffer to `target_rate` with a windowed-sinc resampler.
///
/// The output is trimmed of the filter delay and holds `ceil(frames * ratio)` frames.
/// Buffers already at the target rate are returned as-is.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, ResampleError> {
    if target_rate == 0 {
        return Err(ResampleError::ZeroTargetRate);
    }
    let source_rate = buffer.sample_rate();
    if source_rate == target_rate {
        return Ok(buffer.clone());
    }

    let channels = buffer.channel_count();
    let ratio = target_rate as f64 / source_rate as f64;
    let expected_frames = (buffer.frame_count() as f64 * ratio).ceil() as usize;
    if buffer.is_empty() {
        return Ok(AudioBuffer::silent(target_rate, channels, 0)?);
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, INPUT_BLOCK_SIZE, channels).map_err(
            |source| ResampleError::Construction {
                from: source_rate,
                to: target_rate,
                source,
            },
        )?;

    let delay = resampler.output_delay();
    let mut scratch = resampler.output_buffer_allocate(true);
    let mut output: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(expected_frames + delay))
        .collect();
    let append = |output: &mut Vec<Vec<f32>>, scratch: &[Vec<f32>], frames: usize| {
        for (out, chunk) in output.iter_mut().zip(scratch) {
            out.extend_from_slice(&chunk[..frames]);
        }
    };

    let mut position = 0;
    let total = buffer.frame_count();
    loop {
        let needed = resampler.input_frames_next();
        if position + needed > total {
            break;
        }
        let block: Vec<&[f32]> = buffer
            .channels()
            .iter()
            .map(|c| &c[position..position + needed])
            .collect();
        let (consumed, produced) = resampler.process_into_buffer(&block, &mut scratch, None)?;
        append(&mut output, &scratch, produced);
        position += consumed;
    }

    if position < total {
        let tail: Vec<&[f32]> = buffer.channels().iter().map(|c| &c[position..]).collect();
        let (_, produced) =
            resampler.process_partial_into_buffer(Some(tail.as_slice()), &mut scratch, None)?;
        append(&mut output, &scratch, produced);
    }

    // Flush the filter until the delayed tail has come out.
    while output[0].len() < expected_frames + delay {
        let (_, produced) =
            resampler.process_partial_into_buffer(None::<&[Vec<f32>]>, &mut scratch, None)?;
        if produced == 0 {
            break;
        }
        append(&mut output, &scratch, produced);
    }

    let channels: Vec<Vec<f32>> = output
        .into_iter()
        .map(|mut channel| {
            let mut aligned = channel.split_off(delay.min(channel.len()));
            aligned.resize(expected_frames, 0.0);
            aligned
        })
        .collect();

    debug!(
        from = source_rate,
        to = target_rate,
        frames_in = total,
        frames_out = expected_frames,
        "Resampled clip"
    );
    Ok(AudioBuffer::new(target_rate, channels)?)
}
