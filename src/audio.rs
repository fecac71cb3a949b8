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

//! Audio primitives: buffers, the WAV codec, onset detection and quantization,
//! resampling, and the real-time voice mixer with its cpal output.

pub mod buffer;
pub mod error;
pub mod mixer;
pub mod onset;
pub mod output;
pub mod quantize;
pub mod resample;
pub mod thread_priority;
pub mod voice;
pub mod wav;

pub use buffer::AudioBuffer;
pub use error::{BufferError, DecodeError, EncodeError, OutputError, ResampleError};
pub use onset::{detect_onset, OnsetDetector};
pub use quantize::{QuantizationError, Quantizer};
pub use wav::WavCodec;
