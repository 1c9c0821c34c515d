//! Interleaved PCM ⇄ planar float conversion.
//!
//! The pipeline processes planar `f32` buffers; hardware rings carry
//! interleaved integer PCM. These helpers convert between the two with
//! symmetric scaling: full-scale negative maps to −1.0 and values are
//! saturated on the way back out.

/// Integer PCM sample encodings accepted at the hardware boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16Le,
    /// Signed 24-bit little-endian, packed in 3 bytes.
    S24Le3,
    /// Signed 32-bit little-endian.
    S32Le,
}

impl SampleFormat {
    /// Bytes per single sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le3 => 3,
            SampleFormat::S32Le => 4,
        }
    }
}

/// Stream format negotiated with a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Frames per second.
    pub frame_rate: u32,
    /// Interleaved channels per frame.
    pub num_channels: usize,
    /// Integer encoding of each sample.
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    /// Creates a format description.
    pub fn new(frame_rate: u32, num_channels: usize, sample_format: SampleFormat) -> Self {
        Self {
            frame_rate,
            num_channels,
            sample_format,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.num_channels * self.sample_format.bytes_per_sample()
    }
}

/// Splits `frames` interleaved frames from `buf` into the planar channel
/// slices. `channels.len()` selects how many interleaved channels are
/// consumed per frame; each output slice must hold at least `frames`
/// samples.
pub fn deinterleave(
    buf: &[u8],
    channels: &mut [&mut [f32]],
    format: SampleFormat,
    frames: usize,
) {
    let num_channels = channels.len();
    let bytes = format.bytes_per_sample();
    debug_assert!(buf.len() >= frames * num_channels * bytes);

    for frame in 0..frames {
        for (ch, out) in channels.iter_mut().enumerate() {
            let offset = (frame * num_channels + ch) * bytes;
            out[frame] = match format {
                SampleFormat::S16Le => {
                    let v = i16::from_le_bytes([buf[offset], buf[offset + 1]]);
                    f32::from(v) / 32768.0
                }
                SampleFormat::S24Le3 => {
                    let v = i32::from_le_bytes([0, buf[offset], buf[offset + 1], buf[offset + 2]])
                        >> 8;
                    v as f32 / 8_388_608.0
                }
                SampleFormat::S32Le => {
                    let v = i32::from_le_bytes([
                        buf[offset],
                        buf[offset + 1],
                        buf[offset + 2],
                        buf[offset + 3],
                    ]);
                    v as f32 / 2_147_483_648.0
                }
            };
        }
    }
}

/// Interleaves `frames` planar frames back into `buf`, saturating samples
/// that exceed full scale.
pub fn interleave(channels: &[&[f32]], buf: &mut [u8], format: SampleFormat, frames: usize) {
    let num_channels = channels.len();
    let bytes = format.bytes_per_sample();
    debug_assert!(buf.len() >= frames * num_channels * bytes);

    for frame in 0..frames {
        for (ch, input) in channels.iter().enumerate() {
            let offset = (frame * num_channels + ch) * bytes;
            let x = input[frame];
            match format {
                SampleFormat::S16Le => {
                    let v = (x * 32768.0).clamp(-32768.0, 32767.0).round() as i16;
                    buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
                }
                SampleFormat::S24Le3 => {
                    let v = (x * 8_388_608.0).clamp(-8_388_608.0, 8_388_607.0).round() as i32;
                    let le = v.to_le_bytes();
                    buf[offset..offset + 3].copy_from_slice(&le[0..3]);
                }
                SampleFormat::S32Le => {
                    let v = (x * 2_147_483_648.0)
                        .clamp(-2_147_483_648.0, 2_147_483_520.0)
                        .round() as i32;
                    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
        }
    }
}
