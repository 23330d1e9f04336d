//! Channel and sample-rate/type conversion helpers (§6 downward interfaces).
//!
//! The spec treats these as opaque filters behind a documented contract; this
//! module gives them a concrete, dependency-free implementation since the
//! capture pipeline calls them directly on the hot path.

use crate::mixer::SampleType;

fn read_as_f32(src_type: SampleType, bytes: &[u8]) -> f32 {
    match src_type {
        SampleType::U8 => (bytes[0] as f32 - 128.0) / 128.0,
        SampleType::I8 => (bytes[0] as i8) as f32 / 128.0,
        SampleType::U16 => {
            let v = u16::from_le_bytes([bytes[0], bytes[1]]);
            (v as f32 - 32768.0) / 32768.0
        }
        SampleType::I16 => {
            let v = i16::from_le_bytes([bytes[0], bytes[1]]);
            v as f32 / 32768.0
        }
        SampleType::U32 => {
            let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (v as f64 - 2147483648.0) as f32 / 2147483648.0
        }
        SampleType::I32 => {
            let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            v as f32 / 2147483648.0
        }
        SampleType::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

fn write_from_f32(dst_type: SampleType, sample: f32, out: &mut [u8]) {
    let clamped = sample.clamp(-1.0, 1.0);
    match dst_type {
        SampleType::U8 => out[0] = ((clamped * 128.0) + 128.0) as u8,
        SampleType::I8 => out[0] = (clamped * 128.0) as i8 as u8,
        SampleType::U16 => {
            let v = ((clamped * 32768.0) + 32768.0) as u16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleType::I16 => {
            let v = (clamped * 32768.0) as i16;
            out[..2].copy_from_slice(&v.to_le_bytes());
        }
        SampleType::U32 => {
            let v = ((clamped as f64 * 2147483648.0) + 2147483648.0) as u32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleType::I32 => {
            let v = (clamped * 2147483648.0) as i32;
            out[..4].copy_from_slice(&v.to_le_bytes());
        }
        SampleType::Float32 => out[..4].copy_from_slice(&clamped.to_le_bytes()),
    }
}

/// Mono↔stereo widener/mixer (§4.5 step 6). Always emits float, matching the
/// contract in §6: `input(src_bytes, dst_floats, frames)`.
pub struct ChannelConverter {
    src_type: SampleType,
    src_channels: u16,
    dst_channels: u16,
}

impl ChannelConverter {
    pub fn new(src_type: SampleType, src_channels: u16, dst_channels: u16) -> Self {
        assert!(
            (src_channels == 1 && dst_channels == 2) || (src_channels == 2 && dst_channels == 1),
            "ChannelConverter only supports mono<->stereo widening/mixing"
        );
        ChannelConverter { src_type, src_channels, dst_channels }
    }

    pub fn dst_channels(&self) -> u16 {
        self.dst_channels
    }

    /// Converts `frames` frames from `src_bytes` (src_channels wide, in
    /// `src_type`) into `dst_floats` (dst_channels wide, f32).
    pub fn input(&self, src_bytes: &[u8], dst_floats: &mut [f32], frames: usize) {
        let src_bytes_per_sample = self.src_type.bytes() as usize;
        let src_frame_bytes = src_bytes_per_sample * self.src_channels as usize;
        for frame in 0..frames {
            let src_frame = &src_bytes[frame * src_frame_bytes..][..src_frame_bytes];
            match (self.src_channels, self.dst_channels) {
                (1, 2) => {
                    let sample = read_as_f32(self.src_type, src_frame);
                    dst_floats[frame * 2] = sample;
                    dst_floats[frame * 2 + 1] = sample;
                }
                (2, 1) => {
                    let left = read_as_f32(self.src_type, &src_frame[..src_bytes_per_sample]);
                    let right = read_as_f32(self.src_type, &src_frame[src_bytes_per_sample..]);
                    dst_floats[frame] = (left + right) * 0.5;
                }
                _ => unreachable!("constructor rejects any other channel pairing"),
            }
        }
    }
}

/// Sample-rate and/or sample-type converter (§4.5 step 7). Uses linear
/// interpolation per channel and keeps enough state across calls to stay
/// continuous at buffer boundaries.
pub struct SampleConverter {
    src_type: SampleType,
    dst_type: SampleType,
    channels: u16,
    src_rate: u32,
    dst_rate: u32,
    /// Fractional read position into the current source buffer, in source
    /// frames. Carried across calls so interpolation stays continuous at
    /// buffer boundaries; always stays within `[0, 1)` between calls since
    /// every fully-consumed whole frame is dropped from `*src` immediately.
    phase: f64,
}

impl SampleConverter {
    pub fn new(src_type: SampleType, dst_type: SampleType, channels: u16, src_rate: u32, dst_rate: u32) -> Self {
        SampleConverter { src_type, dst_type, channels, src_rate, dst_rate, phase: 0.0 }
    }

    /// Bytes per destination frame this converter writes into `dst` — every
    /// caller needs this to size its scratch buffer before calling [`Self::input`].
    pub fn dst_frame_bytes(&self) -> usize {
        self.dst_type.bytes() as usize * self.channels as usize
    }

    /// Consumes frames from `*src` (advancing `*src` and decrementing
    /// `*src_frames`) and writes up to `dst_capacity_frames` frames into
    /// `dst`, returning the number of frames written.
    pub fn input(
        &mut self,
        src: &mut &[u8],
        src_frames: &mut u32,
        dst: &mut [u8],
        dst_capacity_frames: u32,
    ) -> u32 {
        let channels = self.channels as usize;
        let src_bytes_per_sample = self.src_type.bytes() as usize;
        let src_frame_bytes = src_bytes_per_sample * channels;
        let dst_bytes_per_sample = self.dst_type.bytes() as usize;
        let dst_frame_bytes = dst_bytes_per_sample * channels;
        let ratio = self.src_rate as f64 / self.dst_rate as f64;

        let read_src_frame = |frames: &[u8], idx: usize, ch: usize| -> f32 {
            let off = idx * src_frame_bytes + ch * src_bytes_per_sample;
            read_as_f32(self.src_type, &frames[off..off + src_bytes_per_sample])
        };

        let available = *src_frames as usize;
        let mut written = 0u32;

        while written < dst_capacity_frames {
            let pos = self.phase;
            let idx = pos.floor() as usize;
            let frac = pos - pos.floor();

            if idx + 1 >= available {
                break;
            }

            for ch in 0..channels {
                let a = read_src_frame(src, idx, ch);
                let b = read_src_frame(src, idx + 1, ch);
                let sample = a as f64 + (b as f64 - a as f64) * frac;
                let out_off = written as usize * dst_frame_bytes + ch * dst_bytes_per_sample;
                write_from_f32(self.dst_type, sample as f32, &mut dst[out_off..out_off + dst_bytes_per_sample]);
            }

            written += 1;
            self.phase += ratio;
        }

        let consumed = (self.phase.floor() as usize).min(available);
        if consumed > 0 {
            self.phase -= consumed as f64;
            *src = &src[consumed * src_frame_bytes..];
            *src_frames -= consumed as u32;
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_to_stereo_duplicates_samples() {
        let conv = ChannelConverter::new(SampleType::I16, 1, 2);
        let src: Vec<u8> = [1000i16, -1000i16]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut dst = vec![0.0f32; 4];
        conv.input(&src, &mut dst, 2);
        assert_eq!(dst[0], dst[1]);
        assert_eq!(dst[2], dst[3]);
        assert!(dst[0] > 0.0 && dst[2] < 0.0);
    }

    #[test]
    fn stereo_to_mono_averages_channels() {
        let conv = ChannelConverter::new(SampleType::I16, 2, 1);
        let src: Vec<u8> = [0i16, 32767i16].iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut dst = vec![0.0f32; 1];
        conv.input(&src, &mut dst, 1);
        assert!((dst[0] - 0.5).abs() < 0.01);
    }

    #[test]
    fn identity_rate_passthrough() {
        let mut conv = SampleConverter::new(SampleType::Float32, SampleType::Float32, 1, 48000, 48000);
        let src_samples: Vec<f32> = vec![0.1, 0.2, 0.3, 0.4];
        let src_bytes: Vec<u8> = src_samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut src_slice: &[u8] = &src_bytes;
        let mut src_frames = 4u32;
        let mut dst = vec![0u8; 4 * 4];
        let written = conv.input(&mut src_slice, &mut src_frames, &mut dst, 4);
        assert!(written >= 2);
    }

    #[test]
    fn downsampling_reduces_frame_count() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 1, 48000, 16000);
        let src_samples: Vec<i16> = (0..480).map(|i| (i % 100) as i16 * 100).collect();
        let src_bytes: Vec<u8> = src_samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut src_slice: &[u8] = &src_bytes;
        let mut src_frames = src_samples.len() as u32;
        let mut dst = vec![0u8; 2 * 200];
        let written = conv.input(&mut src_slice, &mut src_frames, &mut dst, 200);
        // 480 src frames at a 3:1 ratio should yield roughly 160 dst frames.
        assert!(written > 140 && written < 170, "written = {written}");
    }
}
