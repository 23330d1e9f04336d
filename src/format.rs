//! Platform-independent half of the format negotiator (§4.3).
//!
//! This module knows the channel-mask table, the extensible-descriptor shape,
//! and the sample-type fold rules, but nothing about `IAudioClient` itself —
//! that glue lives in `wasapi::winfmt`, which converts to and from
//! [`ExtensibleFormat`] on one side and the real `WAVEFORMATEXTENSIBLE` on the
//! other. Keeping the math here means it can be unit tested on any host.

use crate::mixer::{ChannelConfig, SampleType};

pub const SPEAKER_FRONT_LEFT: u32 = 0x1;
pub const SPEAKER_FRONT_RIGHT: u32 = 0x2;
pub const SPEAKER_FRONT_CENTER: u32 = 0x4;
pub const SPEAKER_LOW_FREQUENCY: u32 = 0x8;
pub const SPEAKER_BACK_LEFT: u32 = 0x10;
pub const SPEAKER_BACK_RIGHT: u32 = 0x20;
pub const SPEAKER_FRONT_LEFT_OF_CENTER: u32 = 0x40;
pub const SPEAKER_FRONT_RIGHT_OF_CENTER: u32 = 0x80;
pub const SPEAKER_BACK_CENTER: u32 = 0x100;
pub const SPEAKER_SIDE_LEFT: u32 = 0x200;
pub const SPEAKER_SIDE_RIGHT: u32 = 0x400;

pub const MONO: u32 = SPEAKER_FRONT_CENTER;
pub const STEREO: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT;
pub const QUAD: u32 = SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT;
pub const X5DOT1: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY
        | SPEAKER_SIDE_LEFT | SPEAKER_SIDE_RIGHT;
pub const X5DOT1REAR: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY
        | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT;
pub const X6DOT1: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY
        | SPEAKER_BACK_CENTER | SPEAKER_SIDE_LEFT | SPEAKER_SIDE_RIGHT;
pub const X7DOT1: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY
        | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT | SPEAKER_SIDE_LEFT | SPEAKER_SIDE_RIGHT;
pub const X7DOT1WIDE: u32 =
    SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_FRONT_CENTER | SPEAKER_LOW_FREQUENCY
        | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT | SPEAKER_FRONT_LEFT_OF_CENTER
        | SPEAKER_FRONT_RIGHT_OF_CENTER;

/// 100-nanosecond ticks per second, the unit `REFERENCE_TIME` (and therefore
/// `IAudioClient::Initialize`'s buffer-duration parameter) is expressed in.
pub const REFTIME_PER_SEC: i64 = 10_000_000;

/// `frames` at `rate` Hz, rounded up to whole 100ns ticks.
pub fn frames_to_reftime_ceil(frames: u64, rate: u32) -> i64 {
    let rate = rate.max(1) as u64;
    (((frames * REFTIME_PER_SEC as u64) + rate - 1) / rate) as i64
}

/// `reftime` 100ns ticks at `rate` Hz, rounded up to whole frames.
pub fn reftime_to_frames_ceil(reftime: i64, rate: u32) -> u32 {
    let reftime = reftime.max(0) as u64;
    let rate = rate as u64;
    (((reftime * rate) + REFTIME_PER_SEC as u64 - 1) / REFTIME_PER_SEC as u64) as u32
}

/// The sub-format half of an extensible descriptor. WASAPI only ever hands us
/// PCM or IEEE float on the formats this backend negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    Pcm,
    Float,
}

/// A fully platform-independent rendering of `WAVEFORMATEXTENSIBLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensibleFormat {
    pub sub_format: SubFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
}

impl ExtensibleFormat {
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Given a channel count, the channel mask this backend assigns when building
/// an extensible descriptor to send to the endpoint (§4.3's channel-mask
/// table, 1/2-channel half). Higher counts are left unset by the format
/// negotiator itself (the caller logs a warning and must not rely on the
/// mask) — those masks only ever arise when *decoding* an endpoint-reported
/// format, via [`channel_mask_to_config`].
pub fn channel_mask_for_count(channels: u16) -> Option<u32> {
    match channels {
        1 => Some(MONO),
        2 => Some(STEREO),
        _ => None,
    }
}

/// Decode an endpoint-reported `(channels, mask)` pair into the channel
/// layout it represents, falling back to stereo for anything unrecognized
/// (§4.3 "Unknown combinations force fallback to STEREO", §8 boundary case).
pub fn channel_mask_to_config(channels: u16, mask: u32) -> ChannelConfig {
    match (channels, mask) {
        (1, MONO) => ChannelConfig::Mono,
        (2, STEREO) => ChannelConfig::Stereo,
        (4, QUAD) => ChannelConfig::Quad,
        (6, X5DOT1) => ChannelConfig::X51,
        (6, X5DOT1REAR) => ChannelConfig::X51Rear,
        (7, X6DOT1) => ChannelConfig::X61,
        (8, X7DOT1) | (8, X7DOT1WIDE) => ChannelConfig::X71,
        _ => ChannelConfig::Stereo,
    }
}

pub fn channel_mask_for_config(config: ChannelConfig) -> u32 {
    match config {
        ChannelConfig::Mono => MONO,
        ChannelConfig::Stereo | ChannelConfig::Ambi3D => STEREO,
        ChannelConfig::Quad => QUAD,
        ChannelConfig::X51 => X5DOT1,
        ChannelConfig::X51Rear => X5DOT1REAR,
        ChannelConfig::X61 => X6DOT1,
        ChannelConfig::X71 => X7DOT1,
    }
}

/// Fold a requested sample type to the one this backend actually negotiates:
/// 8-bit signed folds to unsigned, 16/32-bit unsigned fold to signed (§4.4
/// step 5, §8 boundary). Float is left alone.
pub fn fold_sample_type_for_playback(requested: SampleType) -> SampleType {
    match requested {
        SampleType::I8 => SampleType::U8,
        SampleType::U16 => SampleType::I16,
        SampleType::U32 => SampleType::I32,
        other => other,
    }
}

/// Capture keeps the endpoint's native signedness; only the bit depth to PCM
/// tag mapping is shared with playback (§4.5 step 3: "native bit depth").
pub fn sub_format_and_bits_for(sample_type: SampleType) -> (SubFormat, u16) {
    match sample_type {
        SampleType::U8 | SampleType::I8 => (SubFormat::Pcm, 8),
        SampleType::U16 | SampleType::I16 => (SubFormat::Pcm, 16),
        SampleType::U32 | SampleType::I32 => (SubFormat::Pcm, 32),
        SampleType::Float32 => (SubFormat::Float, 32),
    }
}

/// The reverse of [`sub_format_and_bits_for`]: recover the sample type an
/// endpoint-offered format carries, following the conventional PCM
/// signedness (8-bit unsigned, 16/32-bit signed) every capture endpoint this
/// backend has seen uses (§4.5 step 5: "derive the source sample type from
/// the returned sub-format and bit depth"). `None` for any unsupported depth.
pub fn sample_type_from_wire(sub_format: SubFormat, bits_per_sample: u16) -> Option<SampleType> {
    match (sub_format, bits_per_sample) {
        (SubFormat::Pcm, 8) => Some(SampleType::U8),
        (SubFormat::Pcm, 16) => Some(SampleType::I16),
        (SubFormat::Pcm, 32) => Some(SampleType::I32),
        (SubFormat::Float, 32) => Some(SampleType::Float32),
        _ => None,
    }
}

/// Build the extensible descriptor this backend would ask the endpoint for
/// when driving playback at `config`/`sample_type`/`sample_rate`. `Ambi3D`
/// downgrades to stereo (§4.4 step 5).
pub fn requested_playback_format(
    config: ChannelConfig,
    sample_type: SampleType,
    sample_rate: u32,
) -> ExtensibleFormat {
    let config = if config == ChannelConfig::Ambi3D { ChannelConfig::Stereo } else { config };
    let sample_type = fold_sample_type_for_playback(sample_type);
    let (sub_format, bits) = sub_format_and_bits_for(sample_type);
    ExtensibleFormat {
        sub_format,
        channels: config.channel_count() as u16,
        sample_rate,
        bits_per_sample: bits,
        valid_bits_per_sample: bits,
        channel_mask: channel_mask_for_config(config),
    }
}

/// `make_extensible` (§4.3): given a raw waveform descriptor already decoded
/// into channels/bits/sub-format/rate, normalize it to an extensible
/// descriptor with a channel mask assigned from the channel count. Any
/// unrecognized channel count above 2 leaves the mask at 0 and the caller is
/// expected to have logged the "caller must not rely on it" warning already
/// (the logging call happens in `wasapi::winfmt`, which has the endpoint
/// context to log against; this function is pure).
pub fn make_extensible(
    sub_format: SubFormat,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
) -> ExtensibleFormat {
    ExtensibleFormat {
        sub_format,
        channels,
        sample_rate,
        bits_per_sample,
        valid_bits_per_sample: bits_per_sample,
        channel_mask: channel_mask_for_count(channels).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_and_stereo_masks() {
        assert_eq!(channel_mask_for_count(1), Some(MONO));
        assert_eq!(channel_mask_for_count(2), Some(STEREO));
        assert_eq!(channel_mask_for_count(6), None);
    }

    #[test]
    fn make_extensible_is_idempotent() {
        let once = make_extensible(SubFormat::Float, 2, 48000, 32);
        let twice = make_extensible(once.sub_format, once.channels, once.sample_rate, once.bits_per_sample);
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_mask_falls_back_to_stereo() {
        assert_eq!(channel_mask_to_config(3, 0xDEAD_BEEF), ChannelConfig::Stereo);
        assert_eq!(channel_mask_to_config(6, 0), ChannelConfig::Stereo);
    }

    #[test]
    fn known_masks_round_trip() {
        for config in [
            ChannelConfig::Mono,
            ChannelConfig::Stereo,
            ChannelConfig::Quad,
            ChannelConfig::X51,
            ChannelConfig::X51Rear,
            ChannelConfig::X61,
            ChannelConfig::X71,
        ] {
            let mask = channel_mask_for_config(config);
            let channels = config.channel_count() as u16;
            assert_eq!(channel_mask_to_config(channels, mask), config);
        }
    }

    #[test]
    fn playback_fold_rules() {
        assert_eq!(fold_sample_type_for_playback(SampleType::I8), SampleType::U8);
        assert_eq!(fold_sample_type_for_playback(SampleType::U16), SampleType::I16);
        assert_eq!(fold_sample_type_for_playback(SampleType::U32), SampleType::I32);
        assert_eq!(fold_sample_type_for_playback(SampleType::Float32), SampleType::Float32);
    }

    #[test]
    fn ambi3d_downgrades_to_stereo_on_playback() {
        let fmt = requested_playback_format(ChannelConfig::Ambi3D, SampleType::Float32, 48000);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.channel_mask, STEREO);
    }

    #[test]
    fn wire_sample_type_round_trips() {
        for ty in [SampleType::U8, SampleType::I16, SampleType::I32, SampleType::Float32] {
            let (sub, bits) = sub_format_and_bits_for(ty);
            assert_eq!(sample_type_from_wire(sub, bits), Some(ty));
        }
        assert_eq!(sample_type_from_wire(SubFormat::Pcm, 24), None);
    }

    #[test]
    fn block_align_and_bytes_per_sec() {
        let fmt = ExtensibleFormat {
            sub_format: SubFormat::Float,
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
            valid_bits_per_sample: 32,
            channel_mask: STEREO,
        };
        assert_eq!(fmt.block_align(), 8);
        assert_eq!(fmt.avg_bytes_per_sec(), 48000 * 8);
    }
}
