//! Converts between the platform-independent [`crate::format::ExtensibleFormat`]
//! and the real `WAVEFORMATEXTENSIBLE`, and wraps the two endpoint calls that
//! negotiate a format (§4.3 `negotiate_format`).

use windows::core::GUID;
use windows::Win32::Media::Audio::{
    IAudioClient, AUDCLNT_SHAREMODE_SHARED, KSDATAFORMAT_SUBTYPE_IEEE_FLOAT, KSDATAFORMAT_SUBTYPE_PCM,
    WAVEFORMATEX, WAVEFORMATEXTENSIBLE, WAVE_FORMAT_EXTENSIBLE,
};

use crate::format::{self, ExtensibleFormat, SubFormat};

fn subtype_guid(sub: SubFormat) -> GUID {
    match sub {
        SubFormat::Pcm => KSDATAFORMAT_SUBTYPE_PCM,
        SubFormat::Float => KSDATAFORMAT_SUBTYPE_IEEE_FLOAT,
    }
}

fn subtype_from_guid(guid: GUID) -> SubFormat {
    if guid == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT {
        SubFormat::Float
    } else {
        SubFormat::Pcm
    }
}

pub fn to_waveformatextensible(fmt: &ExtensibleFormat) -> WAVEFORMATEXTENSIBLE {
    WAVEFORMATEXTENSIBLE {
        Format: WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_EXTENSIBLE as u16,
            nChannels: fmt.channels,
            nSamplesPerSec: fmt.sample_rate,
            nAvgBytesPerSec: fmt.avg_bytes_per_sec(),
            nBlockAlign: fmt.block_align(),
            wBitsPerSample: fmt.bits_per_sample,
            cbSize: (std::mem::size_of::<WAVEFORMATEXTENSIBLE>() - std::mem::size_of::<WAVEFORMATEX>()) as u16,
        },
        Samples: windows::Win32::Media::Audio::WAVEFORMATEXTENSIBLE_0 {
            wValidBitsPerSample: fmt.valid_bits_per_sample,
        },
        dwChannelMask: fmt.channel_mask,
        SubFormat: subtype_guid(fmt.sub_format),
    }
}

/// # Safety
/// `raw` must point to a valid `WAVEFORMATEX`-or-larger structure, per the
/// contract of every WASAPI call that hands one back (`GetMixFormat`,
/// `IsFormatSupported`'s closest-match out parameter).
pub unsafe fn from_waveformatex_ptr(raw: *const WAVEFORMATEX) -> ExtensibleFormat {
    let wfx = &*raw;
    if wfx.wFormatTag as u32 == WAVE_FORMAT_EXTENSIBLE && wfx.cbSize as usize >= 22 {
        let ext = &*(raw as *const WAVEFORMATEXTENSIBLE);
        ExtensibleFormat {
            sub_format: subtype_from_guid(ext.SubFormat),
            channels: wfx.nChannels,
            sample_rate: wfx.nSamplesPerSec,
            bits_per_sample: wfx.wBitsPerSample,
            valid_bits_per_sample: ext.Samples.wValidBitsPerSample,
            channel_mask: ext.dwChannelMask,
        }
    } else {
        format::make_extensible(
            if wfx.wFormatTag == 3 { SubFormat::Float } else { SubFormat::Pcm },
            wfx.nChannels,
            wfx.nSamplesPerSec,
            wfx.wBitsPerSample,
        )
    }
}

/// `negotiate_format` (§4.3): ask `client` whether `requested` is supported in
/// shared mode; on a closest-match reply, decode and return that instead.
/// `Ok(None)` means the endpoint rejected the format outright.
pub fn negotiate(
    client: &IAudioClient,
    requested: &ExtensibleFormat,
) -> windows::core::Result<Option<ExtensibleFormat>> {
    let wfx = to_waveformatextensible(requested);
    let mut closest_match: *mut WAVEFORMATEX = std::ptr::null_mut();
    let supported = unsafe {
        client.IsFormatSupported(
            AUDCLNT_SHAREMODE_SHARED,
            &wfx.Format as *const WAVEFORMATEX,
            Some(&mut closest_match),
        )
    }
    .is_ok();

    // `IsFormatSupported` hands back a closest-match descriptor whenever it
    // can't honor the request as-is, regardless of whether the call itself
    // reports success (a "yes, but" S_FALSE) or outright failure.
    let result = if !closest_match.is_null() {
        Some(unsafe { from_waveformatex_ptr(closest_match) })
    } else if supported {
        Some(*requested)
    } else {
        None
    };
    if !closest_match.is_null() {
        unsafe { windows::Win32::System::Com::CoTaskMemFree(Some(closest_match as *const _)) };
    }
    Ok(result)
}

/// The endpoint's current shared-mode mix format (§4.4 step 3: "Ask the
/// endpoint for its current mix format as the starting point").
pub fn mix_format(client: &IAudioClient) -> windows::core::Result<ExtensibleFormat> {
    let ptr = unsafe { client.GetMixFormat()? };
    let decoded = unsafe { from_waveformatex_ptr(ptr.0) };
    unsafe { windows::Win32::System::Com::CoTaskMemFree(Some(ptr.0 as *const _)) };
    Ok(decoded)
}
