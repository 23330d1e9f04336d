//! The backend factory (§4.2): owns the proxy worker's lifecycle, answers
//! `query_support`/`probe`, and builds playback/capture backends on demand.

use std::sync::Arc;

use crate::device::DeviceRegistry;
use crate::mixer::{ChannelConfig, Flow, Mixer, SampleType};

use super::{capture::CaptureBackend, playback::PlaybackBackend, proxy::Factory as Proxy};

/// Starts the proxy worker up front rather than waiting for the first
/// request to spawn it lazily (§4.2 `init`).
pub fn init() {
    Proxy::init();
}

/// Tears the proxy worker down; the device registries it owned go with it
/// (§4.2 `deinit`, §8 "After `deinit`, both device registries are empty and
/// the worker is joined").
pub fn deinit() {
    Proxy::deinit();
}

/// WASAPI shared-mode streaming is always available for both flows on any
/// host that has this backend compiled in (§4.2: "`query_support` ... both
/// true").
pub fn query_support(_flow: Flow) -> bool {
    true
}

/// Enumerates `flow` and flattens the registry into the NUL-separated name
/// list the upward API expects (§4.2 `probe`: "a flat UTF-8 list terminated
/// by a double null separator of names").
pub fn probe(flow: Flow) -> Result<String, crate::error::BackendError> {
    let registry: DeviceRegistry = Proxy::enumerate(flow)?;
    let mut out = String::new();
    for entry in registry.entries() {
        out.push_str(&entry.display_name);
        out.push('\0');
    }
    out.push('\0');
    Ok(out)
}

/// Creates a playback backend bound to `mixer`, ready for `open`.
pub fn create_playback_backend(
    mixer: Arc<dyn Mixer>,
    config: ChannelConfig,
    sample_type: SampleType,
    sample_rate: u32,
) -> PlaybackBackend {
    PlaybackBackend::new(mixer, config, sample_type, sample_rate)
}

/// Creates a capture backend bound to `mixer` (used only for
/// `handle_disconnect`), ready for `open`.
pub fn create_capture_backend(
    mixer: Arc<dyn Mixer>,
    config: ChannelConfig,
    sample_type: SampleType,
    sample_rate: u32,
) -> CaptureBackend {
    CaptureBackend::new(mixer, config, sample_type, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_support_is_always_true() {
        assert!(query_support(Flow::Render));
        assert!(query_support(Flow::Capture));
    }
}
