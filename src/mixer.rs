//! The external collaborators this backend is built against, plus the
//! capability traits both concrete backends implement.
//!
//! These contracts are deliberately narrow: the mixer, the device clock and
//! the disconnect callback live in the rest of the library, not here.

use crate::error::{BackendError, DisconnectReason, Status};

/// The library's sample-type triple. Shared between the format negotiator
/// and the conversion helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    Float32,
}

impl SampleType {
    pub fn bytes(self) -> u32 {
        match self {
            SampleType::U8 | SampleType::I8 => 1,
            SampleType::U16 | SampleType::I16 => 2,
            SampleType::U32 | SampleType::I32 | SampleType::Float32 => 4,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, SampleType::I8 | SampleType::I16 | SampleType::I32)
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::Float32)
    }
}

/// The library's channel-layout request. `Ambi3D` is the ambisonic/3D layout
/// that has no direct WASAPI channel mask and is handled per §4.4/§4.5 of the
/// format negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelConfig {
    Mono,
    Stereo,
    Quad,
    X51,
    X51Rear,
    X61,
    X71,
    Ambi3D,
}

impl ChannelConfig {
    pub fn channel_count(self) -> u32 {
        match self {
            ChannelConfig::Mono => 1,
            ChannelConfig::Stereo => 2,
            ChannelConfig::Quad => 4,
            ChannelConfig::X51 | ChannelConfig::X51Rear => 6,
            ChannelConfig::X61 => 7,
            ChannelConfig::X71 => 8,
            // Ambi3D downgrades to stereo on playback (§4.4 step 5); capture rejects it
            // outright (§4.5 step 3). Callers that reach this point already resolved that.
            ChannelConfig::Ambi3D => 2,
        }
    }
}

/// Which endpoint list/flow an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Render,
    Capture,
}

/// The external mixer this backend drives during playback, and the
/// notification surface both backends use to report a fatal runtime error.
///
/// Implemented by the rest of the 3D audio library; this crate only ever
/// holds an `Arc<dyn Mixer>` and never constructs one. `Sync` is required
/// alongside `Send` because that `Arc` is cloned into the mixer/recorder
/// real-time thread while the caller thread still holds its own clone.
pub trait Mixer: Send + Sync {
    /// Fill `frames` frames of output starting at `out_ptr`, in the backend's
    /// negotiated format. Called with the device lock held.
    ///
    /// # Safety
    /// `out_ptr` must be valid for `frames * block_align` bytes.
    unsafe fn mix(&self, out_ptr: *mut u8, frames: u32);

    /// A fatal runtime error occurred; the device is being torn down.
    fn handle_disconnect(&self, reason: DisconnectReason);

    /// The device's own clock, in nanoseconds, for `get_clock_latency`.
    fn device_clock_ns(&self) -> u64;

    /// Acquire the device lock around a `mix` call or a clock/padding read.
    fn lock(&self);

    /// Release the device lock.
    fn unlock(&self);
}

/// The capability set every open backend exposes to the library (§6, upward interface).
pub trait Backend {
    /// Resolve `name` (display name, endpoint GUID, or device-ID string) and open
    /// the endpoint, or the system default when `name` is `None`.
    fn open(&mut self, name: Option<&str>) -> Result<(), BackendError>;

    /// Negotiate (or renegotiate) the stream format. Returns a status rather than
    /// failing outright since the only failure the caller distinguishes is
    /// `INVALID_VALUE` vs. `OUT_OF_MEMORY`.
    fn reset(&mut self) -> Status;

    /// Start the real-time thread. A failed start leaves the backend stopped.
    fn start(&mut self) -> bool;

    /// Stop the real-time thread. Idempotent.
    fn stop(&mut self);

    /// Acquire the device lock (§5 "the device's own lock"). Delegates to the
    /// bound [`Mixer`]'s `lock`/`unlock`, which the mixer/recorder thread also
    /// takes around every buffer fill — callers use this to synchronize
    /// against that thread from outside (e.g. before reading `StreamInfo`).
    fn lock(&self);

    /// Release the device lock.
    fn unlock(&self);

    /// Release the endpoint and any thread/resource the backend owns.
    fn destroy(&mut self);
}

/// The narrower set the proxy worker calls through (§9, "re-express as an
/// interface/capability with two implementations"). Kept distinct from
/// [`Backend`] so the worker's dispatch loop is backend-type-agnostic and
/// never touches the pre-lookup/lock bookkeeping `Backend::open` does.
pub(crate) trait ProxyOps {
    fn open_proxy(&mut self) -> Result<(), BackendError>;
    fn reset_proxy(&mut self) -> Result<(), BackendError>;
    fn start_proxy(&mut self) -> Result<(), BackendError>;
    fn stop_proxy(&mut self);
    fn close_proxy(&mut self);
}
