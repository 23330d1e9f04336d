//! The Windows-only half of this backend: everything that actually talks to
//! `IMMDeviceEnumerator`/`IAudioClient` through the `windows` crate.
//!
//! Kept behind `target_os = "windows"` the same way this workspace already
//! gates its other per-platform backends in `lib.rs`.

mod com;
mod enumerate;
mod proxy;
mod winfmt;

pub mod capture;
pub mod factory;
pub mod playback;

pub use capture::CaptureBackend;
pub use factory::{create_capture_backend, create_playback_backend, deinit, init, probe, query_support};
pub use playback::PlaybackBackend;
