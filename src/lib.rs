//! WASAPI playback and capture backend for the Aural 3D audio library.
//!
//! This crate implements only the backend described in [`mixer::Backend`]:
//! the proxy worker that serializes every endpoint-lifecycle call, the
//! playback and capture pipelines built on top of it, and the format
//! negotiator that bridges the library's (channels, sample-type, rate)
//! triple to WASAPI's extensible waveform descriptor. The mixer, the
//! channel/sample-rate converters' numeric contracts, and the top-level
//! device/context API all live in the rest of the library; this crate only
//! consumes them through the traits in [`mixer`].

pub mod convert;
pub mod device;
pub mod error;
pub mod format;
pub mod mixer;
pub mod ring;

#[cfg(target_os = "windows")]
pub mod wasapi;

pub use device::{DeviceEntry, DeviceRegistry};
pub use error::{BackendError, DisconnectReason, SpawnRtThreadError, Status};
pub use mixer::{Backend, ChannelConfig, Flow, Mixer, SampleType};
