//! The render endpoint backend (§4.4): negotiates a shared-mode format with
//! an `IAudioClient`, drives an event-loop render thread, and forwards every
//! buffer-fill to an external [`Mixer`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use windows::Win32::Media::Audio::{
    IAudioClient, IAudioRenderClient, IMMDevice, IMMDeviceEnumerator, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
};
use windows::Win32::System::Com::CLSCTX_ALL;

use crate::device::DeviceRegistry;
use crate::error::{BackendError, DisconnectReason, Status};
use crate::format::{self, frames_to_reftime_ceil, reftime_to_frames_ceil, ExtensibleFormat};
use crate::mixer::{Backend, ChannelConfig, Flow, Mixer, ProxyOps, SampleType};

use super::com::OwnedHandle;
use super::proxy::Factory;
use super::{enumerate, winfmt};

const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// §4.4 step 3's requested update size/count, absent a caller-supplied
/// buffer-size hint. 1024 frames at three periods keeps the nearest-period
/// rounding in `reset_on_worker` comfortably above typical device periods
/// (~10ms) without the "force 2 updates" clamp ever firing on a sane device.
const DEFAULT_UPDATE_SIZE: u32 = 1024;
const DEFAULT_NUM_UPDATES: u32 = 3;

/// Everything `reset` negotiates and `start`/`stop` drive. Torn down and
/// rebuilt by every `reset`, independently of the `IMMDevice` handle (§4.4:
/// "re-running format negotiation must not require re-resolving the device").
struct Stream {
    client: IAudioClient,
    render_client: IAudioRenderClient,
    event: OwnedHandle,
    format: ExtensibleFormat,
    buffer_frame_count: u32,
    /// Negotiated period size and period count (§4.4 steps 11/12):
    /// `buffer_frame_count == update_size * num_updates`, `num_updates >= 2`.
    update_size: u32,
    num_updates: u32,
    /// §3 "`padding` counter (atomic)": frames currently queued in the
    /// endpoint buffer, published by the render thread for `get_clock_latency`
    /// to read without taking the render thread's own per-iteration lock.
    padding: Arc<AtomicU32>,
    /// §3 `is_headphones`: stereo output on a headphone/headset form factor.
    is_headphones: bool,
    thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
}

pub struct PlaybackBackend {
    device: Option<IMMDevice>,
    name: Option<String>,
    stream: Option<Stream>,
    mixer: Arc<dyn Mixer>,
    config: ChannelConfig,
    sample_type: SampleType,
    sample_rate: u32,
    /// §4.4 step 3's requested update size/count, ahead of device-period
    /// negotiation in `reset_on_worker`.
    requested_update_size: u32,
    requested_num_updates: u32,
    opened_default: bool,
    default_changed: bool,
}

impl PlaybackBackend {
    pub fn new(mixer: Arc<dyn Mixer>, config: ChannelConfig, sample_type: SampleType, sample_rate: u32) -> Self {
        PlaybackBackend {
            device: None,
            name: None,
            stream: None,
            mixer,
            config,
            sample_type,
            sample_rate,
            requested_update_size: DEFAULT_UPDATE_SIZE,
            requested_num_updates: DEFAULT_NUM_UPDATES,
            opened_default: false,
            default_changed: false,
        }
    }

    /// Supplemented over the distilled contract (§3): true once the system
    /// default changed while this backend was opened against the default
    /// endpoint. Read-only — does not force a reset (§9 open question).
    pub fn default_changed(&self) -> bool {
        self.default_changed
    }

    pub(super) fn open_on_worker(
        &mut self,
        enumerator: &IMMDeviceEnumerator,
        name: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut registry = DeviceRegistry::default();
        enumerate::enumerate(enumerator, Flow::Render, &mut registry)
            .map_err(|e| BackendError::EndpointCall("EnumAudioEndpoints", status_of(&e)))?;

        if let Some(n) = name {
            if registry.lookup(n).is_none() {
                return Err(BackendError::DeviceNotFound(n.to_string()));
            }
        }

        let device = enumerate::open_device(enumerator, Flow::Render, &registry, name)
            .map_err(|e| BackendError::EndpointCall("GetDevice", status_of(&e)))?;

        self.device = Some(device);
        self.name = name.map(String::from);
        self.opened_default = name.is_none();
        self.default_changed = false;
        Ok(())
    }

    pub(super) fn reset_on_worker(&mut self) -> Result<(), BackendError> {
        // Cloned (an `IMMDevice` is a COM ref-counted handle) so `teardown_stream`
        // can take `&mut self` below without fighting a live borrow of `self.device`.
        let device = self.device.clone().ok_or(BackendError::DeviceNotFound("<not open>".into()))?;

        self.teardown_stream();

        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| BackendError::EndpointCall("Activate", status_of(&e)))?;

        let mix_format = winfmt::mix_format(&client)
            .map_err(|e| BackendError::EndpointCall("GetMixFormat", status_of(&e)))?;

        let requested = format::requested_playback_format(self.config, self.sample_type, self.sample_rate);
        // Prefer the caller's request; fall back to the endpoint's own mix
        // format when it can't be honored at all (§4.4 step 3/5).
        let negotiated = winfmt::negotiate(&client, &requested)
            .map_err(|e| BackendError::EndpointCall("IsFormatSupported", status_of(&e)))?
            .unwrap_or(mix_format);

        // §4.4 step 3: requested buffer time from the *requested* period size
        // and count, at the requested rate (original wasapi.cpp:893-895).
        let duration = frames_to_reftime_ceil(
            self.requested_update_size as u64 * self.requested_num_updates as u64,
            self.sample_rate,
        );
        unsafe {
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
                    duration,
                    0,
                    &winfmt::to_waveformatextensible(&negotiated).Format,
                    None,
                )
                .map_err(|e| BackendError::EndpointCall("Initialize", status_of(&e)))?;
        }

        let event = OwnedHandle::new_auto_reset_event()
            .map_err(|e| BackendError::EndpointCall("CreateEventW", status_of(&e)))?;
        unsafe {
            client
                .SetEventHandle(event.raw())
                .map_err(|e| BackendError::EndpointCall("SetEventHandle", status_of(&e)))?;
        }

        let buffer_frame_count = unsafe {
            client.GetBufferSize().map_err(|e| BackendError::EndpointCall("GetBufferSize", status_of(&e)))?
        };

        // §4.4 steps 11/12: round the device's own period to the nearest
        // multiple of the requested update size, then derive `num_updates`
        // from the buffer the endpoint actually handed back, forcing at
        // least two updates (original wasapi.cpp:1081-1102).
        let mut min_period = 0i64;
        unsafe {
            client
                .GetDevicePeriod(None, Some(&mut min_period))
                .map_err(|e| BackendError::EndpointCall("GetDevicePeriod", status_of(&e)))?;
        }
        let mut update_size = reftime_to_frames_ceil(min_period, negotiated.sample_rate).max(1);
        if update_size < self.requested_update_size {
            let nearest = (self.requested_update_size + update_size / 2) / update_size;
            update_size *= nearest.max(1);
        }
        let mut num_updates = buffer_frame_count / update_size;
        if num_updates <= 1 {
            log::warn!("audio client returned buffer_frame_count < period*2; expect dropouts");
            num_updates = 2;
            update_size = buffer_frame_count / num_updates;
        }

        let render_client: IAudioRenderClient = unsafe {
            client.GetService().map_err(|e| BackendError::EndpointCall("GetService", status_of(&e)))?
        };

        // §4.4 step 8: headphone/headset form factor gates `is_headphones`,
        // and only matters at stereo — anything else reports false.
        let is_headphones = negotiated.channels == 2 && enumerate::is_headphones(&device);

        self.stream = Some(Stream {
            client,
            render_client,
            event,
            format: negotiated,
            buffer_frame_count,
            update_size,
            num_updates,
            padding: Arc::new(AtomicU32::new(0)),
            is_headphones,
            thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        });
        Ok(())
    }

    pub(super) fn start_on_worker(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else { return false };
        if stream.thread.is_some() {
            return true;
        }
        if unsafe { stream.client.Start() }.is_err() {
            return false;
        }

        stream.stop_flag.store(false, Ordering::SeqCst);
        let render_client = stream.render_client.clone();
        let client = stream.client.clone();
        let event_raw = stream.event.raw();
        let buffer_frame_count = stream.buffer_frame_count;
        let update_size = stream.update_size;
        let padding = stream.padding.clone();
        let stop_flag = stream.stop_flag.clone();
        let mixer = self.mixer.clone();

        let thread = std::thread::Builder::new()
            .name("aural-wasapi-render".into())
            .spawn(move || {
                mixer_proc(client, render_client, event_raw, buffer_frame_count, update_size, padding, stop_flag, mixer)
            })
            .ok();
        stream.thread = thread;
        stream.thread.is_some()
    }

    pub(super) fn stop_on_worker(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.stop_flag.store(true, Ordering::SeqCst);
            if let Some(handle) = stream.thread.take() {
                let _ = handle.join();
            }
            unsafe { let _ = stream.client.Stop(); };
        }
    }

    fn teardown_stream(&mut self) {
        self.stop_on_worker();
        self.stream = None;
    }

    pub(super) fn close_on_worker(&mut self) {
        self.teardown_stream();
        self.device = None;
    }

    /// `(clock_time, latency)` in nanoseconds (§4.4 "clock latency"):
    /// the device's own clock, and the queued-padding latency derived from
    /// it. Takes the device lock around both reads, per §5's ordering
    /// guarantee that `padding` and the clock are read consistently with the
    /// mixer thread's own locked `mix` call.
    pub fn get_clock_latency(&self) -> Option<(u64, i64)> {
        let stream = self.stream.as_ref()?;
        self.mixer.lock();
        let clock_time = self.mixer.device_clock_ns();
        let padding_frames = stream.padding.load(Ordering::Relaxed);
        self.mixer.unlock();
        let latency = (padding_frames as i64 * 1_000_000_000) / stream.format.sample_rate.max(1) as i64;
        Some((clock_time, latency))
    }

    /// Negotiated period size/count (§4.4 steps 11/12). `None` until the
    /// first `reset`.
    pub fn update_size(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| (s.update_size, s.num_updates))
    }

    /// Whether the currently negotiated stream is stereo output on a
    /// headphone/headset endpoint (§3 `is_headphones`).
    pub fn is_headphones(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_headphones).unwrap_or(false)
    }
}

fn status_of(e: &windows::core::Error) -> Status {
    match e.code() {
        windows::Win32::Foundation::E_OUTOFMEMORY => Status::OutOfMemory,
        windows::Win32::Foundation::E_INVALIDARG => Status::InvalidValue,
        _ => Status::Fail,
    }
}

/// The render-thread loop (§4.4 step 4: wait for the event, query padding,
/// request a whole number of update-size periods, mix straight into the
/// endpoint buffer, release it).
fn mixer_proc(
    client: IAudioClient,
    render_client: IAudioRenderClient,
    event_raw: windows::Win32::Foundation::HANDLE,
    buffer_frame_count: u32,
    update_size: u32,
    padding: Arc<AtomicU32>,
    stop_flag: Arc<AtomicBool>,
    mixer: Arc<dyn Mixer>,
) {
    let _apartment = match super::com::Apartment::enter() {
        Ok(a) => a,
        Err(_) => {
            mixer.handle_disconnect(DisconnectReason::EndpointCall("CoInitializeEx", Status::Fail));
            padding.store(0, Ordering::Release);
            return;
        }
    };

    while !stop_flag.load(Ordering::SeqCst) {
        match unsafe {
            windows::Win32::System::Threading::WaitForSingleObject(event_raw, EVENT_WAIT_TIMEOUT.as_millis() as u32)
        } {
            windows::Win32::Foundation::WAIT_OBJECT_0 => {}
            windows::Win32::Foundation::WAIT_TIMEOUT => {
                log::warn!("render event wait timed out; retrying");
                continue;
            }
            _ => {
                mixer.handle_disconnect(DisconnectReason::WaitFailed);
                padding.store(0, Ordering::Release);
                return;
            }
        }

        let p = match unsafe { client.GetCurrentPadding() } {
            Ok(p) => p,
            Err(e) => {
                mixer.handle_disconnect(DisconnectReason::EndpointCall("GetCurrentPadding", status_of(&e)));
                padding.store(0, Ordering::Release);
                return;
            }
        };
        padding.store(p, Ordering::Relaxed);

        let free = buffer_frame_count.saturating_sub(p);
        if free < update_size {
            continue;
        }
        let len = free - (free % update_size);

        let data = match unsafe { render_client.GetBuffer(len) } {
            Ok(p) => p,
            Err(e) => {
                mixer.handle_disconnect(DisconnectReason::EndpointCall("GetBuffer", status_of(&e)));
                padding.store(0, Ordering::Release);
                return;
            }
        };

        mixer.lock();
        unsafe { mixer.mix(data, len) };
        mixer.unlock();

        if let Err(e) = unsafe { render_client.ReleaseBuffer(len, 0) } {
            mixer.handle_disconnect(DisconnectReason::EndpointCall("ReleaseBuffer", status_of(&e)));
            padding.store(0, Ordering::Release);
            return;
        }
        padding.store(p + len, Ordering::Relaxed);
    }
    padding.store(0, Ordering::Release);
}

impl ProxyOps for PlaybackBackend {
    fn open_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut PlaybackBackend = self;
        let name = self.name.clone();
        Factory::open_playback(self_ptr, name.as_deref())
    }

    fn reset_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut PlaybackBackend = self;
        let status = Factory::reset_playback(self_ptr);
        if status.is_ok() {
            Ok(())
        } else {
            Err(BackendError::EndpointCall("reset", status))
        }
    }

    fn start_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut PlaybackBackend = self;
        if Factory::start_playback(self_ptr) {
            Ok(())
        } else {
            Err(BackendError::EndpointCall("Start", Status::Fail))
        }
    }

    fn stop_proxy(&mut self) {
        let self_ptr: *mut PlaybackBackend = self;
        Factory::stop_playback(self_ptr);
    }

    fn close_proxy(&mut self) {
        let self_ptr: *mut PlaybackBackend = self;
        Factory::close_playback(self_ptr);
    }
}

impl Backend for PlaybackBackend {
    fn open(&mut self, name: Option<&str>) -> Result<(), BackendError> {
        self.name = name.map(String::from);
        self.open_proxy()
    }

    fn reset(&mut self) -> Status {
        self.reset_proxy().map(|_| Status::Ok).unwrap_or_else(|e| e.status())
    }

    fn start(&mut self) -> bool {
        self.start_proxy().is_ok()
    }

    fn stop(&mut self) {
        self.stop_proxy();
    }

    fn lock(&self) {
        self.mixer.lock();
    }

    fn unlock(&self) {
        self.mixer.unlock();
    }

    fn destroy(&mut self) {
        self.close_proxy();
    }
}
