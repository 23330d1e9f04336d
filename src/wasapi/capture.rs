//! The capture endpoint backend (§4.5): negotiates a shared-mode format with
//! an `IAudioClient`, builds whatever channel/sample converters the offered
//! format requires, and drains the endpoint into a ring buffer from a
//! dedicated recorder thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDevice, IMMDeviceEnumerator, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
};
use windows::Win32::System::Com::CLSCTX_ALL;

use crate::convert::{ChannelConverter, SampleConverter};
use crate::device::DeviceRegistry;
use crate::error::{BackendError, DisconnectReason, Status};
use crate::format::{self, frames_to_reftime_ceil, reftime_to_frames_ceil, ExtensibleFormat, REFTIME_PER_SEC};
use crate::mixer::{Backend, ChannelConfig, Flow, Mixer, ProxyOps, SampleType};
use crate::ring::{self, RingReader, RingWriter};

use super::com::OwnedHandle;
use super::proxy::Factory;
use super::{enumerate, winfmt};

const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);
/// §4.5 step 2: "max(100 ms, ...)".
const MIN_BUFFER_DURATION: i64 = REFTIME_PER_SEC / 10;
/// §4.5 step 2's requested update size/count, ahead of buffer-time
/// recomputation in `reset_on_worker`.
const DEFAULT_UPDATE_SIZE: u32 = 1024;
const DEFAULT_NUM_UPDATES: u32 = 3;

/// Everything `reset` negotiates and `start`/`stop` drive, rebuilt on every
/// `reset` the same way [`super::playback::PlaybackBackend`]'s `Stream` is.
struct Stream {
    client: IAudioClient,
    capture_client: IAudioCaptureClient,
    event: OwnedHandle,
    /// The format actually offered by the endpoint (post `IsFormatSupported`).
    device_format: ExtensibleFormat,
    /// `None` when the endpoint's channel count already matches the request.
    channel_conv: Option<ChannelConverter>,
    /// `None` when no rate or sample-type conversion is needed after the
    /// (optional) channel conversion.
    sample_conv: Option<SampleConverter>,
    /// Negotiated period size and period count (§4.5 step 2), used to size
    /// the ring to at least `update_size * num_updates` frames.
    update_size: u32,
    num_updates: u32,
    ring_reader: RingReader,
    ring_writer_slot: Option<RingWriter>,
    device_frame_bytes: usize,
    /// Taken by `start_on_worker` for the thread's lifetime, handed back by
    /// `stop_on_worker` on join so a subsequent `start` (without an
    /// intervening `reset`) has its converters and ring writer back.
    thread: Option<JoinHandle<RecordResources>>,
    stop_flag: Arc<AtomicBool>,
}

/// What `record_proc` owns while running and returns on exit, so `stop` can
/// hand it back to the `Stream` for a later `start` to reuse (§3 lifecycle:
/// "start ⇄ stop" without a mandatory `reset` between them).
type RecordResources = (RingWriter, Option<ChannelConverter>, Option<SampleConverter>);

pub struct CaptureBackend {
    device: Option<IMMDevice>,
    name: Option<String>,
    stream: Option<Stream>,
    mixer: Arc<dyn Mixer>,
    config: ChannelConfig,
    sample_type: SampleType,
    sample_rate: u32,
    requested_update_size: u32,
    requested_num_updates: u32,
}

impl CaptureBackend {
    pub fn new(mixer: Arc<dyn Mixer>, config: ChannelConfig, sample_type: SampleType, sample_rate: u32) -> Self {
        CaptureBackend {
            device: None,
            name: None,
            stream: None,
            mixer,
            config,
            sample_type,
            sample_rate,
            requested_update_size: DEFAULT_UPDATE_SIZE,
            requested_num_updates: DEFAULT_NUM_UPDATES,
        }
    }

    pub(super) fn open_on_worker(
        &mut self,
        enumerator: &IMMDeviceEnumerator,
        name: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut registry = DeviceRegistry::default();
        enumerate::enumerate(enumerator, Flow::Capture, &mut registry)
            .map_err(|e| BackendError::EndpointCall("EnumAudioEndpoints", status_of(&e)))?;

        if let Some(n) = name {
            if registry.lookup(n).is_none() {
                return Err(BackendError::DeviceNotFound(n.to_string()));
            }
        }

        let device = enumerate::open_device(enumerator, Flow::Capture, &registry, name)
            .map_err(|e| BackendError::EndpointCall("GetDevice", status_of(&e)))?;

        self.device = Some(device);
        self.name = name.map(String::from);

        // §4.5 "open": "after a successful Open proxy request, immediately posts Reset".
        self.reset_on_worker()
    }

    pub(super) fn reset_on_worker(&mut self) -> Result<(), BackendError> {
        // Cloned (an `IMMDevice` is a COM ref-counted handle) so `teardown_stream`
        // can take `&mut self` below without fighting a live borrow of `self.device`.
        let device = self.device.clone().ok_or(BackendError::DeviceNotFound("<not open>".into()))?;

        self.teardown_stream();

        if self.config == ChannelConfig::Ambi3D {
            return Err(BackendError::UnsupportedFormat("Ambi3D capture is not supported".into()));
        }

        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| BackendError::EndpointCall("Activate", status_of(&e)))?;

        let requested_channels = self.config.channel_count() as u16;
        let (sub_format, bits) = format::sub_format_and_bits_for(self.sample_type);
        let requested = format::make_extensible(sub_format, requested_channels, self.sample_rate, bits);

        let offered = winfmt::negotiate(&client, &requested)
            .map_err(|e| BackendError::EndpointCall("IsFormatSupported", status_of(&e)))?
            .ok_or_else(|| BackendError::UnsupportedFormat("endpoint rejected every capture format".into()))?;

        let mono_stereo_swap = (requested_channels == 1 && offered.channels == 2)
            || (requested_channels == 2 && offered.channels == 1);
        if offered.channels != requested_channels && !mono_stereo_swap {
            return Err(BackendError::UnsupportedFormat(format!(
                "endpoint offered {} channels, requested {}",
                offered.channels, requested_channels
            )));
        }

        let source_type = format::sample_type_from_wire(offered.sub_format, offered.bits_per_sample)
            .ok_or_else(|| BackendError::UnsupportedFormat(format!("unsupported bit depth {}", offered.bits_per_sample)))?;

        let (channel_conv, post_channel_type, post_channel_channels) = if requested_channels == 1 && offered.channels == 2 {
            (Some(ChannelConverter::new(source_type, 2, 1)), SampleType::Float32, 1u16)
        } else if requested_channels == 2 && offered.channels == 1 {
            (Some(ChannelConverter::new(source_type, 1, 2)), SampleType::Float32, 2u16)
        } else {
            (None, source_type, offered.channels)
        };

        let sample_conv = if offered.sample_rate != self.sample_rate || post_channel_type != self.sample_type {
            Some(SampleConverter::new(
                post_channel_type,
                self.sample_type,
                post_channel_channels,
                offered.sample_rate,
                self.sample_rate,
            ))
        } else {
            None
        };

        // §4.5 step 2: requested buffer time from the requested period
        // size/count at the requested rate, clamped to at least 100ms, then
        // the period size is recomputed from that clamped buffer time
        // (original wasapi.cpp:1555-1559).
        let requested_frames = self.requested_update_size as u64 * self.requested_num_updates as u64;
        let duration = frames_to_reftime_ceil(requested_frames, self.sample_rate).max(MIN_BUFFER_DURATION);
        let update_size =
            (reftime_to_frames_ceil(duration, self.sample_rate) / self.requested_num_updates.max(1)).max(1);
        unsafe {
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
                    duration,
                    0,
                    &winfmt::to_waveformatextensible(&offered).Format,
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

        let endpoint_buffer_frames = unsafe {
            client.GetBufferSize().map_err(|e| BackendError::EndpointCall("GetBufferSize", status_of(&e)))?
        };

        let capture_client: IAudioCaptureClient = unsafe {
            client.GetService().map_err(|e| BackendError::EndpointCall("GetService", status_of(&e)))?
        };

        // §4.5 step 8 / §8 capture invariant: ring sized in *requested*
        // (post-conversion) frames, at least `update_size * num_updates` and
        // at least the endpoint's reported buffer, both converted to the
        // request rate (original sizes its own ring as
        // `max(UpdateSize*NumUpdates, buffer_len)` at wasapi.cpp:1755).
        let scaled_endpoint_frames =
            (endpoint_buffer_frames as u64 * self.sample_rate as u64 / offered.sample_rate.max(1) as u64) as usize;
        let ring_frames = (update_size as usize * self.requested_num_updates as usize)
            .max(scaled_endpoint_frames)
            .max(endpoint_buffer_frames as usize);
        let requested_frame_bytes = requested_channels as usize * self.sample_type.bytes() as usize;
        let (ring_writer, ring_reader) = ring::create(ring_frames, requested_frame_bytes);

        self.stream = Some(Stream {
            client,
            capture_client,
            event,
            device_format: offered,
            update_size,
            num_updates: self.requested_num_updates,
            channel_conv,
            sample_conv,
            ring_reader,
            ring_writer_slot: Some(ring_writer),
            device_frame_bytes: offered.block_align() as usize,
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
        let Some(ring_writer) = stream.ring_writer_slot.take() else { return false };

        stream.stop_flag.store(false, Ordering::SeqCst);
        let capture_client = stream.capture_client.clone();
        let event_raw = stream.event.raw();
        let stop_flag = stream.stop_flag.clone();
        let mixer = self.mixer.clone();
        let channel_conv = stream.channel_conv.take();
        let sample_conv = stream.sample_conv.take();
        let device_frame_bytes = stream.device_frame_bytes;

        let thread = std::thread::Builder::new()
            .name("aural-wasapi-capture".into())
            .spawn(move || {
                record_proc(
                    capture_client,
                    event_raw,
                    stop_flag,
                    mixer,
                    channel_conv,
                    sample_conv,
                    ring_writer,
                    device_frame_bytes,
                )
            })
            .ok();
        let launched = thread.is_some();
        stream.thread = thread;
        launched
    }

    pub(super) fn stop_on_worker(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.stop_flag.store(true, Ordering::SeqCst);
            if let Some(handle) = stream.thread.take() {
                if let Ok((ring_writer, channel_conv, sample_conv)) = handle.join() {
                    stream.ring_writer_slot = Some(ring_writer);
                    stream.channel_conv = channel_conv;
                    stream.sample_conv = sample_conv;
                }
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

    /// The format actually negotiated with the endpoint, post
    /// `IsFormatSupported` (§4.5 step 4). `None` until the first `reset`.
    pub fn device_format(&self) -> Option<ExtensibleFormat> {
        self.stream.as_ref().map(|s| s.device_format)
    }

    /// Negotiated period size/count (§4.5 step 2). `None` until the first `reset`.
    pub fn update_size(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| (s.update_size, s.num_updates))
    }

    /// §4.5 `available_samples`.
    pub fn available_samples(&self) -> u32 {
        self.stream.as_ref().map(|s| s.ring_reader.read_space() as u32).unwrap_or(0)
    }

    /// §4.5 `capture_samples`: reads exactly `frames` frames, or fails if
    /// fewer than that are buffered.
    pub fn capture_samples(&mut self, out: &mut [u8], frames: u32) -> Result<(), BackendError> {
        let stream = self.stream.as_mut().ok_or(BackendError::DeviceNotFound("<not open>".into()))?;
        if stream.ring_reader.read(out, frames as usize) {
            Ok(())
        } else {
            Err(BackendError::UnsupportedFormat("not enough captured data buffered".into()))
        }
    }
}

fn status_of(e: &windows::core::Error) -> Status {
    match e.code() {
        windows::Win32::Foundation::E_OUTOFMEMORY => Status::OutOfMemory,
        windows::Win32::Foundation::E_INVALIDARG => Status::InvalidValue,
        _ => Status::Fail,
    }
}

/// The recorder-thread loop (§4.5: drain every pending packet, run it through
/// the optional channel/sample converters, and advance the ring).
fn record_proc(
    capture_client: IAudioCaptureClient,
    event_raw: windows::Win32::Foundation::HANDLE,
    stop_flag: Arc<AtomicBool>,
    mixer: Arc<dyn Mixer>,
    channel_conv: Option<ChannelConverter>,
    mut sample_conv: Option<SampleConverter>,
    mut ring_writer: RingWriter,
    device_frame_bytes: usize,
) -> RecordResources {
    let _apartment = match super::com::Apartment::enter() {
        Ok(a) => a,
        Err(_) => {
            mixer.handle_disconnect(DisconnectReason::EndpointCall("CoInitializeEx", Status::Fail));
            return (ring_writer, channel_conv, sample_conv);
        }
    };

    // Sized for the worst case: up to 2 channels of float per device frame
    // (§4.5 step c: "numsamples × 2 floats suffices").
    let mut channel_scratch: Vec<f32> = Vec::new();
    let mut sample_scratch: Vec<u8> = Vec::new();

    while !stop_flag.load(Ordering::SeqCst) {
        loop {
            let avail = match unsafe { capture_client.GetNextPacketSize() } {
                Ok(n) => n,
                Err(e) => {
                    mixer.handle_disconnect(DisconnectReason::EndpointCall("GetNextPacketSize", status_of(&e)));
                    return (ring_writer, channel_conv, sample_conv);
                }
            };
            if avail == 0 {
                break;
            }

            let mut data_ptr = std::ptr::null_mut();
            let mut num_frames = 0u32;
            let mut flags = 0u32;
            if let Err(e) = unsafe {
                capture_client.GetBuffer(&mut data_ptr, &mut num_frames, &mut flags, None, None)
            } {
                mixer.handle_disconnect(DisconnectReason::EndpointCall("GetBuffer", status_of(&e)));
                return (ring_writer, channel_conv, sample_conv);
            }

            let raw = unsafe { std::slice::from_raw_parts(data_ptr, num_frames as usize * device_frame_bytes) };

            let post_channel: &[u8] = if let Some(conv) = channel_conv.as_ref() {
                let needed = num_frames as usize * conv.dst_channels() as usize;
                if channel_scratch.len() < needed {
                    channel_scratch.resize(needed, 0.0);
                }
                conv.input(raw, &mut channel_scratch[..needed], num_frames as usize);
                bytemuck_f32_slice(&channel_scratch[..needed])
            } else {
                raw
            };

            if let Some(conv) = sample_conv.as_mut() {
                let mut src = post_channel;
                let mut src_frames = num_frames;
                let dst_frame_bytes = conv.dst_frame_bytes();
                loop {
                    let free_frames = ring_writer.free();
                    if free_frames == 0 || src_frames == 0 {
                        break;
                    }
                    let chunk = free_frames.min(4096);
                    if sample_scratch.len() < chunk * dst_frame_bytes {
                        sample_scratch.resize(chunk * dst_frame_bytes, 0);
                    }
                    let written = conv.input(&mut src, &mut src_frames, &mut sample_scratch, chunk as u32);
                    if written == 0 {
                        break;
                    }
                    let bytes = written as usize * dst_frame_bytes;
                    ring_writer.write(&sample_scratch[..bytes]);
                }
            } else {
                ring_writer.write(post_channel);
            }

            if let Err(e) = unsafe { capture_client.ReleaseBuffer(num_frames) } {
                mixer.handle_disconnect(DisconnectReason::EndpointCall("ReleaseBuffer", status_of(&e)));
                return (ring_writer, channel_conv, sample_conv);
            }
        }

        match unsafe {
            windows::Win32::System::Threading::WaitForSingleObject(event_raw, EVENT_WAIT_TIMEOUT.as_millis() as u32)
        } {
            windows::Win32::Foundation::WAIT_OBJECT_0 => {}
            windows::Win32::Foundation::WAIT_TIMEOUT => {
                log::warn!("capture event wait timed out; retrying");
            }
            _ => {
                mixer.handle_disconnect(DisconnectReason::WaitFailed);
                return (ring_writer, channel_conv, sample_conv);
            }
        }
    }
    (ring_writer, channel_conv, sample_conv)
}

fn bytemuck_f32_slice(floats: &[f32]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(floats.as_ptr() as *const u8, std::mem::size_of_val(floats)) }
}

impl ProxyOps for CaptureBackend {
    fn open_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut CaptureBackend = self;
        let name = self.name.clone();
        Factory::open_capture(self_ptr, name.as_deref())
    }

    fn reset_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut CaptureBackend = self;
        let status = Factory::reset_capture(self_ptr);
        if status.is_ok() {
            Ok(())
        } else if status == Status::OutOfMemory {
            Err(BackendError::OutOfMemory)
        } else {
            Err(BackendError::EndpointCall("reset", status))
        }
    }

    fn start_proxy(&mut self) -> Result<(), BackendError> {
        let self_ptr: *mut CaptureBackend = self;
        if Factory::start_capture(self_ptr) {
            Ok(())
        } else {
            Err(BackendError::EndpointCall("Start", Status::Fail))
        }
    }

    fn stop_proxy(&mut self) {
        let self_ptr: *mut CaptureBackend = self;
        Factory::stop_capture(self_ptr);
    }

    fn close_proxy(&mut self) {
        let self_ptr: *mut CaptureBackend = self;
        Factory::close_capture(self_ptr);
    }
}

impl Backend for CaptureBackend {
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
