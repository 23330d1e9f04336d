//! The proxy worker (§4.1): a single dedicated thread that owns the COM
//! apartment and every `IMMDeviceEnumerator`/endpoint-level call, reached from
//! arbitrary caller threads over an `mpsc` channel.
//!
//! Grounded on this workspace's `lazy_static!`-backed enumerator singleton
//! (formerly `wasapi_backend::ENUMERATOR`): one process-wide worker, lazily
//! started on first use and torn down on `Factory::deinit`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;

use lazy_static::lazy_static;
use windows::Win32::Media::Audio::IMMDeviceEnumerator;

use crate::device::DeviceRegistry;
use crate::error::{BackendError, Status};
use crate::mixer::Flow;

use super::{capture::CaptureBackend, com::Apartment, enumerate, playback::PlaybackBackend};

type Reply<T> = Sender<T>;

/// One request the proxy worker services. Every variant carries its own
/// one-shot reply channel rather than a shared `ThreadRequest` slot (§4.1:
/// "a fresh reply channel per call" takes the place of the original
/// implementation's single reusable request/event pair).
enum ProxyRequest {
    Enumerate(Flow, Reply<Result<DeviceRegistry, BackendError>>),
    OpenPlayback(*mut PlaybackBackend, Option<String>, Reply<Result<(), BackendError>>),
    OpenCapture(*mut CaptureBackend, Option<String>, Reply<Result<(), BackendError>>),
    ResetPlayback(*mut PlaybackBackend, Reply<Status>),
    ResetCapture(*mut CaptureBackend, Reply<Status>),
    StartPlayback(*mut PlaybackBackend, Reply<bool>),
    StartCapture(*mut CaptureBackend, Reply<bool>),
    StopPlayback(*mut PlaybackBackend, Reply<()>),
    StopCapture(*mut CaptureBackend, Reply<()>),
    ClosePlayback(*mut PlaybackBackend, Reply<()>),
    CloseCapture(*mut CaptureBackend, Reply<()>),
}

// Every pointer variant above is only ever dereferenced back on the worker
// thread that owns the apartment the backend was opened in, and the caller
// blocks on the matching reply before touching the backend again.
unsafe impl Send for ProxyRequest {}

struct Worker {
    sender: Sender<ProxyRequest>,
    handle: JoinHandle<()>,
}

fn spawn_worker() -> Worker {
    let (sender, receiver) = mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("aural-wasapi-proxy".into())
        .spawn(move || run_worker(receiver))
        .expect("failed to spawn the WASAPI proxy worker thread");
    Worker { sender, handle }
}

fn run_worker(receiver: Receiver<ProxyRequest>) {
    let _apartment = match Apartment::enter() {
        Ok(a) => a,
        Err(e) => {
            log::error!("proxy worker: failed to enter COM apartment: {e}");
            return;
        }
    };
    let enumerator = match enumerate::create_enumerator() {
        Ok(e) => e,
        Err(e) => {
            log::error!("proxy worker: failed to create device enumerator: {e}");
            return;
        }
    };

    for request in receiver {
        handle(&enumerator, request);
    }
}

fn handle(enumerator: &IMMDeviceEnumerator, request: ProxyRequest) {
    match request {
        ProxyRequest::Enumerate(flow, reply) => {
            let mut registry = DeviceRegistry::default();
            let result = enumerate::enumerate(enumerator, flow, &mut registry)
                .map(|_| registry)
                .map_err(|e| BackendError::EndpointCall("EnumAudioEndpoints", status_of(&e)));
            let _ = reply.send(result);
        }
        ProxyRequest::OpenPlayback(backend, name, reply) => {
            let backend = unsafe { &mut *backend };
            let _ = reply.send(backend.open_on_worker(enumerator, name.as_deref()));
        }
        ProxyRequest::OpenCapture(backend, name, reply) => {
            let backend = unsafe { &mut *backend };
            let _ = reply.send(backend.open_on_worker(enumerator, name.as_deref()));
        }
        ProxyRequest::ResetPlayback(backend, reply) => {
            let backend = unsafe { &mut *backend };
            let status = backend.reset_on_worker().map(|_| Status::Ok).unwrap_or_else(|e| e.status());
            let _ = reply.send(status);
        }
        ProxyRequest::ResetCapture(backend, reply) => {
            let backend = unsafe { &mut *backend };
            let status = backend.reset_on_worker().map(|_| Status::Ok).unwrap_or_else(|e| e.status());
            let _ = reply.send(status);
        }
        ProxyRequest::StartPlayback(backend, reply) => {
            let backend = unsafe { &mut *backend };
            let _ = reply.send(backend.start_on_worker());
        }
        ProxyRequest::StartCapture(backend, reply) => {
            let backend = unsafe { &mut *backend };
            let _ = reply.send(backend.start_on_worker());
        }
        ProxyRequest::StopPlayback(backend, reply) => {
            let backend = unsafe { &mut *backend };
            backend.stop_on_worker();
            let _ = reply.send(());
        }
        ProxyRequest::StopCapture(backend, reply) => {
            let backend = unsafe { &mut *backend };
            backend.stop_on_worker();
            let _ = reply.send(());
        }
        ProxyRequest::ClosePlayback(backend, reply) => {
            let backend = unsafe { &mut *backend };
            backend.close_on_worker();
            let _ = reply.send(());
        }
        ProxyRequest::CloseCapture(backend, reply) => {
            let backend = unsafe { &mut *backend };
            backend.close_on_worker();
            let _ = reply.send(());
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

lazy_static! {
    // Starts empty; `Factory::post` spawns the worker lazily on first use and
    // `Factory::deinit` tears it back down to this state (§4.2 `init`/`deinit`).
    static ref WORKER: Mutex<Option<Worker>> = Mutex::new(None);
}

/// The process-wide handle callers use to reach the proxy worker. Grounded on
/// the original enumerator singleton; unlike that singleton this also owns
/// the request channel, since enumeration and every endpoint call funnel
/// through the same apartment.
pub struct Factory;

impl Factory {
    fn post<T>(request: ProxyRequest, receiver: Receiver<T>) -> T {
        let mut slot = WORKER.lock().unwrap();
        let worker = slot.get_or_insert_with(spawn_worker);
        worker.sender.send(request).expect("WASAPI proxy worker is gone");
        drop(slot);
        receiver.recv().expect("WASAPI proxy worker dropped its reply channel")
    }

    /// Spawns the worker if it isn't already running (§4.2 `init`). The
    /// worker is otherwise started lazily by the first request, so this is
    /// only needed when a caller wants a readiness check up front.
    pub fn init() {
        let mut slot = WORKER.lock().unwrap();
        slot.get_or_insert_with(spawn_worker);
    }

    /// Drops the request sender, which ends the worker's `for request in
    /// receiver` loop once it drains whatever is already queued, then joins
    /// it (§4.2 `deinit`: "posts a terminate signal; joins the worker").
    pub fn deinit() {
        let worker = WORKER.lock().unwrap().take();
        if let Some(worker) = worker {
            drop(worker.sender);
            let _ = worker.handle.join();
        }
    }

    pub fn enumerate(flow: Flow) -> Result<DeviceRegistry, BackendError> {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::Enumerate(flow, tx), rx)
    }

    pub fn open_playback(backend: *mut PlaybackBackend, name: Option<&str>) -> Result<(), BackendError> {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::OpenPlayback(backend, name.map(String::from), tx), rx)
    }

    pub fn open_capture(backend: *mut CaptureBackend, name: Option<&str>) -> Result<(), BackendError> {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::OpenCapture(backend, name.map(String::from), tx), rx)
    }

    pub fn reset_playback(backend: *mut PlaybackBackend) -> Status {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::ResetPlayback(backend, tx), rx)
    }

    pub fn reset_capture(backend: *mut CaptureBackend) -> Status {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::ResetCapture(backend, tx), rx)
    }

    pub fn start_playback(backend: *mut PlaybackBackend) -> bool {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::StartPlayback(backend, tx), rx)
    }

    pub fn start_capture(backend: *mut CaptureBackend) -> bool {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::StartCapture(backend, tx), rx)
    }

    pub fn stop_playback(backend: *mut PlaybackBackend) {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::StopPlayback(backend, tx), rx)
    }

    pub fn stop_capture(backend: *mut CaptureBackend) {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::StopCapture(backend, tx), rx)
    }

    pub fn close_playback(backend: *mut PlaybackBackend) {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::ClosePlayback(backend, tx), rx)
    }

    pub fn close_capture(backend: *mut CaptureBackend) {
        let (tx, rx) = mpsc::channel();
        Self::post(ProxyRequest::CloseCapture(backend, tx), rx)
    }
}
