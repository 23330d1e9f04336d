/// Status code surfaced by proxy requests and the endpoint operations they wrap.
///
/// Mirrors the handful of `HRESULT`-shaped outcomes the backend's public API
/// distinguishes between. Anything finer-grained is logged at the call site
/// and collapsed into one of these before it crosses the public boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidValue,
    OutOfMemory,
    Fail,
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// An error raised while opening, resetting, starting or stopping an endpoint.
#[derive(Debug)]
pub enum BackendError {
    /// The requested device could not be found in the registry.
    DeviceNotFound(String),

    /// `OpenPropertyStore`, `Activate`, `Initialize`, or a similar endpoint call failed.
    EndpointCall(&'static str, Status),

    /// A requested format could not be negotiated with the endpoint.
    UnsupportedFormat(String),

    /// The ring buffer (or another heap allocation on the hot path) could not be allocated.
    OutOfMemory,

    /// Something inside the Windows platform layer failed in a way this crate only
    /// surfaces for diagnostics.
    PlatformSpecific(Box<dyn std::error::Error + Send + 'static>),
}

impl BackendError {
    /// Flattens this error to the status code the public API returns.
    pub fn status(&self) -> Status {
        match self {
            BackendError::OutOfMemory => Status::OutOfMemory,
            BackendError::EndpointCall(_, status) => *status,
            BackendError::DeviceNotFound(_) | BackendError::UnsupportedFormat(_) => {
                Status::InvalidValue
            }
            BackendError::PlatformSpecific(_) => Status::Fail,
        }
    }
}

impl std::error::Error for BackendError {}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceNotFound(name) => {
                write!(f, "Backend error: device not found: {}", name)
            }
            BackendError::EndpointCall(call, status) => {
                write!(f, "Backend error: {} failed: {:?}", call, status)
            }
            BackendError::UnsupportedFormat(reason) => {
                write!(f, "Backend error: unsupported format: {}", reason)
            }
            BackendError::OutOfMemory => write!(f, "Backend error: out of memory"),
            BackendError::PlatformSpecific(e) => write!(f, "Backend error: platform error: {}", e),
        }
    }
}

/// An error raised while spawning the mixer or recorder real-time thread.
#[derive(Debug)]
pub enum SpawnRtThreadError {
    ApartmentEntryFailed(Status),
    ThreadSpawnFailed(std::io::Error),
    PlatformSpecific(Box<dyn std::error::Error + Send + 'static>),
}

impl std::error::Error for SpawnRtThreadError {}

impl std::fmt::Display for SpawnRtThreadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnRtThreadError::ApartmentEntryFailed(status) => {
                write!(
                    f,
                    "Error spawning rt thread: could not enter the COM apartment: {:?}",
                    status
                )
            }
            SpawnRtThreadError::ThreadSpawnFailed(e) => {
                write!(f, "Error spawning rt thread: {}", e)
            }
            SpawnRtThreadError::PlatformSpecific(e) => {
                write!(f, "Error spawning rt thread: platform error: {}", e)
            }
        }
    }
}

/// Reported to the external mixer via `handle_disconnect` when a real-time loop
/// must tear the device down.
#[derive(Debug)]
pub enum DisconnectReason {
    EndpointCall(&'static str, Status),
    WaitFailed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::EndpointCall(call, status) => {
                write!(f, "{} failed: {:?}", call, status)
            }
            DisconnectReason::WaitFailed => write!(f, "wait for endpoint event failed"),
        }
    }
}
