//! COM plumbing shared by enumeration, the proxy worker, and both real-time
//! threads: apartment entry/exit, event handles, wide-string conversion, and
//! property-store reads.

use std::time::Duration;

use widestring::U16CString;
use windows::core::GUID;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Com::StructuredStorage::{PropVariantClear, PROPVARIANT, PROPERTYKEY};
use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};
use windows::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};
use windows::Win32::System::Variant::{VT_EMPTY, VT_LPWSTR, VT_UI4};
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

/// `DEFINE_PROPERTYKEY(DEVPKEY_Device_FriendlyName, 0xa45c254e, 0xdf1c, 0x4efd, 0x80,0x20, 0x67,0xd1,0x46,0xa8,0x50,0xe0, 14)`
pub const DEVPKEY_DEVICE_FRIENDLY_NAME: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_values(0xa45c254e, 0xdf1c, 0x4efd, [0x80, 0x20, 0x67, 0xd1, 0x46, 0xa8, 0x50, 0xe0]),
    pid: 14,
};

/// `DEFINE_PROPERTYKEY(PKEY_AudioEndpoint_GUID, 0x1da5d803, 0xd492, 0x4edd, 0x8c,0x23, 0xe0,0xc0,0xff,0xee,0x7f,0x0e, 4)`
pub const PKEY_AUDIOENDPOINT_GUID: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_values(0x1da5d803, 0xd492, 0x4edd, [0x8c, 0x23, 0xe0, 0xc0, 0xff, 0xee, 0x7f, 0x0e]),
    pid: 4,
};

/// `DEFINE_PROPERTYKEY(PKEY_AudioEndpoint_FormFactor, 0x1da5d803, 0xd492, 0x4edd, 0x8c,0x23, 0xe0,0xc0,0xff,0xee,0x7f,0x0e, 0)`
pub const PKEY_AUDIOENDPOINT_FORMFACTOR: PROPERTYKEY = PROPERTYKEY {
    fmtid: GUID::from_values(0x1da5d803, 0xd492, 0x4edd, [0x8c, 0x23, 0xe0, 0xc0, 0xff, 0xee, 0x7f, 0x0e]),
    pid: 0,
};

/// The device endpoint form factors this backend distinguishes between
/// (`EndpointFormFactor` in mmdeviceapi.h). Only the two that gate
/// `is_headphones` and the unknown sentinel are named; everything else folds
/// into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactor {
    Headphones,
    Headset,
    Unknown,
    Other,
}

/// Enters a multi-threaded COM apartment for as long as it is held, mirroring
/// `CoInitializeEx(nullptr, COINIT_MULTITHREADED)` / `CoUninitialize()`
/// pairing in the proxy worker and both real-time threads (§4.1, §4.4 step 1,
/// §4.5 step 1).
pub struct Apartment;

impl Apartment {
    pub fn enter() -> windows::core::Result<Self> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED).ok()? };
        Ok(Apartment)
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// An owning, auto-reset OS event handle, closed exactly once on drop.
///
/// The original implementation's destructor closes the notify/message events
/// a second time through a dead, bug-for-bug legacy path (§9 open question);
/// moving ownership into a single RAII wrapper makes a second close
/// structurally impossible rather than relying on a null-guard.
pub struct OwnedHandle(HANDLE);

unsafe impl Send for OwnedHandle {}

impl OwnedHandle {
    pub fn new_auto_reset_event() -> windows::core::Result<Self> {
        let handle = unsafe { CreateEventW(None, false, false, None)? };
        Ok(OwnedHandle(handle))
    }

    pub fn set(&self) -> windows::core::Result<()> {
        unsafe { SetEvent(self.0) }
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }

    /// Waits up to `timeout` for the event to signal. `Ok(true)` on signal,
    /// `Ok(false)` on timeout (§5: "non-fatal: a log line is emitted and the
    /// loop continues"), `Err` on an OS wait failure.
    pub fn wait(&self, timeout: Duration) -> windows::core::Result<bool> {
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        match unsafe { WaitForSingleObject(self.0, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(windows::core::Error::from_win32()),
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

fn wide_to_string(ptr: windows::core::PWSTR) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { U16CString::from_ptr_str(ptr.0).to_string_lossy() }
}

/// `get_device_name_and_guid`'s friendly-name half (original_source lines
/// 174-199): best effort, falling back to "Unknown Device Name" on any
/// failure or unexpected variant type.
pub fn read_friendly_name(store: &IPropertyStore) -> String {
    let mut value = PROPVARIANT::default();
    let result = unsafe { store.GetValue(&DEVPKEY_DEVICE_FRIENDLY_NAME) };
    let name = match result {
        Ok(v) => {
            value = v;
            read_lpwstr(&value).unwrap_or_else(|| "Unknown Device Name".to_string())
        }
        Err(_) => "Unknown Device Name".to_string(),
    };
    unsafe { let _ = PropVariantClear(&mut value); };
    name
}

/// `get_device_name_and_guid`'s GUID half (original_source lines 201-216).
///
/// The legacy implementation checks `pvname.vt` (the *name* variant it just
/// cleared) instead of `pvguid.vt` before trusting `pvguid.pwszVal`, which
/// only coincidentally works because both properties are `VT_LPWSTR` on every
/// real endpoint. This reproduces the *observable* contract — best-effort
/// GUID string, sentinel fallback on any inconsistency — by checking the
/// variant it actually fetched, not the stale one (§9 open question).
pub fn read_endpoint_guid(store: &IPropertyStore) -> String {
    let mut value = PROPVARIANT::default();
    let result = unsafe { store.GetValue(&PKEY_AUDIOENDPOINT_GUID) };
    let guid = match result {
        Ok(v) => {
            value = v;
            read_lpwstr(&value).unwrap_or_else(|| crate::device::UNKNOWN_GUID.to_string())
        }
        Err(_) => crate::device::UNKNOWN_GUID.to_string(),
    };
    unsafe { let _ = PropVariantClear(&mut value); };
    guid
}

pub fn read_form_factor(store: &IPropertyStore) -> FormFactor {
    let mut value = PROPVARIANT::default();
    let result = unsafe { store.GetValue(&PKEY_AUDIOENDPOINT_FORMFACTOR) };
    let form_factor = match result {
        Ok(v) => {
            value = v;
            match read_vt(&value) {
                Some(VT_UI4) => match read_ulong(&value) {
                    // Headphones = 4, Headset = 10 in the mmdeviceapi.h enum.
                    Some(4) => FormFactor::Headphones,
                    Some(10) => FormFactor::Headset,
                    _ => FormFactor::Other,
                },
                Some(VT_EMPTY) => FormFactor::Unknown,
                _ => FormFactor::Unknown,
            }
        }
        Err(_) => FormFactor::Unknown,
    };
    unsafe { let _ = PropVariantClear(&mut value); };
    form_factor
}

fn read_vt(value: &PROPVARIANT) -> Option<windows::Win32::System::Variant::VARENUM> {
    Some(unsafe { value.Anonymous.Anonymous.vt })
}

fn read_lpwstr(value: &PROPVARIANT) -> Option<String> {
    if read_vt(value) != Some(VT_LPWSTR) {
        return None;
    }
    let ptr = unsafe { value.Anonymous.Anonymous.Anonymous.pwszVal };
    Some(wide_to_string(ptr))
}

fn read_ulong(value: &PROPVARIANT) -> Option<u32> {
    Some(unsafe { value.Anonymous.Anonymous.Anonymous.ulVal })
}
