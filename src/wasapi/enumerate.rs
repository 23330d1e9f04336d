//! Endpoint enumeration (§4.2 `enumerate`): walks the active render/capture
//! endpoints through `IMMDeviceEnumerator` and feeds what it finds into a
//! [`crate::device::DeviceRegistry`].

use widestring::U16CString;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, IMMDevice, IMMDeviceCollection, IMMDeviceEnumerator,
    MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL, STGM_READ};
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

use crate::device::DeviceRegistry;
use crate::mixer::Flow;

use super::com;

fn flow_to_native(flow: Flow) -> windows::Win32::Media::Audio::EDataFlow {
    match flow {
        Flow::Render => eRender,
        Flow::Capture => eCapture,
    }
}

pub fn create_enumerator() -> windows::core::Result<IMMDeviceEnumerator> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
}

fn device_id_wide(device: &IMMDevice) -> windows::core::Result<Vec<u16>> {
    unsafe {
        let id = device.GetId()?;
        let s = id.to_string().unwrap_or_default();
        Ok(s.encode_utf16().collect())
    }
}

fn open_property_store(device: &IMMDevice) -> windows::core::Result<IPropertyStore> {
    unsafe { device.OpenPropertyStore(STGM_READ) }
}

/// Rebuilds `registry` from scratch with every currently-active endpoint for
/// `flow` (§4.2: "Populate one registry per flow; replace its contents
/// wholesale on every call, never patch it incrementally").
pub fn enumerate(
    enumerator: &IMMDeviceEnumerator,
    flow: Flow,
    registry: &mut DeviceRegistry,
) -> windows::core::Result<()> {
    registry.clear();

    let collection: IMMDeviceCollection =
        unsafe { enumerator.EnumAudioEndpoints(flow_to_native(flow), DEVICE_STATE_ACTIVE)? };
    let count = unsafe { collection.GetCount()? };

    for i in 0..count {
        let device = unsafe { collection.Item(i)? };
        let Ok(store) = open_property_store(&device) else { continue };
        let friendly_name = com::read_friendly_name(&store);
        let endpoint_guid = com::read_endpoint_guid(&store);
        let device_id = device_id_wide(&device).unwrap_or_default();
        registry.add(&friendly_name, endpoint_guid, device_id);
    }

    Ok(())
}

/// Activates the named endpoint, or the system default for `flow` when `name`
/// is `None` (§4.4/§4.5 step 2, "Resolve the device").
pub fn open_device(
    enumerator: &IMMDeviceEnumerator,
    flow: Flow,
    registry: &DeviceRegistry,
    name: Option<&str>,
) -> windows::core::Result<IMMDevice> {
    match name.and_then(|n| registry.lookup(n)) {
        Some(entry) => {
            let id = U16CString::from_vec_truncate(entry.device_id.clone());
            unsafe { enumerator.GetDevice(windows::core::PCWSTR::from_raw(id.as_ptr())) }
        }
        None => unsafe { enumerator.GetDefaultAudioEndpoint(flow_to_native(flow), eConsole) },
    }
}

/// Reads the endpoint form factor for `device` (§3: used by `is_headphones`).
pub fn form_factor(device: &IMMDevice) -> windows::core::Result<com::FormFactor> {
    let store = open_property_store(device)?;
    Ok(com::read_form_factor(&store))
}

/// Whether `device`'s form factor marks it as headphone-like (§3
/// `is_headphones`: `Headphones` or `Headset`).
pub fn is_headphones(device: &IMMDevice) -> bool {
    matches!(
        form_factor(device),
        Ok(com::FormFactor::Headphones) | Ok(com::FormFactor::Headset)
    )
}
