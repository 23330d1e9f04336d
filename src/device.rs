//! The device registry (§3 `DeviceEntry`, §6 "Device identification").
//!
//! Populating a registry means talking to the OS endpoint enumerator, which
//! lives in `wasapi::enumerate`. This module only owns the registry's shape
//! and the pure bookkeeping around it (disambiguation, lookup), so it can be
//! exercised without a live endpoint.

/// The sentinel substituted for an endpoint GUID the property store could
/// not produce (§3).
pub const UNKNOWN_GUID: &str = "Unknown Device GUID";

/// The prefix every display name carries (§6: `"<library name> on " + friendly_name`).
pub const DEVICE_NAME_PREFIX: &str = "Aural on ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub display_name: String,
    pub endpoint_guid: String,
    pub device_id: Vec<u16>,
}

/// Appends `" #2"`, `" #3"`, … to `basename` until it is unique within
/// `existing`. Mirrors the original implementation's disambiguation loop.
pub fn disambiguate(basename: &str, existing: &[DeviceEntry]) -> String {
    if !existing.iter().any(|e| e.display_name == basename) {
        return basename.to_string();
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{basename} #{suffix}");
        if !existing.iter().any(|e| e.display_name == candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// A process-wide, proxy-owned list of enumerated endpoints for one flow.
///
/// Per §5 "Shared resources": mutated only by the proxy worker, read by
/// callers only after a successful enumeration reply (which happens-before
/// the read, so no further synchronization is needed here).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Adds `friendly_name`/`endpoint_guid`/`device_id` as a new entry,
    /// disambiguating `friendly_name` against what's already registered.
    pub fn add(&mut self, friendly_name: &str, endpoint_guid: String, device_id: Vec<u16>) {
        let basename = format!("{DEVICE_NAME_PREFIX}{friendly_name}");
        let display_name = disambiguate(&basename, &self.entries);
        debug_assert!(self.entries.iter().all(|e| e.display_name != display_name));
        self.entries.push(DeviceEntry { display_name, endpoint_guid, device_id });
    }

    /// Looks an entry up by display name, endpoint GUID, or raw device-ID
    /// string, in that order (§6 "Lookup accepts (in order) ...").
    pub fn lookup(&self, name: &str) -> Option<&DeviceEntry> {
        self.entries
            .iter()
            .find(|e| e.display_name == name)
            .or_else(|| self.entries.iter().find(|e| e.endpoint_guid == name))
            .or_else(|| {
                let wide: Vec<u16> = name.encode_utf16().collect();
                self.entries.iter().find(|e| e.device_id == wide)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DeviceEntry {
        DeviceEntry { display_name: name.to_string(), endpoint_guid: UNKNOWN_GUID.to_string(), device_id: vec![] }
    }

    #[test]
    fn disambiguates_collisions() {
        let existing = vec![entry("Speakers"), entry("Speakers #2")];
        assert_eq!(disambiguate("Speakers", &existing), "Speakers #3");
        assert_eq!(disambiguate("Headset", &existing), "Headset");
    }

    #[test]
    fn registry_add_assigns_unique_display_names() {
        let mut reg = DeviceRegistry::default();
        reg.add("Speakers", "{guid-1}".into(), vec![1, 2, 3]);
        reg.add("Speakers", "{guid-2}".into(), vec![4, 5, 6]);
        let names: Vec<&str> = reg.entries().iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Aural on Speakers", "Aural on Speakers #2"]);
    }

    #[test]
    fn lookup_matches_name_guid_or_device_id() {
        let mut reg = DeviceRegistry::default();
        reg.add("Speakers", "{guid-1}".into(), "\\\\?\\SWD#1".encode_utf16().collect());
        let by_name = reg.lookup("Aural on Speakers").unwrap();
        let by_guid = reg.lookup("{guid-1}").unwrap();
        let by_id = reg.lookup("\\\\?\\SWD#1").unwrap();
        assert_eq!(by_name, by_guid);
        assert_eq!(by_guid, by_id);
    }

    #[test]
    fn lookup_misses_return_none() {
        let reg = DeviceRegistry::default();
        assert!(reg.lookup("nonexistent").is_none());
    }
}
