// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The component authentication registry.
//!
//! Maps component names to SVCUIDs (12 random bytes, presented as 16
//! base64 characters). Entries live for the lifetime of the gateway
//! process; there is no revocation within a run. Process-wide state behind
//! one mutex, like the other fixed registries.

use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::*;
use rand::rngs::OsRng;
use rand::RngCore;

use gg_lib::{buffer, GgError};

/// Maximum number of generic components that can be authenticated.
pub const MAX_GENERIC_COMPONENTS: usize = 50;

/// Maximum length of a generic component name.
pub const MAX_COMPONENT_NAME_LEN: usize = 128;

pub const SVCUID_BIN_LEN: usize = 12;

/// 12 bytes of base64: always exactly 16 characters, never padded.
pub const SVCUID_B64_LEN: usize = 16;

/// 1-based index into the registry. Zero is reserved as invalid, so this
/// type is only constructed for live entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentHandle(u16);

impl ComponentHandle {
    pub fn get(self) -> u16 {
        self.0
    }

    fn from_index(index: usize) -> ComponentHandle {
        ComponentHandle(index as u16 + 1)
    }

    fn index(self) -> usize {
        usize::from(self.0) - 1
    }
}

struct Entry {
    svcuid: [u8; SVCUID_BIN_LEN],
    name: Vec<u8>,
}

struct Registry {
    entries: Vec<Entry>,
    insecure: bool,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    entries: Vec::new(),
    insecure: false,
});

/// Disable authentication: client-supplied names are trusted verbatim and
/// double as SVCUIDs. For development only.
pub fn set_insecure_mode() {
    let mut registry = REGISTRY.lock().unwrap();
    registry.insecure = true;
    error!("INSECURE!!! IPC authentication disabled!");
    error!("SVCUID handling is in debug mode.");
}

pub fn insecure_mode() -> bool {
    REGISTRY.lock().unwrap().insecure
}

/// Find a registered component by name. Linear scan, case-sensitive.
pub fn lookup_by_name(name: &[u8]) -> Option<ComponentHandle> {
    let registry = REGISTRY.lock().unwrap();
    registry
        .entries
        .iter()
        .position(|entry| entry.name == name)
        .map(ComponentHandle::from_index)
}

/// Name of a registered component.
pub fn component_name(handle: ComponentHandle) -> Option<Vec<u8>> {
    let registry = REGISTRY.lock().unwrap();
    registry.entries.get(handle.index()).map(|e| e.name.clone())
}

/// Authenticate a connecting process and return its handle plus the SVCUID
/// string to present to it.
///
/// With authentication enabled the identity comes from the peer's systemd
/// unit; `name_hint` is only consulted in insecure mode.
pub fn register_client(
    pid: i32,
    name_hint: Option<&[u8]>,
) -> Result<(ComponentHandle, String), GgError> {
    if insecure_mode() {
        let fallback;
        let name: &[u8] = match name_hint {
            Some(name) => name,
            None => {
                fallback = format!("pid-{pid}").into_bytes();
                &fallback
            }
        };
        return register_component_name(name);
    }

    let unit = unit_name_for_pid(pid)?;
    let name = component_name_from_unit(unit.as_bytes())?;
    register_component_name(name)
}

/// Register (or look up) a component by name, returning its handle and the
/// SVCUID string to present for it.
pub fn register_component_name(name: &[u8]) -> Result<(ComponentHandle, String), GgError> {
    if name.is_empty() || name.len() > MAX_COMPONENT_NAME_LEN {
        error!("component name has invalid length");
        return Err(GgError::Invalid);
    }

    let mut registry = REGISTRY.lock().unwrap();

    if let Some(index) = registry.entries.iter().position(|e| e.name == name) {
        debug!(
            "found existing auth info for component {}",
            String::from_utf8_lossy(name)
        );
        return Ok((ComponentHandle::from_index(index), present(&registry, index)));
    }

    if registry.entries.len() >= MAX_GENERIC_COMPONENTS {
        error!("insufficient generic component slots");
        return Err(GgError::Nomem);
    }

    debug!(
        "registering new svcuid for component {}",
        String::from_utf8_lossy(name)
    );

    let mut svcuid = [0u8; SVCUID_BIN_LEN];
    if !registry.insecure {
        if let Err(e) = OsRng.try_fill_bytes(&mut svcuid) {
            // Without CSPRNG output no security guarantee can be provided;
            // continuing to serve would hand out predictable identities.
            error!("failed to read from the system CSPRNG: {e}");
            std::process::exit(1);
        }
    }

    registry.entries.push(Entry {
        svcuid,
        name: name.to_vec(),
    });
    let index = registry.entries.len() - 1;
    Ok((ComponentHandle::from_index(index), present(&registry, index)))
}

/// The SVCUID string presented for an entry: its base64 form, or the bare
/// name when authentication is disabled.
fn present(registry: &Registry, index: usize) -> String {
    let entry = &registry.entries[index];
    if registry.insecure {
        String::from_utf8_lossy(&entry.name).into_owned()
    } else {
        BASE64.encode(entry.svcuid)
    }
}

/// Resolve a presented SVCUID to a component handle.
///
/// With authentication enabled the SVCUID is base64-decoded and compared
/// against every entry. In insecure mode it is treated as the component
/// name, registering it on first sight.
pub fn get_handle_by_svcuid(svcuid: &[u8]) -> Result<ComponentHandle, GgError> {
    if insecure_mode() {
        // The presented "svcuid" is a component name; register on first
        // sight.
        return register_component_name(svcuid).map(|(handle, _)| handle);
    }

    let registry = REGISTRY.lock().unwrap();

    if svcuid.len() != SVCUID_B64_LEN {
        error!("svcuid has invalid length");
        return Err(GgError::Invalid);
    }

    let decoded = BASE64.decode(svcuid).map_err(|_| {
        error!("svcuid is invalid base64");
        GgError::Invalid
    })?;

    for (index, entry) in registry.entries.iter().enumerate() {
        if entry.svcuid[..] == decoded[..] {
            return Ok(ComponentHandle::from_index(index));
        }
    }

    error!("requested svcuid not registered");
    Err(GgError::NoEntry)
}

/// Whether a presented SVCUID corresponds to a known component.
pub fn verify_svcuid(svcuid: &[u8]) -> bool {
    get_handle_by_svcuid(svcuid).is_ok()
}

/// Derive the component name from a systemd unit name: the `.service`
/// suffix is required, an `.install`/`.bootstrap` phase suffix is dropped,
/// and the `ggl.` prefix is required.
pub fn component_name_from_unit(unit: &[u8]) -> Result<&[u8], GgError> {
    let mut name = unit;

    if !buffer::remove_suffix(&mut name, b".service") {
        error!(
            "unit {} is missing the service extension",
            String::from_utf8_lossy(unit)
        );
        return Err(GgError::Failure);
    }

    let _ = buffer::remove_suffix(&mut name, b".install")
        || buffer::remove_suffix(&mut name, b".bootstrap");

    if !buffer::remove_prefix(&mut name, b"ggl.") {
        error!(
            "unit {} does not have the component prefix",
            String::from_utf8_lossy(unit)
        );
        return Err(GgError::Failure);
    }

    if name.is_empty() || name.len() > MAX_COMPONENT_NAME_LEN {
        error!("component name has invalid length");
        return Err(GgError::Failure);
    }

    Ok(name)
}

/// Look up the systemd unit of a process from its cgroup, the same source
/// `sd_pid_get_unit` reads.
pub fn unit_name_for_pid(pid: i32) -> Result<String, GgError> {
    let path = format!("/proc/{pid}/cgroup");
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        error!("failed to look up service for pid {pid}: {e}");
        GgError::Failure
    })?;

    for line in contents.lines() {
        // hierarchy-id:controllers:path
        let Some(cgroup_path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        let Some(unit) = cgroup_path.rsplit('/').next() else {
            continue;
        };
        if unit.ends_with(".service") {
            return Ok(unit.to_owned());
        }
    }

    error!("no systemd service unit found for pid {pid}");
    Err(GgError::Failure)
}
