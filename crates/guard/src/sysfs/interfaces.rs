//! Interface enumeration
//!
//! A USB device directory mixes interface nodes (`2-4.1:1.0`) with plain
//! attributes and helper directories (`power`, `authorized`, child devices
//! like `2-4.1.3`). Only interface nodes carry a colon in their name.

use super::SysFs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Separator present in every interface node name (`<device>:<config>.<iface>`)
pub const INTERFACE_SEPARATOR: char = ':';

/// An interface candidate found under a device directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    /// Directory name, e.g. `2-4.1:1.0`
    pub name: String,
    /// Full path of the interface directory
    pub path: PathBuf,
}

/// Whether a directory entry name denotes an interface node
pub fn is_interface_name(name: &str) -> bool {
    name.contains(INTERFACE_SEPARATOR)
}

/// List the interface nodes directly under `device_path`
///
/// A listing failure is logged and yields an empty result; the device is
/// simply skipped for this event. Entries are returned sorted by name.
pub fn list_interfaces(fs: &dyn SysFs, device_path: &Path) -> Vec<InterfaceEntry> {
    let names = match fs.list_dir(device_path) {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot read {}: {}", device_path.display(), e);
            return Vec::new();
        }
    };

    let mut entries: Vec<InterfaceEntry> = names
        .into_iter()
        .filter(|name| is_interface_name(name))
        .map(|name| InterfaceEntry {
            path: device_path.join(&name),
            name,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    debug!(
        "Found {} interface(s) under {}",
        entries.len(),
        device_path.display()
    );
    entries
}
