//! sysfs access
//!
//! Everything the guard learns about a device, and the single write it ever
//! makes, goes through the [`SysFs`] capability. The host implementation talks
//! to the real pseudo-filesystem; [`MemorySysFs`] lets tests lay out arbitrary
//! device trees and inject failures.
//!
//! Layout of a USB device as seen under `/sys/bus/usb/devices`:
//!
//! ```text
//! 2-4.1/                  device node
//!   power/                not an interface
//!   authorized            device-level switch (not touched)
//!   2-4.1:1.0/            interface (name contains ':')
//!     bInterfaceClass     "08\n"
//!     bInterfaceSubClass  "06\n"
//!     bInterfaceProtocol  "50\n"
//!     authorized          "1\n", write "0" to de-authorize
//! ```

pub mod attributes;
pub mod interfaces;
mod memory;

pub use attributes::{InterfaceDescriptor, UNREADABLE, parse_attribute, read_attribute};
pub use interfaces::{InterfaceEntry, list_interfaces};
pub use memory::MemorySysFs;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Default sysfs mount point
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Location of USB device nodes relative to the sysfs root
pub const USB_DEVICES_DIR: &str = "bus/usb/devices";

/// Filesystem capability used by the enumerator, reader and enforcer
pub trait SysFs: Send + Sync {
    /// Names of the direct children of `path`
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Full textual content of the attribute at `path`
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Overwrite an attribute that must already exist
    fn write_existing(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
}

/// The host's real sysfs
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSysFs;

impl SysFs for HostSysFs {
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write_existing(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_host_list_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("power")).unwrap();
        fs::create_dir(dir.path().join("1-1:1.0")).unwrap();
        fs::write(dir.path().join("authorized"), "1\n").unwrap();

        let mut names = HostSysFs.list_dir(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["1-1:1.0", "authorized", "power"]);
    }

    #[test]
    fn test_host_list_missing_dir() {
        let dir = tempdir().unwrap();
        let err = HostSysFs.list_dir(&dir.path().join("gone")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_host_write_existing_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized");
        fs::write(&path, "1\n").unwrap();

        HostSysFs.write_existing(&path, b"0").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0");
    }

    #[test]
    fn test_host_write_never_creates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("authorized");

        assert!(HostSysFs.write_existing(&path, b"0").is_err());
        assert!(!path.exists());
    }
}
