//! Interface attribute reading
//!
//! `bInterfaceClass` and friends are normally two-digit hex (`08\n`), but
//! depending on kernel and driver they may show up as `0x08` or plain
//! decimal. The parser accepts all of them.

use super::{InterfaceEntry, SysFs};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Value reported for an attribute that cannot be read or parsed
pub const UNREADABLE: i32 = -1;

pub const CLASS_ATTR: &str = "bInterfaceClass";
pub const SUB_CLASS_ATTR: &str = "bInterfaceSubClass";
pub const PROTOCOL_ATTR: &str = "bInterfaceProtocol";

const HEX_PREFIX: &str = "0x";

/// Parse the textual content of a numeric attribute
///
/// Text starting with `0x` or containing a hex letter is tried as base 16
/// first; anything else (or a failed base 16 attempt) as base 10. Returns
/// [`UNREADABLE`] when neither works.
pub fn parse_attribute(text: &str) -> i32 {
    let text = text.trim();
    let stripped = text.strip_prefix(HEX_PREFIX);

    if stripped.is_some() || text.contains(|c: char| matches!(c, 'a'..='f' | 'A'..='F')) {
        if let Ok(value) = i32::from_str_radix(stripped.unwrap_or(text), 16) {
            return value;
        }
    }

    text.parse().unwrap_or(UNREADABLE)
}

/// Read and parse a numeric attribute file
pub fn read_attribute(fs: &dyn SysFs, path: &Path) -> i32 {
    match fs.read_to_string(path) {
        Ok(text) => parse_attribute(&text),
        Err(e) => {
            trace!("Cannot read {}: {}", path.display(), e);
            UNREADABLE
        }
    }
}

/// Classification of one USB interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub interface_class: i32,
    pub interface_sub_class: i32,
    pub interface_protocol: i32,
}

impl InterfaceDescriptor {
    /// Read the class/subclass/protocol triple of an enumerated interface
    pub fn read(fs: &dyn SysFs, entry: &InterfaceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            path: entry.path.clone(),
            interface_class: read_attribute(fs, &entry.path.join(CLASS_ATTR)),
            interface_sub_class: read_attribute(fs, &entry.path.join(SUB_CLASS_ATTR)),
            interface_protocol: read_attribute(fs, &entry.path.join(PROTOCOL_ATTR)),
        }
    }

    /// True when all three attributes were read successfully
    pub fn is_complete(&self) -> bool {
        self.interface_class != UNREADABLE
            && self.interface_sub_class != UNREADABLE
            && self.interface_protocol != UNREADABLE
    }
}

impl fmt::Display for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "class={} sub={} proto={}",
            self.interface_class, self.interface_sub_class, self.interface_protocol
        )
    }
}
