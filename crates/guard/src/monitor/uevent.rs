//! uevent wire formats
//!
//! Two producers multicast on `NETLINK_KOBJECT_UEVENT`:
//!
//! - the kernel (group 1): `ACTION@DEVPATH\0KEY=VALUE\0KEY=VALUE\0...`
//! - udevd (group 2), after rule processing: a fixed binary header followed
//!   by `KEY=VALUE\0` properties
//!
//! ```text
//! udev header (all u32 in host order, except magic which is big-endian)
//! 0   "libudev\0"
//! 8   magic 0xfeedcafe
//! 12  header_size
//! 16  properties_off
//! 20  properties_len
//! 24  filter_subsystem_hash, filter_devtype_hash, tag bloom hi/lo
//! ```

use super::{DeviceAction, DeviceEvent};
use common::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Prefix of messages re-broadcast by udevd
pub const UDEV_PREFIX: &[u8; 8] = b"libudev\0";
/// Magic following the prefix, big-endian on the wire
pub const UDEV_MAGIC: u32 = 0xfeed_cafe;
/// Size of the udev monitor header
pub const UDEV_HEADER_LEN: usize = 40;

fn read_u32_ne(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Split a `KEY=VALUE\0` block into a map; entries without `=` are ignored
pub fn parse_properties(block: &[u8]) -> HashMap<String, String> {
    block
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Property block of a udev monitor message
fn udev_properties(buf: &[u8]) -> Result<&[u8]> {
    if buf.len() < UDEV_HEADER_LEN {
        return Err(Error::MalformedEvent(format!(
            "udev message too short ({} bytes)",
            buf.len()
        )));
    }

    let magic = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if magic != UDEV_MAGIC {
        return Err(Error::MalformedEvent(format!(
            "bad udev magic {:#010x}",
            magic
        )));
    }

    let offset = read_u32_ne(buf, 16).unwrap_or(0) as usize;
    let len = read_u32_ne(buf, 20).unwrap_or(0) as usize;
    match offset.checked_add(len) {
        Some(end) if offset >= UDEV_HEADER_LEN && end <= buf.len() => Ok(&buf[offset..end]),
        _ => Err(Error::MalformedEvent(format!(
            "udev properties out of range (offset {}, len {}, message {})",
            offset,
            len,
            buf.len()
        ))),
    }
}

/// Property block of a kernel message, after the `ACTION@DEVPATH` summary
fn kernel_properties(buf: &[u8]) -> Result<&[u8]> {
    let summary_end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    if !buf[..summary_end].contains(&b'@') {
        return Err(Error::MalformedEvent(
            "kernel message without ACTION@DEVPATH header".to_string(),
        ));
    }
    Ok(buf.get(summary_end + 1..).unwrap_or(&[]))
}

/// Whether a datagram comes from udevd rather than the kernel
pub fn is_udev_message(buf: &[u8]) -> bool {
    buf.starts_with(UDEV_PREFIX)
}

/// Decode one netlink datagram into a [`DeviceEvent`]
///
/// `sysfs_root` is prepended to `DEVPATH` to form the syspath.
pub fn parse_message(buf: &[u8], sysfs_root: &Path) -> Result<DeviceEvent> {
    let block = if is_udev_message(buf) {
        udev_properties(buf)?
    } else {
        kernel_properties(buf)?
    };
    let mut props = parse_properties(block);

    let mut require = |key: &str| {
        props
            .remove(key)
            .ok_or_else(|| Error::MalformedEvent(format!("missing {}", key)))
    };
    let action = require("ACTION")?;
    let devpath = require("DEVPATH")?;
    let subsystem = require("SUBSYSTEM")?;

    Ok(DeviceEvent {
        subsystem,
        action: action
            .parse::<DeviceAction>()
            .unwrap_or_else(|never| match never {}),
        syspath: sysfs_root.join(devpath.trim_start_matches('/')),
        devtype: props.remove("DEVTYPE"),
        seqnum: props.get("SEQNUM").and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn kernel_message(action: &str, devpath: &str, extra: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = format!("{}@{}\0ACTION={}\0DEVPATH={}\0", action, devpath, action, devpath)
            .into_bytes();
        for (k, v) in extra {
            buf.extend_from_slice(format!("{}={}\0", k, v).as_bytes());
        }
        buf
    }

    fn udev_message(props: &[(&str, &str)]) -> Vec<u8> {
        let mut block = Vec::new();
        for (k, v) in props {
            block.extend_from_slice(format!("{}={}\0", k, v).as_bytes());
        }
        let mut buf = Vec::with_capacity(UDEV_HEADER_LEN + block.len());
        buf.extend_from_slice(UDEV_PREFIX);
        buf.extend_from_slice(&UDEV_MAGIC.to_be_bytes());
        buf.extend_from_slice(&(UDEV_HEADER_LEN as u32).to_ne_bytes());
        buf.extend_from_slice(&(UDEV_HEADER_LEN as u32).to_ne_bytes());
        buf.extend_from_slice(&(block.len() as u32).to_ne_bytes());
        buf.resize(UDEV_HEADER_LEN, 0);
        buf.extend_from_slice(&block);
        buf
    }

    #[test]
    fn test_parse_kernel_add() {
        let msg = kernel_message(
            "add",
            "/devices/pci0000:00/0000:00:14.0/usb2/2-4/2-4.1",
            &[
                ("SUBSYSTEM", "usb"),
                ("DEVTYPE", "usb_device"),
                ("SEQNUM", "4242"),
            ],
        );

        let event = parse_message(&msg, Path::new("/sys")).unwrap();
        assert_eq!(event.subsystem, "usb");
        assert_eq!(event.action, DeviceAction::Add);
        assert_eq!(
            event.syspath,
            PathBuf::from("/sys/devices/pci0000:00/0000:00:14.0/usb2/2-4/2-4.1")
        );
        assert_eq!(event.devtype.as_deref(), Some("usb_device"));
        assert_eq!(event.seqnum, Some(4242));
        assert_eq!(event.device_name(), Some("2-4.1"));
    }

    #[test]
    fn test_parse_udev_message() {
        let msg = udev_message(&[
            ("ACTION", "remove"),
            ("DEVPATH", "/devices/virtual/block/loop0"),
            ("SUBSYSTEM", "block"),
        ]);

        let event = parse_message(&msg, Path::new("/sys")).unwrap();
        assert_eq!(event.subsystem, "block");
        assert_eq!(event.action, DeviceAction::Remove);
        assert_eq!(event.syspath, PathBuf::from("/sys/devices/virtual/block/loop0"));
        assert_eq!(event.devtype, None);
        assert_eq!(event.seqnum, None);
    }

    #[test]
    fn test_custom_sysfs_root() {
        let msg = kernel_message("add", "/devices/x/1-1", &[("SUBSYSTEM", "usb")]);
        let event = parse_message(&msg, Path::new("/tmp/fake-sys")).unwrap();
        assert_eq!(event.syspath, PathBuf::from("/tmp/fake-sys/devices/x/1-1"));
    }

    #[test]
    fn test_missing_subsystem_is_malformed() {
        let msg = kernel_message("add", "/devices/x/1-1", &[]);
        let err = parse_message(&msg, Path::new("/sys")).unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)));
        assert!(err.to_string().contains("SUBSYSTEM"));
    }

    #[test]
    fn test_kernel_message_without_header() {
        let err = parse_message(b"ACTION=add\0DEVPATH=/x\0SUBSYSTEM=usb\0", Path::new("/sys"))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedEvent(_)));
    }

    #[test]
    fn test_udev_bad_magic() {
        let mut msg = udev_message(&[("ACTION", "add")]);
        msg[8] = 0;
        let err = parse_message(&msg, Path::new("/sys")).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_udev_truncated() {
        let msg = udev_message(&[
            ("ACTION", "add"),
            ("DEVPATH", "/devices/x/1-1"),
            ("SUBSYSTEM", "usb"),
        ]);
        assert!(parse_message(&msg[..msg.len() - 5], Path::new("/sys")).is_err());
        assert!(parse_message(&msg[..20], Path::new("/sys")).is_err());
    }

    #[test]
    fn test_parse_properties_skips_junk() {
        let props = parse_properties(b"A=1\0\0junk\0B=x=y\0");
        assert_eq!(props.len(), 2);
        assert_eq!(props["A"], "1");
        assert_eq!(props["B"], "x=y");
    }
}
