//! Hotplug event monitoring
//!
//! The orchestrator consumes a stream of [`DeviceEvent`]s from an
//! [`EventSource`]. The production source reads kernel uevents from a netlink
//! socket on a dedicated thread; [`ScriptedSource`] replays a fixed list of
//! events for tests.
//!
//! The blocking reader owns the socket and sends into a bounded channel; the
//! async side owns the receiving end. Either side going away ends the other.

pub mod netlink;
mod scripted;
pub mod uevent;

pub use netlink::{EventGroup, NetlinkSource};
pub use scripted::ScriptedSource;

use common::{EventReceiver, Result, Shutdown};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread::JoinHandle;

/// Subsystem name of USB devices and interfaces
pub const SUBSYSTEM_USB: &str = "usb";

/// Kernel hotplug action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
    Change,
    Move,
    Bind,
    Unbind,
    Online,
    Offline,
    Other(String),
}

impl FromStr for DeviceAction {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "add" => Self::Add,
            "remove" => Self::Remove,
            "change" => Self::Change,
            "move" => Self::Move,
            "bind" => Self::Bind,
            "unbind" => Self::Unbind,
            "online" => Self::Online,
            "offline" => Self::Offline,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Change => "change",
            Self::Move => "move",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Other(other) => other,
        };
        f.write_str(s)
    }
}

/// One hotplug notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub subsystem: String,
    pub action: DeviceAction,
    /// Absolute sysfs path of the device, e.g. `/sys/devices/.../2-4.1`
    pub syspath: PathBuf,
    /// `usb_device` or `usb_interface` for USB events
    pub devtype: Option<String>,
    pub seqnum: Option<u64>,
}

impl DeviceEvent {
    pub fn new(subsystem: &str, action: DeviceAction, syspath: impl Into<PathBuf>) -> Self {
        Self {
            subsystem: subsystem.to_string(),
            action,
            syspath: syspath.into(),
            devtype: None,
            seqnum: None,
        }
    }

    /// Whether this is a USB attachment the guard has to inspect
    pub fn is_usb_add(&self) -> bool {
        self.subsystem == SUBSYSTEM_USB && self.action == DeviceAction::Add
    }

    /// Last path segment of the syspath, e.g. `2-4.1`
    pub fn device_name(&self) -> Option<&str> {
        self.syspath.file_name().and_then(|name| name.to_str())
    }
}

/// Something that can deliver hotplug events
pub trait EventSource {
    /// Establish the subscription
    ///
    /// An error here means no enforcement is possible. Triggering `shutdown`
    /// ends the returned stream and releases the subscription.
    fn subscribe(&self, shutdown: Shutdown) -> Result<EventStream>;
}

/// Lazy, cancellable sequence of hotplug events
///
/// Yields `Some(Ok(event))` per notification, `Some(Err(_))` for a
/// mid-stream error and `None` once the source has closed.
#[derive(Debug)]
pub struct EventStream {
    rx: EventReceiver<DeviceEvent>,
    _producer: Option<JoinHandle<()>>,
}

impl EventStream {
    pub fn new(rx: EventReceiver<DeviceEvent>) -> Self {
        Self { rx, _producer: None }
    }

    /// Stream fed by a dedicated producer thread
    pub fn with_producer(rx: EventReceiver<DeviceEvent>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            _producer: Some(producer),
        }
    }

    pub async fn next(&mut self) -> Option<Result<DeviceEvent>> {
        self.rx.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Producer notices on its next send or poll tick and releases the socket
        self.rx.close();
    }
}
