//! usb-iface-guard
//!
//! Watches USB hotplug events and de-authorizes individual interfaces whose
//! class/subclass/protocol triple is on the block list, so a composite device
//! can keep its keyboard or hub function while its mass-storage function is
//! refused.
//!
//! Data flow for one attachment:
//!
//! ```text
//! netlink uevent ─► monitor ─► orchestrator ─► sysfs::list_interfaces
//!                                    │         └► sysfs::InterfaceDescriptor::read
//!                                    ├──────────► policy::BlockPolicy::matching
//!                                    └──────────► enforce::deauthorize
//! ```

pub mod config;
pub mod enforce;
pub mod monitor;
pub mod orchestrator;
pub mod policy;
pub mod service;
pub mod sysfs;

pub use config::GuardConfig;
pub use monitor::{DeviceAction, DeviceEvent, EventSource, EventStream};
pub use orchestrator::{EventOutcome, Guard, GuardStats, InterfaceReport, Verdict};
pub use policy::{BlockPolicy, BlockSignature};
