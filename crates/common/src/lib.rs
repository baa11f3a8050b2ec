//! Common utilities for usb-iface-guard
//!
//! This crate provides the plumbing shared by the guard daemon and its tests:
//! error handling, logging setup, and the channel bridge that carries hotplug
//! events from the blocking monitor thread into the Tokio runtime.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{EventReceiver, EventSender, Shutdown, create_event_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
