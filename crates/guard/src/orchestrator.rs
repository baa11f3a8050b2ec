//! Enforcement loop
//!
//! Consumes hotplug events one at a time. For every USB `add` event the
//! device's interfaces are enumerated and classified, and each interface that
//! matches the block policy is de-authorized. Per-device and per-interface
//! failures are logged and never stop the loop.

use crate::enforce::{authorized_path, deauthorize};
use crate::monitor::{DeviceEvent, EventSource, EventStream};
use crate::policy::{BlockPolicy, BlockSignature};
use crate::sysfs::interfaces::is_interface_name;
use crate::sysfs::{InterfaceDescriptor, SysFs, list_interfaces};
use common::{Result, Shutdown};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No signature matched
    Allowed,
    /// Matched and de-authorized
    Blocked(BlockSignature),
    /// Matched, but dry-run mode left it alone
    WouldBlock(BlockSignature),
    /// Matched, but the write failed; the interface stays authorized
    BlockFailed(BlockSignature),
}

/// An inspected interface and its verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReport {
    pub descriptor: InterfaceDescriptor,
    pub verdict: Verdict,
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a USB attachment; nothing was read
    Skipped,
    /// Device inspected (the list is empty if it had no readable interfaces)
    Inspected {
        device_path: PathBuf,
        interfaces: Vec<InterfaceReport>,
    },
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub events_received: u64,
    pub events_skipped: u64,
    pub stream_errors: u64,
    pub devices_inspected: u64,
    pub interfaces_inspected: u64,
    pub interfaces_blocked: u64,
    pub block_failures: u64,
}

/// The interface guard
pub struct Guard {
    fs: Arc<dyn SysFs>,
    policy: BlockPolicy,
    devices_dir: PathBuf,
    dry_run: bool,
    stats: GuardStats,
}

impl Guard {
    /// Create a guard over `devices_dir` (normally `/sys/bus/usb/devices`)
    pub fn new(fs: Arc<dyn SysFs>, policy: BlockPolicy, devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            policy,
            devices_dir: devices_dir.into(),
            dry_run: false,
            stats: GuardStats::default(),
        }
    }

    /// Log matches instead of writing to sysfs
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policy(&self) -> &BlockPolicy {
        &self.policy
    }

    pub fn stats(&self) -> GuardStats {
        self.stats
    }

    /// Subscribe to `source` and run until the stream ends or shutdown
    ///
    /// Failing to subscribe is returned to the caller; everything after that
    /// is handled inside the loop.
    pub async fn watch(
        &mut self,
        source: &dyn EventSource,
        shutdown: &Shutdown,
    ) -> Result<GuardStats> {
        let stream = source.subscribe(shutdown.clone())?;
        Ok(self.run(stream, shutdown).await)
    }

    /// Consume `stream` until it closes or `shutdown` is triggered
    pub async fn run(&mut self, mut stream: EventStream, shutdown: &Shutdown) -> GuardStats {
        info!("Monitoring USB add events (blocking: {})", self.policy);

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("Shutdown requested, stopping event loop");
                    break;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    self.handle_event(&event);
                }
                Some(Err(e)) => {
                    self.stats.stream_errors += 1;
                    warn!("Discarding event: {}", e);
                }
                None => {
                    info!("Event stream closed");
                    break;
                }
            }
        }

        drop(stream);
        info!(
            "Event loop stopped: {} events, {} interfaces inspected, {} blocked, {} failed",
            self.stats.events_received,
            self.stats.interfaces_inspected,
            self.stats.interfaces_blocked,
            self.stats.block_failures
        );
        self.stats
    }

    /// Handle one hotplug event
    pub fn handle_event(&mut self, event: &DeviceEvent) -> EventOutcome {
        self.stats.events_received += 1;

        if !event.is_usb_add() {
            self.stats.events_skipped += 1;
            debug!(
                "Skipping {} {} event for {}",
                event.subsystem,
                event.action,
                event.syspath.display()
            );
            return EventOutcome::Skipped;
        }

        let Some(name) = event.device_name() else {
            self.stats.events_skipped += 1;
            warn!("Event without device name: {}", event.syspath.display());
            return EventOutcome::Skipped;
        };

        let device_path = self.devices_dir.join(name);
        debug!(
            "USB device added: {} (seq {:?}, type {:?})",
            device_path.display(),
            event.seqnum,
            event.devtype
        );
        let interfaces = self.inspect_device(&device_path, true);

        EventOutcome::Inspected {
            device_path,
            interfaces,
        }
    }

    /// Classify every interface currently present, without enforcing
    ///
    /// Returns one entry per device directory, sorted by name.
    pub fn scan(&mut self) -> Vec<(String, Vec<InterfaceReport>)> {
        let mut devices = match self.fs.list_dir(&self.devices_dir) {
            Ok(names) => names,
            Err(e) => {
                error!("Cannot read {}: {}", self.devices_dir.display(), e);
                return Vec::new();
            }
        };
        devices.retain(|name| !is_interface_name(name));
        devices.sort();

        devices
            .into_iter()
            .map(|name| {
                let path = self.devices_dir.join(&name);
                let reports = self.inspect_device(&path, false);
                (name, reports)
            })
            .collect()
    }

    fn inspect_device(&mut self, device_path: &Path, enforce: bool) -> Vec<InterfaceReport> {
        self.stats.devices_inspected += 1;
        let entries = list_interfaces(self.fs.as_ref(), device_path);

        let mut reports = Vec::with_capacity(entries.len());
        for entry in &entries {
            let descriptor = InterfaceDescriptor::read(self.fs.as_ref(), entry);
            self.stats.interfaces_inspected += 1;
            info!("Found interface {}: {}", descriptor.name, descriptor);

            let matched = self.policy.matching(&descriptor).copied();
            let verdict = match matched {
                None => Verdict::Allowed,
                Some(sig) if !enforce => Verdict::WouldBlock(sig),
                Some(sig) => self.block(&descriptor, sig),
            };
            reports.push(InterfaceReport {
                descriptor,
                verdict,
            });
        }
        reports
    }

    fn block(&mut self, descriptor: &InterfaceDescriptor, sig: BlockSignature) -> Verdict {
        let target = authorized_path(&descriptor.path);

        if self.dry_run {
            info!(
                "Dry run: would block interface {} ({}) by writing 0 to {}",
                descriptor.name,
                sig,
                target.display()
            );
            return Verdict::WouldBlock(sig);
        }

        info!(
            "Blocking interface {} -> writing 0 to {}",
            descriptor.name,
            target.display()
        );
        match deauthorize(self.fs.as_ref(), &descriptor.path) {
            Ok(()) => {
                self.stats.interfaces_blocked += 1;
                info!("Blocked interface {} (matched {})", descriptor.name, sig);
                Verdict::Blocked(sig)
            }
            Err(e) => {
                self.stats.block_failures += 1;
                error!("Failed to block interface {}: {}", descriptor.name, e);
                Verdict::BlockFailed(sig)
            }
        }
    }
}
