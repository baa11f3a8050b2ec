//! usb-iface-guard
//!
//! Interface-level USB access control daemon. Runs as root on a Linux host,
//! listens for USB attachments and de-authorizes blocked interfaces.

use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{Shutdown, setup_logging};
use guard::config::GuardConfig;
use guard::monitor::{EventGroup, EventSource, NetlinkSource};
use guard::service;
use guard::sysfs::HostSysFs;
use guard::{Guard, Verdict};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-iface-guard")]
#[command(
    author,
    version,
    about = "De-authorize blocked USB interfaces as devices are attached"
)]
#[command(long_about = "
Monitors USB hotplug events and writes 0 to the `authorized` attribute of
every interface whose class/subclass/protocol matches a configured block
signature. Other interfaces of the same device stay usable.

EXAMPLES:
    # Run with default config (blocks 8/6/50)
    usb-iface-guard

    # Run with custom config
    usb-iface-guard --config /path/to/guard.toml

    # Show what would be blocked on the current device tree
    usb-iface-guard --list-interfaces

    # Log matches without writing anything
    usb-iface-guard --dry-run --log-level debug

CONFIGURATION:
    The guard looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-iface-guard/guard.toml
    3. /etc/usb-iface-guard/guard.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log matching interfaces without de-authorizing them
    #[arg(long)]
    dry_run: bool,

    /// Netlink group to listen on
    #[arg(long, value_enum, value_name = "GROUP")]
    event_group: Option<EventGroup>,

    /// Classify the interfaces currently attached and exit
    #[arg(long)]
    list_interfaces: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = GuardConfig::default();
        let path = GuardConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // A file that exists but does not load is fatal; only a missing one
    // falls back to the built-in block list.
    let (mut config, source) =
        GuardConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_overrides(args.log_level, args.dry_run, args.event_group)
        .context("Invalid command-line option")?;

    setup_logging(&config.guard.log_level).context("Failed to setup logging")?;

    info!("usb-iface-guard v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using built-in defaults"),
    }
    info!("Log level: {}", config.guard.log_level);

    let policy = config.policy();
    if policy.is_empty() {
        warn!("No [[block]] signatures configured, interfaces will only be logged");
    }

    let mut guard = Guard::new(Arc::new(HostSysFs), policy, config.devices_dir())
        .with_dry_run(config.guard.dry_run);

    if args.list_interfaces {
        list_interfaces_mode(&mut guard);
        return Ok(());
    }

    run_monitor(&config, guard).await
}

/// Print the classification of every attached interface and exit
fn list_interfaces_mode(guard: &mut Guard) {
    let devices = guard.scan();
    if devices.is_empty() {
        println!("No USB devices found.");
        return;
    }

    for (device, interfaces) in devices {
        if interfaces.is_empty() {
            continue;
        }
        println!("{}", device);
        for report in interfaces {
            let verdict = match report.verdict {
                Verdict::Allowed => "allowed".to_string(),
                Verdict::WouldBlock(sig)
                | Verdict::Blocked(sig)
                | Verdict::BlockFailed(sig) => format!("BLOCK ({})", sig),
            };
            println!(
                "  {:<16} {:<28} {}",
                report.descriptor.name,
                report.descriptor.to_string(),
                verdict
            );
        }
    }
}

/// Subscribe to hotplug events and enforce until a signal arrives
async fn run_monitor(config: &GuardConfig, mut guard: Guard) -> Result<()> {
    let shutdown = Shutdown::new();
    let signal_handle = tokio::spawn(wait_for_signal(shutdown.clone()));

    let source = NetlinkSource::new(config.guard.event_group, config.sysfs_root());
    let stream = match source.subscribe(shutdown.clone()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to create monitor: {}", e);
            return Err(e).context("Failed to subscribe to hotplug events");
        }
    };

    if service::is_systemd() {
        info!("Running under systemd");
    }
    service::notify_ready().context("Failed to notify systemd ready")?;
    if let Err(e) = service::notify_status(&format!("Blocking {}", guard.policy())) {
        warn!("Failed to send status to systemd: {:#}", e);
    }
    let watchdog_handle = service::spawn_watchdog_task();

    if config.guard.dry_run {
        info!("Dry run: matching interfaces will be logged, not blocked");
    }
    info!("Press Ctrl+C to shutdown");

    guard.run(stream, &shutdown).await;

    if let Err(e) = service::notify_stopping() {
        warn!("Failed to notify systemd stopping: {:#}", e);
    }
    if let Some(handle) = watchdog_handle {
        handle.abort();
    }
    signal_handle.abort();

    if !shutdown.is_triggered() {
        // Bus failure; let the service manager restart us
        bail!("Hotplug event stream closed unexpectedly");
    }

    info!("Guard shutdown complete");
    Ok(())
}

/// Trigger `shutdown` on Ctrl+C or SIGTERM
async fn wait_for_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Error waiting for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down gracefully..."),
                _ = terminate.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            ctrl_c.await;
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    shutdown.trigger();
}
