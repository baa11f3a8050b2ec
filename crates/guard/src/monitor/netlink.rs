//! Netlink uevent source
//!
//! Subscribes to `NETLINK_KOBJECT_UEVENT` and reads datagrams on a dedicated
//! thread. The socket has a short receive timeout so the thread can notice
//! shutdown (or a dropped consumer) without being interrupted.
//!
//! Any local process may unicast to our netlink port, so every datagram is
//! checked against the credentials the kernel attaches (`SO_PASSCRED`) and
//! its netlink origin before it is parsed. Only multicast messages from root
//! are accepted; the kernel group must come from the kernel itself, the udev
//! group from a user-space `libudev` sender.

use super::uevent::{is_udev_message, parse_message};
use super::{DeviceEvent, EventSource, EventStream};
use common::{Error, EventSender, Result, Shutdown, create_event_bridge};
use nix::errno::Errno;
use nix::sys::socket::{
    AddressFamily, ControlMessageOwned, MsgFlags, NetlinkAddr, RecvMsg, SockFlag, SockProtocol,
    SockType, UnixCredentials, bind, recvmsg, setsockopt, socket, sockopt,
};
use nix::sys::time::{TimeVal, TimeValLike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// How often the reader wakes up to check for shutdown
const POLL_INTERVAL_MS: i64 = 100;

/// Largest datagram udevd sends; kernel messages are at most 2 KiB
const MAX_MESSAGE_SIZE: usize = 8192;

/// Requested socket receive buffer, to ride out bursts of hotplug events
const RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// Which uevent multicast group to listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EventGroup {
    /// Raw kernel uevents, delivered before udev rules run
    Kernel,
    /// Events re-broadcast by udevd once its rules have run
    #[default]
    Udev,
}

impl EventGroup {
    /// Multicast group bitmask for `bind`
    pub fn mask(self) -> u32 {
        match self {
            Self::Kernel => 1,
            Self::Udev => 2,
        }
    }
}

impl std::fmt::Display for EventGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kernel => write!(f, "kernel"),
            Self::Udev => write!(f, "udev"),
        }
    }
}

/// Production event source backed by a netlink socket
#[derive(Debug, Clone)]
pub struct NetlinkSource {
    group: EventGroup,
    sysfs_root: PathBuf,
}

impl NetlinkSource {
    pub fn new(group: EventGroup, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            group,
            sysfs_root: sysfs_root.into(),
        }
    }

    fn open_socket(&self) -> Result<OwnedFd> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkKObjectUEvent,
        )
        .map_err(|e| Error::Monitor(format!("Failed to create netlink socket: {}", e)))?;

        setsockopt(
            &fd,
            sockopt::ReceiveTimeout,
            &TimeVal::milliseconds(POLL_INTERVAL_MS),
        )
        .map_err(|e| Error::Monitor(format!("Failed to set receive timeout: {}", e)))?;

        setsockopt(&fd, sockopt::PassCred, &true)
            .map_err(|e| Error::Monitor(format!("Failed to enable sender credentials: {}", e)))?;

        if let Err(e) = setsockopt(&fd, sockopt::RcvBuf, &RECV_BUFFER_SIZE) {
            warn!("Failed to enlarge netlink receive buffer: {}", e);
        }

        let addr = NetlinkAddr::new(0, self.group.mask());
        bind(fd.as_raw_fd(), &addr).map_err(|e| {
            Error::Monitor(format!(
                "Failed to bind netlink socket to {} group: {}",
                self.group, e
            ))
        })?;

        Ok(fd)
    }
}

impl EventSource for NetlinkSource {
    fn subscribe(&self, shutdown: Shutdown) -> Result<EventStream> {
        let socket = self.open_socket()?;
        let (tx, rx) = create_event_bridge();

        let reader = UeventReader {
            socket,
            group: self.group,
            sysfs_root: self.sysfs_root.clone(),
            tx,
            shutdown,
        };

        let producer = thread::Builder::new()
            .name("uevent-monitor".to_string())
            .spawn(move || reader.run())
            .map_err(|e| Error::Monitor(format!("Failed to spawn monitor thread: {}", e)))?;

        info!("Subscribed to {} uevents", self.group);
        Ok(EventStream::with_producer(rx, producer))
    }
}

/// Blocking reader that owns the socket for the lifetime of the subscription
struct UeventReader {
    socket: OwnedFd,
    group: EventGroup,
    sysfs_root: PathBuf,
    tx: EventSender<DeviceEvent>,
    shutdown: Shutdown,
}

impl UeventReader {
    fn run(self) {
        debug!("uevent reader started");
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let mut cmsg = nix::cmsg_space!(UnixCredentials);

        loop {
            if self.shutdown.is_triggered() || self.tx.is_closed() {
                break;
            }

            let received = {
                let mut iov = [IoSliceMut::new(&mut buf)];
                recvmsg::<NetlinkAddr>(
                    self.socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsg),
                    MsgFlags::empty(),
                )
                .map(|msg| (msg.bytes, Sender::from_msg(&msg)))
            };

            let (len, sender) = match received {
                Ok(received) => received,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(Errno::ENOBUFS) => {
                    warn!("uevent receive queue overflowed, some events were lost");
                    continue;
                }
                Err(e) => {
                    error!("uevent receive failed: {}", e);
                    let _ = self
                        .tx
                        .send_blocking(Err(Error::Monitor(format!("receive failed: {}", e))));
                    break;
                }
            };

            let message = &buf[..len];
            if let Err(rejection) = check_sender(self.group, message, &sender) {
                debug!("Ignoring uevent ({}): {:?}", rejection, sender);
                continue;
            }

            let item = parse_message(message, &self.sysfs_root);
            if let Ok(event) = &item {
                trace!(
                    "uevent {} {} {}",
                    event.action,
                    event.subsystem,
                    event.syspath.display()
                );
            }
            if self.tx.send_blocking(item).is_err() {
                break;
            }
        }

        // Socket is closed when `self` drops here
        debug!("uevent reader stopped");
    }
}

/// Origin of one datagram as reported by the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sender {
    /// Netlink port id; 0 is the kernel
    pub port: u32,
    /// Multicast groups the message was sent to; 0 for unicast
    pub groups: u32,
    /// uid from `SCM_CREDENTIALS`, if the kernel attached them
    pub uid: Option<u32>,
}

impl Sender {
    fn from_msg(msg: &RecvMsg<'_, '_, NetlinkAddr>) -> Self {
        let (port, groups) = msg
            .address
            .map(|addr| (addr.pid(), addr.groups()))
            .unwrap_or((0, 0));
        let uid = msg
            .cmsgs()
            .ok()
            .into_iter()
            .flatten()
            .find_map(|cmsg| match cmsg {
                ControlMessageOwned::ScmCredentials(cred) => Some(cred.uid()),
                _ => None,
            });
        Self { port, groups, uid }
    }
}

/// Why a datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unicast,
    NoCredentials,
    NotRoot(u32),
    UserSpaceOnKernelGroup,
    UdevFormatOnKernelGroup,
    KernelOnUdevGroup,
    NotUdevFormat,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unicast => write!(f, "unicast message"),
            Self::NoCredentials => write!(f, "no sender credentials"),
            Self::NotRoot(uid) => write!(f, "sender uid {}", uid),
            Self::UserSpaceOnKernelGroup => write!(f, "user-space sender on kernel group"),
            Self::UdevFormatOnKernelGroup => write!(f, "udev message on kernel group"),
            Self::KernelOnUdevGroup => write!(f, "kernel sender on udev group"),
            Self::NotUdevFormat => write!(f, "not a udev message"),
        }
    }
}

/// Accept only datagrams from the producer expected on `group`
pub fn check_sender(
    group: EventGroup,
    message: &[u8],
    sender: &Sender,
) -> std::result::Result<(), Rejection> {
    if sender.groups == 0 {
        return Err(Rejection::Unicast);
    }
    match sender.uid {
        None => return Err(Rejection::NoCredentials),
        Some(0) => {}
        Some(uid) => return Err(Rejection::NotRoot(uid)),
    }

    match group {
        EventGroup::Kernel if sender.port != 0 => Err(Rejection::UserSpaceOnKernelGroup),
        EventGroup::Kernel if is_udev_message(message) => Err(Rejection::UdevFormatOnKernelGroup),
        EventGroup::Udev if sender.port == 0 => Err(Rejection::KernelOnUdevGroup),
        EventGroup::Udev if !is_udev_message(message) => Err(Rejection::NotUdevFormat),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_masks() {
        assert_eq!(EventGroup::Kernel.mask(), 1);
        assert_eq!(EventGroup::Udev.mask(), 2);
        assert_eq!(EventGroup::default(), EventGroup::Udev);
    }

    #[test]
    fn test_group_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            group: EventGroup,
        }
        let parsed: Wrapper = toml::from_str("group = \"kernel\"").unwrap();
        assert_eq!(parsed.group, EventGroup::Kernel);
        assert_eq!(EventGroup::Udev.to_string(), "udev");
    }

    const KERNEL_MSG: &[u8] = b"add@/devices/x/1-1\0ACTION=add\0";
    const UDEV_MSG: &[u8] = b"libudev\0\xfe\xed\xca\xfe";

    fn udevd() -> Sender {
        Sender {
            port: 812,
            groups: EventGroup::Udev.mask(),
            uid: Some(0),
        }
    }

    fn kernel() -> Sender {
        Sender {
            port: 0,
            groups: EventGroup::Kernel.mask(),
            uid: Some(0),
        }
    }

    #[test]
    fn test_accepts_expected_producers() {
        assert_eq!(check_sender(EventGroup::Udev, UDEV_MSG, &udevd()), Ok(()));
        assert_eq!(check_sender(EventGroup::Kernel, KERNEL_MSG, &kernel()), Ok(()));
    }

    #[test]
    fn test_rejects_unprivileged_udev_sender() {
        let forged = Sender {
            uid: Some(1000),
            ..udevd()
        };
        assert_eq!(
            check_sender(EventGroup::Udev, UDEV_MSG, &forged),
            Err(Rejection::NotRoot(1000))
        );
    }

    #[test]
    fn test_rejects_unicast_even_from_root() {
        let unicast = Sender {
            groups: 0,
            ..udevd()
        };
        assert_eq!(
            check_sender(EventGroup::Udev, UDEV_MSG, &unicast),
            Err(Rejection::Unicast)
        );
        let unicast = Sender {
            groups: 0,
            ..kernel()
        };
        assert_eq!(
            check_sender(EventGroup::Kernel, KERNEL_MSG, &unicast),
            Err(Rejection::Unicast)
        );
    }

    #[test]
    fn test_rejects_missing_credentials() {
        let anonymous = Sender {
            uid: None,
            ..udevd()
        };
        assert_eq!(
            check_sender(EventGroup::Udev, UDEV_MSG, &anonymous),
            Err(Rejection::NoCredentials)
        );
    }

    #[test]
    fn test_udev_group_requires_udev_sender_and_format() {
        assert_eq!(
            check_sender(EventGroup::Udev, UDEV_MSG, &kernel()),
            Err(Rejection::KernelOnUdevGroup)
        );
        assert_eq!(
            check_sender(EventGroup::Udev, KERNEL_MSG, &udevd()),
            Err(Rejection::NotUdevFormat)
        );
    }

    #[test]
    fn test_kernel_group_requires_kernel_sender_and_format() {
        assert_eq!(
            check_sender(EventGroup::Kernel, KERNEL_MSG, &udevd()),
            Err(Rejection::UserSpaceOnKernelGroup)
        );
        assert_eq!(
            check_sender(EventGroup::Kernel, UDEV_MSG, &kernel()),
            Err(Rejection::UdevFormatOnKernelGroup)
        );
    }
}
