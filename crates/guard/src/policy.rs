//! Interface block policy
//!
//! A policy is a list of class/subclass/protocol signatures. An interface is
//! blocked when its triple equals any one of them. Interfaces with an
//! unreadable attribute are never blocked: missing data fails open.

use crate::sysfs::InterfaceDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// USB interface class: Mass Storage
pub const CLASS_MASS_STORAGE: i32 = 8;
/// Mass Storage subclass: SCSI transparent command set
pub const SUBCLASS_SCSI: i32 = 6;

/// One class/subclass/protocol triple to block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSignature {
    pub class: i32,
    pub sub_class: i32,
    pub protocol: i32,
}

impl BlockSignature {
    pub const fn new(class: i32, sub_class: i32, protocol: i32) -> Self {
        Self {
            class,
            sub_class,
            protocol,
        }
    }

    /// The signature shipped in the default configuration
    ///
    /// sysfs prints `bInterfaceProtocol` as two-digit hex, so a bulk-only
    /// transport interface (0x50) shows up as `50` and reads back as decimal
    /// 50.
    pub const fn reference() -> Self {
        Self::new(CLASS_MASS_STORAGE, SUBCLASS_SCSI, 50)
    }
}

impl fmt::Display for BlockSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class, self.sub_class, self.protocol)
    }
}

/// Exact match of all three fields
///
/// An [`UNREADABLE`](crate::sysfs::UNREADABLE) field never matches, whatever the signature says.
pub fn matches(desc: &InterfaceDescriptor, sig: &BlockSignature) -> bool {
    if !desc.is_complete() {
        return false;
    }
    desc.interface_class == sig.class
        && desc.interface_sub_class == sig.sub_class
        && desc.interface_protocol == sig.protocol
}

/// The set of signatures to block, fixed for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockPolicy {
    signatures: Vec<BlockSignature>,
}

impl BlockPolicy {
    pub fn new(signatures: Vec<BlockSignature>) -> Self {
        let mut unique = Vec::with_capacity(signatures.len());
        for sig in signatures {
            if !unique.contains(&sig) {
                unique.push(sig);
            }
        }
        Self { signatures: unique }
    }

    pub fn signatures(&self) -> &[BlockSignature] {
        &self.signatures
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// First signature matching the interface, if any
    pub fn matching(&self, desc: &InterfaceDescriptor) -> Option<&BlockSignature> {
        self.signatures.iter().find(|sig| matches(desc, sig))
    }
}

impl fmt::Display for BlockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signatures.is_empty() {
            return write!(f, "(none)");
        }
        let list: Vec<String> = self.signatures.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", list.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn desc(class: i32, sub_class: i32, protocol: i32) -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: "2-4.1:1.0".to_string(),
            path: PathBuf::from("/sys/bus/usb/devices/2-4.1/2-4.1:1.0"),
            interface_class: class,
            interface_sub_class: sub_class,
            interface_protocol: protocol,
        }
    }

    #[test]
    fn test_exact_match() {
        let sig = BlockSignature::reference();
        assert!(matches(&desc(8, 6, 50), &sig));
        assert!(!matches(&desc(8, 6, 80), &sig));
        assert!(!matches(&desc(8, 5, 50), &sig));
        assert!(!matches(&desc(3, 6, 50), &sig));
    }

    #[test]
    fn test_match_is_repeatable() {
        let sig = BlockSignature::reference();
        let d = desc(8, 6, 50);
        let first = matches(&d, &sig);
        for _ in 0..10 {
            assert_eq!(matches(&d, &sig), first);
        }
    }

    #[test]
    fn test_unreadable_fails_open() {
        let signatures = [
            BlockSignature::reference(),
            BlockSignature::new(-1, 6, 50),
            BlockSignature::new(8, -1, 50),
            BlockSignature::new(8, 6, -1),
            BlockSignature::new(-1, -1, -1),
        ];
        let descriptors = [
            desc(-1, 6, 50),
            desc(8, -1, 50),
            desc(8, 6, -1),
            desc(-1, -1, -1),
        ];
        for d in &descriptors {
            for sig in &signatures {
                assert!(!matches(d, sig), "{} matched {}", d, sig);
            }
        }
    }

    #[test]
    fn test_policy_any_signature() {
        let policy = BlockPolicy::new(vec![
            BlockSignature::reference(),
            BlockSignature::new(8, 6, 80),
        ]);
        assert_eq!(
            policy.matching(&desc(8, 6, 80)),
            Some(&BlockSignature::new(8, 6, 80))
        );
        assert_eq!(
            policy.matching(&desc(8, 6, 50)),
            Some(&BlockSignature::reference())
        );
        assert!(policy.matching(&desc(3, 1, 1)).is_none());
    }

    #[test]
    fn test_empty_policy_blocks_nothing() {
        let policy = BlockPolicy::default();
        assert!(policy.is_empty());
        assert!(policy.matching(&desc(8, 6, 50)).is_none());
        assert_eq!(policy.to_string(), "(none)");
    }

    #[test]
    fn test_duplicates_collapsed() {
        let policy = BlockPolicy::new(vec![
            BlockSignature::reference(),
            BlockSignature::reference(),
        ]);
        assert_eq!(policy.signatures().len(), 1);
        assert_eq!(policy.to_string(), "8/6/50");
    }
}
