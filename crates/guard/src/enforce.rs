//! Interface de-authorization
//!
//! Writing `0` to an interface's `authorized` attribute makes the kernel
//! unbind its driver and refuse new bindings, while the rest of the device
//! keeps working.

use crate::sysfs::SysFs;
use common::{Error, Result};
use std::path::{Path, PathBuf};

/// Per-interface authorization switch
pub const AUTHORIZED_ATTR: &str = "authorized";

/// Value that de-authorizes an interface
pub const DEAUTHORIZE_VALUE: &[u8] = b"0";

/// Path of the authorization switch for an interface directory
pub fn authorized_path(interface_path: &Path) -> PathBuf {
    interface_path.join(AUTHORIZED_ATTR)
}

/// De-authorize one interface
///
/// The attribute must already exist; nothing is created. There is no
/// read-back and no retry: success means the write returned no error.
pub fn deauthorize(fs: &dyn SysFs, interface_path: &Path) -> Result<()> {
    let path = authorized_path(interface_path);
    fs.write_existing(&path, DEAUTHORIZE_VALUE)
        .map_err(|source| Error::Enforcement { path, source })
}
