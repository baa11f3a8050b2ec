//! In-memory sysfs for tests

use super::SysFs;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(String),
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    denied: HashSet<PathBuf>,
    writes: Vec<(PathBuf, String)>,
    accesses: usize,
}

/// A fake sysfs tree with failure injection
///
/// Paths are stored exactly as given; parent directories are created on
/// demand. Every trait call counts as one access, including failed ones.
#[derive(Debug, Default)]
pub struct MemorySysFs {
    state: Mutex<State>,
}

impl MemorySysFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a directory (and its parents)
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state();
        for ancestor in path.as_ref().ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            state.nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
    }

    /// Create or replace a file
    pub fn add_file(&self, path: impl AsRef<Path>, contents: &str) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.state()
            .nodes
            .insert(path.to_path_buf(), Node::File(contents.to_string()));
    }

    /// Lay out one USB interface the way the kernel does
    ///
    /// The three attribute values are written verbatim with a trailing
    /// newline (the kernel prints them as two-digit hex, e.g. `"08"`), and
    /// `authorized` starts out as `1`.
    pub fn add_usb_interface(
        &self,
        device_path: impl AsRef<Path>,
        name: &str,
        class: &str,
        sub_class: &str,
        protocol: &str,
    ) -> PathBuf {
        let path = device_path.as_ref().join(name);
        self.add_file(path.join("bInterfaceClass"), &format!("{}\n", class));
        self.add_file(path.join("bInterfaceSubClass"), &format!("{}\n", sub_class));
        self.add_file(path.join("bInterfaceProtocol"), &format!("{}\n", protocol));
        self.add_file(path.join("authorized"), "1\n");
        path
    }

    /// Make every operation on `path` fail with `PermissionDenied`
    pub fn deny(&self, path: impl AsRef<Path>) {
        self.state().denied.insert(path.as_ref().to_path_buf());
    }

    /// Current content of a file
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.state().nodes.get(path.as_ref()) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Successful writes, in order
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.state().writes.clone()
    }

    /// Number of trait calls made so far
    pub fn access_count(&self) -> usize {
        self.state().accesses
    }

    fn enter(&self, path: &Path) -> io::Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.accesses += 1;
        if state.denied.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {}", path.display()),
            ));
        }
        Ok(state)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no such file or directory: {}", path.display()),
    )
}

impl SysFs for MemorySysFs {
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let state = self.enter(path)?;
        match state.nodes.get(path) {
            Some(Node::Dir) => Ok(state
                .nodes
                .keys()
                .filter(|p| p.parent() == Some(path))
                .filter_map(|p| p.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect()),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {}", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let state = self.enter(path)?;
        match state.nodes.get(path) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn write_existing(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut guard = self.enter(path)?;
        let state = &mut *guard;
        let text = String::from_utf8_lossy(contents).into_owned();
        match state.nodes.get_mut(path) {
            Some(Node::File(current)) => {
                *current = text.clone();
                state.writes.push((path.to_path_buf(), text));
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_direct_children_only() {
        let fs = MemorySysFs::new();
        fs.add_file("/sys/dev/a/attr", "1");
        fs.add_dir("/sys/dev/b");

        let mut names = fs.list_dir(Path::new("/sys/dev")).unwrap();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_denied_path_fails_and_counts() {
        let fs = MemorySysFs::new();
        fs.add_file("/sys/x", "1");
        fs.deny("/sys/x");

        let err = fs.read_to_string(Path::new("/sys/x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(fs.access_count(), 1);
    }

    #[test]
    fn test_write_requires_existing_file() {
        let fs = MemorySysFs::new();
        let err = fs
            .write_existing(Path::new("/sys/missing"), b"0")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(fs.writes().is_empty());

        fs.add_file("/sys/authorized", "1\n");
        fs.write_existing(Path::new("/sys/authorized"), b"0").unwrap();
        assert_eq!(fs.contents("/sys/authorized").as_deref(), Some("0"));
        assert_eq!(
            fs.writes(),
            vec![(PathBuf::from("/sys/authorized"), "0".to_string())]
        );
    }
}
