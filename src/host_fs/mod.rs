//! Host filesystem backend.
//!
//! Nodes live below a real directory that is canonicalized once, at
//! construction time. Every operation issues OS calls directly and serially;
//! nothing is cached and nothing is retried.

mod node;

pub use node::{Directory, File, Files, Link, NodeHandle};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::{NodeKind, Pathname, ProbeData, Reachability};

/// The host filesystem, rooted at an existing directory.
///
/// The root is resolved through `dunce::canonicalize` when the value is
/// constructed, so symlinked roots (macOS `/tmp`) behave predictably. Paths
/// use the native separator.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root_path: Pathname,
}

impl FileSystem {
    /// Open a filesystem rooted at `root`, which must be a real, existing
    /// directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = dunce::canonicalize(root)
            .map_err(|_| FsError::root_not_found(root.display().to_string()))?;
        if !canonical.is_dir() {
            return Err(FsError::root_not_found(canonical.display().to_string()));
        }
        Ok(Self {
            root_path: Pathname::root(
                canonical.to_string_lossy().into_owned(),
                std::path::MAIN_SEPARATOR,
            ),
        })
    }

    /// Handle on the root directory.
    pub fn root(&self) -> Directory {
        Directory::new(self.clone(), self.root_path.clone())
    }

    pub(crate) fn root_path(&self) -> &Pathname {
        &self.root_path
    }

    /// Accept `absolute` only when it lies below this filesystem's root.
    pub(crate) fn ensure_under_root(&self, absolute: &str) -> Result<()> {
        self.root_path.as_root_for(absolute).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// OS probes.

fn meta_kind(meta: &fs::Metadata) -> NodeKind {
    if meta.is_dir() {
        NodeKind::Directory
    } else if meta.file_type().is_symlink() {
        NodeKind::Link
    } else {
        NodeKind::File
    }
}

/// Kind of the entry itself, final links not followed.
pub(crate) fn entry_kind(path: &Path) -> Option<NodeKind> {
    fs::symlink_metadata(path).ok().map(|m| meta_kind(&m))
}

/// Kind of the node the path resolves to, links followed. `None` when the
/// path is missing, dangling or cyclic.
pub(crate) fn resolved_kind(path: &Path) -> Option<NodeKind> {
    fs::metadata(path).ok().map(|m| meta_kind(&m))
}

#[cfg(unix)]
fn is_symlink_loop(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ELOOP)
}

#[cfg(not(unix))]
fn is_symlink_loop(_err: &io::Error) -> bool {
    false
}

/// `access(2)`-style probe of the effective node, following links.
#[cfg(unix)]
pub(crate) fn access_ok(path: &Path, write: bool) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    let mode = if write { libc::W_OK } else { libc::R_OK };
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of
    // the call.
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn access_ok(path: &Path, write: bool) -> bool {
    match fs::metadata(path) {
        Ok(meta) => !write || !meta.permissions().readonly(),
        Err(_) => false,
    }
}

/// Derive read/write capability for a path that does not exist: walk upward
/// to the closest existing ancestor; the missing node inherits the
/// ancestor's permission iff that ancestor is a directory.
pub(crate) fn derived_perm(path: &Path, write: bool) -> bool {
    for ancestor in path.ancestors().skip(1) {
        if fs::symlink_metadata(ancestor).is_ok() {
            return resolved_kind(ancestor) == Some(NodeKind::Directory)
                && access_ok(ancestor, write);
        }
    }
    false
}

/// Classification of an absent entry's ancestor chain.
enum AncestorState {
    /// The closest existing ancestor is a directory; the path is merely
    /// missing.
    Missing,
    /// A non-directory node blocks descent.
    Blocked,
    /// A link in the chain dangles or cycles.
    BrokenLink,
}

fn classify_ancestors(path: &Path) -> AncestorState {
    for ancestor in path.ancestors().skip(1) {
        if fs::symlink_metadata(ancestor).is_ok() {
            return match resolved_kind(ancestor) {
                Some(NodeKind::Directory) => AncestorState::Missing,
                Some(_) => AncestorState::Blocked,
                // The ancestor exists as an entry but resolves nowhere.
                None => AncestorState::BrokenLink,
            };
        }
    }
    AncestorState::Missing
}

/// Probe a path for validation, from a single pass over the OS state.
pub(crate) fn build_probe(fs: &FileSystem, path: &Pathname, expected: NodeKind) -> ProbeData {
    let full = PathBuf::from(path.absolute());

    let entry = entry_kind(&full);
    let mut reach = Reachability::Reachable;

    let resolved = match fs::metadata(&full) {
        Ok(meta) => Some(meta_kind(&meta)),
        Err(err) => {
            if is_symlink_loop(&err) {
                reach = Reachability::BadLink;
            }
            None
        }
    };

    if entry.is_none() && reach == Reachability::Reachable {
        match classify_ancestors(&full) {
            AncestorState::Missing => {}
            AncestorState::Blocked => reach = Reachability::LeafCollision,
            AncestorState::BrokenLink => reach = Reachability::BadLink,
        }
    }

    let exists = match expected {
        NodeKind::File => resolved == Some(NodeKind::File),
        NodeKind::Directory => resolved == Some(NodeKind::Directory),
        NodeKind::Link => entry == Some(NodeKind::Link),
    };

    let present = if expected.is_link() {
        entry
    } else {
        match (entry, resolved) {
            // A dangling link is writable through: no node is "present".
            (Some(NodeKind::Link), None) => None,
            (None, _) => None,
            (Some(_), kind) => kind,
        }
    };

    let (readable, writable) = if expected.is_link() && entry == Some(NodeKind::Link) {
        // Links themselves are always readable; retargeting needs a
        // writable parent directory.
        let parent_ok = full.parent().is_some_and(|p| access_ok(p, true));
        (true, parent_ok)
    } else if resolved.is_some() {
        (access_ok(&full, false), access_ok(&full, true))
    } else if entry == Some(NodeKind::Link) {
        // Dangling link: capability derives from the target's ancestors.
        match fs::read_link(&full) {
            Ok(target) => {
                let target = if target.is_absolute() {
                    target
                } else {
                    full.parent().map(|p| p.join(&target)).unwrap_or(target)
                };
                (derived_perm(&target, false), derived_perm(&target, true))
            }
            Err(_) => (false, false),
        }
    } else if reach == Reachability::Reachable {
        (derived_perm(&full, false), derived_perm(&full, true))
    } else {
        (false, false)
    };

    let parent_writable = full.parent().is_some_and(|p| access_ok(p, true));

    ProbeData {
        path: path.absolute().to_string(),
        expected,
        exists,
        present,
        reach,
        readable,
        writable,
        root: path.is_root(),
        parent_writable,
    }
}
