//! Requested-access flags and the validation order shared by both backends.

use std::ops::BitOr;

use tracing::trace;

use crate::error::{DeniedAccess, FsError, Result};
use crate::NodeKind;

/// Access requested from [`validate`](crate::Node::validate).
///
/// Flags combine with `|`:
///
/// ```
/// use virtual_nodes::Access;
///
/// let access = Access::exists() | Access::read();
/// assert!(access.exists && access.read);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access {
    /// The node must exist, as the kind the handle expects.
    pub exists: bool,
    /// The node (or its closest existing ancestor) must be readable.
    pub read: bool,
    /// The node (or its closest existing ancestor) must be writable.
    pub write: bool,
    /// The node's parent directory must permit removal.
    pub remove: bool,
}

impl Access {
    /// No access requested; only reachability and type checks apply.
    pub fn none() -> Self {
        Self::default()
    }

    /// Existence requested.
    pub fn exists() -> Self {
        Self {
            exists: true,
            ..Self::default()
        }
    }

    /// Read access requested.
    pub fn read() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Write access requested.
    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Removal requested.
    pub fn remove() -> Self {
        Self {
            remove: true,
            ..Self::default()
        }
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access {
            exists: self.exists || rhs.exists,
            read: self.read || rhs.read,
            write: self.write || rhs.write,
            remove: self.remove || rhs.remove,
        }
    }
}

/// Why a path cannot be descended further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reachability {
    /// The path resolves, or is merely missing its tail.
    Reachable,
    /// A non-directory node blocks descent.
    LeafCollision,
    /// A cyclic or dangling link chain blocks descent.
    BadLink,
}

/// Backend view consulted by [`check_access`].
///
/// A probe is built fresh from a single resolution pass, so the checks below
/// observe one consistent snapshot of the backend.
pub(crate) trait ValidationProbe {
    /// Absolute path, for error construction.
    fn describe(&self) -> &str;

    /// The kind the handle expects at this path.
    fn expected_kind(&self) -> NodeKind;

    /// Type-specific existence: a directory query on a file path is "does
    /// not exist as a directory".
    fn node_exists(&self) -> bool;

    /// Kind of whatever node the path currently resolves to, if any.
    fn present_kind(&self) -> Option<NodeKind>;

    /// Whether the path can be descended at all.
    fn reachability(&self) -> Reachability;

    /// Readability of the effective node (closest existing ancestor when the
    /// node itself is missing).
    fn readable(&self) -> bool;

    /// Writability, same derivation as [`readable`](Self::readable).
    fn writable(&self) -> bool;

    /// Whether this is the backend root (empty relative path).
    fn is_root(&self) -> bool;

    /// Writability of the parent directory.
    fn parent_writable(&self) -> bool;
}

/// Plain-data probe snapshot; each backend fills one from a single
/// resolution pass.
pub(crate) struct ProbeData {
    pub path: String,
    pub expected: NodeKind,
    pub exists: bool,
    pub present: Option<NodeKind>,
    pub reach: Reachability,
    pub readable: bool,
    pub writable: bool,
    pub root: bool,
    pub parent_writable: bool,
}

impl ValidationProbe for ProbeData {
    fn describe(&self) -> &str {
        &self.path
    }
    fn expected_kind(&self) -> NodeKind {
        self.expected
    }
    fn node_exists(&self) -> bool {
        self.exists
    }
    fn present_kind(&self) -> Option<NodeKind> {
        self.present
    }
    fn reachability(&self) -> Reachability {
        self.reach
    }
    fn readable(&self) -> bool {
        self.readable
    }
    fn writable(&self) -> bool {
        self.writable
    }
    fn is_root(&self) -> bool {
        self.root
    }
    fn parent_writable(&self) -> bool {
        self.parent_writable
    }
}

/// Classify `access` against the probed state.
///
/// Checks run in a fixed order and the first failure wins: existence, then
/// reachability, then node type, then read, write and removal permission.
/// Root removal is refused unconditionally, before any permission is
/// consulted.
pub(crate) fn check_access(probe: &dyn ValidationProbe, access: Access) -> Result<()> {
    if access.exists && !probe.node_exists() {
        trace!(path = probe.describe(), "validation failed: not found");
        return Err(FsError::not_found(probe.describe()));
    }

    match probe.reachability() {
        Reachability::Reachable => {}
        Reachability::LeafCollision => {
            trace!(path = probe.describe(), "validation failed: leaf collision");
            return Err(FsError::leaf_node(probe.describe()));
        }
        Reachability::BadLink => {
            trace!(path = probe.describe(), "validation failed: bad link chain");
            return Err(FsError::unreachable(probe.describe()));
        }
    }

    if !probe.node_exists() && probe.present_kind().is_some() {
        trace!(path = probe.describe(), "validation failed: wrong node type");
        return Err(FsError::unexpected_type(
            probe.describe(),
            probe.expected_kind(),
        ));
    }

    if access.read && !probe.readable() {
        trace!(path = probe.describe(), "validation failed: unreadable");
        return Err(FsError::denied(probe.describe(), DeniedAccess::Read));
    }

    if access.write && !probe.writable() {
        trace!(path = probe.describe(), "validation failed: unwritable");
        return Err(FsError::denied(probe.describe(), DeniedAccess::Write));
    }

    if access.remove {
        if probe.is_root() {
            return Err(FsError::CannotRemoveRoot {
                path: probe.describe().to_string(),
            });
        }
        if !probe.parent_writable() {
            trace!(path = probe.describe(), "validation failed: parent unwritable");
            return Err(FsError::denied(probe.describe(), DeniedAccess::Remove));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        exists: bool,
        present: Option<NodeKind>,
        reach: Reachability,
        readable: bool,
        writable: bool,
        root: bool,
        parent_writable: bool,
    }

    impl FakeProbe {
        fn existing_file() -> Self {
            Self {
                exists: true,
                present: Some(NodeKind::File),
                reach: Reachability::Reachable,
                readable: true,
                writable: true,
                root: false,
                parent_writable: true,
            }
        }
    }

    impl ValidationProbe for FakeProbe {
        fn describe(&self) -> &str {
            "vfs://probe"
        }
        fn expected_kind(&self) -> NodeKind {
            NodeKind::File
        }
        fn node_exists(&self) -> bool {
            self.exists
        }
        fn present_kind(&self) -> Option<NodeKind> {
            self.present
        }
        fn reachability(&self) -> Reachability {
            self.reach
        }
        fn readable(&self) -> bool {
            self.readable
        }
        fn writable(&self) -> bool {
            self.writable
        }
        fn is_root(&self) -> bool {
            self.root
        }
        fn parent_writable(&self) -> bool {
            self.parent_writable
        }
    }

    #[test]
    fn test_valid_node_passes_all_flags() {
        let probe = FakeProbe::existing_file();
        let access = Access::exists() | Access::read() | Access::write() | Access::remove();
        assert!(check_access(&probe, access).is_ok());
    }

    #[test]
    fn test_not_found_wins_over_permissions() {
        let probe = FakeProbe {
            exists: false,
            present: None,
            readable: false,
            writable: false,
            ..FakeProbe::existing_file()
        };
        let err = check_access(&probe, Access::exists() | Access::read()).unwrap_err();
        assert!(matches!(err, FsError::NodeNotFound { .. }));
    }

    #[test]
    fn test_leaf_collision_reported_without_exists_flag() {
        let probe = FakeProbe {
            exists: false,
            present: None,
            reach: Reachability::LeafCollision,
            ..FakeProbe::existing_file()
        };
        let err = check_access(&probe, Access::read()).unwrap_err();
        assert!(matches!(err, FsError::UnexpectedLeafNode { .. }));
    }

    #[test]
    fn test_wrong_type_reported_before_permissions() {
        let probe = FakeProbe {
            exists: false,
            present: Some(NodeKind::Directory),
            readable: false,
            ..FakeProbe::existing_file()
        };
        let err = check_access(&probe, Access::read()).unwrap_err();
        assert!(matches!(
            err,
            FsError::UnexpectedNodeType {
                expected: NodeKind::File,
                ..
            }
        ));
    }

    #[test]
    fn test_root_removal_refused_even_with_permissions() {
        let probe = FakeProbe {
            root: true,
            ..FakeProbe::existing_file()
        };
        let err = check_access(&probe, Access::remove()).unwrap_err();
        assert!(matches!(err, FsError::CannotRemoveRoot { .. }));
    }

    #[test]
    fn test_remove_requires_writable_parent() {
        let probe = FakeProbe {
            parent_writable: false,
            ..FakeProbe::existing_file()
        };
        let err = check_access(&probe, Access::remove()).unwrap_err();
        assert!(matches!(
            err,
            FsError::AccessDenied {
                denied: DeniedAccess::Remove,
                ..
            }
        ));
    }
}
