//! Error type for node resolution, validation and backend I/O.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::NodeKind;

/// Result alias used throughout the crate.
pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Why a node name failed syntax validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidNameKind {
    /// The name was empty after trimming separators.
    EmptyName,
    /// The name contained an empty segment (`a//b`).
    EmptySegment,
    /// The name contained a `.` or `..` segment.
    DotSegment,
}

impl fmt::Display for InvalidNameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidNameKind::EmptyName => write!(f, "empty name"),
            InvalidNameKind::EmptySegment => write!(f, "empty segment"),
            InvalidNameKind::DotSegment => write!(f, "dot segment"),
        }
    }
}

/// Which kind of access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedAccess {
    Read,
    Write,
    Remove,
}

impl fmt::Display for DeniedAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeniedAccess::Read => write!(f, "read"),
            DeniedAccess::Write => write!(f, "write"),
            DeniedAccess::Remove => write!(f, "remove"),
        }
    }
}

/// Error type for node operations.
///
/// Syntax errors are raised while composing a [`Pathname`](crate::Pathname),
/// before any backend is consulted. Reachability, existence and permission
/// errors are raised by validation. The `UnableTo*` variants wrap an OS
/// failure that happened after all logical validation passed; they are never
/// retried internally.
#[derive(Debug, Error)]
pub enum FsError {
    /// A child name failed syntax validation.
    #[error("invalid node name `{name}`: {kind}")]
    InvalidNodeName { name: String, kind: InvalidNameKind },

    /// The node does not exist and existence was asserted.
    #[error("node not found: {path}")]
    NodeNotFound { path: String },

    /// A directory used as a root does not exist.
    #[error("root directory not found: {path}")]
    RootNotFound { path: String },

    /// A node exists at the path, but not of the requested kind.
    #[error("{path} exists but is not a {expected}")]
    UnexpectedNodeType { path: String, expected: NodeKind },

    /// A non-directory node blocks descent somewhere along the path.
    #[error("path blocked by a non-directory node: {path}")]
    UnexpectedLeafNode { path: String },

    /// The path cannot be reached (cyclic or dangling link chain).
    #[error("unreachable path: {path}")]
    UnreachablePath { path: String },

    /// The requested access is not permitted.
    #[error("{denied} access denied: {path}")]
    AccessDenied { path: String, denied: DeniedAccess },

    /// The root node can never be removed.
    #[error("cannot remove the root node: {path}")]
    CannotRemoveRoot { path: String },

    /// The node belongs to a different filesystem instance.
    #[error("node belongs to a different filesystem: {path}")]
    ForeignNode { path: String },

    /// The OS refused to create a node after validation passed.
    #[error("unable to create {path}")]
    UnableToCreate {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to remove a node after validation passed.
    #[error("unable to remove {path}")]
    UnableToRemove {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to move a node after validation passed.
    #[error("unable to move {path}")]
    UnableToMove {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused to hand out the contents of a file.
    #[error("unable to read contents of {path}")]
    UnableToReadContents {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused a permission change.
    #[error("unable to set permissions on {path}")]
    UnableToSetPermissions {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Create a `NodeNotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NodeNotFound { path: path.into() }
    }

    /// Create a `RootNotFound` error.
    pub fn root_not_found(path: impl Into<String>) -> Self {
        Self::RootNotFound { path: path.into() }
    }

    /// Create an `UnexpectedNodeType` error.
    pub fn unexpected_type(path: impl Into<String>, expected: NodeKind) -> Self {
        Self::UnexpectedNodeType {
            path: path.into(),
            expected,
        }
    }

    /// Create an `UnexpectedLeafNode` error.
    pub fn leaf_node(path: impl Into<String>) -> Self {
        Self::UnexpectedLeafNode { path: path.into() }
    }

    /// Create an `UnreachablePath` error.
    pub fn unreachable(path: impl Into<String>) -> Self {
        Self::UnreachablePath { path: path.into() }
    }

    /// Create an `AccessDenied` error.
    pub fn denied(path: impl Into<String>, denied: DeniedAccess) -> Self {
        Self::AccessDenied {
            path: path.into(),
            denied,
        }
    }

    /// Create a `ForeignNode` error.
    pub fn foreign(path: impl Into<String>) -> Self {
        Self::ForeignNode { path: path.into() }
    }

    /// Create an `InvalidNodeName` error.
    pub fn invalid_name(name: impl Into<String>, kind: InvalidNameKind) -> Self {
        Self::InvalidNodeName {
            name: name.into(),
            kind,
        }
    }
}
