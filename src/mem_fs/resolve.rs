//! Path resolution over the in-memory node arena.
//!
//! Resolution is performed fresh on every call, under the caller's lock
//! guard; nothing here is cached. Link targets are stored path strings and
//! each dereference re-runs the walk, so changes to the target tree are
//! observed immediately.

use std::collections::VecDeque;

use tracing::trace;

use super::{NodeId, TreeInner, TreeNode, ROOT_ID};
use crate::Pathname;

/// Final state of a link chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkTarget {
    Directory(NodeId),
    File(NodeId),
    /// The chain ends at a path whose tail does not exist yet.
    Missing { dir: NodeId, segments: Vec<String> },
    /// The chain cycles, leaves the root, or crosses a blocked path.
    Invalid,
}

/// What a requested path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Located {
    Directory(NodeId),
    File(NodeId),
    /// The final segment names a link. Identity queries route to `link`,
    /// content and type queries to the chain-resolved `target`.
    Link { link: NodeId, target: LinkTarget },
    /// The tail does not exist below an existing directory.
    Missing { dir: NodeId, segments: Vec<String> },
    /// The path cannot be reached: a non-directory collision
    /// (`collision = true`) or a broken link chain (`collision = false`).
    Invalid { collision: bool, segments: Vec<String> },
}

/// A full resolution outcome.
#[derive(Debug)]
pub(crate) struct Resolved {
    pub located: Located,
    /// Owning directory and child name of the final segment, when it was
    /// looked up in a real directory. The only context through which detach
    /// and replacement are possible.
    pub parent: Option<(NodeId, String)>,
    /// Longest prefix of the requested path that resolved to an existing
    /// node.
    pub found_path: String,
    /// Fully link-resolved absolute path; `None` when the path is invalid.
    pub real_path: Option<String>,
}

/// Resolve `path` (already re-rooted below `root`) against the tree.
pub(crate) fn resolve(tree: &TreeInner, root: &Pathname, path: &Pathname) -> Resolved {
    let mut queue: VecDeque<String> = path.segments().map(String::from).collect();

    if queue.is_empty() {
        return Resolved {
            located: Located::Directory(ROOT_ID),
            parent: None,
            found_path: root.absolute().to_string(),
            real_path: Some(root.absolute().to_string()),
        };
    }

    let mut current = ROOT_ID;
    let mut real: Vec<String> = Vec::new();
    let mut consumed = 0usize;

    while let Some(segment) = queue.pop_front() {
        let is_final = queue.is_empty();

        let Some(child) = tree.child_of(current, &segment) else {
            let mut segments = vec![segment];
            segments.extend(queue.drain(..));
            let mut full = real.clone();
            full.extend(segments.iter().cloned());
            return Resolved {
                located: Located::Missing {
                    dir: current,
                    segments,
                },
                parent: None,
                found_path: path.prefix(consumed),
                real_path: Some(root.descend(&full)),
            };
        };

        match tree.node(child) {
            TreeNode::Directory(_) => {
                consumed += 1;
                real.push(segment.clone());
                if is_final {
                    return Resolved {
                        located: Located::Directory(child),
                        parent: Some((current, segment)),
                        found_path: path.prefix(consumed),
                        real_path: Some(root.descend(&real)),
                    };
                }
                current = child;
            }
            TreeNode::File(_) => {
                consumed += 1;
                real.push(segment.clone());
                if is_final {
                    return Resolved {
                        located: Located::File(child),
                        parent: Some((current, segment)),
                        found_path: path.prefix(consumed),
                        real_path: Some(root.descend(&real)),
                    };
                }
                // A non-directory in a non-final position blocks descent.
                let segments: Vec<String> = queue.drain(..).collect();
                trace!(path = path.absolute(), blocked = ?segments, "leaf collision");
                return Resolved {
                    located: Located::Invalid {
                        collision: true,
                        segments,
                    },
                    parent: None,
                    found_path: path.prefix(consumed),
                    real_path: None,
                };
            }
            TreeNode::Link(_) => {
                consumed += 1;
                let mut visited = Vec::new();
                let chased = chase(tree, root, child, &mut visited);
                if is_final {
                    let real_path = chased.real.map(|r| root.descend(&r));
                    return Resolved {
                        located: Located::Link {
                            link: child,
                            target: chased.target,
                        },
                        parent: Some((current, segment)),
                        found_path: path.prefix(consumed),
                        real_path,
                    };
                }
                match (chased.target, chased.real) {
                    (LinkTarget::Directory(dir), Some(r)) => {
                        current = dir;
                        real = r;
                    }
                    (LinkTarget::File(_), _) => {
                        let segments: Vec<String> = queue.drain(..).collect();
                        return Resolved {
                            located: Located::Invalid {
                                collision: true,
                                segments,
                            },
                            parent: None,
                            found_path: path.prefix(consumed),
                            real_path: None,
                        };
                    }
                    _ => {
                        let segments: Vec<String> = queue.drain(..).collect();
                        trace!(path = path.absolute(), "broken link chain blocks descent");
                        return Resolved {
                            located: Located::Invalid {
                                collision: false,
                                segments,
                            },
                            parent: None,
                            found_path: path.prefix(consumed),
                            real_path: None,
                        };
                    }
                }
            }
        }
    }

    unreachable!("the final segment always produces a resolution");
}

struct Chased {
    target: LinkTarget,
    /// Resolved segment path of the final node below the root, when the
    /// chain resolves at all.
    real: Option<Vec<String>>,
}

/// Follow a link chain to its final state.
///
/// `visited` holds the target strings already dereferenced in this chain;
/// revisiting one means the chain cycles. A nested link encountered inside a
/// target path belongs to the same chain and shares the list.
fn chase(tree: &TreeInner, root: &Pathname, link: NodeId, visited: &mut Vec<String>) -> Chased {
    let mut link = link;
    loop {
        let TreeNode::Link(node) = tree.node(link) else {
            return Chased {
                target: LinkTarget::Invalid,
                real: None,
            };
        };
        let target = node.target.clone();

        if visited.iter().any(|seen| *seen == target) {
            trace!(chain_target = target.as_str(), "link chain cycles");
            return Chased {
                target: LinkTarget::Invalid,
                real: None,
            };
        }
        visited.push(target.clone());

        // Targets are absolute paths below the same root.
        let Ok(target_path) = root.as_root_for(&target) else {
            trace!(chain_target = target.as_str(), "link target leaves the root");
            return Chased {
                target: LinkTarget::Invalid,
                real: None,
            };
        };

        match walk_target(tree, root, &target_path, visited) {
            TargetStep::Directory(id, real) => {
                return Chased {
                    target: LinkTarget::Directory(id),
                    real: Some(real),
                }
            }
            TargetStep::File(id, real) => {
                return Chased {
                    target: LinkTarget::File(id),
                    real: Some(real),
                }
            }
            TargetStep::Missing { dir, segments, real } => {
                return Chased {
                    target: LinkTarget::Missing { dir, segments },
                    real: Some(real),
                }
            }
            TargetStep::Link(next) => link = next,
            TargetStep::Invalid => {
                return Chased {
                    target: LinkTarget::Invalid,
                    real: None,
                }
            }
        }
    }
}

enum TargetStep {
    Directory(NodeId, Vec<String>),
    File(NodeId, Vec<String>),
    Missing {
        dir: NodeId,
        segments: Vec<String>,
        real: Vec<String>,
    },
    /// The target path itself ends at a link; the chain continues there.
    Link(NodeId),
    Invalid,
}

fn walk_target(
    tree: &TreeInner,
    root: &Pathname,
    path: &Pathname,
    visited: &mut Vec<String>,
) -> TargetStep {
    let mut queue: VecDeque<String> = path.segments().map(String::from).collect();
    let mut current = ROOT_ID;
    let mut real: Vec<String> = Vec::new();

    if queue.is_empty() {
        return TargetStep::Directory(ROOT_ID, real);
    }

    while let Some(segment) = queue.pop_front() {
        let is_final = queue.is_empty();

        let Some(child) = tree.child_of(current, &segment) else {
            let mut segments = vec![segment];
            segments.extend(queue.drain(..));
            let mut full = real.clone();
            full.extend(segments.iter().cloned());
            return TargetStep::Missing {
                dir: current,
                segments,
                real: full,
            };
        };

        match tree.node(child) {
            TreeNode::Directory(_) => {
                real.push(segment);
                if is_final {
                    return TargetStep::Directory(child, real);
                }
                current = child;
            }
            TreeNode::File(_) => {
                real.push(segment);
                if is_final {
                    return TargetStep::File(child, real);
                }
                return TargetStep::Invalid;
            }
            TreeNode::Link(_) => {
                if is_final {
                    return TargetStep::Link(child);
                }
                let chased = chase(tree, root, child, visited);
                match (chased.target, chased.real) {
                    (LinkTarget::Directory(dir), Some(r)) => {
                        current = dir;
                        real = r;
                    }
                    _ => return TargetStep::Invalid,
                }
            }
        }
    }

    unreachable!("the final segment always produces a target step");
}
