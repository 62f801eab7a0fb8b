use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::memo::Memoized;

pub(crate) type ContentFn = Box<dyn Fn() -> VfsResult<Vec<u8>> + Send + Sync>;

/// A cached, identity-stable virtual filesystem entry.
///
/// Nodes form a closed family of three variants — directory, file, and
/// symbolic link — all identified by their absolute virtual path.
/// Equality, hashing, and display are defined on the path alone; for
/// any given path at most one `Node` exists per filesystem, so callers
/// may also rely on `Arc::ptr_eq` for deduplication.
pub struct Node {
    path: String,
    kind: NodeKind,
}

enum NodeKind {
    /// Child list is computed on first access and then frozen.
    Directory { children: Memoized<Vec<Arc<Node>>> },
    /// Content is produced on every read; the producer owns the handle
    /// to the underlying storage.
    File { content: ContentFn },
    /// Target is resolved through the engine on first access.
    Link { target: Memoized<Arc<Node>> },
}

impl Node {
    pub(crate) fn directory(path: String, children: Memoized<Vec<Arc<Node>>>) -> Self {
        Self {
            path,
            kind: NodeKind::Directory { children },
        }
    }

    pub(crate) fn file(path: String, content: ContentFn) -> Self {
        Self {
            path,
            kind: NodeKind::File { content },
        }
    }

    pub(crate) fn link(path: String, target: Memoized<Arc<Node>>) -> Self {
        Self {
            path,
            kind: NodeKind::Link { target },
        }
    }

    /// The absolute virtual path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link { .. })
    }

    /// Children of a directory, ascending by final segment name.
    ///
    /// The list is computed once and shared by all callers. Calling
    /// this on a file or link is a contract violation and reports
    /// [`VfsError::NotADirectory`].
    pub fn children(&self) -> VfsResult<&[Arc<Node>]> {
        match &self.kind {
            NodeKind::Directory { children } => Ok(children.get()?.as_slice()),
            _ => Err(VfsError::NotADirectory(self.path.clone())),
        }
    }

    /// Resource bytes of a file.
    ///
    /// May fail with [`VfsError::Io`] if the underlying storage fails
    /// or has been closed. Calling this on a directory or link reports
    /// [`VfsError::NotAFile`].
    pub fn content(&self) -> VfsResult<Vec<u8>> {
        match &self.kind {
            NodeKind::File { content } => content(),
            _ => Err(VfsError::NotAFile(self.path.clone())),
        }
    }

    /// Resolves a link to its target; any other node resolves to
    /// itself. With `recursive`, links are chased transitively (in this
    /// design a link target is never itself a link, so at most one hop
    /// is taken).
    pub fn resolve_link(self: &Arc<Self>, recursive: bool) -> VfsResult<Arc<Node>> {
        match &self.kind {
            NodeKind::Link { target } => {
                let target = target.get()?;
                if recursive && target.is_link() {
                    target.resolve_link(true)
                } else {
                    Ok(Arc::clone(target))
                }
            }
            _ => Ok(Arc::clone(self)),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            NodeKind::Directory { .. } => "directory",
            NodeKind::File { .. } => "file",
            NodeKind::Link { .. } => "link",
        };
        write!(f, "Node({kind}: {})", self.path)
    }
}
