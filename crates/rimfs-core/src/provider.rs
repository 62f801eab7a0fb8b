use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::VfsResult;
use crate::fs::FsShared;
use crate::node::Node;

/// Source of module-tree resources and module/package metadata.
///
/// The engine depends on this contract and never touches container
/// bytes itself. Resource paths exchanged here are relative: empty for
/// the module universe root, otherwise `<module>[/<rest>]` with no
/// leading or trailing `/` (the engine validates before calling, so a
/// provider may `debug_assert!` the form).
///
/// Implementations must satisfy these invariants:
/// - Nodes are produced only through the supplied [`NodeFactory`], so
///   the engine can cache them; the factory must not be retained beyond
///   the call.
/// - `get_resource("")` yields a directory in every layer.
/// - `for_each_child_of` emits each *immediate* child exactly once,
///   never descendants; for the empty path it emits one directory per
///   module.
/// - `all_module_names` includes modules that only have preview
///   content. Ordering is arbitrary but stable.
/// - `package_names` is called at most once per layer per engine; the
///   engine memoizes the result.
/// - `package_exists` is cheap and may be called frequently.
pub trait ResourceProvider: Send + Sync {
    /// Looks up the resource at `resource_path` in the requested layer,
    /// producing a file or directory node through `factory` when it
    /// exists.
    fn get_resource(
        &self,
        resource_path: &str,
        factory: &NodeFactory<'_>,
        preview: bool,
    ) -> Option<Arc<Node>>;

    /// Feeds every immediate child of the directory at `resource_path`
    /// (in the requested layer) to `sink`.
    fn for_each_child_of(
        &self,
        factory: &NodeFactory<'_>,
        resource_path: &str,
        preview: bool,
        sink: &mut dyn FnMut(Arc<Node>),
    );

    /// Names of all modules in the image.
    fn all_module_names(&self) -> BTreeSet<String>;

    /// Dotted names of all packages visible in the requested layer.
    fn package_names(&self, preview: bool) -> BTreeSet<String>;

    /// Whether `module` contains `package` (as a directory), consulting
    /// the preview layer as well when `preview` is set.
    fn package_exists(&self, module: &str, package: &str, preview: bool) -> bool;

    /// Names of all modules containing `package`, with the same layer
    /// semantics as [`package_exists`](ResourceProvider::package_exists).
    fn modules_for_package(&self, package: &str, preview: bool) -> BTreeSet<String>;
}

/// Constructor handle passed to providers.
///
/// Both constructors take a module-tree resource path, derive the
/// absolute virtual path under `/modules`, and route the node through
/// the engine's cache — if the path is already cached, the existing
/// node is returned and the arguments are discarded. Borrowing the
/// engine keeps the factory scoped to the provider call that received
/// it.
pub struct NodeFactory<'fs> {
    fs: &'fs Arc<FsShared>,
}

impl<'fs> NodeFactory<'fs> {
    pub(crate) fn new(fs: &'fs Arc<FsShared>) -> Self {
        Self { fs }
    }

    /// Creates (or revisits) the file node for `resource_path`, with
    /// `content` bound as its on-demand byte producer.
    pub fn new_resource<F>(&self, resource_path: &str, content: F) -> Arc<Node>
    where
        F: Fn() -> VfsResult<Vec<u8>> + Send + Sync + 'static,
    {
        self.fs.new_resource(resource_path, Box::new(content))
    }

    /// Creates (or revisits) the directory node for `resource_path`;
    /// its child list is enumerated through the engine on first access.
    pub fn new_resource_directory(&self, resource_path: &str) -> Arc<Node> {
        self.fs.new_resource_directory(resource_path)
    }
}
