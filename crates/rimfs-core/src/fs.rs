use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use rimfs_types::{file_name, is_valid_absolute, relativize, resolve, MODULES, PACKAGES};

use crate::cache::NodeCache;
use crate::error::{VfsError, VfsResult};
use crate::memo::Memoized;
use crate::node::{ContentFn, Node};
use crate::provider::{NodeFactory, ResourceProvider};

/// Read-only virtual filesystem over a packed runtime image.
///
/// Two roots exist side by side: `/modules` mirrors the per-module
/// resource trees served by the provider, and `/packages` is a
/// synthesized view listing every package with links back into the
/// modules that contain it. All nodes are materialized lazily, cached
/// under their absolute path, and retained for the life of this value.
///
/// With `preview` enabled, a parallel resource layer overlays the base:
/// lookups prefer it and directory listings union it with the base,
/// preview winning on name collisions.
#[derive(Clone)]
pub struct ImageFs {
    shared: Arc<FsShared>,
}

impl ImageFs {
    pub fn new(provider: Arc<dyn ResourceProvider>, preview: bool) -> Self {
        let modules_src = Arc::clone(&provider);
        let packages_src = Arc::clone(&provider);
        Self {
            shared: Arc::new(FsShared {
                provider,
                preview_enabled: preview,
                cache: NodeCache::new(),
                module_names: Memoized::new(move || Ok(modules_src.all_module_names())),
                package_names: Memoized::new(move || Ok(packages_src.package_names(preview))),
            }),
        }
    }

    /// Looks up the node at an absolute virtual path.
    ///
    /// Total over arbitrary strings: a syntactically invalid or missing
    /// path yields `None`, never an error. The empty string names the
    /// hierarchy root. Two lookups of the same path return the same
    /// node object.
    pub fn find_node(&self, path: &str) -> Option<Arc<Node>> {
        self.shared.find_node(path)
    }

    pub fn preview_enabled(&self) -> bool {
        self.shared.preview_enabled
    }
}

impl std::fmt::Debug for ImageFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFs")
            .field("preview_enabled", &self.shared.preview_enabled)
            .finish()
    }
}

/// Engine internals shared between the public handle and the lazy
/// producers baked into nodes. Producers hold only `Weak` references
/// back here, so the flat path→node cache never forms a cycle; a
/// producer that outlives the engine reports [`VfsError::Detached`].
pub(crate) struct FsShared {
    provider: Arc<dyn ResourceProvider>,
    preview_enabled: bool,
    cache: NodeCache,
    module_names: Memoized<BTreeSet<String>>,
    package_names: Memoized<BTreeSet<String>>,
}

fn upgrade(weak: &Weak<FsShared>) -> VfsResult<Arc<FsShared>> {
    weak.upgrade().ok_or(VfsError::Detached)
}

impl FsShared {
    fn find_node(self: &Arc<Self>, path: &str) -> Option<Arc<Node>> {
        if !is_valid_absolute(path) {
            return None;
        }
        if let Some(node) = self.cache.get(path) {
            return Some(node);
        }
        if path.is_empty() {
            return Some(self.root_directory());
        }
        if let Some(rest) = relativize(MODULES, path) {
            self.modules_node(rest)
        } else if let Some(rest) = relativize(PACKAGES, path) {
            self.packages_node(rest)
        } else {
            None
        }
    }

    // The hierarchy root has exactly two children, the fixed sub-roots.
    fn root_directory(self: &Arc<Self>) -> Arc<Node> {
        let weak = Arc::downgrade(self);
        self.cache.get_or_insert("", || {
            Node::directory(
                String::new(),
                Memoized::new(move || {
                    let fs = upgrade(&weak)?;
                    Ok(vec![fs.new_resource_directory(""), fs.packages_root()])
                }),
            )
        })
    }

    /// Module-tree lookup for `/modules/<resource_path>`. The preview
    /// layer is consulted first so that a shadowing preview node claims
    /// the cache slot before the base layer is asked.
    fn modules_node(self: &Arc<Self>, resource_path: &str) -> Option<Arc<Node>> {
        let factory = NodeFactory::new(self);
        if self.preview_enabled {
            if let Some(node) = self.provider.get_resource(resource_path, &factory, true) {
                return Some(node);
            }
        }
        self.provider.get_resource(resource_path, &factory, false)
    }

    /// Lookup under `/packages`: the root itself, `/packages/<pkg>`,
    /// or `/packages/<pkg>/<mod>`. Anything deeper is absent.
    fn packages_node(self: &Arc<Self>, rest: &str) -> Option<Arc<Node>> {
        if rest.is_empty() {
            return Some(self.packages_root());
        }
        let mut parts = rest.splitn(3, '/');
        let package = parts.next()?;
        let module = parts.next();
        if parts.next().is_some() {
            return None;
        }
        match module {
            None => self.package_directory(package),
            Some(module) => self.package_link(package, module),
        }
    }

    fn packages_root(self: &Arc<Self>) -> Arc<Node> {
        let weak = Arc::downgrade(self);
        self.cache.get_or_insert(PACKAGES, || {
            Node::directory(
                PACKAGES.to_string(),
                Memoized::new(move || {
                    let fs = upgrade(&weak)?;
                    let names = fs.package_names.get()?;
                    Ok(names.iter().map(|p| fs.new_package_directory(p)).collect())
                }),
            )
        })
    }

    fn package_directory(self: &Arc<Self>, package: &str) -> Option<Arc<Node>> {
        match self.package_names.get() {
            Ok(names) if names.contains(package) => Some(self.new_package_directory(package)),
            _ => None,
        }
    }

    // Unconditional constructor; callers have established the package
    // exists (direct lookups via the memoized name set, enumeration via
    // the provider's own listing).
    fn new_package_directory(self: &Arc<Self>, package: &str) -> Arc<Node> {
        let abs = resolve(PACKAGES, package);
        let weak = Arc::downgrade(self);
        let package = package.to_string();
        self.cache.get_or_insert(&abs, || {
            Node::directory(
                abs.clone(),
                Memoized::new(move || upgrade(&weak)?.package_link_nodes(&package)),
            )
        })
    }

    // Children of /packages/<pkg>: one link per containing module.
    // Constructing the listing consults only provider metadata; module
    // directories are not materialized until a link is resolved.
    fn package_link_nodes(self: &Arc<Self>, package: &str) -> VfsResult<Vec<Arc<Node>>> {
        let modules = self
            .provider
            .modules_for_package(package, self.preview_enabled);
        Ok(modules
            .iter()
            .map(|module| self.new_package_link(package, module))
            .collect())
    }

    fn package_link(self: &Arc<Self>, package: &str, module: &str) -> Option<Arc<Node>> {
        let known = self
            .module_names
            .get()
            .map(|names| names.contains(module))
            .unwrap_or(false);
        if known
            && self
                .provider
                .package_exists(module, package, self.preview_enabled)
        {
            Some(self.new_package_link(package, module))
        } else {
            None
        }
    }

    // The target is late-bound: only the module name is captured, and
    // /modules/<mod> is looked up on the first resolve.
    fn new_package_link(self: &Arc<Self>, package: &str, module: &str) -> Arc<Node> {
        let abs = format!("{PACKAGES}/{package}/{module}");
        let weak = Arc::downgrade(self);
        let target_path = resolve(MODULES, module);
        self.cache.get_or_insert(&abs, || {
            Node::link(
                abs.clone(),
                Memoized::new(move || {
                    let fs = upgrade(&weak)?;
                    let target = fs.find_node(&target_path);
                    target.ok_or(VfsError::BrokenLink(target_path))
                }),
            )
        })
    }

    pub(crate) fn new_resource(
        self: &Arc<Self>,
        resource_path: &str,
        content: ContentFn,
    ) -> Arc<Node> {
        let abs = resolve(MODULES, resource_path);
        self.cache
            .get_or_insert(&abs, || Node::file(abs.clone(), content))
    }

    pub(crate) fn new_resource_directory(self: &Arc<Self>, resource_path: &str) -> Arc<Node> {
        let abs = resolve(MODULES, resource_path);
        let weak = Arc::downgrade(self);
        let resource_path = resource_path.to_string();
        self.cache.get_or_insert(&abs, || {
            Node::directory(
                abs.clone(),
                Memoized::new(move || upgrade(&weak)?.child_resource_nodes(&resource_path)),
            )
        })
    }

    /// Child enumeration for a module-tree directory: base children
    /// outside preview mode, otherwise the union of preview and base
    /// with preview shadowing base by final segment name. Preview is
    /// enumerated first so its nodes claim the cache slots for shadowed
    /// names.
    fn child_resource_nodes(self: &Arc<Self>, resource_path: &str) -> VfsResult<Vec<Arc<Node>>> {
        let factory = NodeFactory::new(self);
        let mut nodes: Vec<Arc<Node>> = Vec::new();
        if self.preview_enabled {
            self.provider
                .for_each_child_of(&factory, resource_path, true, &mut |node| nodes.push(node));
        }
        if nodes.is_empty() {
            self.provider
                .for_each_child_of(&factory, resource_path, false, &mut |node| nodes.push(node));
        } else {
            let mut shadowed = nodes.clone();
            shadowed.sort_by(|a, b| file_name(a.path()).cmp(file_name(b.path())));
            self.provider
                .for_each_child_of(&factory, resource_path, false, &mut |child| {
                    let name = file_name(child.path());
                    if shadowed
                        .binary_search_by(|n| file_name(n.path()).cmp(name))
                        .is_err()
                    {
                        nodes.push(child);
                    }
                });
        }
        nodes.sort_by(|a, b| file_name(a.path()).cmp(file_name(b.path())));
        Ok(nodes)
    }
}
