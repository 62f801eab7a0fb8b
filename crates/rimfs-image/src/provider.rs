use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::warn;

use rimfs_core::{Node, NodeFactory, ResourceProvider};
use rimfs_types::{
    is_relative_to, is_valid_relative, package_to_path, path_to_package, relativize, resolve,
};

use crate::error::{ImageError, ImageResult};
use crate::location::Location;
use crate::reader::{ImageReader, PSEUDO_MODULES, PSEUDO_PACKAGES};

// Reserved per-module subtree carrying the preview resource layer.
const PREVIEW_DIR: &str = "META-INF/preview";

/// Resource provider backed by a packed runtime image.
///
/// Resolution exploits the container's invariants: an entry whose
/// module-name offset equals that of the `/modules` root is a
/// pseudo-directory (child entries reachable through its offset
/// array), everything else is a file resource. Preview-layer requests
/// are answered from the module's `META-INF/preview` subtree, with the
/// prefix translated back out of paths handed to the node factory.
///
/// The provider shares the reader's scoped lifetime: after
/// [`close`](ImageProvider::close), file content fails with an I/O
/// error and lookups observe absence.
pub struct ImageProvider {
    reader: ImageReader,
    modules_root_module_off: u32,
    packages_root: Location,
    module_names: BTreeSet<String>,
    modules: RwLock<HashMap<String, Arc<ModuleEntry>>>,
}

struct ModuleEntry {
    name: String,
    // "<module>/META-INF/preview"
    preview_prefix: String,
    preview_only_packages: BTreeSet<String>,
}

impl ImageProvider {
    /// Opens the image at `path`.
    pub fn open(path: &Path) -> ImageResult<Self> {
        Self::from_reader(ImageReader::open(path)?)
    }

    /// Wraps an already-open reader.
    pub fn from_reader(reader: ImageReader) -> ImageResult<Self> {
        let modules_root = reader
            .find_location(PSEUDO_MODULES, "")
            .ok_or_else(|| ImageError::corrupt(0, "missing /modules root entry"))?;
        let packages_root = reader
            .find_location(PSEUDO_PACKAGES, "")
            .ok_or_else(|| ImageError::corrupt(0, "missing /packages root entry"))?;

        let mut module_names = BTreeSet::new();
        for loc in reader.children_of(&modules_root)? {
            module_names.insert(reader.base(&loc)?);
        }

        Ok(Self {
            modules_root_module_off: modules_root.module_off,
            reader,
            packages_root,
            module_names,
            modules: RwLock::new(HashMap::new()),
        })
    }

    /// Releases the underlying image. Idempotent.
    pub fn close(&self) {
        self.reader.close();
    }

    pub fn reader(&self) -> &ImageReader {
        &self.reader
    }

    // Entries in the /modules tree are pseudo-directories; string
    // comparison is avoided by testing the module-name offset.
    fn is_modules_directory(&self, loc: &Location) -> bool {
        loc.module_off == self.modules_root_module_off
    }

    fn find_module(&self, name: &str) -> Option<Arc<ModuleEntry>> {
        if !self.module_names.contains(name) {
            return None;
        }
        if let Some(entry) = self.modules.read().expect("lock poisoned").get(name) {
            return Some(Arc::clone(entry));
        }
        let entry = Arc::new(self.load_module(name));
        let mut modules = self.modules.write().expect("lock poisoned");
        Some(Arc::clone(
            modules.entry(name.to_string()).or_insert(entry),
        ))
    }

    fn load_module(&self, name: &str) -> ModuleEntry {
        let preview_prefix = format!("{name}/{PREVIEW_DIR}");
        let mut preview_only_packages = BTreeSet::new();
        if let Some(dir) = self.reader.find_location(PSEUDO_MODULES, &preview_prefix) {
            self.collect_preview_packages(name, &preview_prefix, &dir, &mut preview_only_packages);
        }
        ModuleEntry {
            name: name.to_string(),
            preview_prefix,
            preview_only_packages,
        }
    }

    // Walks a preview subtree and records each directory as a package,
    // keeping only packages whose non-preview directory also exists in
    // the module.
    fn collect_preview_packages(
        &self,
        module: &str,
        prefix: &str,
        dir: &Location,
        sink: &mut BTreeSet<String>,
    ) {
        for loc in self.dir_children(dir) {
            if !self.is_modules_directory(&loc) {
                continue;
            }
            let Ok(dir_path) = self.reader.base(&loc) else {
                continue;
            };
            if let Some(rel) = relativize(prefix, &dir_path) {
                if !rel.is_empty()
                    && self
                        .reader
                        .verify_location(PSEUDO_MODULES, &resolve(module, rel))
                {
                    sink.insert(path_to_package(rel));
                }
            }
            self.collect_preview_packages(module, prefix, &loc, sink);
        }
    }

    fn dir_children(&self, dir: &Location) -> Vec<Location> {
        match self.reader.children_of(dir) {
            Ok(children) => children,
            Err(err) => {
                warn!(offset = dir.offset(), %err, "skipping unreadable directory");
                Vec::new()
            }
        }
    }

    fn module_resource_node(
        &self,
        entry: &ModuleEntry,
        resource_path: &str,
        factory: &NodeFactory<'_>,
        preview: bool,
    ) -> Option<Arc<Node>> {
        let modules_path = entry.modules_path_of(resource_path, preview);
        if let Some(dir) = self.reader.find_location(PSEUDO_MODULES, &modules_path) {
            debug_assert!(self.is_modules_directory(&dir));
            return Some(factory.new_resource_directory(resource_path));
        }
        let file = self.reader.find_location_abs(&format!("/{modules_path}"))?;
        Some(self.emit_file(factory, resource_path, file))
    }

    fn emit_file(
        &self,
        factory: &NodeFactory<'_>,
        resource_path: &str,
        loc: Location,
    ) -> Arc<Node> {
        let reader = self.reader.clone();
        factory.new_resource(resource_path, move || {
            reader.read_content(&loc).map_err(Into::into)
        })
    }

    fn has_package_directory(&self, modules_path: &str) -> bool {
        self.reader.verify_location(PSEUDO_MODULES, modules_path)
    }
}

impl ResourceProvider for ImageProvider {
    fn get_resource(
        &self,
        resource_path: &str,
        factory: &NodeFactory<'_>,
        preview: bool,
    ) -> Option<Arc<Node>> {
        debug_assert!(resource_path.is_empty() || is_valid_relative(resource_path));
        match resource_path.split_once('/') {
            None => {
                // A bare segment is the universe root or a module name;
                // it is a directory in every layer, or absent.
                if resource_path.is_empty() || self.module_names.contains(resource_path) {
                    Some(factory.new_resource_directory(resource_path))
                } else {
                    None
                }
            }
            Some((module, _)) => {
                let entry = self.find_module(module)?;
                self.module_resource_node(&entry, resource_path, factory, preview)
            }
        }
    }

    fn for_each_child_of(
        &self,
        factory: &NodeFactory<'_>,
        resource_path: &str,
        preview: bool,
        sink: &mut dyn FnMut(Arc<Node>),
    ) {
        debug_assert!(resource_path.is_empty() || is_valid_relative(resource_path));
        if resource_path.is_empty() {
            for name in &self.module_names {
                sink(factory.new_resource_directory(name));
            }
            return;
        }
        let module = resource_path
            .split_once('/')
            .map_or(resource_path, |(module, _)| module);
        let Some(entry) = self.find_module(module) else {
            return;
        };
        let modules_path = entry.modules_path_of(resource_path, preview);
        let Some(dir) = self.reader.find_location(PSEUDO_MODULES, &modules_path) else {
            return;
        };
        debug_assert!(self.is_modules_directory(&dir));
        for loc in self.dir_children(&dir) {
            if self.is_modules_directory(&loc) {
                let Ok(dir_path) = self.reader.base(&loc) else {
                    continue;
                };
                if let Some(child_path) = entry.resource_path_of_dir(&dir_path, preview) {
                    sink(factory.new_resource_directory(&child_path));
                }
            } else {
                let Ok(base) = self.reader.base(&loc) else {
                    continue;
                };
                let name = match self.reader.extension(&loc) {
                    Ok(Some(ext)) => format!("{base}.{ext}"),
                    Ok(None) => base,
                    Err(_) => continue,
                };
                let child_path = format!("{resource_path}/{name}");
                sink(self.emit_file(factory, &child_path, loc));
            }
        }
    }

    fn all_module_names(&self) -> BTreeSet<String> {
        self.module_names.clone()
    }

    fn package_names(&self, preview: bool) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for loc in self.dir_children(&self.packages_root) {
            if let Ok(name) = self.reader.base(&loc) {
                names.insert(name);
            }
        }
        if preview {
            for module in &self.module_names {
                // Probe the preview directory before loading the module.
                if self
                    .reader
                    .verify_location(PSEUDO_MODULES, &format!("{module}/{PREVIEW_DIR}"))
                {
                    if let Some(entry) = self.find_module(module) {
                        names.extend(entry.preview_only_packages.iter().cloned());
                    }
                }
            }
        }
        names
    }

    fn package_exists(&self, module: &str, package: &str, preview: bool) -> bool {
        let package_path = package_to_path(package);
        self.has_package_directory(&format!("{module}/{package_path}"))
            || (preview
                && self.has_package_directory(&format!(
                    "{module}/{PREVIEW_DIR}/{package_path}"
                )))
    }

    fn modules_for_package(&self, package: &str, preview: bool) -> BTreeSet<String> {
        self.module_names
            .iter()
            .filter(|module| self.package_exists(module, package, preview))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ImageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProvider")
            .field("modules", &self.module_names.len())
            .field("closed", &self.reader.is_closed())
            .finish()
    }
}

impl ModuleEntry {
    // Maps a resource path into the modules namespace, prefixing the
    // preview subtree when the preview layer is addressed.
    fn modules_path_of(&self, resource_path: &str, preview: bool) -> String {
        debug_assert!(is_relative_to(&self.name, resource_path));
        if preview {
            format!("{}{}", self.preview_prefix, &resource_path[self.name.len()..])
        } else {
            resource_path.to_string()
        }
    }

    // Inverse mapping for directory children discovered during preview
    // enumeration: their stored path carries the preview prefix, which
    // must not leak into the virtual namespace.
    fn resource_path_of_dir(&self, dir_path: &str, preview: bool) -> Option<String> {
        if !preview {
            debug_assert!(is_relative_to(&self.name, dir_path));
            return Some(dir_path.to_string());
        }
        relativize(&self.preview_prefix, dir_path).map(|rel| resolve(&self.name, rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ByteOrder;
    use crate::writer::ImageWriter;
    use rimfs_core::{ImageFs, VfsError};

    fn sample_provider() -> ImageProvider {
        let mut writer = ImageWriter::new(ByteOrder::Little);
        writer
            .add_resource("mod.one/java/foo/Foo.class", b"foo-base")
            .unwrap();
        writer
            .add_resource("mod.one/META-INF/preview/java/foo/Foo.class", b"foo-preview")
            .unwrap();
        writer
            .add_resource("mod.one/META-INF/preview/java/qux/Q.class", b"qux-preview")
            .unwrap();
        writer
            .add_resource("mod.two/java/bar/Bar.class", b"bar-base")
            .unwrap();
        writer.add_resource("mod.two/java/bar/extra", b"no-ext").unwrap();
        let reader = ImageReader::from_bytes(writer.finish().unwrap()).unwrap();
        ImageProvider::from_reader(reader).unwrap()
    }

    fn fs_over(provider: ImageProvider, preview: bool) -> (ImageFs, Arc<ImageProvider>) {
        let provider = Arc::new(provider);
        let fs = ImageFs::new(
            Arc::clone(&provider) as Arc<dyn ResourceProvider>,
            preview,
        );
        (fs, provider)
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // Metadata queries
    // -----------------------------------------------------------------------

    #[test]
    fn module_and_package_metadata() {
        let provider = sample_provider();
        assert_eq!(names(&provider.all_module_names()), ["mod.one", "mod.two"]);

        // META-INF never contributes package names; the preview-only
        // java.qux package is not listed either, because its
        // non-preview directory does not exist.
        let base = provider.package_names(false);
        assert_eq!(names(&base), ["java", "java.bar", "java.foo"]);
        assert_eq!(provider.package_names(true), base);

        assert_eq!(
            names(&provider.modules_for_package("java", false)),
            ["mod.one", "mod.two"]
        );
        assert_eq!(
            names(&provider.modules_for_package("java.foo", false)),
            ["mod.one"]
        );

        // Preview-only packages resolve through the existence probes.
        assert!(!provider.package_exists("mod.one", "java.qux", false));
        assert!(provider.package_exists("mod.one", "java.qux", true));
        assert!(provider.modules_for_package("java.qux", false).is_empty());
        assert_eq!(
            names(&provider.modules_for_package("java.qux", true)),
            ["mod.one"]
        );

        // The packages namespace is materialized in the container.
        assert!(provider
            .reader()
            .verify_location(PSEUDO_PACKAGES, "java.foo/mod.one"));
    }

    // -----------------------------------------------------------------------
    // Engine integration
    // -----------------------------------------------------------------------

    #[test]
    fn serves_base_resources() {
        let (fs, _provider) = fs_over(sample_provider(), false);

        let file = fs
            .find_node("/modules/mod.one/java/foo/Foo.class")
            .expect("file node");
        assert!(!file.is_directory());
        assert_eq!(file.content().unwrap(), b"foo-base");

        let dir = fs.find_node("/modules/mod.two/java/bar").expect("dir node");
        let child_names: Vec<String> = dir
            .children()
            .unwrap()
            .iter()
            .map(|n| rimfs_types::file_name(n.path()).to_string())
            .collect();
        assert_eq!(child_names, ["Bar.class", "extra"]);

        let link = fs.find_node("/packages/java.foo/mod.one").expect("link");
        assert!(link.is_link());
        let target = link.resolve_link(false).unwrap();
        let module_root = fs.find_node("/modules/mod.one").unwrap();
        assert!(Arc::ptr_eq(&target, &module_root));

        // Preview-layer content stays invisible.
        assert!(fs.find_node("/modules/mod.one/java/qux").is_none());
        assert!(fs.find_node("/modules/mod.one/java/qux/Q.class").is_none());
    }

    #[test]
    fn preview_overlays_the_base_layer() {
        let (fs, _provider) = fs_over(sample_provider(), true);

        // Shadowed file serves preview bytes.
        let file = fs
            .find_node("/modules/mod.one/java/foo/Foo.class")
            .expect("file node");
        assert_eq!(file.content().unwrap(), b"foo-preview");

        // Preview-only additions appear in lookups and listings.
        let q = fs
            .find_node("/modules/mod.one/java/qux/Q.class")
            .expect("preview addition");
        assert_eq!(q.content().unwrap(), b"qux-preview");

        let java = fs.find_node("/modules/mod.one/java").expect("dir node");
        let child_names: Vec<&str> = java
            .children()
            .unwrap()
            .iter()
            .map(|n| rimfs_types::file_name(n.path()))
            .collect();
        assert_eq!(child_names, ["foo", "qux"]);

        // The preview-implied package link resolves into /modules.
        let link = fs.find_node("/packages/java.qux/mod.one").expect("link");
        let target = link.resolve_link(true).unwrap();
        assert_eq!(target.path(), "/modules/mod.one");
    }

    #[test]
    fn meta_inf_is_not_hidden_from_the_modules_tree() {
        let (fs, _provider) = fs_over(sample_provider(), false);
        // The preview subtree is ordinary module content; only the
        // packages view ignores it.
        assert!(fs
            .find_node("/modules/mod.one/META-INF/preview/java/foo/Foo.class")
            .is_some());
        assert!(fs.find_node("/packages/META-INF").is_none());
    }

    // -----------------------------------------------------------------------
    // Scoped release
    // -----------------------------------------------------------------------

    #[test]
    fn close_invalidates_content_but_not_identity() {
        let (fs, provider) = fs_over(sample_provider(), false);

        let file = fs
            .find_node("/modules/mod.one/java/foo/Foo.class")
            .expect("file node");
        assert_eq!(file.content().unwrap(), b"foo-base");

        provider.close();

        // Cached nodes keep their identity, but content now fails and
        // unvisited paths observe absence.
        let again = fs.find_node("/modules/mod.one/java/foo/Foo.class").unwrap();
        assert!(Arc::ptr_eq(&file, &again));
        assert!(matches!(file.content(), Err(VfsError::Io(_))));
        assert!(fs.find_node("/modules/mod.two/java/bar/Bar.class").is_none());
    }
}
