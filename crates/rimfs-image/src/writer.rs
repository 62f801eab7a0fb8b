use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rimfs_types::{file_name, is_valid_relative};

use crate::error::{ImageError, ImageResult};
use crate::location::{ByteOrder, Location, FLAG_ZSTD, LOCATION_RECORD_SIZE};
use crate::reader::{full_key, HEADER_SIZE, MAGIC, PSEUDO_MODULES, PSEUDO_PACKAGES, VERSION};

// Content below this size is stored raw; larger content is compressed
// when compression actually wins.
const COMPRESS_THRESHOLD: usize = 64;
const ZSTD_LEVEL: i32 = 3;

/// Builds a packed runtime image from module resources.
///
/// Resources are added as `<module>/<path>` with their bytes; the
/// writer derives everything else: the implied pseudo-directories of
/// the modules tree, the `/packages` namespace (one directory per
/// package with a link record per containing module), the deduplicated
/// string table, and the child-offset arrays. Output is deterministic
/// for a given input set and byte order.
pub struct ImageWriter {
    order: ByteOrder,
    resources: BTreeMap<String, Vec<u8>>,
}

// Record descriptors in final table order.
enum Desc {
    ModulesDir(String),
    Resource(String),
    PackagesRoot,
    PackageDir(String),
    PackageLink(String, String),
}

impl ImageWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            resources: BTreeMap::new(),
        }
    }

    /// Queues one resource. The path must be `<module>/<rest>`; adding
    /// the same path again replaces the previous bytes.
    ///
    /// The pseudo-module names `modules` and `packages` are reserved
    /// for the namespace roots and rejected as module names.
    pub fn add_resource(&mut self, resource_path: &str, contents: &[u8]) -> ImageResult<()> {
        if !is_valid_relative(resource_path) {
            return Err(ImageError::InvalidResourcePath(resource_path.to_string()));
        }
        let Some((module, _)) = resource_path.split_once('/') else {
            return Err(ImageError::InvalidResourcePath(resource_path.to_string()));
        };
        if module == PSEUDO_MODULES || module == PSEUDO_PACKAGES {
            return Err(ImageError::InvalidResourcePath(resource_path.to_string()));
        }
        self.resources
            .insert(resource_path.to_string(), contents.to_vec());
        Ok(())
    }

    /// Number of queued resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are queued.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Builds the image in memory.
    pub fn finish(self) -> ImageResult<Vec<u8>> {
        self.build_image_bytes()
    }

    /// Builds the image and writes it to disk.
    pub fn write_to(self, path: &Path) -> ImageResult<()> {
        let bytes = self.build_image_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn build_image_bytes(self) -> ImageResult<Vec<u8>> {
        let order = self.order;

        // Implied directories and parent→child adjacency. The empty
        // path is the modules-tree root.
        let mut dirs: BTreeSet<String> = BTreeSet::new();
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        dirs.insert(String::new());
        for path in self.resources.keys() {
            let mut child = path.as_str();
            loop {
                let parent = match child.rfind('/') {
                    Some(idx) => &child[..idx],
                    None => "",
                };
                children
                    .entry(parent.to_string())
                    .or_default()
                    .insert(child.to_string());
                if parent.is_empty() {
                    break;
                }
                dirs.insert(parent.to_string());
                child = parent;
            }
        }
        for path in self.resources.keys() {
            if dirs.contains(path) {
                return Err(ImageError::InvalidResourcePath(format!(
                    "{path} is both a resource and a directory"
                )));
            }
        }

        // Packages: every directory below a module top level, except
        // the reserved META-INF subtree.
        let mut package_modules: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for dir in &dirs {
            let Some((module, rest)) = dir.split_once('/') else {
                continue;
            };
            if rest == "META-INF" || rest.starts_with("META-INF/") {
                continue;
            }
            package_modules
                .entry(rest.replace('/', "."))
                .or_default()
                .insert(module.to_string());
        }

        // Table order and record offsets.
        let mut descs: Vec<Desc> = Vec::new();
        for dir in &dirs {
            descs.push(Desc::ModulesDir(dir.clone()));
        }
        for path in self.resources.keys() {
            descs.push(Desc::Resource(path.clone()));
        }
        descs.push(Desc::PackagesRoot);
        for (package, modules) in &package_modules {
            descs.push(Desc::PackageDir(package.clone()));
            for module in modules {
                descs.push(Desc::PackageLink(package.clone(), module.clone()));
            }
        }

        let mut offsets: HashMap<String, u32> = HashMap::with_capacity(descs.len());
        for (index, desc) in descs.iter().enumerate() {
            let offset = (index * LOCATION_RECORD_SIZE) as u32;
            offsets.insert(desc_key(desc), offset);
        }

        // String table, content area, and the records themselves.
        let mut strings = StringTable::new();
        let mut content: Vec<u8> = Vec::new();
        let mut records: Vec<Location> = Vec::with_capacity(descs.len());

        for desc in &descs {
            let offset = offsets[&desc_key(desc)];
            let record = match desc {
                Desc::ModulesDir(dir) => {
                    let payload = child_offset_array(order, &children, dir, &offsets);
                    let base_off = strings.intern(dir);
                    raw_record(
                        offset,
                        strings.intern(PSEUDO_MODULES),
                        base_off,
                        &mut content,
                        payload,
                    )
                }
                Desc::Resource(path) => {
                    let data = &self.resources[path];
                    let (module, rest) = path.split_once('/').expect("validated resource path");
                    let (parent, name) = match rest.rfind('/') {
                        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                        None => ("", rest),
                    };
                    let (base, ext) = match name.rfind('.') {
                        Some(idx) => (&name[..idx], &name[idx + 1..]),
                        None => (name, ""),
                    };

                    let (stored, flags) = if data.len() >= COMPRESS_THRESHOLD {
                        let packed = zstd::encode_all(data.as_slice(), ZSTD_LEVEL)
                            .map_err(|e| ImageError::CompressionFailed(e.to_string()))?;
                        if packed.len() < data.len() {
                            (packed, FLAG_ZSTD)
                        } else {
                            (data.clone(), 0)
                        }
                    } else {
                        (data.clone(), 0)
                    };

                    let content_off = content.len() as u32;
                    content.extend_from_slice(&stored);
                    Location {
                        offset,
                        module_off: strings.intern(module),
                        parent_off: strings.intern(parent),
                        base_off: strings.intern(base),
                        ext_off: if ext.is_empty() { 0 } else { strings.intern(ext) },
                        content_off,
                        content_len: stored.len() as u32,
                        plain_len: data.len() as u32,
                        flags,
                    }
                }
                Desc::PackagesRoot => {
                    let mut payload = Vec::new();
                    for package in package_modules.keys() {
                        order.write_u32(&mut payload, offsets[&format!("pkg:{package}")]);
                    }
                    raw_record(
                        offset,
                        strings.intern(PSEUDO_PACKAGES),
                        strings.intern(""),
                        &mut content,
                        payload,
                    )
                }
                Desc::PackageDir(package) => {
                    let mut payload = Vec::new();
                    for module in &package_modules[package] {
                        order.write_u32(&mut payload, offsets[&format!("lnk:{package}/{module}")]);
                    }
                    let base_off = strings.intern(package);
                    raw_record(
                        offset,
                        strings.intern(PSEUDO_PACKAGES),
                        base_off,
                        &mut content,
                        payload,
                    )
                }
                Desc::PackageLink(package, module) => {
                    let base_off = strings.intern(&format!("{package}/{module}"));
                    raw_record(
                        offset,
                        strings.intern(PSEUDO_PACKAGES),
                        base_off,
                        &mut content,
                        Vec::new(),
                    )
                }
            };
            records.push(record);
        }

        let mut out =
            Vec::with_capacity(HEADER_SIZE + records.len() * LOCATION_RECORD_SIZE + content.len());
        out.extend_from_slice(MAGIC);
        out.push(order.marker());
        order.write_u32(&mut out, VERSION);
        order.write_u32(&mut out, records.len() as u32);
        order.write_u32(&mut out, strings.buf.len() as u32);
        order.write_u32(&mut out, content.len() as u32);
        order.write_u32(&mut out, crc32fast::hash(&content));
        for record in &records {
            record.encode(&mut out, order);
        }
        out.extend_from_slice(&strings.buf);
        out.extend_from_slice(&content);
        Ok(out)
    }
}

impl std::fmt::Debug for ImageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageWriter")
            .field("order", &self.order)
            .field("resources", &self.resources.len())
            .finish()
    }
}

// Offset-map key; the prefixes keep the three namespaces apart.
fn desc_key(desc: &Desc) -> String {
    match desc {
        Desc::ModulesDir(dir) => full_key(PSEUDO_MODULES, dir),
        Desc::Resource(path) => format!("res:{path}"),
        Desc::PackagesRoot => "pkg-root".to_string(),
        Desc::PackageDir(package) => format!("pkg:{package}"),
        Desc::PackageLink(package, module) => format!("lnk:{package}/{module}"),
    }
}

// Child offsets of a modules-tree directory, ordered by final segment
// name. A child is either an implied directory or a resource.
fn child_offset_array(
    order: ByteOrder,
    children: &BTreeMap<String, BTreeSet<String>>,
    dir: &str,
    offsets: &HashMap<String, u32>,
) -> Vec<u8> {
    let mut payload = Vec::new();
    let Some(kids) = children.get(dir) else {
        return payload;
    };
    let mut kids: Vec<&String> = kids.iter().collect();
    kids.sort_by(|a, b| file_name(a).cmp(file_name(b)));
    for kid in kids {
        let offset = offsets
            .get(&full_key(PSEUDO_MODULES, kid))
            .or_else(|| offsets.get(&format!("res:{kid}")))
            .expect("every child has a record");
        order.write_u32(&mut payload, *offset);
    }
    payload
}

// A pseudo-directory or link record: raw payload, no parent, no
// extension.
fn raw_record(
    offset: u32,
    module_off: u32,
    base_off: u32,
    content: &mut Vec<u8>,
    payload: Vec<u8>,
) -> Location {
    let content_off = content.len() as u32;
    content.extend_from_slice(&payload);
    Location {
        offset,
        module_off,
        parent_off: 0,
        base_off,
        ext_off: 0,
        content_off,
        content_len: payload.len() as u32,
        plain_len: payload.len() as u32,
        flags: 0,
    }
}

// Deduplicating NUL-terminated string table; offset 0 is always the
// empty string.
struct StringTable {
    buf: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringTable {
    fn new() -> Self {
        let mut table = Self {
            buf: Vec::new(),
            index: HashMap::new(),
        };
        table.intern("");
        table
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&offset) = self.index.get(value) {
            return offset;
        }
        let offset = self.buf.len() as u32;
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        self.index.insert(value.to_string(), offset);
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_resource_paths() {
        let mut writer = ImageWriter::new(ByteOrder::Little);
        for path in ["", "noslash", "/abs/a", "a//b", "a/b/", "a/.b", "modules/x", "packages/x"] {
            let err = writer.add_resource(path, b"x").unwrap_err();
            assert!(
                matches!(err, ImageError::InvalidResourcePath(_)),
                "expected rejection for {path:?}"
            );
        }
        assert!(writer.is_empty());
    }

    #[test]
    fn rejects_resource_shadowed_by_directory() {
        let mut writer = ImageWriter::new(ByteOrder::Little);
        writer.add_resource("m/a", b"file").unwrap();
        writer.add_resource("m/a/b", b"deeper").unwrap();
        let err = writer.finish().unwrap_err();
        assert!(matches!(err, ImageError::InvalidResourcePath(_)));
    }

    #[test]
    fn re_adding_a_path_replaces_contents() {
        let mut writer = ImageWriter::new(ByteOrder::Little);
        writer.add_resource("m/a/F", b"old").unwrap();
        writer.add_resource("m/a/F", b"new").unwrap();
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn output_is_deterministic() {
        let build = || {
            let mut writer = ImageWriter::new(ByteOrder::Big);
            writer.add_resource("m.two/pkg/B", b"bbb").unwrap();
            writer.add_resource("m.one/pkg/A", b"aaa").unwrap();
            writer.add_resource("m.one/pkg/sub/C", b"ccc").unwrap();
            writer.finish().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn empty_image_is_well_formed() {
        let bytes = ImageWriter::new(ByteOrder::Little).finish().unwrap();
        let reader = crate::reader::ImageReader::from_bytes(bytes).unwrap();
        let root = reader.find_location(PSEUDO_MODULES, "").expect("modules root");
        assert!(reader.children_of(&root).unwrap().is_empty());
        let packages = reader.find_location(PSEUDO_PACKAGES, "").expect("packages root");
        assert!(reader.children_of(&packages).unwrap().is_empty());
    }

    #[test]
    fn compression_kicks_in_for_large_content() {
        let mut writer = ImageWriter::new(ByteOrder::Little);
        let data = vec![0xAB; 100_000];
        writer.add_resource("m/blob/Big", &data).unwrap();
        let bytes = writer.finish().unwrap();
        assert!(bytes.len() < data.len());

        let reader = crate::reader::ImageReader::from_bytes(bytes).unwrap();
        let loc = reader.find_location_abs("/m/blob/Big").unwrap();
        assert_eq!(reader.read_content(&loc).unwrap(), data);
    }
}
