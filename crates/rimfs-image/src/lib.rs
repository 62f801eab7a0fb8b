//! Packed runtime image container for rimfs.
//!
//! An image stores the resources of a modular runtime behind a single
//! file: a location table indexed by 32-bit offsets, a deduplicated
//! string table, and a content area, all in a declared byte order.
//!
//! # Container structure
//!
//! Every entry is keyed by a full path string of the form
//! `/<module>/<resource-path>`. A "normal" file entry carries its
//! module, parent path, base name, and optional extension as string
//! offsets, plus its (optionally zstd-compressed) content.
//!
//! Two pseudo-modules act as roots for directory information:
//!
//! 1. `modules` — the directory structure of the `/modules/...`
//!    namespace (e.g. `/modules/java.base/java/lang`). The content of
//!    such an entry is a sequence of u32 offsets to child entries.
//! 2. `packages` — the `/packages/...` structure: one directory entry
//!    per package plus a content-less link entry per
//!    `(package, module)` pair.
//!
//! An entry whose module-name offset equals that of the `/modules`
//! root is a pseudo-directory; this offset test replaces string
//! comparison on hot paths.
//!
//! A reserved per-module subtree `<mod>/META-INF/preview/...` carries
//! the preview resource layer consumed by `rimfs-core` in preview mode.
//!
//! # Key Types
//!
//! - [`ImageWriter`] — builds an image from `<module>/<path>` resources
//! - [`ImageReader`] — random-access decoder; a scoped resource with
//!   explicit [`close`](ImageReader::close)
//! - [`ImageProvider`] — the `rimfs_core::ResourceProvider` backed by a
//!   reader
//! - [`Location`] — one location-table record
//! - [`ByteOrder`] — declared integer byte order of an image

pub mod error;
pub mod location;
pub mod provider;
pub mod reader;
pub mod writer;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{ImageError, ImageResult};
pub use location::{ByteOrder, Location};
pub use provider::ImageProvider;
pub use reader::ImageReader;
pub use writer::ImageWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rimfs_core::{ImageFs, ResourceProvider};

    fn sample_resources() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("mod.one/java/foo/Foo.class", b"class Foo" as &[u8]),
            ("mod.one/java/foo/inner/Deep.class", b"class Deep"),
            ("mod.two/java/bar/Bar.class", b"class Bar"),
            ("mod.two/conf/settings", b"key=value"),
        ]
    }

    fn build_image(order: ByteOrder) -> Vec<u8> {
        let mut writer = ImageWriter::new(order);
        for (path, bytes) in sample_resources() {
            writer.add_resource(path, bytes).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn write_read_roundtrip_both_orders() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let reader = ImageReader::from_bytes(build_image(order)).unwrap();
            assert_eq!(reader.byte_order().unwrap(), order);
            for (path, bytes) in sample_resources() {
                let loc = reader
                    .find_location_abs(&format!("/{path}"))
                    .unwrap_or_else(|| panic!("missing entry for {path}"));
                assert_eq!(reader.read_content(&loc).unwrap(), bytes);
            }
        }
    }

    #[test]
    fn image_backs_a_full_filesystem() {
        let reader = ImageReader::from_bytes(build_image(ByteOrder::Big)).unwrap();
        let provider = Arc::new(ImageProvider::from_reader(reader).unwrap());
        let fs = ImageFs::new(provider as Arc<dyn ResourceProvider>, false);

        let root = fs.find_node("").expect("root");
        let subroots: Vec<&str> = root
            .children()
            .unwrap()
            .iter()
            .map(|n| n.path())
            .collect();
        assert_eq!(subroots, ["/modules", "/packages"]);

        let deep = fs
            .find_node("/modules/mod.one/java/foo/inner/Deep.class")
            .expect("deep resource");
        assert_eq!(deep.content().unwrap(), b"class Deep");

        let packages = fs.find_node("/packages").expect("packages root");
        let package_names: Vec<&str> = packages
            .children()
            .unwrap()
            .iter()
            .map(|n| rimfs_types::file_name(n.path()))
            .collect();
        assert_eq!(
            package_names,
            ["conf", "java", "java.bar", "java.foo", "java.foo.inner"]
        );
    }

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("runtime.rimg");

        let mut writer = ImageWriter::new(ByteOrder::Little);
        for (path, bytes) in sample_resources() {
            writer.add_resource(path, bytes).unwrap();
        }
        writer.write_to(&image_path).unwrap();

        let provider = Arc::new(ImageProvider::open(&image_path).unwrap());
        let fs = ImageFs::new(Arc::clone(&provider) as Arc<dyn ResourceProvider>, false);
        let node = fs
            .find_node("/modules/mod.two/conf/settings")
            .expect("resource");
        assert_eq!(node.content().unwrap(), b"key=value");

        provider.close();
        assert!(matches!(
            node.content(),
            Err(rimfs_core::VfsError::Io(_))
        ));
    }
}
