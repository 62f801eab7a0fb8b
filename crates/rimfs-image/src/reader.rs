use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{ImageError, ImageResult};
use crate::location::{ByteOrder, Location, LOCATION_RECORD_SIZE};

pub(crate) const MAGIC: &[u8; 4] = b"RIMG";
pub(crate) const VERSION: u32 = 1;

// magic + endian marker + version, loc_count, strings_len, content_len,
// content_crc.
pub(crate) const HEADER_SIZE: usize = 4 + 1 + 4 * 5;

/// Pseudo-module holding the `/modules/...` directory structure.
pub(crate) const PSEUDO_MODULES: &str = "modules";
/// Pseudo-module holding the `/packages/...` structure.
pub(crate) const PSEUDO_PACKAGES: &str = "packages";

// Full-name key for the lookup index: "/<module>[/<path>]".
pub(crate) fn full_key(module: &str, path: &str) -> String {
    if path.is_empty() {
        format!("/{module}")
    } else {
        format!("/{module}/{path}")
    }
}

/// Random-access decoder for a packed runtime image.
///
/// Parses the header, location table, and string table once at open,
/// verifies the content checksum, and indexes every record by full
/// name. Cloning shares the underlying handle.
///
/// The reader is a scoped resource: [`close`](ImageReader::close)
/// releases the loaded image early, after which content reads fail
/// with [`ImageError::Closed`] and lookups observe absence. Dropping
/// the last handle releases it as well.
#[derive(Clone)]
pub struct ImageReader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    state: RwLock<Option<LoadedImage>>,
}

struct LoadedImage {
    order: ByteOrder,
    locations: Vec<Location>,
    lookup: HashMap<String, u32>,
    strings: Vec<u8>,
    content: Vec<u8>,
}

impl ImageReader {
    /// Reads and parses an image file from disk.
    pub fn open(path: &Path) -> ImageResult<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Parses an image from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> ImageResult<Self> {
        let image = LoadedImage::parse(data)?;
        debug!(
            locations = image.locations.len(),
            strings = image.strings.len(),
            content = image.content.len(),
            "image opened"
        );
        Ok(Self {
            inner: Arc::new(ReaderInner {
                state: RwLock::new(Some(image)),
            }),
        })
    }

    /// Releases the loaded image. Idempotent.
    pub fn close(&self) {
        let released = self
            .inner
            .state
            .write()
            .expect("lock poisoned")
            .take()
            .is_some();
        if released {
            debug!("image closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.read().expect("lock poisoned").is_none()
    }

    fn with_image<R>(&self, op: impl FnOnce(&LoadedImage) -> ImageResult<R>) -> ImageResult<R> {
        let guard = self.inner.state.read().expect("lock poisoned");
        match guard.as_ref() {
            Some(image) => op(image),
            None => Err(ImageError::Closed),
        }
    }

    pub fn byte_order(&self) -> ImageResult<ByteOrder> {
        self.with_image(|image| Ok(image.order))
    }

    /// Looks up a record by its full name, e.g.
    /// `/java.base/java/lang/Integer.class`. Absent (and closed) images
    /// yield `None`.
    pub fn find_location_abs(&self, full_name: &str) -> Option<Location> {
        self.with_image(|image| {
            Ok(image
                .lookup
                .get(full_name)
                .and_then(|&offset| image.location_at(offset).ok().cloned()))
        })
        .ok()
        .flatten()
    }

    /// Looks up a record by module and module-relative path; an empty
    /// path names the module (or pseudo-module) root entry.
    pub fn find_location(&self, module: &str, path: &str) -> Option<Location> {
        self.find_location_abs(&full_key(module, path))
    }

    pub fn verify_location(&self, module: &str, path: &str) -> bool {
        self.find_location(module, path).is_some()
    }

    /// The record at a location-table byte offset, as referenced from a
    /// pseudo-directory's child-offset array.
    pub fn location_at(&self, offset: u32) -> ImageResult<Location> {
        self.with_image(|image| image.location_at(offset).cloned())
    }

    pub fn module_name(&self, loc: &Location) -> ImageResult<String> {
        self.with_image(|image| Ok(image.string_at(loc.module_off)?.to_string()))
    }

    pub fn base(&self, loc: &Location) -> ImageResult<String> {
        self.with_image(|image| Ok(image.string_at(loc.base_off)?.to_string()))
    }

    /// File name extension, or `None` for entries without one (string
    /// offset 0 is reserved for the empty string).
    pub fn extension(&self, loc: &Location) -> ImageResult<Option<String>> {
        self.with_image(|image| {
            if loc.ext_off == 0 {
                Ok(None)
            } else {
                Ok(Some(image.string_at(loc.ext_off)?.to_string()))
            }
        })
    }

    /// Content bytes of a record, decompressed when flagged.
    pub fn read_content(&self, loc: &Location) -> ImageResult<Vec<u8>> {
        self.with_image(|image| image.read_content(loc))
    }

    /// Child records of a pseudo-directory, in stored order. The
    /// directory's content is a u32 offset per child, in the image's
    /// declared byte order.
    pub fn children_of(&self, dir: &Location) -> ImageResult<Vec<Location>> {
        self.with_image(|image| {
            let bytes = image.read_content(dir)?;
            if bytes.len() % 4 != 0 {
                return Err(ImageError::corrupt(
                    dir.offset.into(),
                    "truncated child offset array",
                ));
            }
            let mut children = Vec::with_capacity(bytes.len() / 4);
            for chunk in bytes.chunks_exact(4) {
                let offset = image.order.read_u32(chunk);
                children.push(image.location_at(offset)?.clone());
            }
            Ok(children)
        })
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LoadedImage {
    fn parse(data: Vec<u8>) -> ImageResult<LoadedImage> {
        if data.len() < HEADER_SIZE {
            return Err(ImageError::corrupt(0, "image too short"));
        }
        if &data[0..4] != MAGIC {
            return Err(ImageError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let order =
            ByteOrder::from_marker(data[4]).ok_or(ImageError::InvalidByteOrder(data[4]))?;
        let version = order.read_u32(&data[5..9]);
        if version != VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let loc_count = order.read_u32(&data[9..13]) as usize;
        let strings_len = order.read_u32(&data[13..17]) as usize;
        let content_len = order.read_u32(&data[17..21]) as usize;
        let content_crc = order.read_u32(&data[21..25]);

        let table_len = loc_count
            .checked_mul(LOCATION_RECORD_SIZE)
            .ok_or_else(|| ImageError::corrupt(0, "location table overflow"))?;
        let expected_len = HEADER_SIZE + table_len + strings_len + content_len;
        if data.len() != expected_len {
            return Err(ImageError::corrupt(
                0,
                format!("size mismatch: expected {expected_len}, got {}", data.len()),
            ));
        }
        let strings_start = HEADER_SIZE + table_len;
        let content_start = strings_start + strings_len;

        let content = data[content_start..].to_vec();
        if crc32fast::hash(&content) != content_crc {
            return Err(ImageError::ChecksumMismatch);
        }
        let strings = data[strings_start..content_start].to_vec();

        let mut locations = Vec::with_capacity(loc_count);
        for index in 0..loc_count {
            let offset = index * LOCATION_RECORD_SIZE;
            let record = &data[HEADER_SIZE + offset..HEADER_SIZE + offset + LOCATION_RECORD_SIZE];
            let loc = Location::parse(offset as u32, record, order);
            let end = u64::from(loc.content_off) + u64::from(loc.content_len);
            if end > content_len as u64 {
                return Err(ImageError::corrupt(
                    offset as u64,
                    "content range out of bounds",
                ));
            }
            locations.push(loc);
        }

        let mut image = LoadedImage {
            order,
            locations,
            lookup: HashMap::with_capacity(loc_count),
            strings,
            content,
        };
        let mut lookup = HashMap::with_capacity(loc_count);
        for loc in &image.locations {
            let name = image.full_name(loc)?;
            if lookup.insert(name.clone(), loc.offset).is_some() {
                return Err(ImageError::corrupt(
                    loc.offset.into(),
                    format!("duplicate entry {name:?}"),
                ));
            }
        }
        image.lookup = lookup;
        Ok(image)
    }

    fn string_at(&self, offset: u32) -> ImageResult<&str> {
        let start = offset as usize;
        if start >= self.strings.len() {
            return Err(ImageError::corrupt(
                offset.into(),
                "string offset out of range",
            ));
        }
        let end = self.strings[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|nul| start + nul)
            .ok_or_else(|| ImageError::corrupt(offset.into(), "unterminated string"))?;
        std::str::from_utf8(&self.strings[start..end])
            .map_err(|_| ImageError::corrupt(offset.into(), "string is not UTF-8"))
    }

    fn location_at(&self, offset: u32) -> ImageResult<&Location> {
        if offset as usize % LOCATION_RECORD_SIZE != 0 {
            return Err(ImageError::corrupt(
                offset.into(),
                "misaligned location offset",
            ));
        }
        self.locations
            .get(offset as usize / LOCATION_RECORD_SIZE)
            .ok_or_else(|| ImageError::corrupt(offset.into(), "location offset out of range"))
    }

    fn read_content(&self, loc: &Location) -> ImageResult<Vec<u8>> {
        let start = loc.content_off as usize;
        let stored = &self.content[start..start + loc.content_len as usize];
        if loc.is_compressed() {
            let plain = zstd::decode_all(stored)
                .map_err(|e| ImageError::DecompressionFailed(e.to_string()))?;
            if plain.len() != loc.plain_len as usize {
                return Err(ImageError::corrupt(
                    loc.offset.into(),
                    format!(
                        "size mismatch: expected {}, got {}",
                        loc.plain_len,
                        plain.len()
                    ),
                ));
            }
            Ok(plain)
        } else {
            if stored.len() != loc.plain_len as usize {
                return Err(ImageError::corrupt(
                    loc.offset.into(),
                    "plain length mismatch",
                ));
            }
            Ok(stored.to_vec())
        }
    }

    // "/<module>/<parent>/<base>.<ext>" for resources,
    // "/<pseudo-module>[/<base>]" for pseudo entries.
    fn full_name(&self, loc: &Location) -> ImageResult<String> {
        let module = self.string_at(loc.module_off)?;
        let base = self.string_at(loc.base_off)?;
        if module == PSEUDO_MODULES || module == PSEUDO_PACKAGES {
            return Ok(full_key(module, base));
        }
        let parent = self.string_at(loc.parent_off)?;
        let mut name = format!("/{module}");
        if !parent.is_empty() {
            name.push('/');
            name.push_str(parent);
        }
        name.push('/');
        name.push_str(base);
        if loc.ext_off != 0 {
            name.push('.');
            name.push_str(self.string_at(loc.ext_off)?);
        }
        Ok(name)
    }
}
