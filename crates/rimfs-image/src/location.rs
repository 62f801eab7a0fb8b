//! Byte-order handling and the fixed-size location record.

/// Declared byte order of an image. Every multi-byte integer in the
/// container, including the child-offset arrays inside pseudo-directory
/// content, is stored in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub(crate) fn marker(self) -> u8 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }

    pub(crate) fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            0 => Some(ByteOrder::Little),
            1 => Some(ByteOrder::Big),
            _ => None,
        }
    }

    /// Reads a u32 from a 4-byte slice (caller bounds-checks).
    pub(crate) fn read_u32(self, bytes: &[u8]) -> u32 {
        let bytes: [u8; 4] = bytes.try_into().expect("u32 slice");
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    pub(crate) fn write_u32(self, buf: &mut Vec<u8>, value: u32) {
        match self {
            ByteOrder::Little => buf.extend_from_slice(&value.to_le_bytes()),
            ByteOrder::Big => buf.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

/// Size of one encoded location record.
pub(crate) const LOCATION_RECORD_SIZE: usize = 32;

/// Content flag: the stored bytes are zstd-compressed.
pub(crate) const FLAG_ZSTD: u32 = 1;

/// One location-table record.
///
/// A location names either a file resource (module + parent path +
/// base name + optional extension, content = resource bytes) or a
/// pseudo-directory (module is a pseudo-module such as `modules`, base
/// is the relative path within it, content = u32 offsets of child
/// records). The discriminator is the module-name string offset; see
/// `ImageReader` and `ImageProvider`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    /// Byte offset of this record within the location table.
    pub(crate) offset: u32,
    pub(crate) module_off: u32,
    pub(crate) parent_off: u32,
    pub(crate) base_off: u32,
    pub(crate) ext_off: u32,
    pub(crate) content_off: u32,
    pub(crate) content_len: u32,
    pub(crate) plain_len: u32,
    pub(crate) flags: u32,
}

impl Location {
    /// Byte offset of this record within the location table; the value
    /// child-offset arrays use to reference it.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.flags & FLAG_ZSTD != 0
    }

    pub(crate) fn parse(offset: u32, record: &[u8], order: ByteOrder) -> Self {
        debug_assert_eq!(record.len(), LOCATION_RECORD_SIZE);
        let field = |i: usize| order.read_u32(&record[i * 4..i * 4 + 4]);
        Self {
            offset,
            module_off: field(0),
            parent_off: field(1),
            base_off: field(2),
            ext_off: field(3),
            content_off: field(4),
            content_len: field(5),
            plain_len: field(6),
            flags: field(7),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>, order: ByteOrder) {
        for value in [
            self.module_off,
            self.parent_off,
            self.base_off,
            self.ext_off,
            self.content_off,
            self.content_len,
            self.plain_len,
            self.flags,
        ] {
            order.write_u32(buf, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip_in_both_orders() {
        let loc = Location {
            offset: 64,
            module_off: 1,
            parent_off: 2,
            base_off: 3,
            ext_off: 0,
            content_off: 100,
            content_len: 12,
            plain_len: 40,
            flags: FLAG_ZSTD,
        };
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut buf = Vec::new();
            loc.encode(&mut buf, order);
            assert_eq!(buf.len(), LOCATION_RECORD_SIZE);
            let parsed = Location::parse(64, &buf, order);
            assert_eq!(parsed, loc);
            assert!(parsed.is_compressed());
        }
    }

    #[test]
    fn byte_order_markers() {
        assert_eq!(ByteOrder::from_marker(0), Some(ByteOrder::Little));
        assert_eq!(ByteOrder::from_marker(1), Some(ByteOrder::Big));
        assert_eq!(ByteOrder::from_marker(7), None);
        assert_eq!(ByteOrder::Little.marker(), 0);
        assert_eq!(ByteOrder::Big.marker(), 1);
    }

    #[test]
    fn u32_codec_matches_declared_order() {
        let mut buf = Vec::new();
        ByteOrder::Big.write_u32(&mut buf, 0x0102_0304);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(ByteOrder::Big.read_u32(&buf), 0x0102_0304);
        assert_eq!(ByteOrder::Little.read_u32(&buf), 0x0403_0201);
    }
}
