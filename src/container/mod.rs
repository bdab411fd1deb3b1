//! # Container Format
//!
//! A container is a `ContainerHeader` followed by `Number` entry records, concatenated
//! back-to-back with no offsets table:
//!
//! ```text
//! ContainerHeader  Name[32] | Author[16] | Type[8] | Number u32 BE           = 60 bytes
//! EntryHeader      Name[32] | Key[K] | IV[V] | OriginSize u32 BE | CryptSize u32 BE
//! Payload          CryptSize bytes
//! ```
//!
//! `K` and `V` depend on the algorithm tag in `Type` (see [`EntryLayout`]). Text fields
//! are zero-padded on the right; decoding strips the padding. Entries must be walked in
//! order because only `CryptSize` tells where the next header begins.

mod field;

pub use field::FixedField;

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::algorithm::Algorithm;
use crate::error::{Result, SealError};

pub const NAME_WIDTH: usize = 32;
pub const AUTHOR_WIDTH: usize = 16;
pub const TYPE_WIDTH: usize = 8;
pub const SIZE_WIDTH: usize = 4;
pub const CONTAINER_HEADER_LEN: usize = NAME_WIDTH + AUTHOR_WIDTH + TYPE_WIDTH + SIZE_WIDTH;

/// Producer identifier written into every container.
pub const AUTHOR: &str = "bulkseal";

/// Largest size representable in a length field.
pub const MAX_FIELD_SIZE: u64 = u32::MAX as u64;

/// Encode a length as a 4-byte big-endian field.
pub fn encode_size(size: usize) -> Result<[u8; SIZE_WIDTH]> {
    let size = size as u64;
    if size > MAX_FIELD_SIZE {
        return Err(SealError::SizeOverflow { size });
    }
    Ok((size as u32).to_be_bytes())
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> &'a [u8] {
    let out = &bytes[*cursor..*cursor + n];
    *cursor += n;
    out
}

fn take_u32(bytes: &[u8], cursor: &mut usize) -> u32 {
    let mut buf = [0u8; SIZE_WIDTH];
    buf.copy_from_slice(take(bytes, cursor, SIZE_WIDTH));
    u32::from_be_bytes(buf)
}

/// Represents the header at the start of every container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub name: FixedField<NAME_WIDTH>,
    pub author: FixedField<AUTHOR_WIDTH>,
    pub kind: FixedField<TYPE_WIDTH>,
    pub number: u32,
}

impl ContainerHeader {
    /// Validates every field against its capacity.
    pub fn new(name: &str, author: &str, kind: &str, count: usize) -> Result<Self> {
        let number = u32::from_be_bytes(encode_size(count)?);
        Ok(Self {
            name: FixedField::new("name", name.as_bytes())?,
            author: FixedField::new("author", author.as_bytes())?,
            kind: FixedField::new("type", kind.as_bytes())?,
            number,
        })
    }

    pub fn encode(&self) -> [u8; CONTAINER_HEADER_LEN] {
        let mut out = [0u8; CONTAINER_HEADER_LEN];
        let number = self.number.to_be_bytes();
        let parts: [&[u8]; 4] =
            [self.name.as_bytes(), self.author.as_bytes(), self.kind.as_bytes(), &number];
        let mut i = 0usize;
        for part in parts {
            out[i..i + part.len()].copy_from_slice(part);
            i += part.len();
        }
        debug_assert_eq!(i, CONTAINER_HEADER_LEN);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONTAINER_HEADER_LEN {
            return Err(SealError::TruncatedHeader {
                needed: CONTAINER_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let mut c = 0usize;
        Ok(Self {
            name: FixedField::from_slice(take(bytes, &mut c, NAME_WIDTH)),
            author: FixedField::from_slice(take(bytes, &mut c, AUTHOR_WIDTH)),
            kind: FixedField::from_slice(take(bytes, &mut c, TYPE_WIDTH)),
            number: take_u32(bytes, &mut c),
        })
    }

    pub fn name(&self) -> Result<String> {
        self.name.to_text()
    }

    pub fn author(&self) -> Result<String> {
        self.author.to_text()
    }

    /// The algorithm named by the Type field.
    pub fn algorithm(&self) -> Result<Algorithm> {
        let tag = self.kind.to_text()?;
        Algorithm::from_tag(&tag)
            .ok_or_else(|| SealError::NotAContainer(format!("unknown type tag '{tag}'")))
    }
}

/// Algorithm-dependent widths of an entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    pub key_width: usize,
    pub iv_width: usize,
}

impl EntryLayout {
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        Self { key_width: algorithm.key_width(), iv_width: algorithm.iv_width() }
    }

    /// Encoded header length.
    pub fn len(&self) -> usize {
        NAME_WIDTH + self.key_width + self.iv_width + 2 * SIZE_WIDTH
    }
}

/// Header preceding each entry's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub name: FixedField<NAME_WIDTH>,
    /// Exactly `layout.key_width` bytes, zero-padded.
    pub key: Vec<u8>,
    /// Exactly `layout.iv_width` bytes.
    pub iv: Vec<u8>,
    pub origin_size: u32,
    pub crypt_size: u32,
}

impl EntryHeader {
    pub fn new(
        layout: EntryLayout,
        name: &str,
        key: &[u8],
        iv: &[u8],
        origin_size: usize,
        crypt_size: usize,
    ) -> Result<Self> {
        let name = FixedField::new("name", name.as_bytes())?;
        if key.len() > layout.key_width {
            return Err(SealError::KeyTooLong { len: key.len(), capacity: layout.key_width });
        }
        if iv.len() > layout.iv_width {
            return Err(SealError::FieldTooLong {
                field: "iv",
                len: iv.len(),
                capacity: layout.iv_width,
            });
        }
        let mut key_field = vec![0u8; layout.key_width];
        key_field[..key.len()].copy_from_slice(key);
        let mut iv_field = vec![0u8; layout.iv_width];
        iv_field[..iv.len()].copy_from_slice(iv);
        Ok(Self {
            name,
            key: key_field,
            iv: iv_field,
            origin_size: u32::from_be_bytes(encode_size(origin_size)?),
            crypt_size: u32::from_be_bytes(encode_size(crypt_size)?),
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.origin_size.to_be_bytes());
        out.extend_from_slice(&self.crypt_size.to_be_bytes());
    }

    pub fn decode(bytes: &[u8], layout: EntryLayout) -> Result<Self> {
        let needed = layout.len();
        if bytes.len() < needed {
            return Err(SealError::TruncatedHeader { needed, available: bytes.len() });
        }
        let mut c = 0usize;
        Ok(Self {
            name: FixedField::from_slice(take(bytes, &mut c, NAME_WIDTH)),
            key: take(bytes, &mut c, layout.key_width).to_vec(),
            iv: take(bytes, &mut c, layout.iv_width).to_vec(),
            origin_size: take_u32(bytes, &mut c),
            crypt_size: take_u32(bytes, &mut c),
        })
    }

    pub fn name(&self) -> Result<String> {
        self.name.to_text()
    }

    pub fn origin_size(&self) -> usize {
        self.origin_size as usize
    }

    pub fn crypt_size(&self) -> usize {
        self.crypt_size as usize
    }
}

/// Entry names are plain base names that fit the Name field. Pack refuses a source
/// whose name breaks this before reading it, and unpack refuses to restore one.
pub fn check_entry_name(name: &str) -> Result<()> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();
    if unsafe_name {
        return Err(SealError::UnsafeEntryName { name: name.to_owned() });
    }
    FixedField::<NAME_WIDTH>::new("name", name.as_bytes())?;
    Ok(())
}

/// One entry header plus where its payload sits in the container.
#[derive(Debug, Clone)]
pub struct EntryLocation {
    pub header: EntryHeader,
    pub payload_offset: u64,
}

/// Parsed container structure.
#[derive(Debug, Clone)]
pub struct ContainerIndex {
    pub header: ContainerHeader,
    pub algorithm: Algorithm,
    pub entries: Vec<EntryLocation>,
}

/// An entry borrowed from an in-memory container.
#[derive(Debug, Clone)]
pub struct EntryRecord<'a> {
    pub header: EntryHeader,
    pub payload: &'a [u8],
}

/// Walk headers sequentially, seeking past payloads. `origin` is only used for error context.
pub fn scan<R: Read + Seek>(reader: &mut R, len: u64, origin: &Path) -> Result<ContainerIndex> {
    reader.seek(SeekFrom::Start(0)).map_err(SealError::io(origin))?;

    if len < CONTAINER_HEADER_LEN as u64 {
        return Err(SealError::NotAContainer(format!(
            "{len} bytes is shorter than the {CONTAINER_HEADER_LEN}-byte header"
        )));
    }
    let mut head = [0u8; CONTAINER_HEADER_LEN];
    reader.read_exact(&mut head).map_err(SealError::io(origin))?;
    let header = ContainerHeader::decode(&head)?;
    let algorithm = header.algorithm()?;
    let layout = EntryLayout::for_algorithm(algorithm);

    let count = header.number as u64;
    let mut pos = CONTAINER_HEADER_LEN as u64;
    if count.saturating_mul(layout.len() as u64) > len - pos {
        return Err(SealError::NotAContainer(format!(
            "header declares {count} entries but only {} bytes follow",
            len - pos
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut buf = vec![0u8; layout.len()];
    for i in 0..count {
        if len - pos < layout.len() as u64 {
            return Err(SealError::NotAContainer(format!(
                "header declares {count} entries, data ends after {i}"
            )));
        }
        reader.read_exact(&mut buf).map_err(SealError::io(origin))?;
        let entry = EntryHeader::decode(&buf, layout)?;
        pos += layout.len() as u64;

        let available = len - pos;
        if (entry.crypt_size as u64) > available {
            return Err(SealError::TruncatedEntry {
                name: entry.name.to_text_lossy(),
                declared: entry.crypt_size(),
                available: available as usize,
            });
        }
        let payload_offset = pos;
        pos += entry.crypt_size as u64;
        reader.seek(SeekFrom::Start(pos)).map_err(SealError::io(origin))?;
        entries.push(EntryLocation { header: entry, payload_offset });
    }

    if pos != len {
        return Err(SealError::NotAContainer(format!(
            "{} trailing bytes after {count} entries",
            len - pos
        )));
    }
    Ok(ContainerIndex { header, algorithm, entries })
}

/// Parse an in-memory container, borrowing each payload.
pub fn parse(bytes: &[u8]) -> Result<(ContainerIndex, Vec<EntryRecord<'_>>)> {
    let index = scan(&mut Cursor::new(bytes), bytes.len() as u64, Path::new("<memory>"))?;
    let records = index
        .entries
        .iter()
        .map(|loc| {
            let start = loc.payload_offset as usize;
            EntryRecord {
                header: loc.header.clone(),
                payload: &bytes[start..start + loc.header.crypt_size()],
            }
        })
        .collect();
    Ok((index, records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_container() -> Vec<u8> {
        let layout = EntryLayout::for_algorithm(Algorithm::Base64);
        let mut out = ContainerHeader::new("pack.dat", AUTHOR, "B64", 2).unwrap().encode().to_vec();
        for (name, payload) in [("a.txt", &b"YQ=="[..]), ("b.txt", &b"Yg=="[..])] {
            EntryHeader::new(layout, name, &[], &[], 1, payload.len())
                .unwrap()
                .encode_into(&mut out);
            out.extend_from_slice(payload);
        }
        out
    }

    #[test]
    fn container_header_layout() {
        let h = ContainerHeader::new("out.pak", AUTHOR, "AES", 5).unwrap();
        let bytes = h.encode();
        assert_eq!(&bytes[..7], b"out.pak");
        assert!(bytes[7..32].iter().all(|&b| b == 0));
        assert_eq!(&bytes[32..40], AUTHOR.as_bytes());
        assert_eq!(&bytes[48..51], b"AES");
        assert_eq!(&bytes[56..60], &[0, 0, 0, 5]);

        let back = ContainerHeader::decode(&bytes).unwrap();
        assert_eq!(back.name().unwrap(), "out.pak");
        assert_eq!(back.algorithm().unwrap(), Algorithm::Aes);
        assert_eq!(back.number, 5);
    }

    #[test]
    fn name_capacity_boundaries() {
        let exact = "n".repeat(NAME_WIDTH);
        let h = ContainerHeader::new(&exact, AUTHOR, "DES", 1).unwrap();
        assert_eq!(ContainerHeader::decode(&h.encode()).unwrap().name().unwrap(), exact);

        let long = "n".repeat(NAME_WIDTH + 1);
        assert!(matches!(
            ContainerHeader::new(&long, AUTHOR, "DES", 1),
            Err(SealError::FieldTooLong { field: "name", len: 33, capacity: 32 })
        ));
        assert!(matches!(
            ContainerHeader::new("x", &"a".repeat(17), "DES", 1),
            Err(SealError::FieldTooLong { field: "author", .. })
        ));
        assert!(matches!(
            ContainerHeader::new("x", AUTHOR, "TOOLONGTAG", 1),
            Err(SealError::FieldTooLong { field: "type", .. })
        ));
    }

    #[test]
    fn entry_name_rule() {
        let full = "n".repeat(NAME_WIDTH);
        for ok in ["a.txt", "..hidden", "name with spaces", full.as_str()] {
            assert!(check_entry_name(ok).is_ok(), "{ok:?}");
        }
        for bad in ["", ".", "..", "../x", "a/b", "a\\b.txt", "nul\0byte", "/abs"] {
            assert!(
                matches!(check_entry_name(bad), Err(SealError::UnsafeEntryName { .. })),
                "{bad:?}"
            );
        }
        assert!(matches!(
            check_entry_name(&"n".repeat(NAME_WIDTH + 1)),
            Err(SealError::FieldTooLong { field: "name", .. })
        ));
    }

    #[test]
    fn truncated_header_is_reported() {
        assert!(matches!(
            ContainerHeader::decode(&[0u8; 10]),
            Err(SealError::TruncatedHeader { needed: 60, available: 10 })
        ));
        let layout = EntryLayout::for_algorithm(Algorithm::Aes);
        assert!(matches!(
            EntryHeader::decode(&[0u8; 20], layout),
            Err(SealError::TruncatedHeader { needed: 72, .. })
        ));
    }

    #[test]
    fn entry_header_roundtrip_keeps_key_bytes() {
        let layout = EntryLayout::for_algorithm(Algorithm::Aes);
        // Trailing zero in the key must survive decoding.
        let key = [7u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let iv = [9u8; 16];
        let h = EntryHeader::new(layout, "f.bin", &key, &iv, 300, 432).unwrap();
        let mut bytes = Vec::new();
        h.encode_into(&mut bytes);
        assert_eq!(bytes.len(), layout.len());
        let back = EntryHeader::decode(&bytes, layout).unwrap();
        assert_eq!(back.key, key);
        assert_eq!(back.iv, iv);
        assert_eq!(back.origin_size(), 300);
        assert_eq!(back.crypt_size(), 432);
        assert_eq!(back.name().unwrap(), "f.bin");
    }

    #[test]
    fn key_too_long() {
        let layout = EntryLayout::for_algorithm(Algorithm::Des);
        assert!(matches!(
            EntryHeader::new(layout, "f", &[1u8; 9], &[0u8; 8], 1, 1),
            Err(SealError::KeyTooLong { len: 9, capacity: 8 })
        ));
    }

    #[test]
    fn size_overflow() {
        assert!(encode_size(u32::MAX as usize).is_ok());
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            encode_size(u32::MAX as usize + 1),
            Err(SealError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn parse_walks_entries_in_order() {
        let bytes = tiny_container();
        let (index, records) = parse(&bytes).unwrap();
        assert_eq!(index.header.number as usize, records.len());
        assert_eq!(records[0].header.name().unwrap(), "a.txt");
        assert_eq!(records[1].payload, b"Yg==");
    }

    #[test]
    fn parse_rejects_truncated_payload() {
        let mut bytes = tiny_container();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            parse(&bytes),
            Err(SealError::TruncatedEntry { declared: 4, available: 2, .. })
        ));
    }

    #[test]
    fn parse_rejects_inconsistent_count() {
        let mut bytes = tiny_container();
        bytes[59] = 9;
        assert!(matches!(parse(&bytes), Err(SealError::NotAContainer(_))));

        let mut trailing = tiny_container();
        trailing.extend_from_slice(b"junk");
        assert!(matches!(parse(&trailing), Err(SealError::NotAContainer(_))));
    }

    #[test]
    fn parse_rejects_unknown_tag() {
        let mut bytes = tiny_container();
        bytes[48..56].copy_from_slice(b"ZIP\0\0\0\0\0");
        assert!(matches!(parse(&bytes), Err(SealError::NotAContainer(_))));
    }
}
