//! PKG nested archive decoder.
//!
//! # Layout (little-endian)
//!
//! ```text
//! file    = root_offset (4 B)
//! folder  = size (4) | record_count (4) | record_size (4) | record * record_count
//! record  = size (4) | real_size (4) | raw_name (64) | display_name (64)
//!         | type (4) | negotiated_type (4) | tombstone (4) | date (4)
//!         | offset (4, absolute) | reserved (4)                    = 160 B
//! ```
//!
//! Decoding is two-pass: [`decode_folder`] builds the whole folder tree by
//! following absolute offsets, then [`load_payloads`] fetches every live
//! entry's bytes.  Folder offsets do not depend on payload layout, so the
//! passes are independent.

pub mod chunk;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Serialize, Serializer};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::codec::CodecError;
use crate::io_stream::ByteSource;

pub use chunk::{ChunkHeader, CHUNK_SIGNATURE};

/// Width of each fixed, NUL-padded name field.
pub const NAME_LEN: usize = 64;
/// Exact on-disk width of one record.
pub const RECORD_SIZE: u32 = 4 + 4 + (NAME_LEN as u32) * 2 + 4 * 6;
/// Folder nesting beyond this is treated as a corrupt (cyclic) offset graph.
pub const MAX_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum PkgError {
    #[error("Invalid record size: expected {expected}, found {found}")]
    InvalidRecordSize { expected: u32, found: u32 },
    #[error("Unknown entry type {0}")]
    UnknownEntryType(u32),
    #[error("Bad chunk signature {found:#010x} at offset {offset}")]
    BadChunkSignature { offset: u64, found: u32 },
    #[error("Chunk at offset {offset} is too short (total_len {total_len})")]
    ChunkTooShort { offset: u64, total_len: u32 },
    #[error("Chunks of '{name}' inflate past real_size {real_size} (to {would_be})")]
    ChunkOverflow { name: String, real_size: u32, would_be: u64 },
    #[error("Folder nesting exceeds {MAX_DEPTH} levels at offset {offset}")]
    TooDeep { offset: u64 },
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Text,
    Binary,
    Compressed,
    Folder,
}

impl TryFrom<u32> for EntryType {
    type Error = PkgError;

    fn try_from(v: u32) -> Result<Self, PkgError> {
        match v {
            0 => Ok(EntryType::Text),
            1 => Ok(EntryType::Binary),
            2 => Ok(EntryType::Compressed),
            3 => Ok(EntryType::Folder),
            other => Err(PkgError::UnknownEntryType(other)),
        }
    }
}

/// One fixed-width directory record.
///
/// `negotiated_type` and `reserved` are scratch fields on disk; they are
/// skipped on read and normalized (declared type, zero).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub size:            u32,
    pub real_size:       u32,
    pub raw_name:        String,
    pub display_name:    String,
    pub entry_type:      EntryType,
    pub negotiated_type: EntryType,
    pub tombstone:       u32,
    #[serde(serialize_with = "serialize_date")]
    pub date:            u32,
    pub offset:          u32,
    pub reserved:        u32,
}

impl ArchiveEntry {
    pub fn read<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, PkgError> {
        let size         = src.read_u32::<LittleEndian>()?;
        let real_size    = src.read_u32::<LittleEndian>()?;
        let raw_name     = src.read_fixed_name(NAME_LEN)?;
        let display_name = src.read_fixed_name(NAME_LEN)?;
        let entry_type   = EntryType::try_from(src.read_u32::<LittleEndian>()?)?;
        let _negotiated  = src.read_u32::<LittleEndian>()?;
        let tombstone    = src.read_u32::<LittleEndian>()?;
        let date         = src.read_u32::<LittleEndian>()?;
        let offset       = src.read_u32::<LittleEndian>()?;
        let _reserved    = src.read_u32::<LittleEndian>()?;
        Ok(Self {
            size,
            real_size,
            raw_name,
            display_name,
            entry_type,
            negotiated_type: entry_type,
            tombstone,
            date,
            offset,
            reserved: 0,
        })
    }

    pub fn is_tombstoned(&self) -> bool { self.tombstone != 0 }

    pub fn is_live_folder(&self) -> bool {
        self.entry_type == EntryType::Folder && !self.is_tombstoned()
    }

    /// Whether the second pass fetches bytes for this entry.
    pub fn has_payload(&self) -> bool {
        self.size != 0
            && self.real_size != 0
            && self.entry_type != EntryType::Folder
            && !self.is_tombstoned()
    }

    /// Name used on extraction: display name, else raw name.
    pub fn file_name(&self) -> &str {
        if self.display_name.is_empty() { &self.raw_name } else { &self.display_name }
    }
}

fn serialize_date<S: Serializer>(date: &u32, s: S) -> Result<S::Ok, S::Error> {
    match chrono::DateTime::from_timestamp(i64::from(*date), 0) {
        Some(dt) => s.serialize_str(&dt.to_rfc3339()),
        None     => s.serialize_u32(*date),
    }
}

fn serialize_payload_len<S: Serializer>(payload: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match payload {
        Some(p) => s.serialize_some(&p.len()),
        None    => s.serialize_none(),
    }
}

// ── Folders ──────────────────────────────────────────────────────────────────

/// A record together with what it owns: a sub-folder (live folder entries
/// only) or its payload (after [`load_payloads`]).
#[derive(Debug, Clone, Serialize)]
pub struct FolderItem {
    #[serde(flatten)]
    pub entry:   ArchiveEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child:   Option<Folder>,
    #[serde(rename = "payload_len", serialize_with = "serialize_payload_len")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Folder {
    pub size:         u32,
    pub record_count: u32,
    pub record_size:  u32,
    pub items:        Vec<FolderItem>,
}

impl Folder {
    /// Every live (non-tombstoned) item below this folder, depth-first in
    /// record order, with relative paths built from [`ArchiveEntry::file_name`].
    pub fn walk(&self) -> Vec<(PathBuf, &FolderItem)> {
        let mut out = Vec::new();
        self.walk_into(Path::new(""), &mut out);
        out
    }

    fn walk_into<'a>(&'a self, base: &Path, out: &mut Vec<(PathBuf, &'a FolderItem)>) {
        for item in &self.items {
            if item.entry.is_tombstoned() {
                continue;
            }
            let path = base.join(item.entry.file_name());
            out.push((path.clone(), item));
            if let Some(child) = &item.child {
                child.walk_into(&path, out);
            }
        }
    }

    /// Number of records in this folder and all live sub-folders.
    pub fn total_records(&self) -> usize {
        self.items.len()
            + self.items.iter()
                .filter_map(|i| i.child.as_ref())
                .map(Folder::total_records)
                .sum::<usize>()
    }
}

/// Pass one: read the folder at absolute `offset` and, recursively, every
/// live sub-folder.
pub fn decode_folder<S: ByteSource + ?Sized>(src: &mut S, offset: u64) -> Result<Folder, PkgError> {
    decode_folder_at(src, offset, 0)
}

fn decode_folder_at<S: ByteSource + ?Sized>(
    src:    &mut S,
    offset: u64,
    depth:  usize,
) -> Result<Folder, PkgError> {
    if depth > MAX_DEPTH {
        return Err(PkgError::TooDeep { offset });
    }
    src.seek(SeekFrom::Start(offset))?;
    let size         = src.read_u32::<LittleEndian>()?;
    let record_count = src.read_u32::<LittleEndian>()?;
    let record_size  = src.read_u32::<LittleEndian>()?;
    if record_size != RECORD_SIZE {
        warn!(offset, record_size, "folder header has wrong record size");
        return Err(PkgError::InvalidRecordSize { expected: RECORD_SIZE, found: record_size });
    }
    debug!(offset, size, record_count, depth, "folder");

    let mut entries = Vec::with_capacity((record_count as usize).min(4096));
    for _ in 0..record_count {
        let entry = ArchiveEntry::read(src)?;
        trace!(name = %entry.display_name, kind = ?entry.entry_type, size = entry.size,
               real_size = entry.real_size, tombstone = entry.tombstone, offset = entry.offset, "record");
        entries.push(entry);
    }

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let child = if entry.is_live_folder() {
            Some(decode_folder_at(src, u64::from(entry.offset), depth + 1)?)
        } else {
            None
        };
        items.push(FolderItem { entry, child, payload: None });
    }

    Ok(Folder { size, record_count, record_size, items })
}

/// Pass two: fetch the payload of every live non-folder entry, recursing
/// into sub-folders.
///
/// Payloads are assigned only once read in full; an error leaves the
/// failing item untouched and is returned unchanged.
pub fn load_payloads<S: ByteSource + ?Sized>(folder: &mut Folder, src: &mut S) -> Result<(), PkgError> {
    for item in &mut folder.items {
        if let Some(child) = item.child.as_mut() {
            load_payloads(child, src)?;
            continue;
        }
        if !item.entry.has_payload() {
            continue;
        }
        let data = match item.entry.entry_type {
            EntryType::Compressed => chunk::read_chunked(src, &item.entry)?,
            _ => {
                src.seek(SeekFrom::Start(u64::from(item.entry.offset)))?;
                src.read_vec(item.entry.size as usize)?
            }
        };
        item.payload = Some(data);
    }
    Ok(())
}

// ── Whole archive ────────────────────────────────────────────────────────────

/// A fully decoded PKG file: the folder tree with every payload loaded.
#[derive(Debug, Clone, Serialize)]
pub struct PkgArchive {
    pub root_offset: u32,
    pub root:        Folder,
}

impl PkgArchive {
    pub fn decode<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self, PkgError> {
        src.seek(SeekFrom::Start(0))?;
        let root_offset = src.read_u32::<LittleEndian>()?;
        let mut root = decode_folder(src, u64::from(root_offset))?;
        load_payloads(&mut root, src)?;
        debug!(records = root.total_records(), "archive decoded");
        Ok(Self { root_offset, root })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::{Cursor, Write};

    /// Minimal record description for building test archives.
    pub(crate) struct Rec<'a> {
        pub name:      &'a str,
        pub kind:      u32,
        pub size:      u32,
        pub real_size: u32,
        pub tombstone: u32,
        pub offset:    u32,
    }

    pub(crate) fn write_record(out: &mut Vec<u8>, r: &Rec) {
        let mut name = r.name.as_bytes().to_vec();
        name.resize(NAME_LEN, 0);
        out.write_u32::<LittleEndian>(r.size).unwrap();
        out.write_u32::<LittleEndian>(r.real_size).unwrap();
        out.write_all(&name).unwrap();
        out.write_all(&name).unwrap();
        out.write_u32::<LittleEndian>(r.kind).unwrap();
        out.write_u32::<LittleEndian>(0xFFFF_FFFF).unwrap(); // negotiated scratch
        out.write_u32::<LittleEndian>(r.tombstone).unwrap();
        out.write_u32::<LittleEndian>(1_600_000_000).unwrap();
        out.write_u32::<LittleEndian>(r.offset).unwrap();
        out.write_u32::<LittleEndian>(0xDEAD_BEEF).unwrap(); // reserved scratch
    }

    pub(crate) fn write_folder_header(out: &mut Vec<u8>, count: u32, record_size: u32) {
        out.write_u32::<LittleEndian>(12 + count * record_size).unwrap();
        out.write_u32::<LittleEndian>(count).unwrap();
        out.write_u32::<LittleEndian>(record_size).unwrap();
    }

    #[test]
    fn record_width_matches_layout() {
        let mut buf = Vec::new();
        write_record(&mut buf, &Rec { name: "x", kind: 0, size: 0, real_size: 0, tombstone: 0, offset: 0 });
        assert_eq!(buf.len(), RECORD_SIZE as usize);
        assert_eq!(RECORD_SIZE, 160);
    }

    #[test]
    fn scratch_fields_are_normalized() {
        let mut buf = Vec::new();
        write_record(&mut buf, &Rec { name: "n", kind: 2, size: 1, real_size: 1, tombstone: 0, offset: 9 });
        let e = ArchiveEntry::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(e.entry_type, EntryType::Compressed);
        assert_eq!(e.negotiated_type, EntryType::Compressed);
        assert_eq!(e.reserved, 0);
        assert_eq!(e.offset, 9);
    }

    #[test]
    fn wrong_record_size_fails_before_records() {
        let mut buf = Vec::new();
        write_folder_header(&mut buf, 1, RECORD_SIZE - 4);
        // no records follow: a size check after reading would hit EOF instead
        match decode_folder(&mut Cursor::new(buf), 0) {
            Err(PkgError::InvalidRecordSize { expected: 160, found: 156 }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut buf = Vec::new();
        write_record(&mut buf, &Rec { name: "n", kind: 7, size: 0, real_size: 0, tombstone: 0, offset: 0 });
        assert!(matches!(ArchiveEntry::read(&mut Cursor::new(buf)), Err(PkgError::UnknownEntryType(7))));
    }

    #[test]
    fn self_referencing_folder_is_too_deep() {
        let mut buf = Vec::new();
        write_folder_header(&mut buf, 1, RECORD_SIZE);
        write_record(&mut buf, &Rec { name: "loop", kind: 3, size: 0, real_size: 0, tombstone: 0, offset: 0 });
        assert!(matches!(decode_folder(&mut Cursor::new(buf), 0), Err(PkgError::TooDeep { .. })));
    }

    #[test]
    fn has_payload_rules() {
        let mut e = ArchiveEntry {
            size: 4, real_size: 4, raw_name: "r".into(), display_name: String::new(),
            entry_type: EntryType::Binary, negotiated_type: EntryType::Binary,
            tombstone: 0, date: 0, offset: 0, reserved: 0,
        };
        assert!(e.has_payload());
        assert_eq!(e.file_name(), "r");
        e.real_size = 0;
        assert!(!e.has_payload());
        e.real_size = 4;
        e.tombstone = 1;
        assert!(!e.has_payload());
    }

    #[test]
    fn date_serializes_as_rfc3339() {
        let e = ArchiveEntry {
            size: 0, real_size: 0, raw_name: "r".into(), display_name: "d".into(),
            entry_type: EntryType::Text, negotiated_type: EntryType::Text,
            tombstone: 0, date: 0, offset: 0, reserved: 0,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["date"], "1970-01-01T00:00:00+00:00");
        assert_eq!(v["entry_type"], "text");
    }
}
