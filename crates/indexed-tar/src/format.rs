use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::{IndexedTarError, Result};

/// Name of the first physical entry, holding the index pointer
pub const HEADER_SLOT_NAME: &str = "_tar_offset.bin";

/// Name of every entry holding an index generation
pub const INDEX_NAME: &str = "_tar_index.json";

/// Header slot payload: two big-endian u64 (index offset, index size)
pub const HEADER_SLOT_SIZE: u64 = 16;

/// Tar block size; every entry header and payload is padded to it
pub const BLOCK_SIZE: u64 = 512;

/// Length of the end-of-archive marker (two zero blocks)
pub const END_OF_ARCHIVE_LEN: u64 = 2 * BLOCK_SIZE;

/// Payload length rounded up to the next block boundary.
#[inline]
pub fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// First byte after a payload of `size` bytes at `offset`, padding included.
/// `None` when that lies beyond `u64`.
#[inline]
pub fn padded_end(offset: u64, size: u64) -> Option<u64> {
    size.div_ceil(BLOCK_SIZE)
        .checked_mul(BLOCK_SIZE)
        .and_then(|p| offset.checked_add(p))
}

/// Pointer to the authoritative index generation, stored in the header slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPointer {
    /// Data offset of the index entry
    pub offset: u64,
    /// Index payload length in bytes
    pub size: u64,
}

impl IndexPointer {
    /// Placeholder written at creation, before any finalize.
    pub const PLACEHOLDER: Self = Self { offset: 0, size: 0 };

    pub fn to_bytes(self) -> [u8; HEADER_SLOT_SIZE as usize] {
        let mut out = [0u8; HEADER_SLOT_SIZE as usize];
        out[..8].copy_from_slice(&self.offset.to_be_bytes());
        out[8..].copy_from_slice(&self.size.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; HEADER_SLOT_SIZE as usize] = bytes.try_into().map_err(|_| {
            IndexedTarError::Format(format!(
                "header slot payload is {} bytes, expected {HEADER_SLOT_SIZE}",
                bytes.len()
            ))
        })?;
        let mut offset = [0u8; 8];
        let mut size = [0u8; 8];
        offset.copy_from_slice(&raw[..8]);
        size.copy_from_slice(&raw[8..]);
        Ok(Self {
            offset: u64::from_be_bytes(offset),
            size: u64::from_be_bytes(size),
        })
    }

    /// Rejects placeholder and out-of-range pointers.
    ///
    /// `slot_end` is the first byte after the header slot payload: a valid
    /// index generation always lives after it.
    pub fn validate(self, slot_end: u64, container_len: u64) -> Result<Self> {
        if self == Self::PLACEHOLDER || self.size == 0 {
            return Err(IndexedTarError::Format(
                "header slot holds no index pointer (archive was never finalized)".to_string(),
            ));
        }
        if self.offset < slot_end {
            return Err(IndexedTarError::Format(format!(
                "index offset {} overlaps the header slot (ends at {slot_end})",
                self.offset
            )));
        }
        match self.offset.checked_add(self.size) {
            Some(end) if end <= container_len => Ok(self),
            _ => Err(IndexedTarError::Format(format!(
                "index pointer ({}, {}) is outside the archive ({container_len} bytes)",
                self.offset, self.size
            ))),
        }
    }
}

/// One indexed archive member, with enough offsets to seek to it directly.
///
/// Serialized as the 4-tuple `[name, header_offset, data_offset, size]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "MemberRow", into = "MemberRow")]
pub struct Member {
    /// Archive-relative path
    pub name: String,
    /// Offset of the member's own entry header
    pub header_offset: u64,
    /// Offset where the payload begins
    pub data_offset: u64,
    /// Payload length in bytes
    pub size: u64,
}

type MemberRow = (String, u64, u64, u64);

impl From<MemberRow> for Member {
    fn from((name, header_offset, data_offset, size): MemberRow) -> Self {
        Self {
            name,
            header_offset,
            data_offset,
            size,
        }
    }
}

impl From<Member> for MemberRow {
    fn from(m: Member) -> Self {
        (m.name, m.header_offset, m.data_offset, m.size)
    }
}

impl Member {
    /// Checks `header_offset < data_offset <= data_offset + size <= container_len`.
    pub fn check_bounds(&self, container_len: u64) -> Result<()> {
        let end = self.data_offset.checked_add(self.size);
        match end {
            Some(end) if self.header_offset < self.data_offset && end <= container_len => Ok(()),
            _ => Err(IndexedTarError::Format(format!(
                "member {:?} (header {}, data {}, size {}) is outside the archive ({container_len} bytes)",
                self.name, self.header_offset, self.data_offset, self.size
            ))),
        }
    }
}

/// Archive name for a filesystem path: root, prefix, `.` and `..` dropped.
pub fn member_name(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for c in path.components() {
        if let Component::Normal(part) = c {
            let part = part.to_str().ok_or_else(|| {
                IndexedTarError::Validation(format!("{} is not valid UTF-8", path.display()))
            })?;
            parts.push(part);
        }
    }
    if parts.is_empty() {
        return Err(IndexedTarError::Validation(format!(
            "{} has no usable archive name",
            path.display()
        )));
    }
    Ok(parts.join("/"))
}

/// Normalizes a caller-supplied member name. Absolute names and `..`
/// components are refused rather than rewritten.
pub fn normalize_name(name: &str) -> Result<String> {
    let path = Path::new(name);
    let refused = path
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_) | Component::ParentDir));
    if refused {
        return Err(IndexedTarError::Validation(format!(
            "member name {name:?} must be relative without `..`"
        )));
    }
    member_name(path)
}

/// Fails unless `name` stays inside the directory it is unpacked into.
pub fn check_relative(name: &str) -> Result<()> {
    let escape = || {
        IndexedTarError::Validation(format!("member name {name:?} escapes the destination"))
    };
    if name.is_empty() {
        return Err(IndexedTarError::Validation("empty member name".to_string()));
    }
    let mut depth = 0usize;
    for c in Path::new(name).components() {
        match c {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(())
}
