//! Capabilities the indexing layer needs from the underlying container.
//!
//! The session only ever talks to these traits, so the header slot and index
//! logic stay independent of how entries are actually encoded.

use std::path::{Path, PathBuf};

use crate::Result;

/// Physical placement of an entry that was just appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlacement {
    /// First block of the entry (including any long-name extension blocks)
    pub header_offset: u64,
    /// First payload byte
    pub data_offset: u64,
    /// Payload length
    pub size: u64,
}

/// Entry kind, decoupled from the codec's own type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Full entry metadata decoded at a header offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
    pub size: u64,
    pub header_offset: u64,
    pub data_offset: u64,
}

/// How unpacked members are materialized on disk.
///
/// The stored `rwx` bits are always applied, minus `mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Also restore setuid, setgid and sticky bits
    pub preserve_permissions: bool,
    pub preserve_mtime: bool,
    /// Restore the stored uid/gid as-is instead of leaving the caller's
    pub numeric_owner: bool,
    /// Mode bits cleared on every unpacked entry, umask style
    pub mask: u32,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            preserve_permissions: true,
            preserve_mtime: true,
            numeric_owner: false,
            mask: 0,
        }
    }
}

/// Sequential container access: append entries at the end, decode them back
/// at known offsets.
pub trait ArchiveCodec {
    /// Offset where the next appended entry will start.
    fn end(&self) -> u64;

    /// Physical length of the container.
    fn len(&mut self) -> Result<u64>;

    /// Appends a regular file from disk under `name`.
    fn append_file(&mut self, source: &Path, name: &str) -> Result<EntryPlacement>;

    /// Appends an in-memory payload under `name`.
    fn append_bytes(&mut self, name: &str, data: &[u8]) -> Result<EntryPlacement>;

    /// Decodes the entry starting at `header_offset`, `None` at end-of-archive.
    fn entry_at(&mut self, header_offset: u64) -> Result<Option<EntryInfo>>;

    /// Reads `len` raw bytes at `offset`.
    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Materializes the entry at `header_offset` under `destination`,
    /// returning the written path.
    fn unpack_at(
        &mut self,
        header_offset: u64,
        destination: &Path,
        options: &UnpackOptions,
    ) -> Result<PathBuf>;

    /// Positions the writer after the entry whose payload spans
    /// `data_offset..data_offset + size`, and after any entries following it.
    fn resume_after(&mut self, data_offset: u64, size: u64) -> Result<u64>;

    /// Terminates the container and flushes it to stable storage.
    fn finish(&mut self) -> Result<()>;
}

/// Seek-and-overwrite access, used only to patch the header slot.
pub trait RandomAccessWriter {
    /// Overwrites `bytes` at `offset` and restores the prior position.
    /// Never changes the container length.
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
}
