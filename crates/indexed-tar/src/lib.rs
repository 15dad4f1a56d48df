//! Uncompressed tar archives with an embedded index for one-seek member access.
//!
//! Archives stay plain tar files: any tar reader lists and extracts them. The
//! first entry (`_tar_offset.bin`) is a 16-byte slot holding the offset and
//! size of the index, which is written as the last entry (`_tar_index.json`)
//! when the archive is closed:
//!
//! ```text
//! _tar_offset.bin header | (index offset, index size) ----------+
//! member 1 header | member 1 data                               |
//! ...                                                           |
//! member N header | member N data                               |
//! _tar_index.json header | [[name, header, data, size], ...] <--+
//! ```
//!
//! Appending writes new members after the current index and a new index
//! generation after them, then repoints the slot. Older generations stay in
//! the file but are never read again.

pub mod codec;
pub mod error;
pub mod format;
pub mod header;
pub mod index;
pub mod query;
pub mod session;
pub mod tar_codec;

#[cfg(test)]
mod testing;

pub use codec::{
    ArchiveCodec, EntryInfo, EntryKind, EntryPlacement, RandomAccessWriter, UnpackOptions,
};
pub use error::{IndexedTarError, Result};
pub use format::{IndexPointer, Member, HEADER_SLOT_NAME, INDEX_NAME};
pub use header::HeaderSlot;
pub use index::IndexStore;
pub use query::{Lookup, Matcher, Resolved};
pub use session::{IndexedTar, Mode};
pub use tar_codec::TarCodec;
