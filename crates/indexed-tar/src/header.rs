use tracing::{debug, Span};

use crate::codec::{ArchiveCodec, RandomAccessWriter};
use crate::format::{IndexPointer, HEADER_SLOT_NAME, HEADER_SLOT_SIZE};
use crate::{IndexedTarError, Result};

/// The fixed-size first entry holding the pointer to the current index
/// generation. Written once at creation, afterwards only patched in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSlot {
    data_offset: u64,
}

impl HeaderSlot {
    /// Writes the placeholder slot. Must be the first entry of the container.
    pub fn reserve<C: ArchiveCodec>(codec: &mut C, span: &Span) -> Result<Self> {
        if codec.end() != 0 {
            return Err(IndexedTarError::State(
                "header slot must be reserved at archive creation".to_string(),
            ));
        }
        let placed = codec.append_bytes(HEADER_SLOT_NAME, &IndexPointer::PLACEHOLDER.to_bytes())?;
        debug!(parent: span, data_offset = placed.data_offset, "header slot reserved");
        Ok(Self {
            data_offset: placed.data_offset,
        })
    }

    /// Decodes the first entry and the pointer it holds.
    pub fn read<C: ArchiveCodec>(codec: &mut C, span: &Span) -> Result<(Self, IndexPointer)> {
        let first = codec
            .entry_at(0)
            .map_err(|e| match e {
                IndexedTarError::Io(e) => {
                    IndexedTarError::Format(format!("unreadable header slot: {e}"))
                }
                other => other,
            })?
            .ok_or_else(|| IndexedTarError::Format("archive has no entries".to_string()))?;
        if first.name != HEADER_SLOT_NAME {
            return Err(IndexedTarError::Format(format!(
                "first entry is {:?}, not an indexed tar header slot",
                first.name
            )));
        }
        if first.size != HEADER_SLOT_SIZE {
            return Err(IndexedTarError::Format(format!(
                "header slot payload is {} bytes, expected {HEADER_SLOT_SIZE}",
                first.size
            )));
        }

        let slot = Self {
            data_offset: first.data_offset,
        };
        let container_len = codec.len()?;
        if slot.end() > container_len {
            return Err(IndexedTarError::Format(format!(
                "header slot at {} is cut off by the end of the archive ({container_len} bytes)",
                slot.data_offset
            )));
        }
        let raw = codec.read_at(slot.data_offset, HEADER_SLOT_SIZE)?;
        let pointer = IndexPointer::from_bytes(&raw)?.validate(slot.end(), container_len)?;
        debug!(
            parent: span,
            slot = slot.data_offset,
            index_offset = pointer.offset,
            index_size = pointer.size,
            "header slot read"
        );
        Ok((slot, pointer))
    }

    /// Overwrites the slot payload with `pointer`, leaving the writer where it was.
    pub fn patch<W: RandomAccessWriter + ArchiveCodec>(
        &self,
        writer: &mut W,
        pointer: IndexPointer,
        span: &Span,
    ) -> Result<()> {
        if self.end() > writer.len()? {
            return Err(IndexedTarError::Format(format!(
                "header slot at {} lies past the end of the archive",
                self.data_offset
            )));
        }
        debug!(
            parent: span,
            slot = self.data_offset,
            index_offset = pointer.offset,
            index_size = pointer.size,
            "patching header slot"
        );
        writer.write_at(self.data_offset, &pointer.to_bytes())
    }

    /// First byte after the slot payload.
    pub fn end(&self) -> u64 {
        self.data_offset + HEADER_SLOT_SIZE
    }
}
