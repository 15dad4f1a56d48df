use rustc_hash::FxHashMap;
use tracing::{debug, Span};

use crate::codec::ArchiveCodec;
use crate::format::{IndexPointer, Member, INDEX_NAME};
use crate::{IndexedTarError, Result};

/// In-memory index: members in physical insertion order plus a name map for
/// constant-time exact lookups.
///
/// Fully materialized on load and on persist; memory grows linearly with the
/// member count.
#[derive(Debug, Default, Clone)]
pub struct IndexStore {
    members: Vec<Member>,
    by_name: FxHashMap<String, Vec<usize>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: Vec<Member>) -> Self {
        let mut by_name: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (pos, m) in members.iter().enumerate() {
            by_name.entry(m.name.clone()).or_default().push(pos);
        }
        Self { members, by_name }
    }

    pub fn push(&mut self, member: Member) -> &Member {
        let pos = self.members.len();
        self.by_name.entry(member.name.clone()).or_default().push(pos);
        self.members.push(member);
        &self.members[pos]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[inline]
    pub fn get(&self, pos: usize) -> Option<&Member> {
        self.members.get(pos)
    }

    #[inline]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Positions of every member called `name`, in insertion order.
    #[inline]
    pub fn positions_of(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.members)
            .map_err(|e| IndexedTarError::Format(format!("index encode: {e}")))
    }

    /// Decodes one index generation and checks every member against the
    /// container length.
    pub fn decode(bytes: &[u8], container_len: u64) -> Result<Self> {
        let members: Vec<Member> = serde_json::from_slice(bytes)
            .map_err(|e| IndexedTarError::Format(format!("index decode: {e}")))?;
        for m in &members {
            m.check_bounds(container_len)?;
        }
        Ok(Self::from_members(members))
    }

    /// Loads the generation `pointer` refers to.
    pub fn load<C: ArchiveCodec>(codec: &mut C, pointer: IndexPointer, span: &Span) -> Result<Self> {
        let container_len = codec.len()?;
        let in_range = pointer
            .offset
            .checked_add(pointer.size)
            .is_some_and(|end| end <= container_len);
        if !in_range {
            return Err(IndexedTarError::Format(format!(
                "index ({}, {}) is outside the archive ({container_len} bytes)",
                pointer.offset, pointer.size
            )));
        }

        let raw = codec.read_at(pointer.offset, pointer.size)?;
        let store = Self::decode(&raw, container_len)?;
        debug!(
            parent: span,
            index_offset = pointer.offset,
            index_size = pointer.size,
            members = store.len(),
            "index loaded"
        );
        Ok(store)
    }

    /// Appends the current members as a new generation at the end of the
    /// container and returns the pointer to it.
    pub fn persist<C: ArchiveCodec>(&self, codec: &mut C, span: &Span) -> Result<IndexPointer> {
        let raw = self.encode()?;
        let placed = codec.append_bytes(INDEX_NAME, &raw)?;
        debug!(
            parent: span,
            index_offset = placed.data_offset,
            index_size = placed.size,
            members = self.len(),
            "index persisted"
        );
        Ok(IndexPointer {
            offset: placed.data_offset,
            size: placed.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, header_offset: u64, size: u64) -> Member {
        Member {
            name: name.to_string(),
            header_offset,
            data_offset: header_offset + 512,
            size,
        }
    }

    #[test]
    fn duplicate_names_keep_every_position() {
        let mut store = IndexStore::new();
        store.push(member("a", 0, 1));
        store.push(member("b", 1024, 1));
        store.push(member("a", 2048, 1));

        assert_eq!(store.positions_of("a"), &[0, 2]);
        assert_eq!(store.positions_of("b"), &[1]);
        assert!(store.positions_of("zzz").is_empty());
    }

    #[test]
    fn decode_rebuilds_name_map() {
        let store = IndexStore::from_members(vec![member("x", 0, 3), member("y", 1024, 3)]);
        let raw = store.encode().unwrap();
        let back = IndexStore::decode(&raw, 4096).unwrap();
        assert_eq!(back.members(), store.members());
        assert_eq!(back.positions_of("y"), &[1]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            IndexStore::decode(b"not json", 4096),
            Err(IndexedTarError::Format(_))
        ));
        assert!(matches!(
            IndexStore::decode(br#"[["a", 1, 2]]"#, 4096),
            Err(IndexedTarError::Format(_))
        ));
    }

    #[test]
    fn decode_rejects_members_past_the_end() {
        let store = IndexStore::from_members(vec![member("x", 0, 3000)]);
        let raw = store.encode().unwrap();
        assert!(matches!(
            IndexStore::decode(&raw, 2048),
            Err(IndexedTarError::Format(_))
        ));
    }
}
