//! Lookups over the index.
//!
//! A [`Lookup`] walks the index in physical order and can be reversed with
//! `.rev()`. It borrows the store immutably, so calling the same lookup again
//! always replays the same sequence. [`Resolved`] turns each hit into full
//! entry metadata through the codec.

use std::ops::Range;
use std::slice;

use glob::Pattern;
use regex::Regex;

use crate::codec::{ArchiveCodec, EntryInfo};
use crate::format::Member;
use crate::index::IndexStore;
use crate::{IndexedTarError, Result};

#[derive(Debug, Clone)]
pub enum Matcher {
    /// Name equality, answered from the name map
    Exact(String),
    /// Shell-style wildcard; `*` also crosses `/`
    Wildcard(Pattern),
    /// Unanchored regular expression search
    Regex(Regex),
}

impl Matcher {
    pub fn exact(name: impl Into<String>) -> Self {
        Self::Exact(name.into())
    }

    pub fn wildcard(pattern: &str) -> Result<Self> {
        Pattern::new(pattern).map(Self::Wildcard).map_err(|e| {
            IndexedTarError::Validation(format!("invalid wildcard {pattern:?}: {e}"))
        })
    }

    pub fn regex(re: &str) -> Result<Self> {
        Regex::new(re)
            .map(Self::Regex)
            .map_err(|e| IndexedTarError::Validation(format!("invalid regex {re:?}: {e}")))
    }

    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(n) => n == name,
            Self::Wildcard(p) => p.matches(name),
            Self::Regex(r) => r.is_match(name),
        }
    }
}

#[derive(Debug, Clone)]
enum Positions<'a> {
    Named(slice::Iter<'a, usize>),
    All(Range<usize>),
}

/// Lazy, finite sequence of members accepted by a [`Matcher`].
#[derive(Debug, Clone)]
pub struct Lookup<'a> {
    store: &'a IndexStore,
    positions: Positions<'a>,
    matcher: Matcher,
}

impl IndexStore {
    pub fn lookup(&self, matcher: Matcher) -> Lookup<'_> {
        let positions = match &matcher {
            Matcher::Exact(name) => Positions::Named(self.positions_of(name).iter()),
            _ => Positions::All(0..self.len()),
        };
        Lookup {
            store: self,
            positions,
            matcher,
        }
    }
}

impl<'a> Lookup<'a> {
    #[inline]
    fn accept(&self, pos: usize) -> Option<&'a Member> {
        let m = self.store.get(pos)?;
        self.matcher.matches(&m.name).then_some(m)
    }
}

impl<'a> Iterator for Lookup<'a> {
    type Item = &'a Member;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let pos = match &mut self.positions {
                Positions::Named(it) => *it.next()?,
                Positions::All(r) => r.next()?,
            };
            if let Some(m) = self.accept(pos) {
                return Some(m);
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.positions {
            Positions::Named(it) => it.size_hint(),
            Positions::All(r) => (0, Some(r.len())),
        }
    }
}

impl DoubleEndedIterator for Lookup<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            let pos = match &mut self.positions {
                Positions::Named(it) => *it.next_back()?,
                Positions::All(r) => r.next_back()?,
            };
            if let Some(m) = self.accept(pos) {
                return Some(m);
            }
        }
    }
}

/// [`Lookup`] hits decoded into full metadata, one codec seek per member.
pub struct Resolved<'a, C> {
    lookup: Lookup<'a>,
    codec: &'a mut C,
}

impl<'a, C: ArchiveCodec> Resolved<'a, C> {
    pub(crate) fn new(lookup: Lookup<'a>, codec: &'a mut C) -> Self {
        Self { lookup, codec }
    }
}

pub(crate) fn resolve<C: ArchiveCodec>(codec: &mut C, member: &Member) -> Result<EntryInfo> {
    codec.entry_at(member.header_offset)?.ok_or_else(|| {
        IndexedTarError::Format(format!(
            "no entry at offset {} for member {:?}",
            member.header_offset, member.name
        ))
    })
}

impl<C: ArchiveCodec> Iterator for Resolved<'_, C> {
    type Item = Result<EntryInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let m = self.lookup.next()?;
        Some(resolve(&mut *self.codec, m))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lookup.size_hint()
    }
}

impl<C: ArchiveCodec> DoubleEndedIterator for Resolved<'_, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let m = self.lookup.next_back()?;
        Some(resolve(&mut *self.codec, m))
    }
}
