use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing::{debug, error, info_span, Span};
use walkdir::WalkDir;

use crate::codec::{ArchiveCodec, EntryInfo, RandomAccessWriter, UnpackOptions};
use crate::format::{check_relative, member_name, normalize_name, Member};
use crate::header::HeaderSlot;
use crate::index::IndexStore;
use crate::query::{resolve, Matcher, Resolved};
use crate::tar_codec::TarCodec;
use crate::{IndexedTarError, Result};

/// How a session opens its archive. Compressed variants have no
/// representation; parsing one fails with `UnsupportedMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    /// Exclusive creation; fails if the path exists
    Create,
    Append,
}

impl Mode {
    #[inline]
    pub fn is_writable(self) -> bool {
        !matches!(self, Mode::Read)
    }
}

impl FromStr for Mode {
    type Err = IndexedTarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "r:" => Ok(Mode::Read),
            "x" | "x:" => Ok(Mode::Create),
            "a" | "a:" => Ok(Mode::Append),
            other => Err(IndexedTarError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Read => write!(f, "r:"),
            Mode::Create => write!(f, "x:"),
            Mode::Append => write!(f, "a:"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open(Mode),
    Finalized,
}

fn closed() -> IndexedTarError {
    IndexedTarError::State("archive is closed".to_string())
}

/// An open indexed tar archive.
///
/// Members can only be added, never removed. The index is built in memory as
/// members are added and written as the last entry when the archive is
/// closed; the header slot is then patched to point at it. Dropping an open
/// archive closes it.
pub struct IndexedTar<C: ArchiveCodec + RandomAccessWriter = TarCodec> {
    codec: Option<C>,
    index: IndexStore,
    slot: HeaderSlot,
    state: State,
    span: Span,
}

impl IndexedTar<TarCodec> {
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Self> {
        let path = path.as_ref();
        let span = info_span!("indexed_tar", path = %path.display(), %mode);
        let codec = match mode {
            Mode::Read => TarCodec::open(path, false)?,
            Mode::Create => TarCodec::create(path)?,
            Mode::Append => TarCodec::open(path, true)?,
        };
        Self::from_codec(codec, mode, span)
    }
}

impl<C: ArchiveCodec + RandomAccessWriter> IndexedTar<C> {
    /// Opens a session over an already opened container. Protocol events are
    /// logged under `span`.
    pub fn from_codec(mut codec: C, mode: Mode, span: Span) -> Result<Self> {
        let (slot, index) = match mode {
            Mode::Create => (HeaderSlot::reserve(&mut codec, &span)?, IndexStore::new()),
            Mode::Read | Mode::Append => {
                let (slot, pointer) = HeaderSlot::read(&mut codec, &span)?;
                let index = IndexStore::load(&mut codec, pointer, &span)?;
                if mode == Mode::Append {
                    let end = codec.resume_after(pointer.offset, pointer.size)?;
                    debug!(parent: &span, end, "appending after index generation");
                }
                (slot, index)
            }
        };

        Ok(Self {
            codec: Some(codec),
            index,
            slot,
            state: State::Open(mode),
            span,
        })
    }

    /// Open mode, `None` once closed.
    pub fn mode(&self) -> Option<Mode> {
        match self.state {
            State::Open(mode) => Some(mode),
            State::Finalized => None,
        }
    }

    fn open_mode(&self, op: &str) -> Result<Mode> {
        match self.state {
            State::Open(mode) => Ok(mode),
            State::Finalized => Err(IndexedTarError::State(format!(
                "cannot {op}: archive is closed"
            ))),
        }
    }

    fn ensure_writable(&self, op: &str) -> Result<()> {
        if self.open_mode(op)?.is_writable() {
            Ok(())
        } else {
            Err(IndexedTarError::State(format!(
                "cannot {op}: archive is opened read-only"
            )))
        }
    }

    pub fn index(&self) -> Result<&IndexStore> {
        self.open_mode("read the index")?;
        Ok(&self.index)
    }

    /// Number of indexed members. A plain accessor: unlike the operations
    /// above it keeps answering after `close`, with the final count.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Adds one regular file and indexes its offsets. Without `name` the
    /// member is named after `source` (root and `.`/`..` components dropped).
    pub fn add(&mut self, source: impl AsRef<Path>, name: Option<&str>) -> Result<&Member> {
        let source = source.as_ref();
        self.ensure_writable("add")?;
        if !source.is_file() {
            return Err(IndexedTarError::Validation(format!(
                "only regular files can be added, {} is not a file",
                source.display()
            )));
        }
        let name = match name {
            Some(n) => normalize_name(n)?,
            None => member_name(source)?,
        };

        let codec = self.codec.as_mut().ok_or_else(closed)?;
        let placed = codec.append_file(source, &name)?;
        debug!(
            parent: &self.span,
            source = %source.display(),
            name = %name,
            header_offset = placed.header_offset,
            data_offset = placed.data_offset,
            size = placed.size,
            "member added"
        );

        Ok(self.index.push(Member {
            name,
            header_offset: placed.header_offset,
            data_offset: placed.data_offset,
            size: placed.size,
        }))
    }

    /// Adds the regular files of `dir` (or of its whole tree with `recurse`),
    /// named relative to the directory's parent. Returns how many were added.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>, recurse: bool) -> Result<usize> {
        let dir = dir.as_ref();
        self.ensure_writable("add_dir")?;
        if !dir.is_dir() {
            return Err(IndexedTarError::Validation(format!(
                "{} must be a directory",
                dir.display()
            )));
        }

        let base = dir.file_name().map(PathBuf::from).unwrap_or_default();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(if recurse { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut added = 0usize;
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path.strip_prefix(dir).map_err(|_| {
                IndexedTarError::Validation(format!(
                    "{} is not under {}",
                    path.display(),
                    dir.display()
                ))
            })?;
            let name = member_name(&base.join(rel))?;
            self.add(path, Some(&name))?;
            added += 1;
        }

        debug!(parent: &self.span, dir = %dir.display(), recurse, added, "directory added");
        Ok(added)
    }

    /// Runs `matcher` over the index; each hit is decoded through the codec.
    /// Reverse the order with `.rev()`.
    pub fn lookup(&mut self, matcher: Matcher) -> Result<Resolved<'_, C>> {
        self.open_mode("look up members")?;
        let codec = self.codec.as_mut().ok_or_else(closed)?;
        Ok(Resolved::new(self.index.lookup(matcher), codec))
    }

    /// Members named exactly `name`, in physical order.
    pub fn get_members_by_name(&mut self, name: &str) -> Result<Resolved<'_, C>> {
        self.lookup(Matcher::exact(name))
    }

    /// Members whose name matches a shell-style wildcard.
    pub fn get_members_by_pattern(&mut self, pattern: &str) -> Result<Resolved<'_, C>> {
        let matcher = Matcher::wildcard(pattern)?;
        self.lookup(matcher)
    }

    /// Members whose name matches a regular expression anywhere.
    pub fn get_members_by_regex(&mut self, re: &str) -> Result<Resolved<'_, C>> {
        let matcher = Matcher::regex(re)?;
        self.lookup(matcher)
    }

    /// The member at `position` in physical order.
    pub fn member_at(&mut self, position: usize) -> Result<EntryInfo> {
        self.open_mode("look up members")?;
        let member = self.index.get(position).ok_or(IndexedTarError::Range {
            position,
            len: self.index.len(),
        })?;
        let codec = self.codec.as_mut().ok_or_else(closed)?;
        resolve(codec, member)
    }

    /// Payload bytes of `member`, read with a single seek.
    pub fn read_member(&mut self, member: &Member) -> Result<Vec<u8>> {
        self.open_mode("read a member")?;
        let codec = self.codec.as_mut().ok_or_else(closed)?;
        member.check_bounds(codec.len()?)?;
        codec.read_at(member.data_offset, member.size)
    }

    /// Unpacks `members` under `destination`, optionally restoring the stored
    /// uid/gid. Every name is checked before anything is written.
    pub fn extract<'m, I>(
        &mut self,
        members: I,
        destination: impl AsRef<Path>,
        numeric_owner: bool,
    ) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = &'m Member>,
    {
        let options = UnpackOptions {
            numeric_owner,
            ..UnpackOptions::default()
        };
        self.extract_with(members, destination, &options)
    }

    pub fn extract_with<'m, I>(
        &mut self,
        members: I,
        destination: impl AsRef<Path>,
        options: &UnpackOptions,
    ) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = &'m Member>,
    {
        self.open_mode("extract")?;
        let members: Vec<&Member> = members.into_iter().collect();
        let codec = self.codec.as_mut().ok_or_else(closed)?;
        unpack_members(codec, &members, destination.as_ref(), options, &self.span)
    }

    /// Unpacks every member accepted by `matcher`, or all members.
    pub fn extract_matching(
        &mut self,
        matcher: Option<Matcher>,
        destination: impl AsRef<Path>,
        options: &UnpackOptions,
    ) -> Result<Vec<PathBuf>> {
        self.open_mode("extract")?;
        let members: Vec<&Member> = match matcher {
            Some(m) => self.index.lookup(m).collect(),
            None => self.index.members().iter().collect(),
        };
        let codec = self.codec.as_mut().ok_or_else(closed)?;
        unpack_members(codec, &members, destination.as_ref(), options, &self.span)
    }

    /// Persists the index and patches the header slot (write modes), then
    /// releases the container. Valid exactly once.
    pub fn close(&mut self) -> Result<()> {
        let mode = self.open_mode("close")?;
        self.state = State::Finalized;
        let mut codec = self.codec.take().ok_or_else(closed)?;

        if mode.is_writable() {
            let pointer = self.index.persist(&mut codec, &self.span)?;
            self.slot.patch(&mut codec, pointer, &self.span)?;
            codec.finish()?;
        }
        debug!(parent: &self.span, members = self.index.len(), "archive closed");
        Ok(())
    }
}

fn unpack_members<C: ArchiveCodec>(
    codec: &mut C,
    members: &[&Member],
    destination: &Path,
    options: &UnpackOptions,
    span: &Span,
) -> Result<Vec<PathBuf>> {
    for m in members {
        check_relative(&m.name)?;
    }
    fs::create_dir_all(destination)?;

    let mut out = Vec::with_capacity(members.len());
    for m in members {
        let path = codec.unpack_at(m.header_offset, destination, options)?;
        debug!(parent: span, name = %m.name, path = %path.display(), "member extracted");
        out.push(path);
    }
    Ok(out)
}

impl<C: ArchiveCodec + RandomAccessWriter> Drop for IndexedTar<C> {
    fn drop(&mut self) {
        if let State::Open(_) = self.state {
            if let Err(e) = self.close() {
                error!(parent: &self.span, error = %e, "closing archive on drop failed");
            }
        }
    }
}
