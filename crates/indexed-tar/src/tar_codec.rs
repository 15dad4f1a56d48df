use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tar::{Archive, Builder, Entry, EntryType, Header};

use crate::codec::{
    ArchiveCodec, EntryInfo, EntryKind, EntryPlacement, RandomAccessWriter, UnpackOptions,
};
use crate::format::{padded, padded_end, BLOCK_SIZE, END_OF_ARCHIVE_LEN};
use crate::{IndexedTarError, Result};

/// Leading bytes of the compressed containers we refuse to open.
const COMPRESSED_MAGIC: &[(&str, &[u8])] = &[
    ("gzip", &[0x1f, 0x8b]),
    ("bzip2", b"BZh"),
    ("xz", &[0xfd, b'7', b'z', b'X', b'Z', 0x00]),
    ("zstd", &[0x28, 0xb5, 0x2f, 0xfd]),
    ("lzma", &[0x5d, 0x00, 0x00]),
];

/// Uncompressed tar container backed by a single file.
///
/// Each append leaves a complete end-of-archive marker behind it, so the file
/// is a valid tar between any two operations; the next append overwrites the
/// marker.
pub struct TarCodec {
    file: File,
    end: u64,
}

impl TarCodec {
    /// Creates a new container, failing if `path` already exists.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file, end: 0 })
    }

    /// Opens an existing uncompressed container.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(writable).open(path)?;
        reject_compressed(&mut file)?;
        Ok(Self { file, end: 0 })
    }

    fn append_with<F>(&mut self, size: u64, write: F) -> Result<EntryPlacement>
    where
        F: FnOnce(&mut Builder<&mut File>) -> io::Result<()>,
    {
        let header_offset = self.end;
        self.file.seek(SeekFrom::Start(header_offset))?;

        let mut builder = Builder::new(&mut self.file);
        write(&mut builder)?;
        let entry_end = builder.get_mut().stream_position()?;
        // writes the end-of-archive marker after the entry
        builder.into_inner()?;

        self.end = entry_end;
        Ok(EntryPlacement {
            header_offset,
            data_offset: entry_end - padded(size),
            size,
        })
    }
}

fn reject_compressed(file: &mut File) -> Result<()> {
    let mut head = [0u8; 6];
    let mut n = 0;
    while n < head.len() {
        match file.read(&mut head[n..])? {
            0 => break,
            k => n += k,
        }
    }
    file.seek(SeekFrom::Start(0))?;

    for (kind, magic) in COMPRESSED_MAGIC {
        if head[..n].starts_with(magic) {
            return Err(IndexedTarError::Format(format!(
                "{kind} compressed archives are not supported"
            )));
        }
    }
    Ok(())
}

fn undecodable(offset: u64) -> impl FnOnce(io::Error) -> IndexedTarError {
    move |e| IndexedTarError::Format(format!("undecodable entry at offset {offset}: {e}"))
}

fn entry_info<R: Read>(entry: &Entry<'_, R>, base: u64) -> io::Result<EntryInfo> {
    let header = entry.header();
    let entry_type = header.entry_type();
    let kind = if entry_type.is_file() {
        EntryKind::File
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    };

    Ok(EntryInfo {
        name: entry.path()?.to_string_lossy().into_owned(),
        kind,
        mode: header.mode()?,
        uid: header.uid()?,
        gid: header.gid()?,
        mtime: header.mtime()?,
        size: entry.size(),
        header_offset: base,
        data_offset: base + entry.raw_file_position(),
    })
}

impl ArchiveCodec for TarCodec {
    fn end(&self) -> u64 {
        self.end
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn append_file(&mut self, source: &Path, name: &str) -> Result<EntryPlacement> {
        let size = fs::metadata(source)?.len();
        self.append_with(size, |b| b.append_path_with_name(source, name))
    }

    fn append_bytes(&mut self, name: &str, data: &[u8]) -> Result<EntryPlacement> {
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(mtime);

        self.append_with(data.len() as u64, |b| b.append_data(&mut header, name, data))
    }

    fn entry_at(&mut self, header_offset: u64) -> Result<Option<EntryInfo>> {
        let len = self.len()?;
        if header_offset.checked_add(BLOCK_SIZE).map_or(true, |e| e > len) {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(header_offset))?;

        let mut archive = Archive::new(&mut self.file);
        let mut entries = archive.entries()?;
        match entries.next() {
            None => Ok(None),
            Some(entry) => {
                let entry = entry.map_err(undecodable(header_offset))?;
                entry_info(&entry, header_offset)
                    .map(Some)
                    .map_err(undecodable(header_offset))
            }
        }
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| IndexedTarError::Format(format!("read of {len} bytes is too large")))?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn unpack_at(
        &mut self,
        header_offset: u64,
        destination: &Path,
        options: &UnpackOptions,
    ) -> Result<PathBuf> {
        self.file.seek(SeekFrom::Start(header_offset))?;

        let mut archive = Archive::new(&mut self.file);
        archive.set_preserve_permissions(options.preserve_permissions);
        archive.set_preserve_mtime(options.preserve_mtime);
        archive.set_preserve_ownerships(options.numeric_owner);
        archive.set_mask(options.mask);

        let mut entries = archive.entries()?;
        let mut entry = entries.next().ok_or_else(|| {
            IndexedTarError::Format(format!("no entry at offset {header_offset}"))
        })??;

        let name = entry.path()?.into_owned();
        if !entry.unpack_in(destination)? {
            return Err(IndexedTarError::Validation(format!(
                "{} escapes {}",
                name.display(),
                destination.display()
            )));
        }
        Ok(destination.join(name))
    }

    fn resume_after(&mut self, data_offset: u64, size: u64) -> Result<u64> {
        let past = |offset: u64, size: u64| {
            padded_end(offset, size).ok_or_else(|| {
                IndexedTarError::Format(format!(
                    "entry at {offset} with {size} bytes runs past any archive"
                ))
            })
        };
        let mut end = past(data_offset, size)?;
        while let Some(entry) = self.entry_at(end)? {
            end = past(entry.data_offset, entry.size)?;
        }
        self.end = end;
        Ok(end)
    }

    fn finish(&mut self) -> Result<()> {
        // drop stale bytes a previous writer left past the marker
        let terminated = self.end + END_OF_ARCHIVE_LEN;
        if self.len()? > terminated {
            self.file.set_len(terminated)?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}

impl RandomAccessWriter for TarCodec {
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let prior = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.seek(SeekFrom::Start(prior))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placements_follow_block_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();

        let a = codec.append_bytes("a", &[1u8; 10]).unwrap();
        assert_eq!(a.header_offset, 0);
        assert_eq!(a.data_offset, 512);
        assert_eq!(a.size, 10);

        let b = codec.append_bytes("b", &[2u8; 600]).unwrap();
        assert_eq!(b.header_offset, 1024);
        assert_eq!(b.data_offset, 1536);
        assert_eq!(codec.end(), 1536 + 1024);

        // marker written after the last entry
        assert_eq!(codec.len().unwrap(), codec.end() + END_OF_ARCHIVE_LEN);
        assert_eq!(codec.read_at(b.data_offset, 600).unwrap(), vec![2u8; 600]);
    }

    #[test]
    fn long_names_resolve_from_header_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();
        let name = format!("{}/leaf.bin", "d".repeat(180));

        let placed = codec.append_bytes(&name, b"payload").unwrap();
        let info = codec.entry_at(placed.header_offset).unwrap().unwrap();
        assert_eq!(info.name, name);
        assert_eq!(info.data_offset, placed.data_offset);
        assert_eq!(info.kind, EntryKind::File);
        assert_eq!(codec.read_at(placed.data_offset, 7).unwrap(), b"payload");
    }

    #[test]
    fn entry_at_end_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();
        codec.append_bytes("a", b"x").unwrap();
        let end = codec.end();
        assert!(codec.entry_at(end).unwrap().is_none());
        assert!(codec.entry_at(end + 1_000_000).unwrap().is_none());
    }

    #[test]
    fn resume_walks_trailing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();
        let a = codec.append_bytes("a", b"x").unwrap();
        let b = codec.append_bytes("b", b"yy").unwrap();
        let after_b = codec.end();

        assert_eq!(codec.resume_after(a.data_offset, a.size).unwrap(), after_b);
        assert_eq!(codec.resume_after(b.data_offset, b.size).unwrap(), after_b);
    }

    #[test]
    fn resume_rejects_overflowing_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();
        assert!(matches!(
            codec.resume_after(u64::MAX - 10, 100),
            Err(IndexedTarError::Format(_))
        ));
    }

    #[test]
    fn reopened_entries_decode_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tar");
        let src = dir.path().join("src.bin");
        fs::write(&src, b"from disk").unwrap();
        {
            let mut codec = TarCodec::create(&path).unwrap();
            codec.append_bytes("slot", &[0u8; 16]).unwrap();
            codec.append_file(&src, "src.bin").unwrap();
            codec.finish().unwrap();
        }

        let mut codec = TarCodec::open(&path, false).unwrap();
        let slot = codec.entry_at(0).unwrap().unwrap();
        assert_eq!(slot.name, "slot");
        assert_eq!((slot.uid, slot.gid, slot.mode), (0, 0, 0o644));
        assert_eq!(slot.size, 16);

        let file = codec.entry_at(1024).unwrap().unwrap();
        assert_eq!(file.name, "src.bin");
        assert_eq!(codec.read_at(file.data_offset, file.size).unwrap(), b"from disk");
    }

    #[test]
    fn garbage_headers_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.tar");
        fs::write(&path, vec![b'A'; 2048]).unwrap();
        let mut codec = TarCodec::open(&path, false).unwrap();
        assert!(matches!(
            codec.entry_at(0),
            Err(IndexedTarError::Format(_))
        ));
    }

    #[test]
    fn write_at_restores_position_and_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = TarCodec::create(&dir.path().join("t.tar")).unwrap();
        let placed = codec.append_bytes("a", &[0u8; 16]).unwrap();
        let len = codec.len().unwrap();

        codec.write_at(placed.data_offset, &[7u8; 16]).unwrap();
        assert_eq!(codec.len().unwrap(), len);
        assert_eq!(codec.read_at(placed.data_offset, 16).unwrap(), vec![7u8; 16]);
    }

    #[test]
    fn rejects_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tar.gz");
        fs::write(&path, [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0]).unwrap();
        assert!(matches!(
            TarCodec::open(&path, false),
            Err(IndexedTarError::Format(_))
        ));
    }

    #[test]
    fn create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tar");
        fs::write(&path, b"").unwrap();
        match TarCodec::create(&path) {
            Err(IndexedTarError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
