//! In-memory codec used to drive the session without touching tar.
//!
//! Entry layout: `[name_len: u64 BE][size: u64 BE][name][payload]`, no
//! padding. A zero `name_len` or the end of the buffer ends the archive.

use std::{
    cell::RefCell,
    fs,
    io,
    path::{Path, PathBuf},
    rc::Rc,
};

use crate::codec::{
    ArchiveCodec, EntryInfo, EntryKind, EntryPlacement, RandomAccessWriter, UnpackOptions,
};
use crate::{IndexedTarError, Result};

const ENTRY_HEADER: u64 = 16;

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryCodec {
    buf: Rc<RefCell<Vec<u8>>>,
    end: u64,
}

impl MemoryCodec {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Another codec over the same bytes, positioned at the start.
    pub(crate) fn reopen(&self) -> Self {
        Self {
            buf: Rc::clone(&self.buf),
            end: 0,
        }
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.buf.borrow().clone()
    }

    fn write_entry(&mut self, name: &str, data: &[u8]) -> EntryPlacement {
        let header_offset = self.end;
        let mut raw = Vec::with_capacity(ENTRY_HEADER as usize + name.len() + data.len());
        raw.extend_from_slice(&(name.len() as u64).to_be_bytes());
        raw.extend_from_slice(&(data.len() as u64).to_be_bytes());
        raw.extend_from_slice(name.as_bytes());
        let data_offset = header_offset + raw.len() as u64;
        raw.extend_from_slice(data);

        let mut buf = self.buf.borrow_mut();
        let start = header_offset as usize;
        let stop = (start + raw.len()).min(buf.len());
        let written = raw.len() as u64;
        buf.splice(start..stop, raw);
        self.end = header_offset + written;

        EntryPlacement {
            header_offset,
            data_offset,
            size: data.len() as u64,
        }
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

impl ArchiveCodec for MemoryCodec {
    fn end(&self) -> u64 {
        self.end
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.buf.borrow().len() as u64)
    }

    fn append_file(&mut self, source: &Path, name: &str) -> Result<EntryPlacement> {
        let data = fs::read(source)?;
        Ok(self.write_entry(name, &data))
    }

    fn append_bytes(&mut self, name: &str, data: &[u8]) -> Result<EntryPlacement> {
        Ok(self.write_entry(name, data))
    }

    fn entry_at(&mut self, header_offset: u64) -> Result<Option<EntryInfo>> {
        let buf = self.buf.borrow();
        let at = header_offset as usize;
        if at + ENTRY_HEADER as usize > buf.len() {
            return Ok(None);
        }
        let name_len = read_u64(&buf, at);
        if name_len == 0 {
            return Ok(None);
        }
        let size = read_u64(&buf, at + 8);
        let name_start = at + ENTRY_HEADER as usize;
        let data_offset = header_offset + ENTRY_HEADER + name_len;
        if data_offset + size > buf.len() as u64 {
            return Err(IndexedTarError::Format(format!(
                "truncated entry at {header_offset}"
            )));
        }
        let name = String::from_utf8_lossy(&buf[name_start..name_start + name_len as usize]);
        Ok(Some(EntryInfo {
            name: name.into_owned(),
            kind: EntryKind::File,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            size,
            header_offset,
            data_offset,
        }))
    }

    fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let buf = self.buf.borrow();
        let (start, stop) = (offset as usize, (offset + len) as usize);
        if stop > buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(buf[start..stop].to_vec())
    }

    fn unpack_at(
        &mut self,
        header_offset: u64,
        destination: &Path,
        _options: &UnpackOptions,
    ) -> Result<PathBuf> {
        let info = self.entry_at(header_offset)?.ok_or_else(|| {
            IndexedTarError::Format(format!("no entry at offset {header_offset}"))
        })?;
        let data = self.read_at(info.data_offset, info.size)?;
        let path = destination.join(&info.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(path)
    }

    fn resume_after(&mut self, data_offset: u64, size: u64) -> Result<u64> {
        let mut end = data_offset + size;
        while let Some(e) = self.entry_at(end)? {
            end = e.data_offset + e.size;
        }
        self.end = end;
        Ok(end)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RandomAccessWriter for MemoryCodec {
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut buf = self.buf.borrow_mut();
        let start = offset as usize;
        if start + bytes.len() > buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        buf[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
