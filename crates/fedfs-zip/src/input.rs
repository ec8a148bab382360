//! Reading ZIP archives.

use crate::error::{Error, Result};
use crate::time::to_system_time;
use fedfs::{
    ArchiveEntry, EntryType, FsError, FsResult, InputService, InputStream, IoBuffer, IoBufferPool,
};
use log::trace;
use std::collections::HashMap;
use std::io::{self, Read};
use zip::ZipArchive;

/// An entry of the central directory.
#[derive(Debug, Clone)]
struct ZipEntry {
    index: usize,
    entry: ArchiveEntry,
}

/// Input service over a ZIP archive spooled into an [`IoBuffer`].
pub struct ZipInput {
    archive: Option<ZipArchive<IoBuffer>>,
    entries: Vec<ZipEntry>,
    by_name: HashMap<(String, EntryType), usize>,
    pool: IoBufferPool,
}

impl ZipInput {
    /// Parse the central directory of `buffer`.
    pub fn new(mut buffer: IoBuffer, pool: IoBufferPool) -> Result<Self> {
        buffer.rewind()?;
        let mut archive = ZipArchive::new(buffer)?;
        let mut entries: Vec<ZipEntry> = Vec::with_capacity(archive.len());
        let mut by_name = HashMap::new();

        for index in 0..archive.len() {
            let file = archive.by_index_raw(index)?;
            if file.encrypted() {
                return Err(Error::Encrypted(file.name().to_string()));
            }
            let (name, kind) = match file.name().strip_suffix('/') {
                Some(dir) => (dir.to_string(), EntryType::Directory),
                None => (file.name().to_string(), EntryType::File),
            };
            let mut entry = ArchiveEntry::new(name.clone(), kind);
            if kind == EntryType::File {
                entry.size = Some(file.size());
                entry.compressed = Some(file.compression() != zip::CompressionMethod::Stored);
            }
            let modified: Option<zip::DateTime> = Option::from(file.last_modified());
            entry.modified = modified.and_then(to_system_time);

            // a later entry of the same name shadows the earlier one
            if let Some(previous) = by_name.insert((name, kind), entries.len()) {
                trace!("duplicate zip entry {}", entries[previous].entry.name);
            }
            entries.push(ZipEntry { index, entry });
        }

        Ok(Self {
            archive: Some(archive),
            entries,
            by_name,
            pool,
        })
    }

    fn lookup(&self, name: &str, kind: EntryType) -> Option<&ZipEntry> {
        self.by_name
            .get(&(name.to_string(), kind))
            .map(|&position| &self.entries[position])
    }
}

impl InputService for ZipInput {
    fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }

    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry> {
        self.lookup(name, kind).map(|e| e.entry.clone())
    }

    fn open(&mut self, name: &str) -> FsResult<InputStream> {
        let index = self
            .lookup(name, EntryType::File)
            .map(|e| e.index)
            .ok_or_else(|| FsError::EntryNotFound(name.to_string()))?;
        let archive = self.archive.as_mut().ok_or(FsError::InputClosed)?;

        // entries are inflated into a buffer of their own so that the
        // stream does not borrow the archive
        let mut buffer = self.pool.allocate();
        let mut file = archive.by_index(index).map_err(Error::from)?;
        io::copy(&mut file, &mut buffer)?;
        drop(file);
        buffer.rewind()?;
        Ok(InputStream::new(buffer))
    }

    fn close(&mut self) -> FsResult<()> {
        self.archive = None;
        Ok(())
    }
}

/// Spool the whole of `input` into a buffer.
pub(crate) fn spool(input: &mut dyn Read, pool: &IoBufferPool) -> io::Result<IoBuffer> {
    let mut buffer = pool.allocate();
    io::copy(input, &mut buffer)?;
    buffer.rewind()?;
    Ok(buffer)
}
