//! Writing ZIP archives.

use crate::error::Error;
use crate::time::to_zip_time;
use fedfs::{
    ArchiveEntry, EntryType, FsError, FsResult, IoBuffer, IoBufferPool, OutputService, OutputStream,
};
use log::debug;
use std::collections::HashMap;
use std::io::{self, Read};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

struct Pending {
    entry: ArchiveEntry,
    content: IoBuffer,
}

/// Output service which assembles a new ZIP archive and writes it to the
/// parent stream on close.
pub struct ZipOutput {
    stream: Option<OutputStream>,
    entries: Vec<Pending>,
    by_name: HashMap<(String, EntryType), usize>,
    pool: IoBufferPool,
    compress: bool,
}

impl ZipOutput {
    /// `compress` applies to entries without a compression preference.
    pub fn new(stream: OutputStream, pool: IoBufferPool, compress: bool) -> Self {
        Self {
            stream: Some(stream),
            entries: Vec::new(),
            by_name: HashMap::new(),
            pool,
            compress,
        }
    }

    fn write_archive(&mut self) -> Result<IoBuffer, Error> {
        let mut zip = ZipWriter::new(self.pool.allocate());
        for pending in &mut self.entries {
            let options = Self::options_for(self.compress, &pending.entry);
            match pending.entry.kind {
                EntryType::Directory => {
                    zip.add_directory(pending.entry.name.as_str(), options)?;
                }
                EntryType::File => {
                    zip.start_file(pending.entry.name.as_str(), options)?;
                    pending.content.rewind()?;
                    io::copy(&mut pending.content, &mut zip)?;
                }
            }
        }
        let mut buffer = zip.finish()?;
        buffer.rewind()?;
        Ok(buffer)
    }

    fn options_for(compress: bool, entry: &ArchiveEntry) -> SimpleFileOptions {
        let method = match entry.kind {
            EntryType::File if entry.compressed.unwrap_or(compress) => CompressionMethod::Deflated,
            _ => CompressionMethod::Stored,
        };
        let mut options = SimpleFileOptions::default()
            .compression_method(method)
            .large_file(entry.size.unwrap_or(0) >= u64::from(u32::MAX));
        if let Some(time) = entry.modified.and_then(to_zip_time) {
            options = options.last_modified_time(time);
        }
        options
    }
}

impl OutputService for ZipOutput {
    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry> {
        self.by_name
            .get(&(name.to_string(), kind))
            .map(|&position| self.entries[position].entry.clone())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn write_entry(&mut self, mut entry: ArchiveEntry, content: &mut dyn Read) -> FsResult<()> {
        if self.stream.is_none() {
            return Err(FsError::OutputClosed);
        }
        if entry.name.is_empty() {
            // the root directory has no entry of its own
            return Ok(());
        }
        let mut buffer = self.pool.allocate();
        if entry.kind == EntryType::File {
            io::copy(content, &mut buffer)?;
            entry.size = Some(buffer.len());
        }
        let key = (entry.name.clone(), entry.kind);
        let pending = Pending {
            entry,
            content: buffer,
        };
        match self.by_name.get(&key) {
            Some(&position) => self.entries[position] = pending,
            None => {
                self.by_name.insert(key, self.entries.len());
                self.entries.push(pending);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        let mut stream = self.stream.take().ok_or(FsError::OutputClosed)?;
        let mut buffer = match self.write_archive() {
            Ok(buffer) => buffer,
            Err(err) => {
                stream.discard();
                return Err(err.into());
            }
        };
        debug!(
            "writing zip archive {} with {} entries ({} bytes)",
            stream.name(),
            self.entries.len(),
            buffer.len()
        );
        self.entries.clear();
        self.by_name.clear();
        io::copy(&mut buffer, &mut stream)?;
        stream.finish()
    }

    fn discard(&mut self) {
        self.entries.clear();
        self.by_name.clear();
        if let Some(stream) = self.stream.take() {
            debug!("discarding zip archive {}", stream.name());
            stream.discard();
        }
    }
}
