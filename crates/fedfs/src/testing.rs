//! A tiny archive format for unit tests: a JSON object mapping entry names
//! to their text, directories with a trailing `/`.

use crate::controller::FsController;
use crate::driver::{ArchiveDriver, InputService, OutputService};
use crate::entry::{ArchiveEntry, EntryType};
use crate::error::{FsError, FsResult};
use crate::io::{InputStream, IoBufferPool, OutputStream};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::AccessOptions;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) fn write_container(path: &Path, entries: &[(&str, &str)]) {
    let map: BTreeMap<&str, &str> = entries.iter().copied().collect();
    std::fs::write(path, serde_json::to_vec(&map).unwrap()).unwrap();
}

pub(crate) fn read_container(path: &Path) -> BTreeMap<String, String> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn key(name: &str, kind: EntryType) -> String {
    match kind {
        EntryType::File => name.to_string(),
        EntryType::Directory => format!("{}/", name),
    }
}

fn entry_for(key: &str, text: &str) -> ArchiveEntry {
    match key.strip_suffix('/') {
        Some(dir) => ArchiveEntry::new(dir, EntryType::Directory),
        None => ArchiveEntry::new(key, EntryType::File).with_size(text.len() as u64),
    }
}

#[derive(Debug, Default)]
pub(crate) struct JsonDriver {
    inputs: AtomicUsize,
    // (write locked, read holds) of the current thread when mounting
    observations: Mutex<Vec<(bool, usize)>>,
}

impl JsonDriver {
    pub(crate) fn input_services(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_observations(&self) -> Vec<(bool, usize)> {
        self.observations.lock().clone()
    }
}

impl ArchiveDriver for JsonDriver {
    fn new_input_service(
        &self,
        model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        _pool: &IoBufferPool,
    ) -> FsResult<Box<dyn InputService>> {
        let lock = model.lock_handle();
        self.observations
            .lock()
            .push((lock.is_write_locked_by_current_thread(), lock.read_hold_count()));
        self.inputs.fetch_add(1, Ordering::SeqCst);

        let data = parent.input(options, name)?.read_to_vec()?;
        let entries = serde_json::from_slice(&data)
            .map_err(|e| FsError::InvalidArchive(e.to_string()))?;
        Ok(Box::new(JsonInput {
            entries,
            closed: false,
        }))
    }

    fn new_output_service(
        &self,
        _model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        _source: Option<&dyn InputService>,
        _pool: &IoBufferPool,
    ) -> FsResult<Box<dyn OutputService>> {
        let stream = parent.output(options, name, None)?;
        Ok(Box::new(JsonOutput {
            entries: BTreeMap::new(),
            stream: Some(stream),
        }))
    }
}

struct JsonInput {
    entries: BTreeMap<String, String>,
    closed: bool,
}

impl InputService for JsonInput {
    fn entries(&self) -> Vec<ArchiveEntry> {
        self.entries.iter().map(|(k, v)| entry_for(k, v)).collect()
    }

    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry> {
        let key = key(name, kind);
        self.entries.get(&key).map(|text| entry_for(&key, text))
    }

    fn open(&mut self, name: &str) -> FsResult<InputStream> {
        if self.closed {
            return Err(FsError::InputClosed);
        }
        let text = self
            .entries
            .get(name)
            .ok_or_else(|| FsError::EntryNotFound(name.to_string()))?;
        Ok(InputStream::new(Cursor::new(text.clone().into_bytes())))
    }

    fn close(&mut self) -> FsResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct JsonOutput {
    entries: BTreeMap<String, String>,
    stream: Option<OutputStream>,
}

impl OutputService for JsonOutput {
    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry> {
        let key = key(name, kind);
        self.entries.get(&key).map(|text| entry_for(&key, text))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn write_entry(&mut self, entry: ArchiveEntry, content: &mut dyn Read) -> FsResult<()> {
        let mut text = String::new();
        content.read_to_string(&mut text)?;
        self.entries.insert(key(&entry.name, entry.kind), text);
        Ok(())
    }

    fn close(&mut self) -> FsResult<()> {
        let mut stream = self.stream.take().ok_or(FsError::OutputClosed)?;
        let data = serde_json::to_vec(&self.entries)
            .map_err(|e| FsError::InvalidArchive(e.to_string()))?;
        stream.write_all(&data)?;
        stream.finish()
    }

    fn discard(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.discard();
        }
    }
}
