//! Write-back cache for entry content.
//!
//! Entries accessed with [`AccessOptions::CACHE`] are read from the archive
//! once and served from memory afterwards. Writes stay in the cache until
//! the next sync flushes them, so readers never wait for the archive to be
//! rewritten.

use crate::controller::resource::ResourceAccountant;
use crate::controller::{debug_assert_shared_model, Layer};
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsResult, SyncErrorBuilder};
use crate::io::{EntrySink, InputStream, OutputStream};
use crate::lock::{LockAspect, ReentrantRwLock};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{done, retry, Attempt, Outcome, Signal};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct Content {
    data: Option<Arc<Vec<u8>>>,
    dirty: bool,
}

/// Cached content of one entry.
#[derive(Debug)]
struct CacheEntry {
    name: EntryName,
    options: AccessOptions,
    template: Option<ArchiveEntry>,
    content: Mutex<Content>,
}

impl CacheEntry {
    fn data(&self) -> Option<Arc<Vec<u8>>> {
        self.content.lock().data.clone()
    }

    fn is_dirty(&self) -> bool {
        self.content.lock().dirty
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_name: HashMap<EntryName, Arc<CacheEntry>>,
    // registration order, for flushing
    order: Vec<EntryName>,
}

impl Entries {
    fn get(&self, name: &EntryName) -> Option<Arc<CacheEntry>> {
        self.by_name.get(name).cloned()
    }

    fn insert(&mut self, entry: Arc<CacheEntry>) {
        if self.by_name.insert(entry.name.clone(), Arc::clone(&entry)).is_none() {
            self.order.push(entry.name.clone());
        }
    }

    fn remove(&mut self, name: &EntryName) {
        if self.by_name.remove(name).is_some() {
            self.order.retain(|n| n != name);
        }
    }

    fn ordered(&self) -> Vec<Arc<CacheEntry>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }

    fn clear(&mut self) {
        self.by_name.clear();
        self.order.clear();
    }

    fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Stores what is written into its cache entry, marking it dirty.
struct CacheSink {
    data: Vec<u8>,
    entry: Arc<CacheEntry>,
}

impl Write for CacheSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl EntrySink for CacheSink {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let mut content = self.entry.content.lock();
        content.data = Some(Arc::new(self.data));
        content.dirty = true;
        Ok(())
    }
}

/// Reads a shared buffer without copying it.
struct SharedReader {
    data: Cursor<Arc<Vec<u8>>>,
}

impl io::Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.data.position() as usize;
        let bytes = self.data.get_ref();
        let n = buf.len().min(bytes.len().saturating_sub(pos));
        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
        self.data.set_position((pos + n) as u64);
        Ok(n)
    }
}

pub(crate) struct CacheController {
    model: Arc<FsModel>,
    delegate: Box<dyn Layer>,
    // streams served from the cache are accounted like those of the archive
    accountant: Arc<ResourceAccountant>,
    wait_timeout: Duration,
    entries: Mutex<Entries>,
    syncing: AtomicBool,
}

impl CacheController {
    pub(crate) fn new(
        model: Arc<FsModel>,
        delegate: Box<dyn Layer>,
        accountant: Arc<ResourceAccountant>,
        wait_timeout: Duration,
    ) -> Self {
        debug_assert_shared_model(&model, delegate.as_ref());
        Self {
            model,
            delegate,
            accountant,
            wait_timeout,
            entries: Mutex::new(Entries::default()),
            syncing: AtomicBool::new(false),
        }
    }

    fn shared_stream(&self, data: Arc<Vec<u8>>) -> InputStream {
        InputStream::new(SharedReader {
            data: Cursor::new(data),
        })
        .accounted(self.accountant.register())
    }

    fn cached(&self, name: &EntryName) -> Option<Arc<CacheEntry>> {
        self.entries.lock().get(name)
    }

    /// Make sure the target has a file node for `name` before caching
    /// content for it.
    ///
    /// A redundant entry gets resolved by syncing once and growing the
    /// archive afterwards, unless the caller asked for an exclusive entry or
    /// a sync is running already.
    fn make_file(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        let options = options - AccessOptions::CACHE;
        match self.delegate.make(options, name, EntryType::File, template)? {
            Outcome::Retry(Signal::NeedsSync)
                if !options.contains(AccessOptions::EXCLUSIVE)
                    && !self.syncing.load(Ordering::Acquire) =>
            {
                match self.sync(SyncOptions::SYNC) {
                    Ok(Outcome::Done(())) => {}
                    Ok(Outcome::Retry(signal)) => return retry(signal),
                    Err(err) => {
                        debug!("{}: implicit sync failed: {}", self.model.mount_point(), err);
                        return retry(Signal::NeedsSync);
                    }
                }
                self.delegate.make(
                    options | AccessOptions::GROW,
                    name,
                    EntryType::File,
                    template,
                )
            }
            outcome => Ok(outcome),
        }
    }

    fn flush(&self, entry: &CacheEntry) -> Attempt<()> {
        let Some(data) = entry.data() else {
            return done(());
        };
        trace!("flushing {}", self.model.mount_point().resolve(&entry.name));
        let options = (entry.options - AccessOptions::CACHE - AccessOptions::EXCLUSIVE)
            | AccessOptions::GROW;
        let mut stream = attempt!(self
            .delegate
            .output(options, &entry.name, entry.template.as_ref()));
        stream.write_all(&data)?;
        stream.finish()?;
        entry.content.lock().dirty = false;
        done(())
    }

    fn sync_entries(&self, options: SyncOptions) -> Attempt<()> {
        let mut builder = SyncErrorBuilder::new();
        // a cache entry must not be flushed or cleared while it is written
        self.accountant.close_for_sync(
            options,
            self.wait_timeout,
            self.model.mount_point(),
            &mut builder,
        )?;
        if !options.contains(SyncOptions::ABORT_CHANGES) {
            let ordered = self.entries.lock().ordered();
            for entry in ordered.iter().filter(|entry| entry.is_dirty()) {
                match self.flush(entry) {
                    Ok(Outcome::Done(())) => {}
                    Ok(outcome) => return Ok(outcome),
                    Err(err) => builder.fail(err),
                }
            }
        }
        match self.delegate.sync(options) {
            Ok(Outcome::Done(())) => {}
            Ok(outcome) => return Ok(outcome),
            Err(err) => builder.absorb(err),
        }

        let mut entries = self.entries.lock();
        if options.intersects(SyncOptions::ABORT_CHANGES | SyncOptions::CLEAR_CACHE) {
            entries.clear();
        }
        if entries.is_empty() {
            self.model.set_mounted(false);
        }
        drop(entries);
        builder.check()?;
        done(())
    }
}

impl LockAspect for CacheController {
    fn lock(&self) -> &ReentrantRwLock {
        self.model.lock()
    }
}

impl Layer for CacheController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>> {
        let mut node = attempt!(self.delegate.node(options, name));
        if let (Some(node), Some(entry)) = (node.as_mut(), self.cached(name)) {
            if let (Some(file), Some(data)) = (node.file.as_mut(), entry.data()) {
                file.size = Some(data.len() as u64);
            }
        }
        done(node)
    }

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> Attempt<()> {
        self.delegate.check_access(options, name, modes)
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> Attempt<()> {
        self.delegate.set_time(options, name, modified)
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream> {
        let cached = self.cached(name);
        if cached.is_none() && !options.contains(AccessOptions::CACHE) {
            return self.delegate.input(options, name);
        }
        if let Some(data) = cached.as_ref().and_then(|entry| entry.data()) {
            return done(self.shared_stream(data));
        }

        let stream = attempt!(self.delegate.input(options - AccessOptions::CACHE, name));
        let data = Arc::new(stream.read_to_vec()?);
        let entry = cached.unwrap_or_else(|| {
            Arc::new(CacheEntry {
                name: name.clone(),
                options,
                template: None,
                content: Mutex::new(Content::default()),
            })
        });
        {
            let mut content = entry.content.lock();
            if content.data.is_none() {
                content.data = Some(Arc::clone(&data));
            }
        }
        let data = entry.data().unwrap_or(data);
        self.entries.lock().insert(entry);
        done(self.shared_stream(data))
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream> {
        let cached = self.cached(name);
        if cached.is_none() && !options.contains(AccessOptions::CACHE) {
            return self.delegate.output(options, name, template);
        }
        attempt!(self.make_file(options, name, template));
        let entry = match cached {
            Some(entry) => entry,
            None => {
                let entry = Arc::new(CacheEntry {
                    name: name.clone(),
                    options,
                    template: template.cloned(),
                    content: Mutex::new(Content::default()),
                });
                self.entries.lock().insert(Arc::clone(&entry));
                entry
            }
        };
        let sink = CacheSink {
            data: Vec::new(),
            entry,
        };
        let stream = OutputStream::new(self.model.mount_point().resolve(name), Box::new(sink));
        done(stream.accounted(self.accountant.register()))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        attempt!(self.delegate.make(options, name, kind, template));
        if kind == EntryType::File {
            self.entries.lock().remove(name);
        }
        done(())
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()> {
        attempt!(self.delegate.unlink(options, name));
        self.entries.lock().remove(name);
        done(())
    }

    fn sync(&self, options: SyncOptions) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        if self.syncing.swap(true, Ordering::AcqRel) {
            return self.delegate.sync(options);
        }
        let result = self.sync_entries(options);
        self.syncing.store(false, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::resource::ResourceController;
    use crate::controller::target::TargetArchiveController;
    use crate::error::FsError;
    use crate::controller::FsController;
    use crate::host::HostController;
    use crate::io::IoBufferPool;
    use crate::mount_point::MountPoint;
    use crate::testing::{read_container, write_container, JsonDriver};
    use std::time::Duration;
    use tempfile::TempDir;

    fn cache(dir: &TempDir) -> (Arc<FsModel>, CacheController) {
        let host_model = Arc::new(FsModel::new(MountPoint::host(dir.path()).unwrap(), None));
        let host: Arc<dyn FsController> =
            Arc::new(HostController::new(Arc::clone(&host_model)).unwrap());
        let entry = EntryName::new("c.json").unwrap();
        let mount_point =
            MountPoint::nested("json", host_model.mount_point().clone(), entry.clone()).unwrap();
        let model = Arc::new(FsModel::new(mount_point, Some(host_model)));
        let target = TargetArchiveController::new(
            Arc::clone(&model),
            host,
            entry,
            Arc::new(JsonDriver::default()),
            IoBufferPool::default(),
        );
        let accountant = ResourceAccountant::new();
        let timeout = Duration::from_millis(50);
        let resource = ResourceController::new(
            Arc::clone(&model),
            Box::new(target),
            Arc::clone(&accountant),
            timeout,
        );
        let cache =
            CacheController::new(Arc::clone(&model), Box::new(resource), accountant, timeout);
        (model, cache)
    }

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    fn write(cache: &CacheController, entry: &str, text: &str) {
        let mut out = cache
            .output(AccessOptions::CACHE | AccessOptions::CREATE_PARENTS, &name(entry), None)
            .unwrap()
            .settle()
            .unwrap();
        out.write_all(text.as_bytes()).unwrap();
        out.finish().unwrap();
    }

    fn read(cache: &CacheController, entry: &str) -> String {
        let data = cache
            .input(AccessOptions::CACHE, &name(entry))
            .unwrap()
            .settle()
            .unwrap()
            .read_to_vec()
            .unwrap();
        String::from_utf8(data).unwrap()
    }

    #[test]
    fn writes_are_served_before_sync() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "hello");
        assert_eq!(read(&cache, "c"), "hello");
        assert!(!dir.path().join("c.json").exists());
    }

    #[test]
    fn sync_flushes_and_clear_cache_refetches() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "hello");
        cache.sync(SyncOptions::CLEAR_CACHE).unwrap().settle().unwrap();
        let stored = read_container(&dir.path().join("c.json"));
        assert_eq!(stored.get("c").map(String::as_str), Some("hello"));
        assert!(!model.is_mounted());

        assert_eq!(read(&cache, "c"), "hello");
        assert!(cache.cached(&name("c")).is_some());
    }

    #[test]
    fn rewriting_a_cached_entry_needs_no_extra_sync() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "one");
        write(&cache, "c", "two");
        cache.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        let stored = read_container(&dir.path().join("c.json"));
        assert_eq!(stored.get("c").map(String::as_str), Some("two"));
        assert!(model.is_mounted());
    }

    #[test]
    fn abort_drops_dirty_entries() {
        let dir = TempDir::new().unwrap();
        write_container(&dir.path().join("c.json"), &[("c", "old")]);
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "new");
        cache.sync(SyncOptions::RESET).unwrap().settle().unwrap();
        assert_eq!(read(&cache, "c"), "old");
    }

    #[test]
    fn node_reports_cached_size() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "12345");
        let node = cache
            .node(AccessOptions::empty(), &name("c"))
            .unwrap()
            .settle()
            .unwrap()
            .unwrap();
        assert_eq!(node.size(), Some(5));
    }

    #[test]
    fn sync_refuses_while_a_cached_entry_is_written() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "old");
        let mut out = cache
            .output(AccessOptions::CACHE, &name("c"), None)
            .unwrap()
            .settle()
            .unwrap();
        out.write_all(b"new").unwrap();
        let err = cache.sync(SyncOptions::SYNC).unwrap_err();
        assert!(matches!(err, FsError::ResourceOpen { total: 1, local: 1 }));
        assert!(!dir.path().join("c.json").exists());

        out.finish().unwrap();
        cache.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        let stored = read_container(&dir.path().join("c.json"));
        assert_eq!(stored.get("c").map(String::as_str), Some("new"));
    }

    #[test]
    fn umount_force_closes_cache_streams() {
        let dir = TempDir::new().unwrap();
        let (model, cache) = cache(&dir);
        let _write = model.lock().write();

        write(&cache, "c", "kept");
        let mut out = cache
            .output(AccessOptions::CACHE, &name("c"), None)
            .unwrap()
            .settle()
            .unwrap();
        out.write_all(b"lost").unwrap();
        let input = cache
            .input(AccessOptions::CACHE, &name("c"))
            .unwrap()
            .settle()
            .unwrap();

        let err = cache.sync(SyncOptions::UMOUNT).unwrap_err();
        assert!(err.is_warning(), "{err}");
        assert!(matches!(out.finish(), Err(FsError::OutputClosed)));
        assert!(input.read_to_vec().is_err());

        let stored = read_container(&dir.path().join("c.json"));
        assert_eq!(stored.get("c").map(String::as_str), Some("kept"));
        assert!(!model.is_mounted());
        assert_eq!(read(&cache, "c"), "kept");
    }
}
