//! The innermost layer: mounts the archive, serves its entries and writes
//! changes into a new version of it on sync.

use crate::archive::{InputArchive, MountState, OutputArchive};
use crate::controller::{FsController, Layer};
use crate::driver::ArchiveDriver;
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsError, FsResult, SyncErrorBuilder};
use crate::fs::ArchiveFileSystem;
use crate::io::{EntrySink, InputStream, IoBuffer, IoBufferPool, OutputStream};
use crate::lock::{LockAspect, ReentrantRwLock};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{done, retry, Attempt, FalsePositive, Outcome, Signal};
use log::{debug, trace};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::SystemTime;

/// Mutable state of a target controller.
///
/// A file system is present exactly when an input or output archive is.
#[derive(Debug, Default)]
pub(crate) struct TargetState {
    pub(crate) mount: MountState,
    pub(crate) input: Option<InputArchive>,
    pub(crate) output: Option<Arc<OutputArchive>>,
}

impl TargetState {
    pub(crate) fn is_consistent(&self) -> bool {
        self.mount.is_mounted() == (self.input.is_some() || self.output.is_some())
    }

    fn file_system(&self) -> FsResult<&ArchiveFileSystem> {
        self.mount
            .file_system()
            .ok_or_else(|| FsError::Precondition("archive file system is not mounted".into()))
    }

    fn file_system_mut(&mut self) -> FsResult<&mut ArchiveFileSystem> {
        self.mount
            .file_system_mut()
            .ok_or_else(|| FsError::Precondition("archive file system is not mounted".into()))
    }
}

pub(crate) struct TargetArchiveController {
    model: Arc<FsModel>,
    parent: Arc<dyn FsController>,
    entry: EntryName,
    driver: Arc<dyn ArchiveDriver>,
    pool: IoBufferPool,
    pub(crate) state: Mutex<TargetState>,
}

impl LockAspect for TargetArchiveController {
    fn lock(&self) -> &ReentrantRwLock {
        self.model.lock()
    }
}

/// Buffers the content of one entry and commits it into the output archive.
struct ArchiveSink {
    buffer: IoBuffer,
    entry: ArchiveEntry,
    output: Arc<OutputArchive>,
}

impl Write for ArchiveSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

impl EntrySink for ArchiveSink {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let ArchiveSink {
            mut buffer,
            mut entry,
            output,
        } = *self;
        entry.size = Some(buffer.len());
        buffer.rewind()?;
        output.commit(entry, &mut buffer)
    }

    fn discard(self: Box<Self>) {
        self.output.release(&self.entry.name);
    }
}

fn parent_options(options: AccessOptions) -> AccessOptions {
    options & AccessOptions::CREATE_PARENTS
}

impl TargetArchiveController {
    pub(crate) fn new(
        model: Arc<FsModel>,
        parent: Arc<dyn FsController>,
        entry: EntryName,
        driver: Arc<dyn ArchiveDriver>,
        pool: IoBufferPool,
    ) -> Self {
        Self {
            model,
            parent,
            entry,
            driver,
            pool,
            state: Mutex::new(TargetState::default()),
        }
    }

    fn false_positive(&self, cause: FsError, persistent: bool) -> Attempt<()> {
        debug!(
            "{} is a {} false positive: {}",
            self.model.mount_point(),
            if persistent { "persistent" } else { "transient" },
            cause
        );
        let fp = if persistent {
            FalsePositive::persistent(cause)
        } else {
            FalsePositive::transient(cause)
        };
        retry(Signal::FalsePositive(fp))
    }

    /// Mount the file system unless it is mounted already.
    pub(crate) fn auto_mount(
        &self,
        state: &mut TargetState,
        options: AccessOptions,
        auto_create: bool,
    ) -> Attempt<()> {
        if state.mount.is_mounted() {
            return done(());
        }
        attempt!(self.check_write_locked_by_current_thread());
        attempt!(self.mount(state, options, auto_create));
        debug_assert!(state.is_consistent());
        done(())
    }

    fn mount(
        &self,
        state: &mut TargetState,
        options: AccessOptions,
        auto_create: bool,
    ) -> Attempt<()> {
        let mount_point = self.model.mount_point();
        trace!("mounting {}", mount_point);
        match self.parent.node(AccessOptions::empty(), &self.entry)? {
            None if !auto_create => {
                let cause = FsError::EntryNotFound(mount_point.to_string());
                return self.false_positive(cause, false);
            }
            None => {
                let root = self
                    .driver
                    .new_entry("", EntryType::Directory, None, options);
                let output = self.new_output(state, options)?;
                state.output = Some(Arc::new(output));
                state
                    .mount
                    .set_file_system(Some(ArchiveFileSystem::new_empty(root)))?;
            }
            Some(node) if !node.is_file() => {
                let path = self.parent.model().mount_point().resolve(&self.entry);
                let cause = FsError::NotAFile(path);
                return self.false_positive(cause, false);
            }
            Some(node) => {
                let read_only = self
                    .parent
                    .check_access(AccessOptions::empty(), &self.entry, AccessModes::WRITE)
                    .is_err();
                let service = match self.driver.new_input_service(
                    &self.model,
                    self.parent.as_ref(),
                    &self.entry,
                    AccessOptions::empty(),
                    &self.pool,
                ) {
                    Ok(service) => service,
                    Err(err @ FsError::KeyUnavailable(_)) => return self.false_positive(err, false),
                    Err(err) => return self.false_positive(err, true),
                };
                let root = self.driver.new_entry(
                    "",
                    EntryType::Directory,
                    node.file.as_ref(),
                    options,
                );
                let fs = ArchiveFileSystem::populated(service.entries(), root, read_only);
                state.input = Some(InputArchive::new(service));
                state.mount.set_file_system(Some(fs))?;
            }
        }
        self.model.set_mounted(true);
        done(())
    }

    fn new_output(&self, state: &TargetState, options: AccessOptions) -> FsResult<OutputArchive> {
        let service = self.driver.new_output_service(
            &self.model,
            self.parent.as_ref(),
            &self.entry,
            parent_options(options),
            state.input.as_ref().map(InputArchive::service),
            &self.pool,
        )?;
        Ok(OutputArchive::new(service))
    }

    /// The output archive, created on the first change.
    fn touch(
        &self,
        state: &mut TargetState,
        options: AccessOptions,
        name: &EntryName,
    ) -> FsResult<Arc<OutputArchive>> {
        if state.file_system()?.is_read_only() {
            return Err(FsError::ReadOnly(self.model.mount_point().resolve(name)));
        }
        if let Some(output) = &state.output {
            return Ok(Arc::clone(output));
        }
        let output = Arc::new(self.new_output(state, options)?);
        state.output = Some(Arc::clone(&output));
        Ok(output)
    }

    /// Ask for a sync if serving `name` now would write a redundant entry,
    /// or if a read would miss content which only the output archive has.
    fn check_sync(
        &self,
        state: &TargetState,
        options: AccessOptions,
        name: &EntryName,
        read: bool,
    ) -> Attempt<()> {
        if options.contains(AccessOptions::GROW) {
            return done(());
        }
        let written = state
            .output
            .as_ref()
            .map_or(false, |output| output.contains(name.as_str()));
        let unreadable = read
            && state
                .mount
                .file_system()
                .and_then(|fs| fs.node(name))
                .map_or(false, Node::is_file)
            && !state
                .input
                .as_ref()
                .map_or(false, |input| input.contains(name.as_str(), EntryType::File));
        if written || unreadable {
            trace!("{} needs sync", self.model.mount_point().resolve(name));
            return retry(Signal::NeedsSync);
        }
        done(())
    }

    /// Write every entry which is not in the output archive yet.
    fn copy(&self, state: &mut TargetState) -> FsResult<()> {
        let Some(output) = state.output.clone() else {
            return Ok(());
        };
        let Some(fs) = state.mount.file_system() else {
            return Ok(());
        };
        for node in fs.nodes() {
            let name = node.name.as_str();
            if let Some(dir) = &node.directory {
                let ghost = node.name.is_root() && fs.has_ghost_root();
                if !ghost && !output.contains_kind(name, EntryType::Directory) {
                    output.commit(dir.clone(), &mut io::empty())?;
                }
            }
            if let Some(file) = &node.file {
                if output.contains_kind(name, EntryType::File) {
                    continue;
                }
                match state.input.as_mut() {
                    Some(input) if input.contains(name, EntryType::File) => {
                        let mut stream = input.open(name)?;
                        output.commit(file.clone(), &mut stream)?;
                    }
                    _ => output.commit(file.clone(), &mut io::empty())?,
                }
            }
        }
        Ok(())
    }

    /// Release both archives and drop the file system.
    fn close(&self, state: &mut TargetState, abort: bool, builder: &mut SyncErrorBuilder) {
        if let Some(input) = state.input.take() {
            if let Err(err) = input.close() {
                builder.warn(err);
            }
        }
        if let Some(output) = state.output.take() {
            if let Err(err) = output.close(abort) {
                builder.fail(err);
            }
        }
        if let Err(err) = state.mount.set_file_system(None) {
            builder.fail(err);
        }
        if abort {
            self.model.set_mounted(false);
        }
    }
}

impl Layer for TargetArchiveController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>> {
        let mut state = self.state.lock();
        attempt!(self.auto_mount(&mut state, options, false));
        let mut node = state.file_system()?.node(name).cloned();
        if let (Some(node), Some(output)) = (node.as_mut(), state.output.as_ref()) {
            if node.is_file() {
                if let Some(written) = output.entry(name.as_str(), EntryType::File) {
                    node.file = Some(written);
                }
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
        let mut state = self.state.lock();
        attempt!(self.auto_mount(&mut state, options, false));
        state.file_system()?.check_access(name, modes)?;
        done(())
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut state = self.state.lock();
        attempt!(self.check_sync(&state, options, name, false));
        attempt!(self.auto_mount(&mut state, options, false));
        if state.file_system()?.node(name).is_none() {
            return Err(FsError::EntryNotFound(self.model.mount_point().resolve(name)));
        }
        self.touch(&mut state, options, name)?;
        state.file_system_mut()?.set_time(name, modified)?;
        done(())
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream> {
        let mut state = self.state.lock();
        attempt!(self.check_sync(&state, options, name, true));
        attempt!(self.auto_mount(&mut state, options, false));
        let state = &mut *state;
        let node = state
            .file_system()?
            .node(name)
            .ok_or_else(|| FsError::EntryNotFound(self.model.mount_point().resolve(name)))?;
        if !node.is_file() {
            return Err(FsError::NotAFile(self.model.mount_point().resolve(name)));
        }
        match state.input.as_mut() {
            Some(input) if input.contains(name.as_str(), EntryType::File) => {
                done(input.open(name.as_str())?)
            }
            _ => done(InputStream::empty()),
        }
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut state = self.state.lock();
        attempt!(self.check_sync(&state, options, name, false));
        let create = options.contains(AccessOptions::CREATE_PARENTS);
        attempt!(self.auto_mount(&mut state, options, create));

        let entry = self
            .driver
            .new_entry(name.as_str(), EntryType::File, template, options);
        let output = self.touch(&mut state, options, name)?;
        let driver = Arc::clone(&self.driver);
        state.file_system_mut()?.make(name, entry.clone(), options, &|parent| {
            driver.new_entry(parent.as_str(), EntryType::Directory, None, options)
        })?;
        output.reserve(name.as_str());

        let sink = ArchiveSink {
            buffer: self.pool.allocate(),
            entry,
            output,
        };
        done(OutputStream::new(
            self.model.mount_point().resolve(name),
            Box::new(sink),
        ))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut state = self.state.lock();
        if name.is_root() {
            return match self.auto_mount(&mut state, options, false)? {
                Outcome::Done(()) => {
                    Err(FsError::EntryExists(self.model.mount_point().to_string()))
                }
                Outcome::Retry(Signal::FalsePositive(fp))
                    if kind == EntryType::Directory && !fp.is_persistent() =>
                {
                    attempt!(self.auto_mount(&mut state, options, true));
                    done(())
                }
                Outcome::Retry(signal) => retry(signal),
            };
        }

        attempt!(self.check_sync(&state, options, name, false));
        let create = options.contains(AccessOptions::CREATE_PARENTS);
        attempt!(self.auto_mount(&mut state, options, create));
        let entry = self.driver.new_entry(name.as_str(), kind, template, options);
        self.touch(&mut state, options, name)?;
        let driver = Arc::clone(&self.driver);
        state.file_system_mut()?.make(name, entry, options, &|parent| {
            driver.new_entry(parent.as_str(), EntryType::Directory, None, options)
        })?;
        done(())
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut state = self.state.lock();
        attempt!(self.check_sync(&state, options, name, false));
        attempt!(self.auto_mount(&mut state, options, false));

        if name.is_root() {
            state.file_system_mut()?.unlink(name)?;
            // the false positive layer removes the archive file itself
            let mut builder = SyncErrorBuilder::new();
            self.close(&mut state, true, &mut builder);
            builder.check()?;
            return done(());
        }
        if state.file_system()?.node(name).is_none() {
            return Err(FsError::EntryNotFound(self.model.mount_point().resolve(name)));
        }
        self.touch(&mut state, options, name)?;
        state.file_system_mut()?.unlink(name)?;
        done(())
    }

    fn sync(&self, options: SyncOptions) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut state = self.state.lock();
        if !state.mount.is_mounted() {
            return done(());
        }
        debug!("syncing {} ({:?})", self.model.mount_point(), options);
        let mut builder = SyncErrorBuilder::new();
        let mut abort = options.contains(SyncOptions::ABORT_CHANGES);
        if !abort {
            if let Err(err) = self.copy(&mut state) {
                builder.fail(err);
                abort = true;
            }
        }
        self.close(&mut state, abort, &mut builder);
        debug_assert!(state.is_consistent());
        builder.check()?;
        done(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostController;
    use crate::mount_point::MountPoint;
    use crate::testing::{write_container, JsonDriver};
    use std::io::Read;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        model: Arc<FsModel>,
        driver: Arc<JsonDriver>,
        target: TargetArchiveController,
    }

    fn fixture(entries: Option<&[(&str, &str)]>) -> Fixture {
        let dir = TempDir::new().unwrap();
        if let Some(entries) = entries {
            write_container(&dir.path().join("a.json"), entries);
        }
        let host_model = Arc::new(FsModel::new(MountPoint::host(dir.path()).unwrap(), None));
        let host: Arc<dyn FsController> =
            Arc::new(HostController::new(Arc::clone(&host_model)).unwrap());
        let entry = EntryName::new("a.json").unwrap();
        let mount_point =
            MountPoint::nested("json", host_model.mount_point().clone(), entry.clone()).unwrap();
        let model = Arc::new(FsModel::new(mount_point, Some(host_model)));
        let driver = Arc::new(JsonDriver::default());
        let target = TargetArchiveController::new(
            Arc::clone(&model),
            host,
            entry,
            Arc::clone(&driver) as Arc<dyn ArchiveDriver>,
            IoBufferPool::default(),
        );
        Fixture {
            _dir: dir,
            model,
            driver,
            target,
        }
    }

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    #[test]
    fn mount_needs_the_write_lock() {
        let f = fixture(Some(&[("x", "1")]));
        let _read = f.model.lock().read();
        let outcome = f.target.node(AccessOptions::empty(), &name("x")).unwrap();
        assert!(matches!(outcome, Outcome::Retry(Signal::NeedsWriteLock)));
        assert_eq!(f.driver.input_services(), 0);
    }

    #[test]
    fn auto_mount_is_idempotent() {
        let f = fixture(Some(&[("x", "1")]));
        let _write = f.model.lock().write();
        let mut state = f.target.state.lock();
        assert!(f.target.auto_mount(&mut state, AccessOptions::empty(), false).unwrap().is_done());
        let first = state.mount.file_system().unwrap().id();
        assert!(f.target.auto_mount(&mut state, AccessOptions::empty(), false).unwrap().is_done());
        assert_eq!(state.mount.file_system().unwrap().id(), first);
        assert_eq!(f.driver.input_services(), 1);
        assert!(state.is_consistent());
        assert!(f.model.is_mounted());
    }

    #[test]
    fn mount_runs_write_locked_without_read_locks() {
        let f = fixture(Some(&[("x", "1")]));
        let _write = f.model.lock().write();
        f.target.node(AccessOptions::empty(), &name("x")).unwrap().settle().unwrap();
        assert_eq!(f.driver.lock_observations(), vec![(true, 0)]);
    }

    #[test]
    fn mounting_over_a_mounted_file_system_is_refused() {
        let mut mount = MountState::Reset;
        let root = ArchiveEntry::new("", EntryType::Directory);
        mount.set_file_system(Some(ArchiveFileSystem::new_empty(root.clone()))).unwrap();
        assert!(matches!(
            mount.set_file_system(Some(ArchiveFileSystem::new_empty(root))),
            Err(FsError::Precondition(_))
        ));
        mount.set_file_system(None).unwrap();
        assert!(!mount.is_mounted());
    }

    #[test]
    fn missing_archive_is_a_transient_false_positive() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        match f.target.node(AccessOptions::empty(), &name("x")).unwrap() {
            Outcome::Retry(Signal::FalsePositive(fp)) => assert!(!fp.is_persistent()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn garbage_is_a_persistent_false_positive() {
        let f = fixture(None);
        std::fs::write(f._dir.path().join("a.json"), b"not json").unwrap();
        let _write = f.model.lock().write();
        match f.target.node(AccessOptions::empty(), &name("x")).unwrap() {
            Outcome::Retry(Signal::FalsePositive(fp)) => assert!(fp.is_persistent()),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!f.model.is_mounted());
    }

    #[test]
    fn second_output_for_same_entry_needs_sync() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        let options = AccessOptions::CREATE_PARENTS;

        let mut out = f.target.output(options, &name("a/b.txt"), None).unwrap().settle().unwrap();
        out.write_all(b"one").unwrap();
        out.finish().unwrap();

        let again = f.target.output(options, &name("a/b.txt"), None).unwrap();
        assert!(matches!(again, Outcome::Retry(Signal::NeedsSync)));

        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        let mut out = f.target.output(options, &name("a/b.txt"), None).unwrap().settle().unwrap();
        out.write_all(b"two").unwrap();
        out.finish().unwrap();
        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();

        let mut text = String::new();
        f.target
            .input(AccessOptions::empty(), &name("a/b.txt"))
            .unwrap()
            .settle()
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "two");
    }

    #[test]
    fn exclusive_output_for_written_entry_fails_after_sync() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        let options = AccessOptions::CREATE_PARENTS | AccessOptions::EXCLUSIVE;

        let mut out = f.target.output(options, &name("a/b.txt"), None).unwrap().settle().unwrap();
        out.write_all(b"one").unwrap();
        out.finish().unwrap();

        let again = f.target.output(options, &name("a/b.txt"), None).unwrap();
        assert!(matches!(again, Outcome::Retry(Signal::NeedsSync)));

        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        assert!(matches!(
            f.target.output(options, &name("a/b.txt"), None),
            Err(FsError::EntryExists(_))
        ));
    }

    #[test]
    fn growing_tolerates_redundant_entries() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        let options = AccessOptions::CREATE_PARENTS | AccessOptions::GROW;
        for content in [&b"one"[..], b"two"] {
            let mut out = f.target.output(options, &name("f"), None).unwrap().settle().unwrap();
            out.write_all(content).unwrap();
            out.finish().unwrap();
        }
        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        let data = f
            .target
            .input(AccessOptions::empty(), &name("f"))
            .unwrap()
            .settle()
            .unwrap()
            .read_to_vec()
            .unwrap();
        assert_eq!(data, b"two");
    }

    #[test]
    fn reading_an_unsynced_file_needs_sync() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        f.target
            .make(AccessOptions::CREATE_PARENTS, &name("empty"), EntryType::File, None)
            .unwrap()
            .settle()
            .unwrap();
        let outcome = f.target.input(AccessOptions::empty(), &name("empty")).unwrap();
        assert!(matches!(outcome, Outcome::Retry(Signal::NeedsSync)));
    }

    #[test]
    fn sync_copies_untouched_entries() {
        let f = fixture(Some(&[("keep", "kept"), ("dir/", "")]));
        let _write = f.model.lock().write();
        let mut out = f
            .target
            .output(AccessOptions::empty(), &name("new"), None)
            .unwrap()
            .settle()
            .unwrap();
        out.write_all(b"fresh").unwrap();
        out.finish().unwrap();
        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();

        let stored = crate::testing::read_container(&f._dir.path().join("a.json"));
        assert_eq!(stored.get("keep").map(String::as_str), Some("kept"));
        assert_eq!(stored.get("new").map(String::as_str), Some("fresh"));
        assert!(stored.contains_key("dir/"));
        assert!(!stored.contains_key(""));
    }

    #[test]
    fn aborting_keeps_the_archive_untouched() {
        let f = fixture(Some(&[("x", "1")]));
        let path = f._dir.path().join("a.json");
        let before = std::fs::read(&path).unwrap();
        let _write = f.model.lock().write();
        f.target.unlink(AccessOptions::empty(), &name("x")).unwrap().settle().unwrap();
        f.target.sync(SyncOptions::RESET).unwrap().settle().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(!f.model.is_mounted());
        assert!(f.target.state.lock().is_consistent());
    }

    #[test]
    fn unlinking_the_root_requires_an_empty_archive() {
        let f = fixture(Some(&[("x", "1")]));
        let _write = f.model.lock().write();
        assert!(matches!(
            f.target.unlink(AccessOptions::empty(), &EntryName::root()),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        f.target.unlink(AccessOptions::empty(), &name("x")).unwrap().settle().unwrap();
        f.target.unlink(AccessOptions::empty(), &EntryName::root()).unwrap().settle().unwrap();
        let state = f.target.state.lock();
        assert!(!state.mount.is_mounted());
        assert!(state.is_consistent());
    }

    #[test]
    fn making_the_root_directory_creates_the_archive() {
        let f = fixture(None);
        let _write = f.model.lock().write();
        f.target
            .make(AccessOptions::empty(), &EntryName::root(), EntryType::Directory, None)
            .unwrap()
            .settle()
            .unwrap();
        assert!(matches!(
            f.target.make(AccessOptions::empty(), &EntryName::root(), EntryType::Directory, None),
            Err(FsError::EntryExists(_))
        ));
        f.target.sync(SyncOptions::SYNC).unwrap().settle().unwrap();
        assert!(f._dir.path().join("a.json").is_file());
    }
}
