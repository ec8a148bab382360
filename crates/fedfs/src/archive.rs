//! Mount state of an archive controller and the wrappers around the
//! services its driver produces.

use crate::driver::{InputService, OutputService};
use crate::entry::{ArchiveEntry, EntryType};
use crate::error::{FsError, FsResult};
use crate::fs::ArchiveFileSystem;
use crate::io::InputStream;
use crate::lock::MutexAspect;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::io::Read;

/// Whether an archive file system is present.
#[derive(Debug, Default)]
pub(crate) enum MountState {
    #[default]
    Reset,
    Mounted(ArchiveFileSystem),
}

impl MountState {
    pub(crate) fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted(_))
    }

    pub(crate) fn file_system(&self) -> Option<&ArchiveFileSystem> {
        match self {
            MountState::Mounted(fs) => Some(fs),
            MountState::Reset => None,
        }
    }

    pub(crate) fn file_system_mut(&mut self) -> Option<&mut ArchiveFileSystem> {
        match self {
            MountState::Mounted(fs) => Some(fs),
            MountState::Reset => None,
        }
    }

    /// Install a file system, or drop the present one with `None`.
    /// Installing over a mounted file system is a programming error.
    pub(crate) fn set_file_system(&mut self, fs: Option<ArchiveFileSystem>) -> FsResult<()> {
        match (&*self, fs) {
            (MountState::Mounted(current), Some(_)) => Err(FsError::Precondition(format!(
                "file system {} is mounted already",
                current.id()
            ))),
            (_, Some(fs)) => {
                *self = MountState::Mounted(fs);
                Ok(())
            }
            (_, None) => {
                *self = MountState::Reset;
                Ok(())
            }
        }
    }
}

/// The current version of an archive, as read by its driver.
pub(crate) struct InputArchive {
    service: Box<dyn InputService>,
}

impl InputArchive {
    pub(crate) fn new(service: Box<dyn InputService>) -> Self {
        Self { service }
    }

    pub(crate) fn service(&self) -> &dyn InputService {
        self.service.as_ref()
    }

    pub(crate) fn contains(&self, name: &str, kind: EntryType) -> bool {
        self.service.entry(name, kind).is_some()
    }

    pub(crate) fn open(&mut self, name: &str) -> FsResult<InputStream> {
        self.service.open(name)
    }

    pub(crate) fn close(mut self) -> FsResult<()> {
        self.service.close()
    }
}

impl fmt::Debug for InputArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputArchive")
            .field("entries", &self.service.entries().len())
            .finish()
    }
}

pub(crate) struct OutputState {
    service: Box<dyn OutputService>,
    // names of output streams which have not been finished yet
    pending: HashSet<String>,
    closed: bool,
}

/// The next version of an archive, shared with the output streams which
/// commit into it.
pub(crate) struct OutputArchive {
    state: Mutex<OutputState>,
}

impl MutexAspect for OutputArchive {
    type Target = OutputState;

    fn mutex(&self) -> &Mutex<OutputState> {
        &self.state
    }
}

impl OutputArchive {
    pub(crate) fn new(service: Box<dyn OutputService>) -> Self {
        Self {
            state: Mutex::new(OutputState {
                service,
                pending: HashSet::new(),
                closed: false,
            }),
        }
    }

    /// True if `name` has been written or is being written.
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.locked(|state| {
            state.pending.contains(name)
                || state.service.entry(name, EntryType::File).is_some()
                || state.service.entry(name, EntryType::Directory).is_some()
        })
    }

    pub(crate) fn contains_kind(&self, name: &str, kind: EntryType) -> bool {
        self.locked(|state| state.service.entry(name, kind).is_some())
    }

    pub(crate) fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry> {
        self.locked(|state| state.service.entry(name, kind))
    }

    pub(crate) fn reserve(&self, name: &str) {
        self.locked(|state| state.pending.insert(name.to_string()));
    }

    pub(crate) fn release(&self, name: &str) {
        self.locked(|state| state.pending.remove(name));
    }

    pub(crate) fn commit(&self, entry: ArchiveEntry, content: &mut dyn Read) -> FsResult<()> {
        self.locked(|state| {
            if state.closed {
                return Err(FsError::OutputClosed);
            }
            state.pending.remove(&entry.name);
            state.service.write_entry(entry, content)
        })
    }

    /// Commit the archive, or throw it away when `abort` is set.
    pub(crate) fn close(&self, abort: bool) -> FsResult<()> {
        self.locked(|state| {
            if std::mem::replace(&mut state.closed, true) {
                return Ok(());
            }
            state.pending.clear();
            if abort {
                state.service.discard();
                Ok(())
            } else {
                state.service.close()
            }
        })
    }
}

impl fmt::Debug for OutputArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.locked(|state| {
            f.debug_struct("OutputArchive")
                .field("entries", &state.service.len())
                .field("pending", &state.pending.len())
                .field("closed", &state.closed)
                .finish()
        })
    }
}
