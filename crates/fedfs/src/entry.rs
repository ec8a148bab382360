use crate::mount_point::EntryName;
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Kind of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
}

/// Metadata of one entry as stored in an archive or on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name within the archive, without a trailing separator.
    pub name: String,
    pub kind: EntryType,
    /// Uncompressed size, if known.
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    /// Compression preference, `None` leaves the choice to the driver.
    pub compressed: Option<bool>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, kind: EntryType) -> Self {
        Self {
            name: name.into(),
            kind,
            size: None,
            modified: None,
            compressed: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryType::Directory
    }
}

/// Snapshot of one node of a file system.
///
/// A name may denote a directory and a file at the same time, e.g. when an
/// archive holds both `a/` and `a`; each view is kept separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: EntryName,
    pub file: Option<ArchiveEntry>,
    pub directory: Option<ArchiveEntry>,
    /// Base names of the members, for directories.
    pub members: BTreeSet<String>,
}

impl Node {
    pub fn file(name: EntryName, entry: ArchiveEntry) -> Self {
        Self {
            name,
            file: Some(entry),
            directory: None,
            members: BTreeSet::new(),
        }
    }

    pub fn directory(name: EntryName, entry: ArchiveEntry) -> Self {
        Self {
            name,
            file: None,
            directory: Some(entry),
            members: BTreeSet::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_directory(&self) -> bool {
        self.directory.is_some()
    }

    pub fn entry(&self, kind: EntryType) -> Option<&ArchiveEntry> {
        match kind {
            EntryType::File => self.file.as_ref(),
            EntryType::Directory => self.directory.as_ref(),
        }
    }

    pub fn entry_mut(&mut self, kind: EntryType) -> &mut Option<ArchiveEntry> {
        match kind {
            EntryType::File => &mut self.file,
            EntryType::Directory => &mut self.directory,
        }
    }

    /// Entries of all views, directory first.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.directory.iter().chain(self.file.iter())
    }

    /// Size of the file view.
    pub fn size(&self) -> Option<u64> {
        self.file.as_ref().and_then(|entry| entry.size)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.entries().filter_map(|entry| entry.modified).max()
    }
}
