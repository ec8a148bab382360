//! In-memory directory tree of a mounted archive.

use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsError, FsResult};
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions};
use log::warn;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// The directory tree of an archive.
///
/// Archives need not list parent directories, so these are implied when
/// populating. The root always exists; when the archive has no entry for it
/// the root is a ghost which is never written back.
#[derive(Debug)]
pub struct ArchiveFileSystem {
    id: u64,
    nodes: BTreeMap<EntryName, Node>,
    ghost_root: bool,
    read_only: bool,
}

impl ArchiveFileSystem {
    /// A file system for a new archive.
    pub fn new_empty(root: ArchiveEntry) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(EntryName::root(), Node::directory(EntryName::root(), root));
        Self {
            id: GENERATION.fetch_add(1, Ordering::Relaxed),
            nodes,
            ghost_root: true,
            read_only: false,
        }
    }

    /// A file system for the `entries` of an existing archive.
    pub fn populated(
        entries: impl IntoIterator<Item = ArchiveEntry>,
        root: ArchiveEntry,
        read_only: bool,
    ) -> Self {
        let mut fs = Self::new_empty(root);
        fs.read_only = read_only;
        for entry in entries {
            let name = match EntryName::new(&entry.name) {
                Ok(name) => name,
                Err(err) => {
                    warn!("skipping archive entry: {}", err);
                    continue;
                }
            };
            if name.is_root() {
                if entry.is_directory() {
                    fs.ghost_root = false;
                    fs.root_mut().directory = Some(entry);
                }
                continue;
            }
            fs.imply_parents(&name);
            let kind = entry.kind;
            let node = fs.nodes.entry(name.clone()).or_insert_with(|| Node {
                name: name.clone(),
                file: None,
                directory: None,
                members: Default::default(),
            });
            *node.entry_mut(kind) = Some(entry);
        }
        fs
    }

    fn root_mut(&mut self) -> &mut Node {
        self.nodes
            .entry(EntryName::root())
            .or_insert_with(|| {
                Node::directory(EntryName::root(), ArchiveEntry::new("", EntryType::Directory))
            })
    }

    fn imply_parents(&mut self, name: &EntryName) {
        let mut child = name.clone();
        while let Some(parent) = child.parent() {
            let node = self.nodes.entry(parent.clone()).or_insert_with(|| {
                let entry = ArchiveEntry::new(parent.as_str(), EntryType::Directory);
                Node::directory(parent.clone(), entry)
            });
            if node.directory.is_none() {
                node.directory = Some(ArchiveEntry::new(parent.as_str(), EntryType::Directory));
            }
            if !node.members.insert(child.base_name().to_string()) {
                break;
            }
            child = parent;
        }
    }

    /// Identity of this instance; a remount yields a new one.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True if the root has no entry of its own in the archive.
    pub fn has_ghost_root(&self) -> bool {
        self.ghost_root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().members.is_empty()
    }

    pub fn root(&self) -> &Node {
        &self.nodes[&EntryName::root()]
    }

    pub fn node(&self, name: &EntryName) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// All nodes, each parent before its members.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn check_access(&self, name: &EntryName, modes: AccessModes) -> FsResult<()> {
        if !self.nodes.contains_key(name) {
            return Err(FsError::EntryNotFound(name.to_string()));
        }
        if modes.contains(AccessModes::WRITE) && self.read_only {
            return Err(FsError::ReadOnly(name.to_string()));
        }
        Ok(())
    }

    fn check_writable(&self, name: &EntryName) -> FsResult<()> {
        if self.read_only {
            Err(FsError::ReadOnly(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Create or replace the node `name`.
    ///
    /// `new_entry` creates entries for parent directories implied by
    /// `CREATE_PARENTS`.
    pub fn make(
        &mut self,
        name: &EntryName,
        entry: ArchiveEntry,
        options: AccessOptions,
        new_entry: &dyn Fn(&EntryName) -> ArchiveEntry,
    ) -> FsResult<()> {
        self.check_writable(name)?;
        let parent = name
            .parent()
            .ok_or_else(|| FsError::EntryExists(name.to_string()))?;
        self.ensure_directory(&parent, options, new_entry)?;

        let kind = entry.kind;
        if let Some(existing) = self.nodes.get_mut(name) {
            if options.contains(AccessOptions::EXCLUSIVE) {
                return Err(FsError::EntryExists(name.to_string()));
            }
            match (kind, existing.is_directory(), existing.is_file()) {
                (EntryType::File, _, true) => existing.file = Some(entry),
                (EntryType::File, _, false) => return Err(FsError::NotAFile(name.to_string())),
                (EntryType::Directory, true, _) => {}
                (EntryType::Directory, false, _) => {
                    return Err(FsError::NotADirectory(name.to_string()))
                }
            }
            return Ok(());
        }

        let node = match kind {
            EntryType::File => Node::file(name.clone(), entry),
            EntryType::Directory => Node::directory(name.clone(), entry),
        };
        self.nodes.insert(name.clone(), node);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.members.insert(name.base_name().to_string());
        }
        Ok(())
    }

    fn ensure_directory(
        &mut self,
        name: &EntryName,
        options: AccessOptions,
        new_entry: &dyn Fn(&EntryName) -> ArchiveEntry,
    ) -> FsResult<()> {
        match self.nodes.get(name) {
            Some(node) if node.is_directory() => Ok(()),
            Some(_) => Err(FsError::NotADirectory(name.to_string())),
            None if options.contains(AccessOptions::CREATE_PARENTS) => {
                let parent_options = options - AccessOptions::EXCLUSIVE;
                self.make(name, new_entry(name), parent_options, new_entry)
            }
            None => Err(FsError::EntryNotFound(name.to_string())),
        }
    }

    /// Remove the node `name`. The root may only be removed while empty and
    /// stays in place; the caller discards the whole file system then.
    pub fn unlink(&mut self, name: &EntryName) -> FsResult<()> {
        self.check_writable(name)?;
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| FsError::EntryNotFound(name.to_string()))?;
        if !node.members.is_empty() {
            return Err(FsError::DirectoryNotEmpty(name.to_string()));
        }
        let Some(parent) = name.parent() else {
            return Ok(());
        };
        self.nodes.remove(name);
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.members.remove(name.base_name());
        }
        Ok(())
    }

    pub fn set_time(&mut self, name: &EntryName, modified: SystemTime) -> FsResult<()> {
        self.check_writable(name)?;
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| FsError::EntryNotFound(name.to_string()))?;
        for kind in [EntryType::Directory, EntryType::File] {
            if let Some(entry) = node.entry_mut(kind) {
                entry.modified = Some(modified);
            }
        }
        Ok(())
    }
}
