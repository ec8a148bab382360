//! The host file system at the root of every federation.

use crate::controller::FsController;
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsError, FsResult};
use crate::io::{EntrySink, InputStream, OutputStream};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Controller for a host directory. Changes apply immediately, so sync has
/// nothing to do.
#[derive(Debug)]
pub struct HostController {
    model: Arc<FsModel>,
    root: PathBuf,
}

impl HostController {
    pub fn new(model: Arc<FsModel>) -> FsResult<Self> {
        let root = model
            .mount_point()
            .host_dir()
            .ok_or_else(|| {
                FsError::Precondition(format!("{} is not a host directory", model.mount_point()))
            })?
            .to_path_buf();
        Ok(Self { model, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &EntryName) -> PathBuf {
        if name.is_root() {
            self.root.clone()
        } else {
            self.root.join(name.as_str())
        }
    }

    fn map_io_error(&self, err: io::Error, path: &Path) -> FsError {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::EntryNotFound(path.display().to_string()),
            io::ErrorKind::AlreadyExists => FsError::EntryExists(path.display().to_string()),
            io::ErrorKind::PermissionDenied => FsError::ReadOnly(path.display().to_string()),
            _ => FsError::Io(err),
        }
    }

    fn ensure_parent(&self, path: &Path, options: AccessOptions) -> FsResult<PathBuf> {
        let parent = path
            .parent()
            .ok_or_else(|| FsError::EntryExists(path.display().to_string()))?;
        if options.contains(AccessOptions::CREATE_PARENTS) {
            fs::create_dir_all(parent).map_err(|e| self.map_io_error(e, parent))?;
        } else if !parent.is_dir() {
            return Err(FsError::EntryNotFound(parent.display().to_string()));
        }
        Ok(parent.to_path_buf())
    }
}

fn entry_for(name: &EntryName, meta: &fs::Metadata) -> ArchiveEntry {
    let kind = if meta.is_dir() {
        EntryType::Directory
    } else {
        EntryType::File
    };
    let mut entry = ArchiveEntry::new(name.as_str(), kind);
    if kind == EntryType::File {
        entry.size = Some(meta.len());
    }
    entry.modified = meta.modified().ok();
    entry
}

/// Buffers into a temp file next to the target and renames it into place.
struct HostSink {
    temp: NamedTempFile,
    target: PathBuf,
    modified: Option<SystemTime>,
}

impl Write for HostSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.as_file_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.as_file_mut().flush()
    }
}

impl EntrySink for HostSink {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let HostSink {
            mut temp,
            target,
            modified,
        } = *self;
        temp.as_file_mut().sync_all()?;
        let file = persist_tempfile(temp, &target)?;
        if let Some(modified) = modified {
            file.set_modified(modified)?;
        }
        Ok(())
    }
}

fn persist_tempfile(temp: NamedTempFile, final_path: &Path) -> FsResult<File> {
    temp.persist(final_path).map_err(|err| FsError::Io(err.error))
}

impl FsController for HostController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn parent(&self) -> Option<&Arc<dyn FsController>> {
        None
    }

    fn node(&self, _options: AccessOptions, name: &EntryName) -> FsResult<Option<Node>> {
        let path = self.path(name);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = entry_for(name, &meta);
        if !meta.is_dir() {
            return Ok(Some(Node::file(name.clone(), entry)));
        }
        let mut node = Node::directory(name.clone(), entry);
        for member in fs::read_dir(&path)? {
            node.members
                .insert(member?.file_name().to_string_lossy().to_string());
        }
        Ok(Some(node))
    }

    fn check_access(
        &self,
        _options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> FsResult<()> {
        let path = self.path(name);
        let meta = fs::metadata(&path).map_err(|e| self.map_io_error(e, &path))?;
        if modes.contains(AccessModes::WRITE) && meta.permissions().readonly() {
            return Err(FsError::ReadOnly(path.display().to_string()));
        }
        Ok(())
    }

    fn set_time(
        &self,
        _options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> FsResult<()> {
        let path = self.path(name);
        let file = File::open(&path).map_err(|e| self.map_io_error(e, &path))?;
        file.set_modified(modified)?;
        Ok(())
    }

    fn input(&self, _options: AccessOptions, name: &EntryName) -> FsResult<InputStream> {
        let path = self.path(name);
        if path.is_dir() {
            return Err(FsError::NotAFile(path.display().to_string()));
        }
        let file = File::open(&path).map_err(|e| self.map_io_error(e, &path))?;
        Ok(InputStream::new(BufReader::new(file)))
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<OutputStream> {
        let path = self.path(name);
        let parent = self.ensure_parent(&path, options)?;
        if path.is_dir() {
            return Err(FsError::NotAFile(path.display().to_string()));
        }
        if options.contains(AccessOptions::EXCLUSIVE) && path.exists() {
            return Err(FsError::EntryExists(path.display().to_string()));
        }
        let temp = tempfile::Builder::new()
            .prefix(".tmp.fedfs-")
            .tempfile_in(&parent)?;
        let sink = HostSink {
            temp,
            target: path.clone(),
            modified: template.and_then(|entry| entry.modified),
        };
        Ok(OutputStream::new(path.display().to_string(), Box::new(sink)))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<()> {
        let path = self.path(name);
        self.ensure_parent(&path, options)?;
        let exists = path.exists();
        if exists && options.contains(AccessOptions::EXCLUSIVE) {
            return Err(FsError::EntryExists(path.display().to_string()));
        }
        match kind {
            EntryType::Directory if path.is_dir() => return Ok(()),
            EntryType::Directory if exists => {
                return Err(FsError::NotADirectory(path.display().to_string()))
            }
            EntryType::Directory => {
                fs::create_dir(&path).map_err(|e| self.map_io_error(e, &path))?;
            }
            EntryType::File if path.is_dir() => {
                return Err(FsError::NotAFile(path.display().to_string()))
            }
            EntryType::File => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| self.map_io_error(e, &path))?;
                if let Some(modified) = template.and_then(|entry| entry.modified) {
                    file.set_modified(modified)?;
                }
            }
        }
        Ok(())
    }

    fn unlink(&self, _options: AccessOptions, name: &EntryName) -> FsResult<()> {
        let path = self.path(name);
        let meta = fs::symlink_metadata(&path).map_err(|e| self.map_io_error(e, &path))?;
        if meta.is_dir() {
            if fs::read_dir(&path)?.next().is_some() {
                return Err(FsError::DirectoryNotEmpty(path.display().to_string()));
            }
            fs::remove_dir(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn sync(&self, _options: SyncOptions) -> FsResult<()> {
        Ok(())
    }
}
