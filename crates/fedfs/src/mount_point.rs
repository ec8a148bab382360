//! Addresses of file systems and of entries within them.

use crate::error::{FsError, FsResult};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Scheme of the host file system at the root of every chain.
pub const HOST_SCHEME: &str = "file";

/// Relative name of an entry within one file system, `/` separated.
///
/// The empty name addresses the root directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryName(String);

impl EntryName {
    /// Normalize `name`: empty and `.` segments are dropped, `..` is refused.
    pub fn new(name: &str) -> FsResult<Self> {
        let mut segments = Vec::new();
        for segment in name.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(FsError::InvalidName(name.to_string())),
                other => segments.push(other),
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub const fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The enclosing directory, `None` for the root.
    pub fn parent(&self) -> Option<EntryName> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Last segment of the name, empty for the root.
    pub fn base_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn join(&self, other: &EntryName) -> EntryName {
        match (self.is_root(), other.is_root()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}/{}", self.0, other.0)),
        }
    }

    /// The name of a direct member of this directory.
    pub fn child(&self, member: &str) -> EntryName {
        if self.is_root() {
            Self(member.to_string())
        } else {
            Self(format!("{}/{}", self.0, member))
        }
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one file system: the host directory at the root of the
/// federation, or an archive file which is an entry of its parent.
///
/// Immutable; equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountPoint {
    scheme: String,
    path: String,
    parent: Option<Arc<MountPoint>>,
}

impl MountPoint {
    /// Mount point of a host directory, which must be absolute.
    pub fn host<P: AsRef<Path>>(dir: P) -> FsResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_absolute() {
            return Err(FsError::InvalidName(dir.display().to_string()));
        }
        let mut normalized = PathBuf::new();
        for component in dir.components() {
            match component {
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        Ok(Self {
            scheme: HOST_SCHEME.to_string(),
            path: normalized.to_string_lossy().to_string(),
            parent: None,
        })
    }

    /// Mount point of the archive file `entry` within `parent`.
    pub fn nested(scheme: &str, parent: MountPoint, entry: EntryName) -> FsResult<Self> {
        if entry.is_root() {
            return Err(FsError::InvalidName(format!(
                "an archive cannot be the root of {}",
                parent
            )));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            path: entry.0,
            parent: Some(Arc::new(parent)),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn parent(&self) -> Option<&MountPoint> {
        self.parent.as_deref()
    }

    /// The name of the archive file within its parent.
    pub fn entry_in_parent(&self) -> Option<EntryName> {
        self.parent.as_ref().map(|_| EntryName(self.path.clone()))
    }

    /// The host directory, for the root of a federation.
    pub fn host_dir(&self) -> Option<&Path> {
        match self.parent {
            None => Some(Path::new(&self.path)),
            Some(_) => None,
        }
    }

    /// Number of archives between this mount point and the host.
    pub fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |parent| parent.depth() + 1)
    }

    pub fn is_host(&self) -> bool {
        self.parent.is_none()
    }

    /// True if `self` equals `other` or is nested within it.
    pub fn is_within(&self, other: &MountPoint) -> bool {
        let mut current = Some(self);
        while let Some(mp) = current {
            if mp == other {
                return true;
            }
            current = mp.parent();
        }
        false
    }

    /// Human readable address of `name` within this file system.
    pub fn resolve(&self, name: &EntryName) -> String {
        format!("{}{}", self, name)
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            None => {
                write!(f, "{}:{}", self.scheme, self.path)?;
                if !self.path.ends_with('/') {
                    f.write_str("/")?;
                }
                Ok(())
            }
            Some(parent) => write!(f, "{}:{}{}!/", self.scheme, parent, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    #[test]
    fn entry_names_are_normalized() {
        assert_eq!(name("/a//b/./c/").as_str(), "a/b/c");
        assert!(name("").is_root());
        assert!(name("/").is_root());
        assert!(EntryName::new("a/../b").is_err());
    }

    #[test]
    fn entry_name_navigation() {
        let n = name("a/b/c.txt");
        assert_eq!(n.base_name(), "c.txt");
        assert_eq!(n.parent().unwrap(), name("a/b"));
        assert_eq!(name("a").parent().unwrap(), EntryName::root());
        assert_eq!(EntryName::root().parent(), None);
        assert_eq!(name("a").join(&name("b/c")), name("a/b/c"));
        assert_eq!(EntryName::root().child("x"), name("x"));
    }

    #[test]
    fn nested_mount_points_display_like_uris() {
        let host = MountPoint::host("/tmp/work").unwrap();
        assert_eq!(host.to_string(), "file:/tmp/work/");
        let outer = MountPoint::nested("ZIP", host.clone(), name("a.zip")).unwrap();
        let inner = MountPoint::nested("jar", outer.clone(), name("lib/b.jar")).unwrap();
        assert_eq!(outer.to_string(), "zip:file:/tmp/work/a.zip!/");
        assert_eq!(inner.to_string(), "jar:zip:file:/tmp/work/a.zip!/lib/b.jar!/");
        assert_eq!(inner.depth(), 2);
        assert!(inner.is_within(&outer));
        assert!(!outer.is_within(&inner));
        assert_eq!(inner.entry_in_parent().unwrap(), name("lib/b.jar"));
    }

    #[test]
    fn equality_is_structural() {
        let a = MountPoint::nested("zip", MountPoint::host("/x").unwrap(), name("a.zip")).unwrap();
        let b = MountPoint::nested("zip", MountPoint::host("/x/").unwrap(), name("a.zip")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn host_mount_points_must_be_absolute() {
        assert!(MountPoint::host("relative/dir").is_err());
        assert_eq!(MountPoint::host("/").unwrap().to_string(), "file:/");
    }
}
