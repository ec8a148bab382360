use crate::error::{FsError, FsResult};
use crate::mount_point::{EntryName, MountPoint};
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// Decides by file name extension which path segments are archives.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDetector {
    // lowercase extension without the dot -> scheme
    extensions: BTreeMap<String, String>,
}

impl ArchiveDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extension: &str, scheme: &str) -> Self {
        self.register(extension, scheme);
        self
    }

    pub fn register(&mut self, extension: &str, scheme: &str) {
        self.extensions.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            scheme.to_ascii_lowercase(),
        );
    }

    /// The scheme for `file_name`, preferring the longest matching suffix.
    pub fn scheme_for(&self, file_name: &str) -> Option<&str> {
        let lower = file_name.to_ascii_lowercase();
        self.extensions
            .iter()
            .filter(|(ext, _)| {
                lower.len() > ext.len() + 1
                    && lower.ends_with(ext.as_str())
                    && lower.as_bytes()[lower.len() - ext.len() - 1] == b'.'
            })
            .max_by_key(|(ext, _)| ext.len())
            .map(|(_, scheme)| scheme.as_str())
    }

    /// Split an absolute host path into the innermost file system it
    /// addresses and the entry name within it. Does no I/O.
    pub fn resolve<P: AsRef<Path>>(&self, path: P) -> FsResult<(MountPoint, EntryName)> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(FsError::InvalidName(path.display().to_string()));
        }
        let mut mount_point = MountPoint::host("/")?;
        let mut segments: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(segment) => {
                    let segment = segment.to_string_lossy().to_string();
                    let scheme = self.scheme_for(&segment).map(str::to_string);
                    segments.push(segment);
                    if let Some(scheme) = scheme {
                        let entry = EntryName::new(&segments.join("/"))?;
                        mount_point = MountPoint::nested(&scheme, mount_point, entry)?;
                        segments.clear();
                    }
                }
                Component::ParentDir => {
                    if segments.pop().is_none() {
                        return Err(FsError::InvalidName(path.display().to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            }
        }
        Ok((mount_point, EntryName::new(&segments.join("/"))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ArchiveDetector {
        ArchiveDetector::new()
            .with("zip", "zip")
            .with("jar", "jar")
            .with("tar.gz", "tgz")
            .with("gz", "gz")
    }

    #[test]
    fn matches_extensions_case_insensitively() {
        let d = detector();
        assert_eq!(d.scheme_for("A.ZIP"), Some("zip"));
        assert_eq!(d.scheme_for("x.tar.gz"), Some("tgz"));
        assert_eq!(d.scheme_for("x.gz"), Some("gz"));
        assert_eq!(d.scheme_for("zip"), None);
        assert_eq!(d.scheme_for(".zip"), None);
        assert_eq!(d.scheme_for("notes.txt"), None);
    }

    #[test]
    fn resolves_nested_archives() {
        let (mp, name) = detector().resolve("/work/a.zip/lib/b.jar/c/d.txt").unwrap();
        assert_eq!(mp.to_string(), "jar:zip:file:/work/a.zip!/lib/b.jar!/");
        assert_eq!(name.as_str(), "c/d.txt");
    }

    #[test]
    fn archive_itself_resolves_to_its_root() {
        let (mp, name) = detector().resolve("/work/a.zip").unwrap();
        assert_eq!(mp.scheme(), "zip");
        assert!(name.is_root());
    }

    #[test]
    fn plain_paths_stay_on_the_host() {
        let (mp, name) = detector().resolve("/work/./x/../y.txt").unwrap();
        assert!(mp.is_host());
        assert_eq!(name.as_str(), "work/y.txt");
        assert!(detector().resolve("relative").is_err());
    }
}
