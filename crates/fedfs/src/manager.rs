//! Registry of the controllers of a federation.
//!
//! The manager hands out one controller per mount point, creating parents
//! first. It keeps controllers of unmounted file systems only weakly, so
//! they go away when nobody uses them; once a file system gets mounted its
//! controller is pinned until the next sync unmounts it.

use crate::config::FsConfig;
use crate::controller::FsController;
use crate::driver::CompositeDriver;
use crate::error::{FsResult, SyncErrorBuilder};
use crate::model::{FsModel, MountListener};
use crate::mount_point::MountPoint;
use crate::options::SyncOptions;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

enum Link {
    Strong(Arc<dyn FsController>),
    Weak(Weak<dyn FsController>),
}

impl Link {
    fn get(&self) -> Option<Arc<dyn FsController>> {
        match self {
            Link::Strong(controller) => Some(Arc::clone(controller)),
            Link::Weak(controller) => controller.upgrade(),
        }
    }

    fn is_strong(&self) -> bool {
        matches!(self, Link::Strong(_))
    }
}

pub(crate) struct ManagerInner {
    this: Weak<ManagerInner>,
    driver: Arc<dyn CompositeDriver>,
    config: FsConfig,
    links: RwLock<HashMap<MountPoint, Link>>,
}

impl ManagerInner {
    fn snapshot(
        &self,
        filter: &dyn Fn(&MountPoint) -> bool,
    ) -> Vec<(MountPoint, Arc<dyn FsController>)> {
        let mut controllers: Vec<_> = self
            .links
            .read()
            .iter()
            .filter(|(mount_point, _)| filter(mount_point))
            .filter_map(|(mount_point, link)| link.get().map(|c| (mount_point.clone(), c)))
            .collect();
        // children before their parents
        controllers.sort_by(|(a, _), (b, _)| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| a.to_string().cmp(&b.to_string()))
        });
        controllers
    }

    fn has_strong_links(&self) -> bool {
        self.links.read().values().any(Link::is_strong)
    }

    fn sweep(&self) {
        self.links.write().retain(|_, link| link.get().is_some());
    }

    pub(crate) fn sync(
        &self,
        filter: &dyn Fn(&MountPoint) -> bool,
        options: SyncOptions,
    ) -> FsResult<()> {
        let mut builder = SyncErrorBuilder::new();
        for (mount_point, controller) in self.snapshot(filter) {
            debug!("syncing {}", mount_point);
            if let Err(err) = controller.sync(options) {
                builder.absorb(err);
            }
        }
        self.sweep();
        builder.check()
    }
}

impl MountListener for ManagerInner {
    fn mounted_changed(&self, mount_point: &MountPoint, mounted: bool) {
        let mut links = self.links.write();
        if let Some(link) = links.get_mut(mount_point) {
            match (mounted, &*link) {
                (true, Link::Weak(controller)) => {
                    if let Some(controller) = controller.upgrade() {
                        *link = Link::Strong(controller);
                    }
                }
                (false, Link::Strong(controller)) => {
                    *link = Link::Weak(Arc::downgrade(controller));
                }
                _ => {}
            }
        }
        let armed = links.values().any(Link::is_strong);
        drop(links);
        if mounted && armed && self.config.sync_on_shutdown {
            shutdown::arm(self);
        } else if !armed {
            shutdown::disarm(self);
        }
    }
}

/// Hands out controllers and syncs them as a whole.
pub struct FsManager {
    inner: Arc<ManagerInner>,
}

impl FsManager {
    pub fn new(driver: Arc<dyn CompositeDriver>, config: FsConfig) -> Self {
        Self {
            inner: Arc::new_cyclic(|this| ManagerInner {
                this: this.clone(),
                driver,
                config,
                links: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.inner.config
    }

    /// The controller for `mount_point`, created along with its parents if
    /// need be.
    pub fn controller(&self, mount_point: &MountPoint) -> FsResult<Arc<dyn FsController>> {
        if let Some(controller) = self.inner.links.read().get(mount_point).and_then(Link::get) {
            return Ok(controller);
        }
        let parent = match mount_point.parent() {
            Some(parent) => Some(self.controller(parent)?),
            None => None,
        };

        let mut links = self.inner.links.write();
        if let Some(controller) = links.get(mount_point).and_then(Link::get) {
            return Ok(controller);
        }
        let model = Arc::new(FsModel::new(
            mount_point.clone(),
            parent.as_ref().map(|parent| Arc::clone(parent.model())),
        ));
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let listener: Weak<dyn MountListener> = inner;
        model.set_listener(listener);
        let controller = self.inner.driver.new_controller(model, parent)?;
        debug!("new controller for {}", mount_point);
        links.insert(mount_point.clone(), Link::Weak(Arc::downgrade(&controller)));
        Ok(controller)
    }

    /// Number of live controllers.
    pub fn size(&self) -> usize {
        self.inner
            .links
            .read()
            .values()
            .filter(|link| link.get().is_some())
            .count()
    }

    /// Visit the controllers accepted by `filter`, children first.
    pub fn accept<F, V>(&self, filter: F, mut visitor: V) -> FsResult<()>
    where
        F: Fn(&MountPoint) -> bool,
        V: FnMut(&Arc<dyn FsController>) -> FsResult<()>,
    {
        for (_, controller) in self.inner.snapshot(&filter) {
            visitor(&controller)?;
        }
        Ok(())
    }

    /// Sync every controller, children first. Failures are collected and
    /// reported together once all controllers have been synced.
    pub fn sync(&self, options: SyncOptions) -> FsResult<()> {
        self.inner.sync(&|_| true, options)
    }

    /// Sync `mount_point` and every file system nested within it.
    pub fn sync_within(&self, mount_point: &MountPoint, options: SyncOptions) -> FsResult<()> {
        self.inner.sync(&|mp| mp.is_within(mount_point), options)
    }
}

impl Drop for FsManager {
    fn drop(&mut self) {
        if !self.inner.config.sync_on_shutdown || !self.inner.has_strong_links() {
            return;
        }
        if let Err(err) = self.sync(SyncOptions::UMOUNT) {
            warn!("sync on drop failed: {}", err);
        }
        shutdown::disarm(&self.inner);
    }
}

/// Process-wide registry of managers with mounted file systems.
///
/// Call [`sync_all`](shutdown::sync_all) before the process exits to commit
/// whatever is still pending.
pub mod shutdown {
    use super::ManagerInner;
    use crate::error::{FsResult, SyncErrorBuilder};
    use crate::options::SyncOptions;
    use log::debug;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use std::sync::Weak;

    static MANAGERS: Lazy<Mutex<Vec<Weak<ManagerInner>>>> = Lazy::new(|| Mutex::new(Vec::new()));

    fn is(weak: &Weak<ManagerInner>, manager: &ManagerInner) -> bool {
        std::ptr::eq(weak.as_ptr(), manager)
    }

    pub(crate) fn arm(manager: &ManagerInner) {
        let mut managers = MANAGERS.lock();
        managers.retain(|weak| weak.strong_count() > 0);
        if managers.iter().any(|weak| is(weak, manager)) {
            return;
        }
        debug!("armed shutdown sync");
        managers.push(manager.this.clone());
    }

    pub(crate) fn disarm(manager: &ManagerInner) {
        MANAGERS.lock().retain(|weak| weak.strong_count() > 0 && !is(weak, manager));
    }

    /// Number of managers which would be synced.
    pub fn armed() -> usize {
        MANAGERS.lock().iter().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Unmount everything of every armed manager.
    pub fn sync_all() -> FsResult<()> {
        let managers: Vec<_> = MANAGERS
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        let mut builder = SyncErrorBuilder::new();
        for manager in managers {
            if let Err(err) = manager.sync(&|_| true, SyncOptions::UMOUNT) {
                builder.absorb(err);
            }
        }
        builder.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverRegistry;
    use crate::error::FsError;
    use crate::lock::LockAspect;
    use crate::mount_point::EntryName;
    use crate::options::AccessOptions;
    use crate::testing::{read_container, JsonDriver};
    use crate::EntryType;
    use std::io::Write;
    use std::thread;
    use tempfile::TempDir;

    fn config(sync_on_shutdown: bool) -> FsConfig {
        FsConfig {
            sync_on_shutdown,
            ..FsConfig::default()
        }
    }

    fn manager_with(driver: Arc<JsonDriver>, config: FsConfig) -> FsManager {
        let registry = DriverRegistry::new(config.clone()).with("json", driver);
        FsManager::new(Arc::new(registry), config)
    }

    fn manager() -> FsManager {
        manager_with(Arc::new(JsonDriver::default()), config(false))
    }

    /// `a.json!b.json` addresses `b.json` within `a.json`.
    fn archive(dir: &TempDir, path: &str) -> MountPoint {
        let mut mount_point = MountPoint::host(dir.path()).unwrap();
        for segment in path.split('!') {
            mount_point =
                MountPoint::nested("json", mount_point, EntryName::new(segment).unwrap()).unwrap();
        }
        mount_point
    }

    fn name(s: &str) -> EntryName {
        EntryName::new(s).unwrap()
    }

    fn write(controller: &Arc<dyn FsController>, entry: &str, text: &str) {
        let mut out = controller
            .output(AccessOptions::CREATE_PARENTS, &name(entry), None)
            .unwrap();
        out.write_all(text.as_bytes()).unwrap();
        out.finish().unwrap();
    }

    fn read(controller: &Arc<dyn FsController>, entry: &str) -> String {
        let data = controller
            .input(AccessOptions::empty(), &name(entry))
            .unwrap()
            .read_to_vec()
            .unwrap();
        String::from_utf8(data).unwrap()
    }

    #[test]
    fn nested_changes_commit_on_sync_children_first() {
        let dir = TempDir::new().unwrap();
        let manager = manager();
        let inner = manager.controller(&archive(&dir, "a.json!b.json")).unwrap();
        assert_eq!(manager.size(), 3);

        write(&inner, "docs/x.txt", "hi");
        assert!(!dir.path().join("a.json").exists());
        // reading back b.json needs its pending copy in a.json committed
        assert_eq!(read(&inner, "docs/x.txt"), "hi");

        manager.sync(SyncOptions::UMOUNT).unwrap();
        let outer = read_container(&dir.path().join("a.json"));
        let nested: std::collections::BTreeMap<String, String> =
            serde_json::from_str(&outer["b.json"]).unwrap();
        assert_eq!(nested.get("docs/x.txt").map(String::as_str), Some("hi"));
        assert!(nested.contains_key("docs/"));
    }

    #[test]
    fn mounted_controllers_stay_until_sync() {
        let dir = TempDir::new().unwrap();
        let manager = manager();
        let mount_point = archive(&dir, "a.json");
        {
            let controller = manager.controller(&mount_point).unwrap();
            write(&controller, "f", "x");
        }
        assert_eq!(manager.size(), 2);
        let again = manager.controller(&mount_point).unwrap();
        assert!(again.model().is_mounted());
        drop(again);

        manager.sync(SyncOptions::UMOUNT).unwrap();
        assert_eq!(manager.size(), 0);
        assert!(dir.path().join("a.json").is_file());
    }

    #[test]
    fn accept_visits_children_first() {
        let dir = TempDir::new().unwrap();
        let manager = manager();
        let _keep = [
            manager.controller(&archive(&dir, "a.json!b.json")).unwrap(),
            manager.controller(&archive(&dir, "c.json")).unwrap(),
        ];
        let mut seen = Vec::new();
        manager
            .accept(
                |_| true,
                |controller| {
                    seen.push(controller.model().mount_point().depth());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(seen, vec![2, 1, 1, 0]);
    }

    #[test]
    fn plain_directory_is_served_by_the_parent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("d.json")).unwrap();
        std::fs::write(dir.path().join("d.json/x.txt"), "plain").unwrap();
        let manager = manager();
        let controller = manager.controller(&archive(&dir, "d.json")).unwrap();

        assert_eq!(read(&controller, "x.txt"), "plain");
        let root = controller
            .node(AccessOptions::empty(), &EntryName::root())
            .unwrap()
            .unwrap();
        assert!(root.is_directory());
        assert!(root.members.contains("x.txt"));
    }

    #[test]
    fn persistent_false_positive_pins_the_parent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("g.json"), "not json").unwrap();
        let driver = Arc::new(JsonDriver::default());
        let manager = manager_with(Arc::clone(&driver), config(false));
        let controller = manager.controller(&archive(&dir, "g.json")).unwrap();

        let root = controller
            .node(AccessOptions::empty(), &EntryName::root())
            .unwrap()
            .unwrap();
        assert!(root.is_file());
        assert_eq!(read(&controller, ""), "not json");
        assert_eq!(driver.input_services(), 1);

        match controller.input(AccessOptions::empty(), &name("missing")) {
            Err(FsError::FalsePositive { cause, suppressed }) => {
                assert!(matches!(*cause, FsError::InvalidArchive(_)));
                assert!(suppressed.is_some());
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }

        // a sync lets the archive be detected again
        controller.sync(SyncOptions::SYNC).unwrap();
        controller.node(AccessOptions::empty(), &EntryName::root()).unwrap();
        assert_eq!(driver.input_services(), 2);
    }

    #[test]
    fn make_and_unlink_the_archive_root() {
        let dir = TempDir::new().unwrap();
        let manager = manager();
        let controller = manager.controller(&archive(&dir, "a.json")).unwrap();
        controller
            .make(AccessOptions::empty(), &EntryName::root(), EntryType::Directory, None)
            .unwrap();
        manager.sync(SyncOptions::UMOUNT).unwrap();
        assert!(read_container(&dir.path().join("a.json")).is_empty());

        controller
            .unlink(AccessOptions::empty(), &EntryName::root())
            .unwrap();
        assert!(!dir.path().join("a.json").exists());
    }

    #[test]
    fn read_lock_holder_gets_an_error_instead_of_a_deadlock() {
        let dir = TempDir::new().unwrap();
        crate::testing::write_container(&dir.path().join("a.json"), &[("f", "x")]);
        let manager = manager();
        let controller = manager.controller(&archive(&dir, "a.json")).unwrap();

        let _read = controller.model().lock().read();
        assert!(matches!(
            controller.input(AccessOptions::empty(), &name("f")),
            Err(FsError::Precondition(_))
        ));
    }

    #[test]
    fn concurrent_writers_all_commit() {
        let dir = TempDir::new().unwrap();
        let manager = manager();
        let controller = manager.controller(&archive(&dir, "a.json")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let controller = Arc::clone(&controller);
                thread::spawn(move || {
                    write(&controller, &format!("t{}/f", i), &i.to_string());
                    assert_eq!(read(&controller, &format!("t{}/f", i)), i.to_string());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        manager.sync(SyncOptions::UMOUNT).unwrap();

        let stored = read_container(&dir.path().join("a.json"));
        for i in 0..8 {
            assert_eq!(stored[&format!("t{}/f", i)], i.to_string());
        }
    }

    #[test]
    fn shutdown_hooks_commit_pending_changes() {
        let dir = TempDir::new().unwrap();

        let manager = manager_with(Arc::new(JsonDriver::default()), config(true));
        let controller = manager.controller(&archive(&dir, "a.json")).unwrap();
        write(&controller, "f", "1");
        drop(controller);
        assert!(shutdown::armed() >= 1);
        shutdown::sync_all().unwrap();
        assert_eq!(read_container(&dir.path().join("a.json"))["f"], "1");

        let controller = manager.controller(&archive(&dir, "b.json")).unwrap();
        write(&controller, "g", "2");
        drop(controller);
        drop(manager);
        assert_eq!(read_container(&dir.path().join("b.json"))["g"], "2");
    }
}
