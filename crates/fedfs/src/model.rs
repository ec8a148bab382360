use crate::lock::{LockAspect, ReentrantRwLock};
use crate::mount_point::MountPoint;
use log::debug;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Observes the mounted flag of models.
pub trait MountListener: Send + Sync {
    fn mounted_changed(&self, mount_point: &MountPoint, mounted: bool);
}

/// State shared by every layer of one controller chain: the mount point,
/// the lock and whether the file system has been mounted.
pub struct FsModel {
    mount_point: MountPoint,
    parent: Option<Arc<FsModel>>,
    mounted: AtomicBool,
    lock: Arc<ReentrantRwLock>,
    listener: Mutex<Option<Weak<dyn MountListener>>>,
}

impl FsModel {
    pub fn new(mount_point: MountPoint, parent: Option<Arc<FsModel>>) -> Self {
        Self {
            mount_point,
            parent,
            mounted: AtomicBool::new(false),
            lock: Arc::new(ReentrantRwLock::new()),
            listener: Mutex::new(None),
        }
    }

    pub fn mount_point(&self) -> &MountPoint {
        &self.mount_point
    }

    pub fn parent(&self) -> Option<&Arc<FsModel>> {
        self.parent.as_ref()
    }

    pub fn lock_handle(&self) -> &Arc<ReentrantRwLock> {
        &self.lock
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Flip the mounted flag and tell the listener about actual changes.
    pub fn set_mounted(&self, mounted: bool) {
        if self.mounted.swap(mounted, Ordering::AcqRel) == mounted {
            return;
        }
        debug!(
            "{} {}",
            if mounted { "mounted" } else { "unmounted" },
            self.mount_point
        );
        let listener = self.listener.lock().as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.mounted_changed(&self.mount_point, mounted);
        }
    }

    pub fn set_listener(&self, listener: Weak<dyn MountListener>) {
        *self.listener.lock() = Some(listener);
    }
}

impl LockAspect for FsModel {
    fn lock(&self) -> &ReentrantRwLock {
        &self.lock
    }
}

impl fmt::Debug for FsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsModel")
            .field("mount_point", &self.mount_point.to_string())
            .field("mounted", &self.is_mounted())
            .finish()
    }
}
