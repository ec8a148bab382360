//! Falls back to the parent file system when an archive turns out to be a
//! plain file or directory.

use crate::controller::{debug_assert_shared_model, FsController, Layer};
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::FsResult;
use crate::io::{InputStream, OutputStream};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{done, Attempt, FalsePositive, Outcome, Signal};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

/// Where operations go.
#[derive(Debug, Clone)]
enum Route {
    TryChild,
    /// Pinned by a persistent false positive until the next sync.
    UseParent(FalsePositive),
}

/// The outermost layer of an archive controller.
pub(crate) struct FalsePositiveController {
    model: Arc<FsModel>,
    delegate: Box<dyn Layer>,
    parent: Arc<dyn FsController>,
    entry: EntryName,
    route: Mutex<Route>,
}

impl FalsePositiveController {
    pub(crate) fn new(
        model: Arc<FsModel>,
        delegate: Box<dyn Layer>,
        parent: Arc<dyn FsController>,
        entry: EntryName,
    ) -> Self {
        debug_assert_shared_model(&model, delegate.as_ref());
        Self {
            model,
            delegate,
            parent,
            entry,
            route: Mutex::new(Route::TryChild),
        }
    }

    /// Run `child` on the archive, or `parent` on the enclosing file system
    /// with `name` resolved against it if the archive is a false positive.
    fn call<T>(
        &self,
        name: &EntryName,
        child: impl FnOnce(&dyn Layer) -> Attempt<T>,
        parent: impl FnOnce(&dyn FsController, &EntryName) -> FsResult<T>,
    ) -> FsResult<T> {
        let route = self.route.lock().clone();
        let fp = match route {
            Route::UseParent(fp) => fp,
            Route::TryChild => match child(self.delegate.as_ref())? {
                Outcome::Done(value) => return Ok(value),
                Outcome::Retry(Signal::FalsePositive(fp)) => {
                    if fp.is_persistent() {
                        *self.route.lock() = Route::UseParent(fp.clone());
                    }
                    fp
                }
                outcome => return outcome.settle(),
            },
        };
        let resolved = self.entry.join(name);
        debug!(
            "{} is a false positive, using {}",
            self.model.mount_point(),
            self.parent.model().mount_point().resolve(&resolved)
        );
        parent(self.parent.as_ref(), &resolved).map_err(|err| fp.into_error(Some(err)))
    }
}

impl FsController for FalsePositiveController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn parent(&self) -> Option<&Arc<dyn FsController>> {
        Some(&self.parent)
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> FsResult<Option<Node>> {
        self.call(
            name,
            |layer| layer.node(options, name),
            |parent, resolved| {
                // report the node under the name it was asked for
                let node = parent.node(options, resolved)?;
                Ok(node.map(|mut node| {
                    node.name = name.clone();
                    node
                }))
            },
        )
    }

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> FsResult<()> {
        self.call(
            name,
            |layer| layer.check_access(options, name, modes),
            |parent, resolved| parent.check_access(options, resolved, modes),
        )
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> FsResult<()> {
        self.call(
            name,
            |layer| layer.set_time(options, name, modified),
            |parent, resolved| parent.set_time(options, resolved, modified),
        )
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> FsResult<InputStream> {
        self.call(
            name,
            |layer| layer.input(options, name),
            |parent, resolved| parent.input(options, resolved),
        )
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<OutputStream> {
        self.call(
            name,
            |layer| layer.output(options, name, template),
            |parent, resolved| parent.output(options, resolved, template),
        )
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<()> {
        self.call(
            name,
            |layer| layer.make(options, name, kind, template),
            |parent, resolved| parent.make(options, resolved, kind, template),
        )
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> FsResult<()> {
        self.call(
            name,
            |layer| {
                attempt!(layer.unlink(options, name));
                if name.is_root() {
                    // not atomic: the archive is gone while its file still exists
                    self.parent.unlink(options, &self.entry)?;
                }
                done(())
            },
            |parent, resolved| parent.unlink(options, resolved),
        )
    }

    fn sync(&self, options: SyncOptions) -> FsResult<()> {
        let outcome = match self.delegate.sync(options)? {
            Outcome::Retry(Signal::FalsePositive(_)) => Outcome::Done(()),
            outcome => outcome,
        };
        outcome.settle()?;
        *self.route.lock() = Route::TryChild;
        Ok(())
    }
}
