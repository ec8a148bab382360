//! Option sets accepted by controller operations.

use bitflags::bitflags;

bitflags! {
    /// Options for accessing entries.
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct AccessOptions: u32 {
        /// Route entry content through the write-back cache.
        const CACHE = 1 << 0;
        /// Create missing parent directories, and missing archive files.
        const CREATE_PARENTS = 1 << 1;
        /// Fail if the entry exists already.
        const EXCLUSIVE = 1 << 2;
        /// Tolerate redundant entries instead of syncing first.
        const GROW = 1 << 3;
        /// Store entry content uncompressed. Opaque to the core.
        const STORE = 1 << 4;
        /// Compress entry content. Opaque to the core.
        const COMPRESS = 1 << 5;
        /// Encrypt entry content. Opaque to the core.
        const ENCRYPT = 1 << 6;
    }
}

bitflags! {
    /// Access modes for [`check_access`](crate::FsController::check_access).
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct AccessModes: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

bitflags! {
    /// Options for [`sync`](crate::FsController::sync).
    #[repr(transparent)]
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct SyncOptions: u8 {
        /// Discard all changes instead of committing them.
        const ABORT_CHANGES = 1 << 0;
        /// Drop cached entry content after flushing it.
        const CLEAR_CACHE = 1 << 1;
        /// Close streams which are still open and report a warning.
        const FORCE_CLOSE_IO = 1 << 2;
        /// Wait for streams owned by other threads to get closed.
        const WAIT_CLOSE_IO = 1 << 3;
    }
}

impl SyncOptions {
    /// Implicit sync when an operation needs one.
    pub const SYNC: Self = Self::WAIT_CLOSE_IO;
    /// Commit everything and release all resources.
    pub const UMOUNT: Self = Self::FORCE_CLOSE_IO.union(Self::CLEAR_CACHE);
    /// Throw everything away.
    pub const RESET: Self = Self::ABORT_CHANGES
        .union(Self::FORCE_CLOSE_IO)
        .union(Self::CLEAR_CACHE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn umount_forces_and_clears() {
        assert!(SyncOptions::UMOUNT.contains(SyncOptions::FORCE_CLOSE_IO));
        assert!(SyncOptions::UMOUNT.contains(SyncOptions::CLEAR_CACHE));
        assert!(!SyncOptions::UMOUNT.contains(SyncOptions::ABORT_CHANGES));
    }

    #[test]
    fn implicit_sync_never_forces() {
        assert!(!SyncOptions::SYNC.contains(SyncOptions::FORCE_CLOSE_IO));
        assert!(!SyncOptions::SYNC.contains(SyncOptions::ABORT_CHANGES));
    }
}
