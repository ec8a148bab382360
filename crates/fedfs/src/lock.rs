//! Locks shared by the layers of a controller chain.
//!
//! Every archive model owns one [`ReentrantRwLock`]. Layers never touch it
//! directly but go through [`LockAspect`], which refuses to upgrade a read
//! lock: a thread holding only a read lock gets [`Signal::NeedsWriteLock`]
//! back and has to unwind before it may ask for the write lock.

use crate::signal::{done, retry, Attempt, Signal};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_holds: usize,
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

/// A read/write lock which both readers and the writer may re-enter.
///
/// The writer may also take read locks. A reader may not take the write lock;
/// doing so would deadlock against any other reader trying the same, so it
/// is a programming error and panics.
#[derive(Debug, Default)]
pub struct ReentrantRwLock {
    state: Mutex<LockState>,
    changed: Condvar,
    read_acquisitions: AtomicU64,
    write_acquisitions: AtomicU64,
}

impl ReentrantRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let reentrant = state.writer == Some(me) || state.readers.contains_key(&me);
            if reentrant || (state.writer.is_none() && state.waiting_writers == 0) {
                break;
            }
            self.changed.wait(&mut state);
        }
        *state.readers.entry(me).or_insert(0) += 1;
        self.read_acquisitions.fetch_add(1, Ordering::Relaxed);
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.writer == Some(me) {
            state.write_holds += 1;
        } else {
            assert!(
                !state.readers.contains_key(&me),
                "read lock held while acquiring the write lock"
            );
            state.waiting_writers += 1;
            while state.writer.is_some() || !state.readers.is_empty() {
                self.changed.wait(&mut state);
            }
            state.waiting_writers -= 1;
            state.writer = Some(me);
            state.write_holds = 1;
        }
        self.write_acquisitions.fetch_add(1, Ordering::Relaxed);
        WriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.state.lock().writer == Some(thread::current().id())
    }

    pub fn is_read_locked_by_current_thread(&self) -> bool {
        self.read_hold_count() > 0
    }

    /// Number of read locks the current thread holds.
    pub fn read_hold_count(&self) -> usize {
        let me = thread::current().id();
        self.state.lock().readers.get(&me).copied().unwrap_or(0)
    }

    /// Number of read locks granted so far, re-entries included.
    pub fn read_acquisitions(&self) -> u64 {
        self.read_acquisitions.load(Ordering::Relaxed)
    }

    /// Number of write locks granted so far, re-entries included.
    pub fn write_acquisitions(&self) -> u64 {
        self.write_acquisitions.load(Ordering::Relaxed)
    }

    fn release_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some(holds) = state.readers.get_mut(&me) {
            *holds -= 1;
            if *holds == 0 {
                state.readers.remove(&me);
            }
        }
        drop(state);
        self.changed.notify_all();
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.write_holds -= 1;
        if state.write_holds == 0 {
            state.writer = None;
        }
        drop(state);
        self.changed.notify_all();
    }
}

pub struct ReadGuard<'a> {
    lock: &'a ReentrantRwLock,
    // released by the thread which acquired it
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a ReentrantRwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

/// Runs operations while holding the lock of an archive model.
pub trait LockAspect {
    fn lock(&self) -> &ReentrantRwLock;

    fn read_locked<T>(&self, op: impl FnOnce() -> T) -> T {
        let _guard = self.lock().read();
        op()
    }

    /// Run `op` write-locked, or ask for a retry if the current thread holds
    /// a read lock which it would have to upgrade.
    fn write_locked<T>(&self, op: impl FnOnce() -> Attempt<T>) -> Attempt<T> {
        let lock = self.lock();
        if lock.is_read_locked_by_current_thread() && !lock.is_write_locked_by_current_thread() {
            return retry(Signal::NeedsWriteLock);
        }
        let _guard = lock.write();
        op()
    }

    fn is_write_locked_by_current_thread(&self) -> bool {
        self.lock().is_write_locked_by_current_thread()
    }

    fn check_write_locked_by_current_thread(&self) -> Attempt<()> {
        if self.is_write_locked_by_current_thread() {
            done(())
        } else {
            retry(Signal::NeedsWriteLock)
        }
    }
}

/// Runs operations on a value guarded by a plain mutex.
pub trait MutexAspect {
    type Target;

    fn mutex(&self) -> &Mutex<Self::Target>;

    fn locked<T>(&self, op: impl FnOnce(&mut Self::Target) -> T) -> T {
        let mut guard: MutexGuard<'_, Self::Target> = self.mutex().lock();
        op(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Outcome;
    use std::sync::Arc;
    use std::time::Duration;

    struct Holder(ReentrantRwLock);

    impl LockAspect for Holder {
        fn lock(&self) -> &ReentrantRwLock {
            &self.0
        }
    }

    #[test]
    fn readers_and_writer_reenter() {
        let lock = ReentrantRwLock::new();
        {
            let _a = lock.read();
            let _b = lock.read();
            assert_eq!(lock.read_hold_count(), 2);
        }
        assert_eq!(lock.read_hold_count(), 0);

        let _w = lock.write();
        let _w2 = lock.write();
        let _r = lock.read();
        assert!(lock.is_write_locked_by_current_thread());
        assert_eq!(lock.read_hold_count(), 1);
    }

    #[test]
    fn write_locked_refuses_upgrade() {
        let holder = Holder(ReentrantRwLock::new());
        let outcome = holder.read_locked(|| holder.write_locked(|| done(())));
        assert!(matches!(outcome, Ok(Outcome::Retry(Signal::NeedsWriteLock))));
        assert_eq!(holder.0.write_acquisitions(), 0);
    }

    #[test]
    fn write_locked_inside_write_lock_reenters() {
        let holder = Holder(ReentrantRwLock::new());
        let outcome = holder.write_locked(|| holder.write_locked(|| done(5)));
        assert!(matches!(outcome, Ok(Outcome::Done(5))));
    }

    #[test]
    fn writer_excludes_readers_of_other_threads() {
        let lock = Arc::new(ReentrantRwLock::new());
        let guard = lock.write();

        let other = Arc::clone(&lock);
        let reader = std::thread::spawn(move || {
            let _r = other.read();
            other.is_write_locked_by_current_thread()
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());
        drop(guard);
        assert!(!reader.join().unwrap());
    }

    #[test]
    #[should_panic(expected = "read lock held")]
    fn raw_upgrade_is_a_programming_error() {
        let lock = ReentrantRwLock::new();
        let _r = lock.read();
        let _w = lock.write();
    }
}
