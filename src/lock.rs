//! Three-tier reentrant ledger lock
//!
//! * **read** is shared; any number of threads may hold it.
//! * **update** is an exclusive intent-to-write. It coexists with readers so a
//!   block processor can check the tip and then escalate without another
//!   writer slipping in between.
//! * **write** excludes every other thread in every tier.
//!
//! All tiers are reentrant per thread. A thread that holds only read may not
//! acquire update or write (two such threads would deadlock each other); it
//! has to release and start again. Once a writer is waiting, threads that hold
//! nothing queue behind it instead of joining the readers, so a steady stream
//! of readers cannot starve block processing.
//!
//! Acquisition returns a scoped guard; dropping the guard is the release.

use crate::error::{ChainError, LockTier, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct Holds {
    read: usize,
    update: usize,
    write: usize,
}

impl Holds {
    fn is_empty(&self) -> bool {
        self.read == 0 && self.update == 0 && self.write == 0
    }

    fn only_read(&self) -> bool {
        self.read > 0 && self.update == 0 && self.write == 0
    }
}

#[derive(Debug, Default)]
struct LockState {
    holds: HashMap<ThreadId, Holds>,
    reader_threads: usize,
    updater: Option<ThreadId>,
    writer: Option<ThreadId>,
    waiting_writers: usize,
}

impl LockState {
    fn holds_of(&self, me: ThreadId) -> Holds {
        self.holds.get(&me).copied().unwrap_or_default()
    }

    fn check_order(&self, me: ThreadId, tier: LockTier) -> Result<()> {
        if tier != LockTier::Read && self.holds_of(me).only_read() {
            return Err(ChainError::InvariantViolation(format!(
                "cannot acquire the {} lock while holding only the read lock",
                tier
            )));
        }
        Ok(())
    }

    fn can_acquire(&self, me: ThreadId, tier: LockTier) -> bool {
        let mine = self.holds_of(me);
        if mine.write > 0 {
            return true;
        }
        let writer_free = self.writer.is_none();
        match tier {
            LockTier::Read => writer_free && (self.waiting_writers == 0 || !mine.is_empty()),
            LockTier::Update => writer_free && self.updater.map_or(true, |t| t == me),
            LockTier::Write => {
                let own_read = usize::from(mine.read > 0);
                writer_free
                    && self.updater.map_or(true, |t| t == me)
                    && self.reader_threads == own_read
            }
        }
    }

    fn grant(&mut self, me: ThreadId, tier: LockTier) {
        let entry = self.holds.entry(me).or_default();
        match tier {
            LockTier::Read => {
                entry.read += 1;
                if entry.read == 1 {
                    self.reader_threads += 1;
                }
            }
            LockTier::Update => {
                entry.update += 1;
                self.updater = Some(me);
            }
            LockTier::Write => {
                entry.write += 1;
                self.writer = Some(me);
            }
        }
    }

    fn release(&mut self, me: ThreadId, tier: LockTier) {
        let Some(entry) = self.holds.get_mut(&me) else {
            return;
        };
        match tier {
            LockTier::Read if entry.read > 0 => {
                entry.read -= 1;
                if entry.read == 0 {
                    self.reader_threads -= 1;
                }
            }
            LockTier::Update if entry.update > 0 => {
                entry.update -= 1;
                if entry.update == 0 {
                    self.updater = None;
                }
            }
            LockTier::Write if entry.write > 0 => {
                entry.write -= 1;
                if entry.write == 0 {
                    self.writer = None;
                }
            }
            _ => {}
        }
        if entry.is_empty() {
            self.holds.remove(&me);
        }
    }
}

/// Reader/update/writer lock guarding the ledger's mutable state.
#[derive(Debug, Default)]
pub struct LockManager {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the shared read lock, blocking while a writer is active.
    pub fn read(&self) -> ReadGuard<'_> {
        // Read acquisition never violates ordering and never times out here.
        let _ = self.acquire(LockTier::Read, None);
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn try_read_for(&self, timeout: Duration) -> Result<ReadGuard<'_>> {
        self.acquire(LockTier::Read, Some(Instant::now() + timeout))?;
        Ok(ReadGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn update(&self) -> Result<UpdateGuard<'_>> {
        self.acquire(LockTier::Update, None)?;
        Ok(UpdateGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn try_update_for(&self, timeout: Duration) -> Result<UpdateGuard<'_>> {
        self.acquire(LockTier::Update, Some(Instant::now() + timeout))?;
        Ok(UpdateGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn write(&self) -> Result<WriteGuard<'_>> {
        self.acquire(LockTier::Write, None)?;
        Ok(WriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn try_write_for(&self, timeout: Duration) -> Result<WriteGuard<'_>> {
        self.acquire(LockTier::Write, Some(Instant::now() + timeout))?;
        Ok(WriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Whether the calling thread currently holds the write lock.
    pub fn is_write_held(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().holds_of(me).write > 0
    }

    pub fn is_update_held(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().holds_of(me).update > 0
    }

    pub fn is_read_held(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().holds_of(me).read > 0
    }

    fn acquire(&self, tier: LockTier, deadline: Option<Instant>) -> Result<()> {
        let me = thread::current().id();
        let started = Instant::now();
        let mut state = self.state.lock();
        state.check_order(me, tier)?;

        let mut queued = false;
        while !state.can_acquire(me, tier) {
            if tier == LockTier::Write && !queued {
                state.waiting_writers += 1;
                queued = true;
            }
            let timed_out = match deadline {
                Some(deadline) => self.cond.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.cond.wait(&mut state);
                    false
                }
            };
            if timed_out && !state.can_acquire(me, tier) {
                if queued {
                    state.waiting_writers -= 1;
                    // Readers parked behind this writer may proceed now.
                    self.cond.notify_all();
                }
                let waited = started.elapsed();
                debug!("Gave up on the {} lock after {:?}", tier, waited);
                return Err(ChainError::LockTimeout { tier, waited });
            }
        }
        if queued {
            state.waiting_writers -= 1;
        }
        state.grant(me, tier);
        Ok(())
    }

    fn release(&self, tier: LockTier) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        state.release(me, tier);
        drop(state);
        self.cond.notify_all();
    }
}

/// Shared read hold; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a LockManager,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(LockTier::Read);
    }
}

/// Exclusive intent-to-write hold; released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct UpdateGuard<'a> {
    lock: &'a LockManager,
    _not_send: PhantomData<*const ()>,
}

impl<'a> UpdateGuard<'a> {
    /// Escalates to the write lock while keeping the update hold.
    pub fn escalate(&self) -> Result<WriteGuard<'a>> {
        self.lock.write()
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(LockTier::Update);
    }
}

/// Exclusive write hold; the ledger's mutating operations require one.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a LockManager,
    _not_send: PhantomData<*const ()>,
}

impl WriteGuard<'_> {
    pub fn guards(&self, lock: &LockManager) -> bool {
        std::ptr::eq(self.lock, lock)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(LockTier::Write);
    }
}
