use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::config::{BufferConfig, DiskFullPolicy};
use crate::error::{Error, Result};
use crate::key::BufferKey;
use crate::lane::{DiskEntry, Lane, LaneSync, MemoryEntry, TransferState};
use crate::scratch::ScratchRoot;
use crate::transfer;

/// Two-tier write-through key/value buffer.
///
/// Values are staged in a bounded in-memory lane and drained to a bounded
/// on-disk lane, in insertion order, by a background worker. When the disk
/// lane is full a writer either blocks until an external [`delete`] frees
/// space, or pops the oldest persisted entry through the configured handler
/// (see [`BufferConfig::pop_handler`]).
///
/// All methods are safe to call concurrently. The disk area is scratch
/// space, not a store of record: nothing is recovered after a restart.
///
/// [`delete`]: SpillBuffer::delete
pub struct SpillBuffer<K: BufferKey> {
    shared: Arc<Shared<K>>,
    worker: Option<JoinHandle<()>>,
}

/// Point-in-time capacity snapshot of both lanes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferUsage {
    pub memory_current: u64,
    pub memory_max: u64,
    pub memory_entries: usize,
    pub disk_current: u64,
    pub disk_max: u64,
    pub disk_entries: usize,
}

/// State shared between the API handle and the transfer worker.
///
/// Lock order is memory before disk wherever both lanes are held.
pub(crate) struct Shared<K> {
    pub(crate) memory: LaneSync<MemoryEntry<K>>,
    pub(crate) disk: LaneSync<DiskEntry<K>>,
    policy: DiskFullPolicy<K>,
    scratch: ScratchRoot,
    running: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl<K: BufferKey> SpillBuffer<K> {
    /// Buffer with the given bounds, a fresh scratch root and backpressure
    /// on disk overfill.
    pub fn new(max_memory_usage: u64, max_disk_usage: u64) -> Result<Self> {
        Self::with_config(BufferConfig::new(max_memory_usage, max_disk_usage))
    }

    pub fn with_config(config: BufferConfig<K>) -> Result<Self> {
        if config.max_memory_usage > config.max_disk_usage {
            return Err(Error::InvalidParameter(format!(
                "max memory usage {} exceeds max disk usage {}",
                config.max_memory_usage, config.max_disk_usage
            )));
        }
        let scratch = ScratchRoot::create(config.dir)?;
        tracing::debug!(dir = %scratch.path().display(), "scratch root ready");

        let shared = Arc::new(Shared {
            memory: LaneSync::new(config.max_memory_usage),
            disk: LaneSync::new(config.max_disk_usage),
            policy: config.policy,
            scratch,
            running: AtomicBool::new(true),
            failure: Mutex::new(None),
        });
        let worker = transfer::spawn(Arc::clone(&shared))?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Store `value` under `key`, replacing any previous value for the key.
    ///
    /// Values larger than the memory bound are written to disk on the
    /// caller's thread. May block until space can be made; on success the
    /// value is retrievable until the next [`delete`](SpillBuffer::delete).
    pub fn store(&self, key: K, value: Vec<u8>) -> Result<()> {
        self.shared.store(key, value)
    }

    /// Fetch the value stored under `key`, waiting out an in-flight disk
    /// write if necessary.
    pub fn get(&self, key: &K) -> Result<Vec<u8>> {
        self.shared.get(key)
    }

    /// Remove `key` from both lanes, cancelling a still-in-flight disk
    /// write.
    pub fn delete(&self, key: &K) -> Result<()> {
        self.shared.delete(key)
    }

    /// Raise or lower the memory bound. Fails if it would exceed the disk
    /// bound.
    pub fn set_max_memory_usage(&self, bytes: u64) -> Result<()> {
        self.shared.set_max_memory_usage(bytes)
    }

    /// Raise or lower the disk bound. Fails if it would fall below the
    /// memory bound.
    pub fn set_max_disk_usage(&self, bytes: u64) -> Result<()> {
        self.shared.set_max_disk_usage(bytes)
    }

    /// Capacity snapshot, consistent across both lanes.
    pub fn usage(&self) -> Result<BufferUsage> {
        self.shared.usage()
    }

    /// The scratch root values are persisted into.
    pub fn dir(&self) -> &Path {
        self.shared.scratch.path()
    }
}

impl<K: BufferKey> Drop for SpillBuffer<K> {
    fn drop(&mut self) {
        // Flip the flag under both lane locks so no waiter can miss it.
        {
            let _memory = self
                .shared
                .memory
                .lane
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let _disk = self
                .shared
                .disk
                .lane
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.running.store(false, Ordering::SeqCst);
        }
        if let Some(worker) = self.worker.take() {
            while !worker.is_finished() {
                self.shared.memory.available.notify_all();
                self.shared.disk.available.notify_all();
                std::thread::yield_now();
            }
            let _ = worker.join();
        }
        if let Ok(failure) = self.shared.failure.lock() {
            if let Some(error) = failure.as_ref() {
                tracing::warn!(error = %error, "buffer dropped after worker failure");
            }
        }
    }
}

impl<K: BufferKey> Shared<K> {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// First fatal error wins; every later call keeps returning it.
    pub(crate) fn record_failure(&self, error: Error) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(error);
        }
        self.stop();
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.memory.available.notify_all();
        self.disk.available.notify_all();
    }

    // Fatal failure raised on the calling thread: record it, wake all
    // waiters, hand it back for propagation.
    fn fail(&self, error: Error) -> Error {
        self.record_failure(error.clone());
        error
    }

    // Every public entry point starts here; once the worker has died no
    // call can be allowed to trust either lane.
    fn check_worker(&self) -> Result<()> {
        if let Some(error) = self.failure.lock()?.clone() {
            return Err(error);
        }
        if !self.is_running() {
            return Err(Error::Abort);
        }
        Ok(())
    }

    fn store(&self, key: K, value: Vec<u8>) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidParameter("value must not be empty".into()));
        }
        // Uniqueness per key across both lanes: an overwrite always passes
        // through the delete.
        if self.delete(&key).is_ok() {
            tracing::debug!(key = %key.debug_name(), "replacing stored value");
        }
        self.check_worker()?;

        let required = value.len() as u64;
        let memory = self.memory.lane.lock()?;
        if required > memory.max {
            // Too big to stage; write it to disk on the caller's thread.
            let disk = self.disk.lane.lock()?;
            drop(memory);
            self.store_on_disk(&key, &value, disk)
        } else {
            self.store_in_memory(key, value, memory)
        }
    }

    fn store_in_memory(
        &self,
        key: K,
        value: Vec<u8>,
        mut memory: MutexGuard<'_, Lane<MemoryEntry<K>>>,
    ) -> Result<()> {
        let required = value.len() as u64;
        while self.is_running() && !memory.has_space(required) {
            // Wait for an entry that is safely on disk, for external
            // deletes to free enough room, or for shutdown.
            memory = self.memory.available.wait_while(memory, |lane| {
                self.is_running()
                    && !lane.has_space(required)
                    && !lane
                        .index
                        .iter()
                        .any(|e| e.transfer == TransferState::Completed)
            })?;
            if !self.is_running() {
                break;
            }
            let candidate = memory
                .index
                .iter()
                .position(|e| e.transfer == TransferState::Completed);
            if let Some(evicted) = candidate.and_then(|pos| memory.index.remove(pos)) {
                memory.current -= evicted.value.len() as u64;
                tracing::debug!(
                    key = %evicted.key.debug_name(),
                    "evicted memory entry already persisted to disk"
                );
            }
        }
        if !self.is_running() {
            drop(memory);
            return match self.check_worker() {
                Err(error) => Err(error),
                Ok(()) => Err(Error::Abort),
            };
        }
        memory.current += required;
        memory.index.push_back(MemoryEntry {
            key,
            value,
            transfer: TransferState::NotStarted,
        });
        drop(memory);
        self.memory.available.notify_all();
        Ok(())
    }

    /// Write `value` to the scratch root and account it in the disk lane.
    ///
    /// The caller enters holding the disk lane. Runs on the worker for
    /// staged values and on the producer's thread for values too big for
    /// the memory lane.
    pub(crate) fn store_on_disk<'a>(
        &'a self,
        key: &K,
        value: &[u8],
        mut disk: MutexGuard<'a, Lane<DiskEntry<K>>>,
    ) -> Result<()> {
        let required = value.len() as u64;
        if required > disk.max {
            let limit = disk.max;
            drop(disk);
            tracing::error!(
                key = %key.debug_name(),
                size = required,
                limit,
                "value can never fit on disk"
            );
            return Err(self.fail(Error::CannotExceedLimit {
                size: required,
                limit,
            }));
        }
        disk.index.push_back(DiskEntry {
            key: key.clone(),
            state: TransferState::Started,
        });

        let (mut disk, cancelled) = self.wait_for_space_on_disk(key, required, disk)?;
        if !self.is_running() {
            drop(disk);
            return self.check_worker();
        }
        if !cancelled {
            if let Err(error) = self.scratch.write(key, value) {
                drop(disk);
                tracing::error!(key = %key.debug_name(), error = %error, "failed to persist value");
                return Err(self.fail(error));
            }
            if let Some(entry) = disk
                .index
                .iter_mut()
                .rev()
                .find(|e| e.state == TransferState::Started && e.key == *key)
            {
                entry.state = TransferState::Completed;
            }
            disk.current += required;
        }
        drop(disk);
        self.disk.available.notify_all();
        Ok(())
    }

    /// Wait until `required` bytes fit on disk, popping or parking
    /// according to the configured policy. Returns `true` when the write
    /// was cancelled by a racing delete.
    fn wait_for_space_on_disk<'a>(
        &self,
        key: &K,
        required: u64,
        mut disk: MutexGuard<'a, Lane<DiskEntry<K>>>,
    ) -> Result<(MutexGuard<'a, Lane<DiskEntry<K>>>, bool)> {
        while self.is_running() && !disk.has_space(required) {
            // A racing delete may have cancelled this write; ours is the
            // most recently appended entry for the key.
            match disk.index.iter().rposition(|e| e.key == *key) {
                None => return Ok((disk, true)),
                Some(pos) if disk.index[pos].state == TransferState::Cancelled => {
                    disk.index.remove(pos);
                    return Ok((disk, true));
                }
                Some(_) => {}
            }
            match &self.policy {
                DiskFullPolicy::Evict(pop) => {
                    let Some(front_state) = disk.index.front().map(|e| e.state) else {
                        continue;
                    };
                    match front_state {
                        TransferState::Completed => {
                            let Some(oldest_key) = disk.index.front().map(|e| e.key.clone())
                            else {
                                continue;
                            };
                            let value = self.remove_file(&mut disk, &oldest_key, true)?;
                            disk.index.pop_front();
                            if let Some(value) = value {
                                tracing::debug!(
                                    key = %oldest_key.debug_name(),
                                    "popping oldest disk entry to make room"
                                );
                                pop(oldest_key, value);
                            }
                        }
                        TransferState::Cancelled => {
                            // Abandoned by a cancelled write; clear it out
                            // of the eviction path.
                            if let Some(entry) = disk.index.pop_front() {
                                self.scratch.discard(&entry.key);
                            }
                        }
                        TransferState::Started | TransferState::NotStarted => {
                            // The oldest entry cannot be a write in
                            // progress; wait for it to settle.
                            debug_assert!(false, "in-flight write at the front of the disk lane");
                            disk = self.disk.available.wait(disk)?;
                        }
                    }
                }
                DiskFullPolicy::Backpressure => {
                    // Space is made by external deletes only.
                    disk = self.disk.available.wait(disk)?;
                }
            }
        }
        Ok((disk, false))
    }

    fn get(&self, key: &K) -> Result<Vec<u8>> {
        self.check_worker()?;
        {
            let memory = self.memory.lane.lock()?;
            if let Some(entry) = memory.index.iter().find(|e| e.key == *key) {
                return Ok(entry.value.clone());
            }
        }
        let mut disk = self.disk.lane.lock()?;
        let state = disk
            .index
            .iter()
            .rev()
            .find(|e| e.key == *key)
            .map(|e| e.state);
        match state {
            None | Some(TransferState::Cancelled) => return Err(Error::NoSuchElement),
            Some(TransferState::Started) => {
                // Rendezvous with the in-flight write.
                disk = self.disk.available.wait_while(disk, |lane| {
                    self.is_running()
                        && lane
                            .index
                            .iter()
                            .rev()
                            .find(|e| e.key == *key)
                            .is_some_and(|e| e.state == TransferState::Started)
                })?;
                if !self.is_running() {
                    drop(disk);
                    return match self.check_worker() {
                        Err(error) => Err(error),
                        Ok(()) => Err(Error::Abort),
                    };
                }
                let state = disk
                    .index
                    .iter()
                    .rev()
                    .find(|e| e.key == *key)
                    .map(|e| e.state);
                if matches!(state, None | Some(TransferState::Cancelled)) {
                    return Err(Error::NoSuchElement);
                }
            }
            _ => {}
        }
        self.scratch.read(key)
    }

    fn delete(&self, key: &K) -> Result<()> {
        self.check_worker()?;
        let also_on_disk = self.delete_from_memory(key)?;
        if also_on_disk != TransferState::NotStarted {
            self.delete_from_disk(key)?;
        }
        Ok(())
    }

    fn delete_from_memory(&self, key: &K) -> Result<TransferState> {
        let also_on_disk;
        let mut changed = false;
        {
            let mut memory = self.memory.lane.lock()?;
            let pos = memory.index.iter().position(|e| e.key == *key);
            match pos.and_then(|p| memory.index.remove(p)) {
                Some(entry) => {
                    also_on_disk = entry.transfer;
                    memory.current -= entry.value.len() as u64;
                    changed = true;
                }
                None => {
                    // Not staged; it may still be on disk.
                    also_on_disk = TransferState::Completed;
                }
            }
        }
        if changed {
            self.memory.available.notify_all();
        }
        Ok(also_on_disk)
    }

    fn delete_from_disk(&self, key: &K) -> Result<()> {
        {
            let mut disk = self.disk.lane.lock()?;
            let Some(pos) = disk.index.iter().rposition(|e| e.key == *key) else {
                tracing::warn!(key = %key.debug_name(), "key not present in the disk lane");
                return Err(Error::NoSuchElement);
            };
            match disk.index[pos].state {
                TransferState::Started => {
                    // The write is in flight; its writer observes this and
                    // abandons the entry.
                    disk.index[pos].state = TransferState::Cancelled;
                }
                TransferState::Completed => {
                    self.remove_file(&mut disk, key, false)?;
                    disk.index.remove(pos);
                }
                _ => {}
            }
        }
        self.disk.available.notify_all();
        Ok(())
    }

    // Caller holds the disk lane; adjusts `current` by the file's size.
    fn remove_file(
        &self,
        disk: &mut Lane<DiskEntry<K>>,
        key: &K,
        read_back: bool,
    ) -> Result<Option<Vec<u8>>> {
        let size = self.scratch.size(key)?;
        let value = if read_back {
            Some(self.scratch.read(key)?)
        } else {
            None
        };
        self.scratch.remove(key)?;
        disk.current = disk.current.saturating_sub(size);
        Ok(value)
    }

    fn set_max_memory_usage(&self, bytes: u64) -> Result<()> {
        {
            let mut memory = self.memory.lane.lock()?;
            let disk = self.disk.lane.lock()?;
            if bytes > disk.max {
                return Err(Error::InvalidParameter(format!(
                    "max memory usage {bytes} exceeds max disk usage {}",
                    disk.max
                )));
            }
            drop(disk);
            memory.max = bytes;
        }
        self.memory.available.notify_all();
        Ok(())
    }

    fn set_max_disk_usage(&self, bytes: u64) -> Result<()> {
        let increased;
        {
            let memory = self.memory.lane.lock()?;
            let mut disk = self.disk.lane.lock()?;
            if memory.max > bytes {
                return Err(Error::InvalidParameter(format!(
                    "max memory usage {} exceeds max disk usage {bytes}",
                    memory.max
                )));
            }
            drop(memory);
            increased = bytes > disk.max;
            disk.max = bytes;
        }
        if increased {
            self.disk.available.notify_all();
        }
        Ok(())
    }

    fn usage(&self) -> Result<BufferUsage> {
        let memory = self.memory.lane.lock()?;
        let disk = self.disk.lane.lock()?;
        Ok(BufferUsage {
            memory_current: memory.current,
            memory_max: memory.max,
            memory_entries: memory.index.len(),
            disk_current: disk.current,
            disk_max: disk.max,
            disk_entries: disk.index.len(),
        })
    }
}
