use std::fmt;
use std::path::PathBuf;

/// Invoked with each evicted entry when the disk lane pops to make room.
/// Runs with the disk lane held, so it must not call back into the buffer.
pub type PopFn<K> = Box<dyn Fn(K, Vec<u8>) + Send + Sync>;

/// What a writer does when the disk lane is full.
pub enum DiskFullPolicy<K> {
    /// Block until an external `delete` frees space.
    Backpressure,
    /// Pop the oldest persisted entry and hand it to the callback.
    Evict(PopFn<K>),
}

impl<K> fmt::Debug for DiskFullPolicy<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskFullPolicy::Backpressure => f.write_str("Backpressure"),
            DiskFullPolicy::Evict(_) => f.write_str("Evict"),
        }
    }
}

/// Configuration for a [`SpillBuffer`](crate::SpillBuffer).
pub struct BufferConfig<K> {
    /// Upper bound on bytes staged in memory (default: 64MB).
    pub max_memory_usage: u64,

    /// Upper bound on bytes persisted on disk (default: 1GB). Must be at
    /// least `max_memory_usage`.
    pub max_disk_usage: u64,

    /// Scratch directory for persisted values. When `None` a uniquely-named
    /// temporary directory is created and removed again on drop; a supplied
    /// directory is left in place.
    pub dir: Option<PathBuf>,

    /// Disk-full behaviour (default: backpressure).
    pub policy: DiskFullPolicy<K>,
}

impl<K> fmt::Debug for BufferConfig<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferConfig")
            .field("max_memory_usage", &self.max_memory_usage)
            .field("max_disk_usage", &self.max_disk_usage)
            .field("dir", &self.dir)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<K> Default for BufferConfig<K> {
    fn default() -> Self {
        Self {
            max_memory_usage: 64 * 1024 * 1024,        // 64MB
            max_disk_usage: 1024 * 1024 * 1024,        // 1GB
            dir: None,
            policy: DiskFullPolicy::Backpressure,
        }
    }
}

impl<K> BufferConfig<K> {
    /// Create a new config with the given capacity bounds.
    pub fn new(max_memory_usage: u64, max_disk_usage: u64) -> Self {
        Self {
            max_memory_usage,
            max_disk_usage,
            ..Default::default()
        }
    }

    /// Set the memory bound.
    pub fn max_memory_usage(mut self, bytes: u64) -> Self {
        self.max_memory_usage = bytes;
        self
    }

    /// Set the disk bound.
    pub fn max_disk_usage(mut self, bytes: u64) -> Self {
        self.max_disk_usage = bytes;
        self
    }

    /// Persist values into `dir` instead of a fresh temporary directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Evict the oldest persisted entry through `handler` when the disk lane
    /// is full, instead of blocking the writer.
    pub fn pop_handler(mut self, handler: impl Fn(K, Vec<u8>) + Send + Sync + 'static) -> Self {
        self.policy = DiskFullPolicy::Evict(Box::new(handler));
        self
    }
}
