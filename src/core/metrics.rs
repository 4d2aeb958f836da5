use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters collected while the store runs.
/// All fields use atomic types for lock-free updates with minimal overhead.
#[derive(Debug)]
pub struct Metrics {
    // Transaction metrics
    read_transactions_begun: AtomicU64,
    write_transactions_begun: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    failed_commits: AtomicU64,
    active_readers: AtomicUsize,

    // Transaction log metrics
    log_memory_hits: AtomicU64,
    log_overflow_hits: AtomicU64,
    log_misses: AtomicU64,
    log_spills: AtomicU64,

    // Storage metrics
    pages_written: AtomicU64,
    bytes_written: AtomicU64,
    backend_page_reads: AtomicU64,
    read_cache_hits: AtomicU64,
    read_cache_misses: AtomicU64,

    // Error metrics
    io_errors: AtomicU64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub read_transactions_begun: u64,
    pub write_transactions_begun: u64,
    pub commits: u64,
    pub aborts: u64,
    pub failed_commits: u64,
    pub active_readers: usize,
    pub commit_rate: f64,

    pub log_memory_hits: u64,
    pub log_overflow_hits: u64,
    pub log_misses: u64,
    pub log_spills: u64,

    pub pages_written: u64,
    pub bytes_written: u64,
    pub backend_page_reads: u64,
    pub read_cache_hits: u64,
    pub read_cache_misses: u64,
    pub read_cache_hit_rate: f64,

    pub io_errors: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            read_transactions_begun: AtomicU64::new(0),
            write_transactions_begun: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
            failed_commits: AtomicU64::new(0),
            active_readers: AtomicUsize::new(0),

            log_memory_hits: AtomicU64::new(0),
            log_overflow_hits: AtomicU64::new(0),
            log_misses: AtomicU64::new(0),
            log_spills: AtomicU64::new(0),

            pages_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            backend_page_reads: AtomicU64::new(0),
            read_cache_hits: AtomicU64::new(0),
            read_cache_misses: AtomicU64::new(0),

            io_errors: AtomicU64::new(0),
        }
    }

    // Transaction metrics
    #[inline]
    pub fn reader_opened(&self) {
        self.read_transactions_begun.fetch_add(1, Ordering::Relaxed);
        self.active_readers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn reader_closed(&self) {
        self.active_readers.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn writer_begun(&self) {
        self.write_transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn commit_failed(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    // Transaction log metrics
    #[inline]
    pub fn log_memory_hit(&self) {
        self.log_memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn log_overflow_hit(&self) {
        self.log_overflow_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn log_miss(&self) {
        self.log_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn log_spill(&self) {
        self.log_spills.fetch_add(1, Ordering::Relaxed);
    }

    // Storage metrics
    #[inline]
    pub fn page_written(&self, bytes: u64) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn backend_page_read(&self) {
        self.backend_page_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read_cache_hit(&self) {
        self.read_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn read_cache_miss(&self) {
        self.read_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Error metrics
    #[inline]
    pub fn io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics.
    /// Uses Relaxed ordering since we don't need strict consistency for monitoring.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let commits = self.commits.load(Ordering::Relaxed);
        let aborts = self.aborts.load(Ordering::Relaxed);
        let failed_commits = self.failed_commits.load(Ordering::Relaxed);
        let finished = commits + aborts + failed_commits;

        let read_cache_hits = self.read_cache_hits.load(Ordering::Relaxed);
        let read_cache_misses = self.read_cache_misses.load(Ordering::Relaxed);
        let read_cache_requests = read_cache_hits + read_cache_misses;

        MetricsSnapshot {
            read_transactions_begun: self.read_transactions_begun.load(Ordering::Relaxed),
            write_transactions_begun: self.write_transactions_begun.load(Ordering::Relaxed),
            commits,
            aborts,
            failed_commits,
            active_readers: self.active_readers.load(Ordering::Relaxed),
            commit_rate: if finished > 0 {
                commits as f64 / finished as f64
            } else {
                0.0
            },

            log_memory_hits: self.log_memory_hits.load(Ordering::Relaxed),
            log_overflow_hits: self.log_overflow_hits.load(Ordering::Relaxed),
            log_misses: self.log_misses.load(Ordering::Relaxed),
            log_spills: self.log_spills.load(Ordering::Relaxed),

            pages_written: self.pages_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            backend_page_reads: self.backend_page_reads.load(Ordering::Relaxed),
            read_cache_hits,
            read_cache_misses,
            read_cache_hit_rate: if read_cache_requests > 0 {
                read_cache_hits as f64 / read_cache_requests as f64
            } else {
                0.0
            },

            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
