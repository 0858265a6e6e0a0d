//! Memory sampling
//!
//! The processor asks for a fresh reading after every batch; nothing is
//! cached between calls. Readings are best-effort: a platform that cannot
//! answer gets the configured fallback instead of an error.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, System};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of memory readings, in megabytes
pub trait MemoryMonitor: Send + Sync {
    /// Memory currently held by this process
    fn used_mb(&self) -> u64;

    /// Memory the system could still hand out
    fn available_mb(&self) -> u64;
}

/// Reads process and system memory through `sysinfo`
///
/// "Used" is the resident set of the current process. "Available" is the
/// operating system's available-memory figure.
pub struct SystemMemoryMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    fallback_mb: u64,
}

impl SystemMemoryMonitor {
    /// Create a monitor that reports `fallback_mb` whenever sampling fails
    pub fn new(fallback_mb: u64) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot determine current pid, process memory will use fallback");
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            fallback_mb,
        }
    }
}

impl std::fmt::Debug for SystemMemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryMonitor")
            .field("pid", &self.pid)
            .field("fallback_mb", &self.fallback_mb)
            .finish()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn used_mb(&self) -> u64 {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return self.fallback_mb;
        }
        let Some(pid) = self.pid else {
            return self.fallback_mb;
        };

        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return self.fallback_mb;
        }
        system
            .process(pid)
            .map(|process| process.memory() / BYTES_PER_MB)
            .unwrap_or(self.fallback_mb)
    }

    fn available_mb(&self) -> u64 {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return self.fallback_mb;
        }

        let mut system = self.system.lock();
        system.refresh_memory();

        // A zero total means the platform did not report anything
        if system.total_memory() == 0 {
            return self.fallback_mb;
        }
        system.available_memory() / BYTES_PER_MB
    }
}

/// Monitor that reports whatever it was last told
///
/// For deterministic runs (benchmarks, tests, dry runs on shared machines)
/// where real readings would make batch sizing unpredictable.
#[derive(Debug)]
pub struct FixedMemoryMonitor {
    used_mb: AtomicU64,
    available_mb: AtomicU64,
}

impl FixedMemoryMonitor {
    pub fn new(used_mb: u64, available_mb: u64) -> Self {
        Self {
            used_mb: AtomicU64::new(used_mb),
            available_mb: AtomicU64::new(available_mb),
        }
    }

    pub fn set_used_mb(&self, used_mb: u64) {
        self.used_mb.store(used_mb, Ordering::Relaxed);
    }

    pub fn set_available_mb(&self, available_mb: u64) {
        self.available_mb.store(available_mb, Ordering::Relaxed);
    }
}

impl MemoryMonitor for FixedMemoryMonitor {
    fn used_mb(&self) -> u64 {
        self.used_mb.load(Ordering::Relaxed)
    }

    fn available_mb(&self) -> u64 {
        self.available_mb.load(Ordering::Relaxed)
    }
}
