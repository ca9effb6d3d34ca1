//! Memory snapshots taken right efter each samplin' pass
//!
//! A [`MetricsReporter`] reads counters through a [`MemoryProbe`]. The real
//! probe, [`ProcessProbe`], reads `/proc` an' the live-heap count kept by
//! [`CountingAllocator`]; tests can hand in a [`FixedProbe`] instead.
//!
//! All sizes are in kilobytes. Fower counters are reported:
//!
//! * `allocated` - memory the process has committed (resident set)
//! * `free` - committed memory no' currently held by live heap blocks
//! * `max` - the most the process could grow tae
//! * `total_available` - `free + (max - allocated)`

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Local};

use crate::error::MetricsError;

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

/// Global allocator wrapper that keeps a count o' live heap bytes
///
/// Install it in a binary wi':
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: haversbench::metrics::CountingAllocator = haversbench::metrics::CountingAllocator;
/// ```
pub struct CountingAllocator;

impl CountingAllocator {
    /// Bytes currently held by live allocations
    pub fn live_bytes() -> usize {
        LIVE_BYTES.load(Ordering::Relaxed)
    }

    /// Allocations made since start-up
    pub fn allocations() -> usize {
        ALLOCATIONS.load(Ordering::Relaxed)
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
            LIVE_BYTES.fetch_add(new_size, Ordering::Relaxed);
        }
        new_ptr
    }
}

/// Raw counters, in bytes, as read fae the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryCounters {
    pub allocated_bytes: u64,
    pub max_bytes: u64,
    pub live_heap_bytes: u64,
}

pub trait MemoryProbe {
    fn read(&self) -> Result<MemoryCounters, MetricsError>;
}

/// Reads the runnin' process's counters
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    status_path: PathBuf,
    meminfo_path: PathBuf,
}

impl ProcessProbe {
    pub fn new() -> Self {
        ProcessProbe {
            status_path: PathBuf::from("/proc/self/status"),
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }

    /// Point the probe at other files laid oot like `/proc`
    pub fn with_paths(status: impl Into<PathBuf>, meminfo: impl Into<PathBuf>) -> Self {
        ProcessProbe {
            status_path: status.into(),
            meminfo_path: meminfo.into(),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessProbe {
    fn read(&self) -> Result<MemoryCounters, MetricsError> {
        if !cfg!(target_os = "linux") && !self.status_path.exists() {
            return Err(MetricsError::Unsupported);
        }

        let status = read_file(&self.status_path)?;
        let meminfo = read_file(&self.meminfo_path)?;

        let allocated_bytes = parse_kb_field(&status, "VmRSS")?.saturating_mul(1024);
        let mem_total = parse_kb_field(&meminfo, "MemTotal")?.saturating_mul(1024);
        let max_bytes = match address_space_limit() {
            Some(limit) => mem_total.min(limit),
            None => mem_total,
        };

        Ok(MemoryCounters {
            allocated_bytes,
            max_bytes,
            live_heap_bytes: CountingAllocator::live_bytes() as u64,
        })
    }
}

fn read_file(path: &Path) -> Result<String, MetricsError> {
    std::fs::read_to_string(path).map_err(|source| MetricsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Pull a `Key:   1234 kB` value oot o' a `/proc` style file
pub fn parse_kb_field(text: &str, key: &str) -> Result<u64, MetricsError> {
    let line = text
        .lines()
        .find(|line| {
            line.split_once(':')
                .map(|(k, _)| k.trim() == key)
                .unwrap_or(false)
        })
        .ok_or_else(|| MetricsError::Parse {
            what: format!("{} (field missin')", key),
        })?;

    line.split_once(':')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| MetricsError::Parse {
            what: format!("{} in '{}'", key, line.trim()),
        })
}

#[cfg(all(feature = "native", unix))]
fn address_space_limit() -> Option<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut limit) };
    if rc != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return None;
    }
    Some(limit.rlim_cur as u64)
}

#[cfg(not(all(feature = "native", unix)))]
fn address_space_limit() -> Option<u64> {
    None
}

/// Hands back the same counters every time
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub MemoryCounters);

impl MemoryProbe for FixedProbe {
    fn read(&self) -> Result<MemoryCounters, MetricsError> {
        Ok(self.0)
    }
}

/// Memory counters at wan instant, in kilobytes
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub free_kb: u64,
    pub allocated_kb: u64,
    pub max_kb: u64,
    pub live_heap_bytes: u64,
    pub taken_at: DateTime<Local>,
}

impl MetricsSnapshot {
    pub fn from_counters(counters: MemoryCounters) -> Self {
        let allocated_kb = counters.allocated_bytes / 1024;
        let live_kb = counters.live_heap_bytes / 1024;
        MetricsSnapshot {
            free_kb: allocated_kb.saturating_sub(live_kb),
            allocated_kb,
            max_kb: counters.max_bytes / 1024,
            live_heap_bytes: counters.live_heap_bytes,
            taken_at: Local::now(),
        }
    }

    pub fn total_available_kb(&self) -> u64 {
        self.free_kb
            .saturating_add(self.max_kb.saturating_sub(self.allocated_kb))
    }
}

pub struct MetricsReporter {
    probe: Box<dyn MemoryProbe>,
}

impl MetricsReporter {
    pub fn new(probe: Box<dyn MemoryProbe>) -> Self {
        MetricsReporter { probe }
    }

    pub fn process() -> Self {
        Self::new(Box::new(ProcessProbe::new()))
    }

    pub fn snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        self.probe.read().map(MetricsSnapshot::from_counters)
    }

    pub fn format(&self, snapshot: &MetricsSnapshot) -> String {
        format_snapshot(snapshot)
    }
}

impl Default for MetricsReporter {
    fn default() -> Self {
        Self::process()
    }
}

impl std::fmt::Debug for MetricsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsReporter").finish_non_exhaustive()
    }
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Multi-line report, always in the same order
pub fn format_snapshot(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();
    let rows = [
        ("Free memory", snapshot.free_kb),
        ("Allocated memory", snapshot.allocated_kb),
        ("Max memory", snapshot.max_kb),
        ("Total available memory", snapshot.total_available_kb()),
    ];
    for (label, kb) in rows {
        let _ = writeln!(out, "{:<24}{:>16} KB", format!("{}:", label), group_thousands(kb));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str =
        "Name:\thaversbench\nVmPeak:\t  20000 kB\nVmRSS:\t    8192 kB\nThreads:\t1\n";
    const MEMINFO: &str = "MemTotal:       16384000 kB\nMemFree:         1000000 kB\n";

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
        assert_eq!(group_thousands(100000), "100,000");
    }

    #[test]
    fn test_parse_kb_field() {
        assert_eq!(parse_kb_field(STATUS, "VmRSS").unwrap(), 8192);
        assert_eq!(parse_kb_field(MEMINFO, "MemTotal").unwrap(), 16384000);
        assert!(matches!(
            parse_kb_field(STATUS, "VmSwap"),
            Err(MetricsError::Parse { .. })
        ));
        assert!(matches!(
            parse_kb_field("VmRSS: lots kB", "VmRSS"),
            Err(MetricsError::Parse { .. })
        ));
    }

    #[test]
    fn test_total_available_by_hand() {
        const MB: u64 = 1024 * 1024;
        // (allocated, max, live) in bytes, then (free, total_available) in KB
        let cases = [
            ((8 * MB, 16 * 1024 * MB, 2 * MB), (6144, 16_775_168)),
            ((1024, 4096, 0), (1, 4)),
            ((4096, 1024, 8192), (0, 0)),
            ((0, 0, 0), (0, 0)),
        ];
        for ((allocated, max, live), (free_kb, total_kb)) in cases {
            let snap = MetricsSnapshot::from_counters(MemoryCounters {
                allocated_bytes: allocated,
                max_bytes: max,
                live_heap_bytes: live,
            });
            assert_eq!(snap.free_kb, free_kb);
            assert_eq!(snap.total_available_kb(), total_kb);
        }
    }

    #[test]
    fn test_free_is_committed_minus_live() {
        let snap = MetricsSnapshot::from_counters(MemoryCounters {
            allocated_bytes: 10 * 1024 * 1024,
            max_bytes: 100 * 1024 * 1024,
            live_heap_bytes: 4 * 1024 * 1024,
        });
        assert_eq!(snap.allocated_kb, 10240);
        assert_eq!(snap.free_kb, 6144);
        assert_eq!(snap.max_kb, 102400);
        assert_eq!(snap.total_available_kb(), 6144 + 92160);
    }

    #[test]
    fn test_process_counters_from_proc_layout() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("status");
        let meminfo = dir.path().join("meminfo");
        std::fs::write(&status, STATUS).unwrap();
        std::fs::write(&meminfo, MEMINFO).unwrap();

        let counters = ProcessProbe::with_paths(&status, &meminfo).read().unwrap();
        assert_eq!(counters.allocated_bytes, 8192 * 1024);
        assert!(counters.max_bytes <= 16384000 * 1024);
    }

    #[test]
    fn test_process_counters_missing_file() {
        let probe = ProcessProbe::with_paths("/nae/such/status", "/nae/such/meminfo");
        assert!(matches!(
            probe.read(),
            Err(MetricsError::Io { .. }) | Err(MetricsError::Unsupported)
        ));
    }

    #[test]
    fn test_format_snapshot_order() {
        let reporter = MetricsReporter::new(Box::new(FixedProbe(MemoryCounters {
            allocated_bytes: 2048 * 1024,
            max_bytes: 4096 * 1024 * 1024,
            live_heap_bytes: 1024 * 1024,
        })));
        let text = reporter.format(&reporter.snapshot().unwrap());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Free memory:"));
        assert!(lines[1].starts_with("Allocated memory:"));
        assert!(lines[2].starts_with("Max memory:"));
        assert!(lines[3].starts_with("Total available memory:"));
        assert!(lines[2].contains("4,194,304 KB"));
    }
}
