//! Per-file progress counters (§5: "reporting-only... do not affect
//! correctness") and the human-readable byte formatting used alongside them
//! in log lines.
//!
//! Grounded on `examples/original_source/lib/backup.go`'s
//! `alreadyBackedupChunks`/`skippedChunks`/`emptyChunks` and
//! `lib/restore.go`'s `skippedChunks`/`emptyChunks`/`correctChunks`: small
//! per-file counters, incremented under a lock (here, atomics) from inside
//! the worker pool's tasks, then logged once per file and folded into a
//! running total for the whole snapshot. `humanize.Bytes` call sites in both
//! files become [`humanize_bytes`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Chunk-decision counters accumulated while backing up one file.
#[derive(Default)]
pub struct BackupCounters {
    /// Chunks that were all-zero: no hash, no upload.
    pub empty: AtomicU64,
    /// Chunks the object store already had (dedup hit): hashed, not
    /// uploaded.
    pub already_backed_up: AtomicU64,
    /// Chunks uploaded as new blobs.
    pub uploaded: AtomicU64,
    /// Chunks reused verbatim from the prior snapshot via the append-only
    /// shortcut, never read or hashed.
    pub skipped: AtomicU64,
}

impl BackupCounters {
    pub fn snapshot(&self) -> BackupCounterSnapshot {
        BackupCounterSnapshot {
            empty: self.empty.load(Ordering::Relaxed),
            already_backed_up: self.already_backed_up.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// An immutable point-in-time readout of [`BackupCounters`], returned to
/// callers as part of a snapshot's result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupCounterSnapshot {
    pub empty: u64,
    pub already_backed_up: u64,
    pub uploaded: u64,
    pub skipped: u64,
}

impl std::ops::Add for BackupCounterSnapshot {
    type Output = BackupCounterSnapshot;
    fn add(self, rhs: BackupCounterSnapshot) -> BackupCounterSnapshot {
        BackupCounterSnapshot {
            empty: self.empty + rhs.empty,
            already_backed_up: self.already_backed_up + rhs.already_backed_up,
            uploaded: self.uploaded + rhs.uploaded,
            skipped: self.skipped + rhs.skipped,
        }
    }
}

impl std::ops::AddAssign for BackupCounterSnapshot {
    fn add_assign(&mut self, rhs: BackupCounterSnapshot) {
        *self = *self + rhs;
    }
}

/// Chunk-decision counters accumulated while restoring one file.
#[derive(Default)]
pub struct RestoreCounters {
    /// Expected and actual chunk both empty: nothing to do.
    pub empty: AtomicU64,
    /// Hash already matches what's on disk: nothing to fetch.
    pub correct: AtomicU64,
    /// Skipped via the append-only fast path without reading the chunk.
    pub skipped: AtomicU64,
    /// Hole punched over an expected-empty, actually-present chunk.
    pub punched: AtomicU64,
    /// Fetched (cache or store), verified, and written.
    pub fetched: AtomicU64,
}

impl RestoreCounters {
    pub fn snapshot(&self) -> RestoreCounterSnapshot {
        RestoreCounterSnapshot {
            empty: self.empty.load(Ordering::Relaxed),
            correct: self.correct.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            punched: self.punched.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreCounterSnapshot {
    pub empty: u64,
    pub correct: u64,
    pub skipped: u64,
    pub punched: u64,
    pub fetched: u64,
}

impl std::ops::Add for RestoreCounterSnapshot {
    type Output = RestoreCounterSnapshot;
    fn add(self, rhs: RestoreCounterSnapshot) -> RestoreCounterSnapshot {
        RestoreCounterSnapshot {
            empty: self.empty + rhs.empty,
            correct: self.correct + rhs.correct,
            skipped: self.skipped + rhs.skipped,
            punched: self.punched + rhs.punched,
            fetched: self.fetched + rhs.fetched,
        }
    }
}

impl std::ops::AddAssign for RestoreCounterSnapshot {
    fn add_assign(&mut self, rhs: RestoreCounterSnapshot) {
        *self = *self + rhs;
    }
}

/// Formats a byte count the way `humanize.Bytes` does in the original's log
/// lines: base-1000 units, one decimal place, dropped for whole numbers.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for candidate in UNITS.iter() {
        value /= 1000.0;
        unit = candidate;
        if value < 1000.0 {
            break;
        }
    }
    if (value * 10.0).round() / 10.0 == value.trunc() {
        format!("{:.0} {}", value, unit)
    } else {
        format!("{:.1} {}", value, unit)
    }
}
