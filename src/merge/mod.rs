//! Merge Module
//!
//! Compaction: copy live records out of frozen files, then delete the files.
//!
//! ## Cycle
//! ```text
//!   Idle ──tick──▶ Scanning ──live record──▶ Rewriting ──┐
//!    ▲                 ▲                                  │
//!    │                 └──────────── next record ◀────────┘
//!    │                 │ all files done
//!    │                 ▼
//!    └─────────────  Retiring
//! ```
//!
//! ## Safety
//! - Liveness is re-checked under the engine lock for every rewrite, so a key
//!   written or deleted after the scan saw it is never regressed
//! - Nothing is deleted until every file in the cycle has been processed and
//!   the active file has been synced
//! - Files are deleted oldest first, hint before data: a crash mid-retirement
//!   never leaves a tombstone gone while an older value survives
//! - An error or a stop request aborts the cycle before retirement; the
//!   untouched originals are rescanned next cycle

mod compactor;

use crossbeam::channel::{Receiver, TryRecvError};

use crate::engine::EngineInner;
use crate::error::Result;
use crate::file::{self, FileId, RecordScanner};

pub use compactor::Compactor;

/// What the compactor is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Idle,
    Scanning,
    Rewriting,
    Retiring,
}

/// Outcome of one compaction cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Frozen files that were fully scanned
    pub files_scanned: usize,
    /// Files deleted from disk at the end of the cycle
    pub files_retired: usize,
    /// Records read (sentinels excluded)
    pub records_scanned: usize,
    /// Live records copied into the active file
    pub records_rewritten: usize,
    /// Overwritten or deleted records left behind
    pub records_stale: usize,
    /// Tombstones dropped
    pub tombstones_dropped: usize,
    /// Cycle did nothing because too few frozen files existed
    pub skipped: bool,
    /// Cycle stopped early on request
    pub interrupted: bool,
}

/// Resets the published phase to `Idle` however the cycle ends
struct PhaseGuard<'a> {
    engine: &'a EngineInner,
}

impl<'a> PhaseGuard<'a> {
    fn enter(engine: &'a EngineInner, phase: MergePhase) -> Self {
        engine.set_merge_phase(phase);
        Self { engine }
    }

    fn set(&self, phase: MergePhase) {
        self.engine.set_merge_phase(phase);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.engine.set_merge_phase(MergePhase::Idle);
    }
}

/// Run one compaction cycle over every frozen file
///
/// `stop` is polled at file boundaries; a stop request ends the cycle
/// without retiring anything.
pub(crate) fn run_cycle(engine: &EngineInner, stop: Option<&Receiver<()>>) -> Result<MergeStats> {
    let _cycle = engine.merge_guard().lock();
    let mut stats = MergeStats::default();

    // Every frozen file is older than the active one
    let active_id = engine.active_file_id();
    let candidates: Vec<FileId> = file::list_data_ids(engine.dir())?
        .into_iter()
        .filter(|&id| id < active_id)
        .collect();

    if candidates.len() < engine.config().merge_min_files {
        tracing::debug!(
            files = candidates.len(),
            min = engine.config().merge_min_files,
            "Not enough frozen files to merge"
        );
        stats.skipped = true;
        return Ok(stats);
    }

    tracing::info!(files = candidates.len(), "Starting merge");
    let phase = PhaseGuard::enter(engine, MergePhase::Scanning);

    let mut processed = Vec::with_capacity(candidates.len());
    for &file_id in &candidates {
        if stop_requested(stop) {
            tracing::info!(processed = processed.len(), "Merge stopped before retirement");
            stats.interrupted = true;
            return Ok(stats);
        }

        phase.set(MergePhase::Scanning);
        merge_file(engine, file_id, &phase, &mut stats)?;
        processed.push(file_id);
        stats.files_scanned += 1;
    }

    phase.set(MergePhase::Retiring);
    stats.files_retired = engine.retire_files(&processed)?;

    tracing::info!(
        scanned = stats.files_scanned,
        retired = stats.files_retired,
        rewritten = stats.records_rewritten,
        stale = stats.records_stale,
        tombstones = stats.tombstones_dropped,
        "Merge finished"
    );
    Ok(stats)
}

/// Rewrite every still-live record of one frozen file
fn merge_file(
    engine: &EngineInner,
    file_id: FileId,
    phase: &PhaseGuard<'_>,
    stats: &mut MergeStats,
) -> Result<()> {
    let scanner = RecordScanner::open(&file::data_path(engine.dir(), file_id), file_id)?;

    for record in scanner {
        let record = record?;
        stats.records_scanned += 1;

        let Some(expected) = record.index_entry(file_id) else {
            stats.tombstones_dropped += 1;
            continue;
        };

        // Cheap pre-check without the engine lock; put_rewrite decides for real
        let live = engine
            .keydir()
            .lookup(&record.key)
            .is_some_and(|current| current.same_location(&expected));
        if !live {
            stats.records_stale += 1;
            continue;
        }

        phase.set(MergePhase::Rewriting);
        let value = record.value.as_deref().unwrap_or_default();
        if engine.put_rewrite(&record.key, value, expected)? {
            stats.records_rewritten += 1;
        } else {
            stats.records_stale += 1;
        }
        phase.set(MergePhase::Scanning);
    }

    // Nothing in the index points here any more
    engine.evict_file(file_id);
    tracing::debug!(file_id, "Merged data file");
    Ok(())
}

fn stop_requested(stop: Option<&Receiver<()>>) -> bool {
    match stop {
        Some(rx) => !matches!(rx.try_recv(), Err(TryRecvError::Empty)),
        None => false,
    }
}
