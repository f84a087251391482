// =============================================================================
// Journal — append-only durable log of settlements, for crash recovery
// =============================================================================
//
// The in-memory settlement history in `TreasuryRouter` is a bounded ring
// buffer; this is the durable source of truth behind it. Every successful
// settlement is appended here before the caller considers the trade fully
// closed. On boot, `replay_into` reopens the log and replays each entry
// through `TreasuryRouter::replay`, which is idempotent by `settlementId`
// so a crash between "settle applied" and "journal appended" merely causes
// one redundant (and harmless) `AlreadyProcessed` on the next boot.
//
// Adapted from `runtime_config.rs`'s atomic write discipline, but an
// append-only log can't use tmp+rename per write — instead each append opens
// in append mode and calls `sync_all` before returning.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::treasury::TreasuryRouter;

/// One durable settlement record, written before the caller treats a trade
/// as fully settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub slot_id: String,
    pub net_pnl: Decimal,
    pub settlement_id: String,
    pub recorded_at: DateTime<Utc>,
}

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry as a JSON line, fsyncing before returning.
    pub fn append(&self, slot_id: &str, net_pnl: Decimal, settlement_id: &str) -> Result<()> {
        let entry = JournalEntry {
            slot_id: slot_id.to_string(),
            net_pnl,
            settlement_id: settlement_id.to_string(),
            recorded_at: Utc::now(),
        };

        let line = serde_json::to_string(&entry).context("failed to serialise journal entry")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;

        writeln!(file, "{line}").context("failed to write journal entry")?;
        file.sync_all().context("failed to fsync journal")?;

        Ok(())
    }

    /// Replay every entry in file order through `router.replay`, which is
    /// idempotent by `settlementId`. Malformed lines are logged and skipped
    /// rather than aborting recovery.
    pub fn replay_into(&self, router: &TreasuryRouter) -> Result<usize> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no journal file found, starting clean");
            return Ok(0);
        }

        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open journal at {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut replayed = 0;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read journal line {line_no}"))?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(line_no, error = %e, "skipping malformed journal entry");
                    continue;
                }
            };

            match router.replay(&entry.slot_id, entry.net_pnl, &entry.settlement_id) {
                Ok(()) => replayed += 1,
                Err(e) => warn!(
                    settlement_id = %entry.settlement_id,
                    error = %e,
                    "journal replay entry failed"
                ),
            }
        }

        info!(replayed, path = %self.path.display(), "journal replay complete");
        Ok(replayed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::SlotCascade;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("aurora_cascade_journal_test_{name}_{}.jsonl", std::process::id()))
    }

    #[test]
    fn append_then_replay_reproduces_state() {
        let path = temp_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let journal = Journal::new(&path);

        journal.append("slot_1", Decimal::new(400, 0), "sid-1").unwrap();
        journal.append("slot_1", Decimal::new(400, 0), "sid-2").unwrap();

        let router = TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0)));
        let replayed = journal.replay_into(&router).unwrap();
        assert_eq!(replayed, 2);

        let snap = router.snapshot();
        let slot1 = snap.slots.iter().find(|s| s.id == "slot_1").unwrap();
        assert_eq!(slot1.capital, Decimal::new(800, 0));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn replay_is_idempotent_across_boots() {
        let path = temp_path("idempotent");
        let _ = std::fs::remove_file(&path);
        let journal = Journal::new(&path);
        journal.append("slot_1", Decimal::new(150, 0), "sid-a").unwrap();

        let router_a = TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0)));
        journal.replay_into(&router_a).unwrap();

        // Simulate a second boot replaying the same (unrotated) journal.
        let router_b = TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0)));
        journal.replay_into(&router_b).unwrap();
        journal.replay_into(&router_b).unwrap();

        let snap_a = router_a.snapshot();
        let snap_b = router_b.snapshot();
        for (a, b) in snap_a.slots.iter().zip(snap_b.slots.iter()) {
            assert_eq!(a.capital, b.capital);
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_journal_file_replays_nothing() {
        let path = temp_path("missing");
        let _ = std::fs::remove_file(&path);
        let journal = Journal::new(&path);
        let router = TreasuryRouter::new(SlotCascade::bootstrap(10, Decimal::new(1000, 0)));
        assert_eq!(journal.replay_into(&router).unwrap(), 0);
    }
}
