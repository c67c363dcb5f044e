use modarch_core::diff::{TreeDiff, diff};
use modarch_core::model::LogMod;

/// One step in a mod's change history: the snapshot itself plus the diff
/// against its predecessor. The first entry diffs against an empty tree, so
/// creation renders as everything-added.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub entry: LogMod,
    pub diff: TreeDiff,
}

/// Lazily walk an ordered history chain, yielding each entry with the diff
/// that produced it. Recomputed from the persisted snapshots on every call;
/// cost is one diff per entry, bounded by entity size.
pub fn gen_diffs(entries: Vec<LogMod>) -> HistoryIter {
    HistoryIter { entries, pos: 0 }
}

pub struct HistoryIter {
    entries: Vec<LogMod>,
    pos: usize,
}

impl Iterator for HistoryIter {
    type Item = HistoryEntry;

    fn next(&mut self) -> Option<HistoryEntry> {
        if self.pos >= self.entries.len() {
            return None;
        }
        let entry = self.entries[self.pos].clone();
        let change = if self.pos == 0 {
            diff(&LogMod::blank(), &entry)
        } else {
            diff(&self.entries[self.pos - 1], &entry)
        };
        self.pos += 1;
        Some(HistoryEntry {
            entry,
            diff: change,
        })
    }
}
