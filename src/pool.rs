//! Entry recycling and the consumed-entry history ring.
//!
//! Record and replay both churn through one entry per event; the pool keeps
//! consumed shells so steady-state operation stops allocating after the
//! first few hundred entries. Recycling also snapshots each consumed entry
//! (without its buffers) into a small ring for post-mortem dumps.

use std::fmt;

use crate::record::{Callsite, EntryKind, LogEntry, ProgPoint, SkippedCallKind};

/// Number of consumed entries retained for diagnosis.
pub const HIST_SIZE: usize = 10;

/// A buffer-less copy of a consumed entry. The history ring never owns
/// variable-length data.
#[derive(Debug, Clone, Copy)]
pub struct ConsumedEntry {
    pub prog_point: ProgPoint,
    pub kind: EntryKind,
    pub callsite: Callsite,
    pub skipped_kind: Option<SkippedCallKind>,
    pub file_pos: u64,
}

impl fmt::Display for ConsumedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.skipped_kind {
            Some(sub) => write!(
                f,
                "{} {} ({}) from {}",
                self.prog_point, self.kind, sub, self.callsite
            ),
            None => write!(f, "{} {} from {}", self.prog_point, self.kind, self.callsite),
        }
    }
}

#[derive(Default)]
pub struct EntryPool {
    free: Vec<Box<LogEntry>>,
    history: Vec<ConsumedEntry>,
    hist_index: usize,
}

impl EntryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop a cleared shell off the free list, or allocate one.
    pub fn alloc(&mut self) -> Box<LogEntry> {
        match self.free.pop() {
            Some(mut entry) => {
                entry.clear();
                entry
            }
            None => Box::new(LogEntry::empty()),
        }
    }

    /// Return a consumed entry to the pool. Drops any buffers it owns and
    /// records a buffer-less copy in the history ring.
    pub fn recycle(&mut self, mut entry: Box<LogEntry>) {
        let consumed = ConsumedEntry {
            prog_point: entry.prog_point,
            kind: entry.kind(),
            callsite: entry.callsite,
            skipped_kind: match &entry.payload {
                crate::record::EntryPayload::SkippedCall(call) => Some(call.kind()),
                _ => None,
            },
            file_pos: entry.file_pos,
        };
        if self.history.len() < HIST_SIZE {
            self.history.push(consumed);
        } else {
            self.history[self.hist_index] = consumed;
        }
        self.hist_index = (self.hist_index + 1) % HIST_SIZE;

        entry.clear();
        self.free.push(entry);
    }

    /// Consumed entries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ConsumedEntry> {
        let (newer, older) = self.history.split_at(self.hist_index.min(self.history.len()));
        older.iter().chain(newer.iter())
    }

    /// Drop all cached shells; returns (count, bytes) for the end-of-replay
    /// report.
    pub fn drain(&mut self) -> (usize, usize) {
        let count = self.free.len();
        self.free.clear();
        (count, count * std::mem::size_of::<LogEntry>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EntryPayload;

    fn entry_at(instr: u64) -> Box<LogEntry> {
        Box::new(LogEntry::new(
            ProgPoint::new(instr, 0, 0),
            Callsite::IoRead,
            EntryPayload::Input4(instr as u32),
        ))
    }

    #[test]
    fn recycled_shells_are_reused() {
        let mut pool = EntryPool::new();
        let entry = entry_at(1);
        let addr = &*entry as *const LogEntry;
        pool.recycle(entry);

        let reused = pool.alloc();
        assert_eq!(&*reused as *const LogEntry, addr);
        // Shell comes back cleared.
        assert_eq!(reused.payload, EntryPayload::Debug);
        assert_eq!(reused.prog_point, ProgPoint::default());
    }

    #[test]
    fn history_ring_wraps() {
        let mut pool = EntryPool::new();
        for i in 0..(HIST_SIZE as u64 + 3) {
            pool.recycle(entry_at(i));
        }
        let instrs: Vec<u64> = pool
            .history()
            .map(|c| c.prog_point.guest_instr_count)
            .collect();
        assert_eq!(instrs.len(), HIST_SIZE);
        // Oldest surviving entry first.
        assert_eq!(instrs[0], 3);
        assert_eq!(*instrs.last().unwrap(), HIST_SIZE as u64 + 2);
    }

    #[test]
    fn history_never_owns_buffers() {
        let mut pool = EntryPool::new();
        pool.recycle(Box::new(LogEntry::new(
            ProgPoint::new(9, 0, 0),
            Callsite::PhysMemIo,
            EntryPayload::SkippedCall(crate::record::SkippedCall::CpuMemRw {
                addr: 0x1000,
                data: vec![1, 2, 3],
            }),
        )));
        let consumed = pool.history().next().unwrap();
        assert_eq!(consumed.kind, EntryKind::SkippedCall);
        assert_eq!(consumed.skipped_kind, Some(SkippedCallKind::CpuMemRw));
    }

    #[test]
    fn drain_reports_pool_size() {
        let mut pool = EntryPool::new();
        for i in 0..4 {
            pool.recycle(entry_at(i));
        }
        let (count, bytes) = pool.drain();
        assert_eq!(count, 4);
        assert_eq!(bytes, 4 * std::mem::size_of::<LogEntry>());
        assert_eq!(pool.drain().0, 0);
    }
}
