//! Non-deterministic event log for whole-system record and replay.
//!
//! A deterministic full-system emulator only needs outside help for the
//! inputs that cross into the guest from elsewhere: port and MMIO reads,
//! interrupt assertions, exit signals, device DMA, and a handful of
//! side-effecting host calls. During record those events are captured here,
//! each stamped with the deterministic program point at which it happened.
//! During replay the same events are re-injected at the same program points,
//! and any mismatch between the log and the re-executed guest fails loud.
//!
//! The pieces:
//!
//! - [`record`] — the entry model and its binary encoding
//! - [`machine`] — the trait the emulator implements for the log core
//! - [`writer`] — the record-side path ([`LogWriter`])
//! - [`replay`] — the replay-side reader, look-ahead queue, and typed
//!   consumption ([`ReplayEngine`])
//! - [`pool`] — entry recycling and the consumed-entry history ring
//! - [`session`] — the mode controller driving transitions ([`Session`])
//!
//! A log named `NAME` in directory `DIR` lives at `DIR/NAME-rr-nondet.log`,
//! next to the companion snapshot `DIR/NAME-rr-snp` owned by the snapshot
//! subsystem.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub mod machine;
pub mod pool;
pub mod record;
pub mod replay;
pub mod session;
pub mod writer;

#[cfg(test)]
mod testutil;

pub use machine::Machine;
pub use record::{
    Callsite, EntryKind, EntryPayload, FormatError, HdTransferKind, LogEntry, MemType,
    NetTransferKind, ProgPoint, SkippedCall, SkippedCallKind,
};
pub use replay::{LogReader, ReplayEngine, ReplayStats, MAX_QUEUE_LEN};
pub use session::{Mode, ModeCell, RequestFlags, Session};
pub use writer::LogWriter;

/// Path of the nondet log for record/replay base name `base`.
pub fn nondet_log_path(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push("-rr-nondet.log");
    PathBuf::from(name)
}

/// Path of the companion VM snapshot for base name `base`.
pub fn snapshot_path(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push("-rr-snp");
    PathBuf::from(name)
}

/// A replay-time mismatch between the log and the re-executed guest.
#[derive(Debug)]
pub struct Divergence {
    /// Program point of the machine when the mismatch was observed.
    pub current: ProgPoint,
    /// Program point at the head of the look-ahead queue, if any.
    pub logged: Option<ProgPoint>,
    /// Entry kind the consumer required.
    pub wanted: EntryKind,
    /// Entry kind at the head of the queue, if any.
    pub found: Option<EntryKind>,
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} wanted {}", self.current, self.wanted)?;
        match (&self.logged, &self.found) {
            (Some(logged), Some(found)) => write!(f, ", log head is {} at {}", found, logged),
            _ => write!(f, ", log queue is empty"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log format error: {0}")]
    Format(#[from] FormatError),

    #[error("log i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("replay diverged: {0}")]
    Divergence(Box<Divergence>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_and_snapshot_naming() {
        let base = Path::new("/tmp/run/boot");
        assert_eq!(
            nondet_log_path(base),
            Path::new("/tmp/run/boot-rr-nondet.log")
        );
        assert_eq!(snapshot_path(base), Path::new("/tmp/run/boot-rr-snp"));
    }

    #[test]
    fn divergence_display() {
        let div = Divergence {
            current: ProgPoint::new(120, 0x40, 0),
            logged: Some(ProgPoint::new(100, 0x40, 0)),
            wanted: EntryKind::Input4,
            found: Some(EntryKind::InterruptRequest),
        };
        let rendered = div.to_string();
        assert!(rendered.contains("instr=120"));
        assert!(rendered.contains("input-4"));
        assert!(rendered.contains("interrupt-request"));
        assert!(rendered.contains("instr=100"));
    }
}
