//! The REPLAY path: streaming reader, bounded look-ahead queue, and the
//! typed consumption entry points.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::machine::Machine;
use crate::pool::EntryPool;
use crate::record::{
    Callsite, EntryKind, EntryPayload, LogEntry, ProgPoint, SkippedCall, NUM_ENTRY_KINDS,
};
use crate::{Divergence, Error};

/// Upper bound on queued look-ahead entries. `fill_queue` may exceed it by
/// exactly one: the stop-point entry itself.
pub const MAX_QUEUE_LEN: usize = 65536;

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Streaming reader over one nondet log, open for the lifetime of a replay.
///
/// Tracks its own byte position: end-of-log is `bytes_read == size`, and a
/// short read anywhere else is fatal.
pub struct LogReader {
    file: CountingReader<BufReader<File>>,
    path: PathBuf,
    size: u64,
    last_prog_point: ProgPoint,
}

impl LogReader {
    /// Open `path`, stat its size, and read the 24-byte header.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let mut file = CountingReader {
            inner: BufReader::new(file),
            count: 0,
        };
        let last_prog_point = ProgPoint::parse(&mut file)?;
        tracing::info!(path = %path.display(), len = size, "opened nondet log for read");
        Ok(Self {
            file,
            path: path.to_owned(),
            size,
            last_prog_point,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn bytes_read(&self) -> u64 {
        self.file.count
    }

    /// True once every byte of the log has been consumed.
    pub fn is_drained(&self) -> bool {
        self.bytes_read() == self.size
    }

    /// The header: highest program point seen during record.
    pub fn last_prog_point(&self) -> ProgPoint {
        self.last_prog_point
    }

    /// Parse the next entry into `entry`, stamping its file offset.
    pub fn read_entry_into(&mut self, entry: &mut LogEntry) -> Result<(), Error> {
        debug_assert!(!self.is_drained());
        let file_pos = self.bytes_read();
        *entry = LogEntry::parse(&mut self.file, file_pos)?;
        Ok(())
    }

    /// Parse the next entry into a fresh allocation. Convenience for tools;
    /// the replay queue goes through [`LogReader::read_entry_into`] and the
    /// recycle pool instead.
    pub fn read_entry(&mut self) -> Result<Box<LogEntry>, Error> {
        let mut entry = Box::new(LogEntry::empty());
        self.read_entry_into(&mut entry)?;
        Ok(entry)
    }
}

/// Per-kind accounting collected while the reader advances, reported at
/// end-of-replay.
#[derive(Debug, Default, Clone)]
pub struct ReplayStats {
    pub counts: [u64; NUM_ENTRY_KINDS],
    pub bytes: [u64; NUM_ENTRY_KINDS],
    pub max_queue_len: usize,
}

/// Replay-side engine: the look-ahead queue over a [`LogReader`], the entry
/// pool, and the typed `replay_*` consumption operations.
pub struct ReplayEngine {
    reader: LogReader,
    queue: VecDeque<Box<LogEntry>>,
    pool: EntryPool,
    stats: ReplayStats,
    // Pending-interrupt value replayed between logged transitions.
    current_interrupt_request: u32,
    next_progress_pct: u64,
}

impl ReplayEngine {
    pub fn open(path: &Path) -> Result<Self, Error> {
        Ok(Self {
            reader: LogReader::open(path)?,
            queue: VecDeque::new(),
            pool: EntryPool::new(),
            stats: ReplayStats::default(),
            current_interrupt_request: 0,
            next_progress_pct: 1,
        })
    }

    pub fn reader(&self) -> &LogReader {
        &self.reader
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_head(&self) -> Option<&LogEntry> {
        self.queue.front().map(|e| &**e)
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    /// Total guest instructions in the recording, from the header.
    pub fn total_instructions(&self) -> u64 {
        self.reader.last_prog_point.guest_instr_count
    }

    /// Replay is done once the file is drained and only the end-of-log
    /// sentinel remains, at or past its instruction count.
    pub fn replay_finished<M: Machine>(&self, machine: &M) -> bool {
        self.reader.is_drained()
            && self.queue.front().is_some_and(|head| {
                head.kind() == EntryKind::Last
                    && machine.prog_point().guest_instr_count
                        >= head.prog_point.guest_instr_count
            })
    }

    /// Pull entries off the file until end-of-log, the queue bound, or a
    /// natural stop point: an interrupt-request entry, or a skipped call at
    /// the main-loop-wait callsite. Those cut-offs bound memory on long
    /// interrupt-free stretches while keeping enough look-ahead queued for
    /// the consumers.
    pub fn fill_queue<M: Machine>(&mut self, machine: &M) -> Result<(), Error> {
        while !self.reader.is_drained() {
            let mut entry = self.pool.alloc();
            self.reader.read_entry_into(&mut entry)?;
            let kind = entry.kind();
            self.stats.counts[kind.index()] += 1;
            self.stats.bytes[kind.index()] += self.reader.bytes_read() - entry.file_pos;
            let stop = kind == EntryKind::InterruptRequest
                || (kind == EntryKind::SkippedCall && entry.callsite == Callsite::MainLoopWait);
            self.queue.push_back(entry);
            if stop || self.queue.len() > MAX_QUEUE_LEN {
                break;
            }
        }
        if self.queue.len() > self.stats.max_queue_len {
            self.stats.max_queue_len = self.queue.len();
        }
        self.report_progress(machine);
        Ok(())
    }

    fn report_progress<M: Machine>(&mut self, machine: &M) {
        let total = self.total_instructions();
        if total == 0 {
            return;
        }
        let instr = machine.prog_point().guest_instr_count;
        let pct = instr.saturating_mul(100) / total;
        if pct >= self.next_progress_pct {
            tracing::info!(
                path = %self.reader.path.display(),
                instr,
                total,
                percent = pct,
                "replay progress"
            );
            self.next_progress_pct = pct + 1;
        }
    }

    /// Core consumption step: detach the queue head iff it is the next event
    /// for this consumer.
    ///
    /// Leading debug checkpoints are drained first, except when the consumer
    /// is looking for the two ambient kinds (`InterruptRequest`,
    /// `SkippedCall`) that may legitimately precede a checkpoint. A head
    /// strictly in the future leaves the queue untouched; a head strictly in
    /// the past means the machine ran ahead of the log, which is fatal. A
    /// head at instruction count zero is always taken to match: the first
    /// entries of a log can be stamped before the snapshot flush lands.
    pub fn get_next<M: Machine>(
        &mut self,
        machine: &mut M,
        kind: EntryKind,
        callsite: Callsite,
        check_callsite: bool,
    ) -> Result<Option<Box<LogEntry>>, Error> {
        if self.queue.is_empty() {
            // The queue may have been cut off at a stop point; refill before
            // concluding there is nothing left.
            self.fill_queue(machine)?;
            if self.queue.is_empty() {
                tracing::debug!("look-ahead queue is empty");
                return Ok(None);
            }
        }

        if kind != EntryKind::InterruptRequest && kind != EntryKind::SkippedCall {
            while self
                .queue
                .front()
                .is_some_and(|e| e.kind() == EntryKind::Debug)
            {
                let debug = self.queue.pop_front().expect("head checked above");
                self.pool.recycle(debug);
            }
            if self.queue.is_empty() {
                return Ok(None);
            }
        }

        let (head_point, head_kind, head_callsite) = {
            let head = self.queue.front().expect("queue checked non-empty");
            (head.prog_point, head.kind(), head.callsite)
        };

        if head_point.guest_instr_count != 0 {
            match machine.compare(machine.prog_point(), head_point, kind) {
                std::cmp::Ordering::Less => return Ok(None),
                std::cmp::Ordering::Greater => return Err(self.diverged(machine, kind)),
                std::cmp::Ordering::Equal => {}
            }
        }

        if head_kind != kind {
            return Ok(None);
        }
        if check_callsite && head_callsite != callsite {
            return Ok(None);
        }
        Ok(self.queue.pop_front())
    }

    /// Build the fatal-divergence error, dumping both program points, the
    /// queue head, and the recently consumed entries, then escape the CPU
    /// loop.
    fn diverged<M: Machine>(&mut self, machine: &mut M, wanted: EntryKind) -> Error {
        let current = machine.prog_point();
        let (logged, found) = match self.queue.front() {
            Some(head) => (Some(head.prog_point), Some(head.kind())),
            None => (None, None),
        };
        tracing::error!(%current, wanted = %wanted, "replay divergence");
        match logged {
            Some(logged) => {
                tracing::error!(%logged, "log head program point");
                if logged.guest_instr_count != current.guest_instr_count {
                    tracing::error!("guest instruction counts disagree");
                }
            }
            None => tracing::error!("look-ahead queue is empty"),
        }
        for consumed in self.pool.history() {
            tracing::error!(entry = %consumed, "recently consumed");
        }
        machine.quit_cpu_loop();
        Error::Divergence(Box::new(Divergence {
            current,
            logged,
            wanted,
            found,
        }))
    }

    fn require<M: Machine>(
        &mut self,
        machine: &mut M,
        kind: EntryKind,
        callsite: Callsite,
    ) -> Result<Box<LogEntry>, Error> {
        let Some(entry) = self.get_next(machine, kind, callsite, false)? else {
            return Err(self.diverged(machine, kind));
        };
        if entry.callsite != callsite {
            tracing::error!(
                logged = %entry.callsite,
                current = %callsite,
                "callsite mismatch"
            );
            self.queue.push_front(entry);
            return Err(self.diverged(machine, kind));
        }
        Ok(entry)
    }

    pub fn replay_input_1<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u8, Error> {
        let entry = self.require(machine, EntryKind::Input1, callsite)?;
        let value = match &entry.payload {
            EntryPayload::Input1(v) => *v,
            _ => unreachable!("get_next returned wrong kind"),
        };
        self.pool.recycle(entry);
        Ok(value)
    }

    pub fn replay_input_2<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u16, Error> {
        let entry = self.require(machine, EntryKind::Input2, callsite)?;
        let value = match &entry.payload {
            EntryPayload::Input2(v) => *v,
            _ => unreachable!("get_next returned wrong kind"),
        };
        self.pool.recycle(entry);
        Ok(value)
    }

    pub fn replay_input_4<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u32, Error> {
        let entry = self.require(machine, EntryKind::Input4, callsite)?;
        let value = match &entry.payload {
            EntryPayload::Input4(v) => *v,
            _ => unreachable!("get_next returned wrong kind"),
        };
        self.pool.recycle(entry);
        Ok(value)
    }

    pub fn replay_input_8<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u64, Error> {
        let entry = self.require(machine, EntryKind::Input8, callsite)?;
        let value = match &entry.payload {
            EntryPayload::Input8(v) => *v,
            _ => unreachable!("get_next returned wrong kind"),
        };
        self.pool.recycle(entry);
        Ok(value)
    }

    /// Advance the replayed pending-interrupt value if the log has a
    /// transition at this point, then return the current value. After a
    /// transition is consumed the queue is refilled immediately so the next
    /// interrupt-shaped stop point is already queued.
    pub fn replay_interrupt_request<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u32, Error> {
        if let Some(entry) = self.get_next(machine, EntryKind::InterruptRequest, callsite, true)? {
            self.current_interrupt_request = match &entry.payload {
                EntryPayload::InterruptRequest(v) => *v,
                _ => unreachable!("get_next returned wrong kind"),
            };
            self.pool.recycle(entry);
            self.fill_queue(machine)?;
        }
        Ok(self.current_interrupt_request)
    }

    /// Returns zero when no exit request is queued here; the writer elides
    /// zero values, so absence means none was pending.
    pub fn replay_exit_request<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<u32, Error> {
        let Some(entry) = self.get_next(machine, EntryKind::ExitRequest, callsite, false)? else {
            return Ok(0);
        };
        if entry.callsite != callsite {
            tracing::error!(
                logged = %entry.callsite,
                current = %callsite,
                "exit-request callsite mismatch"
            );
            self.queue.push_front(entry);
            return Err(self.diverged(machine, EntryKind::ExitRequest));
        }
        let value = match &entry.payload {
            EntryPayload::ExitRequest(v) => *v,
            _ => unreachable!("get_next returned wrong kind"),
        };
        self.pool.recycle(entry);
        Ok(value)
    }

    /// Advisory checkpoint check: discard leading debug entries at or behind
    /// the current point. An entry strictly ahead stays queued; replay may
    /// visit a checkpoint more often than record did because
    /// translation-block chaining differs between the two.
    pub fn replay_debug<M: Machine>(&mut self, machine: &mut M, _callsite: Callsite) {
        let current = machine.prog_point();
        while let Some(head) = self.queue.front() {
            if head.kind() != EntryKind::Debug {
                break;
            }
            let log_point = head.prog_point;
            if log_point.guest_instr_count > current.guest_instr_count {
                break;
            }
            let entry = self.queue.pop_front().expect("head checked above");
            self.pool.recycle(entry);
            if log_point.guest_instr_count == current.guest_instr_count {
                tracing::info!(%current, "debug checkpoint passed");
            } else {
                tracing::warn!(%log_point, %current, "debug checkpoint behind replay point");
            }
        }
    }

    /// Pump every skipped call logged at the current program point back into
    /// the machine. If the pump empties the queue while servicing the
    /// main-loop wait, refill before returning.
    pub fn replay_skipped_calls<M: Machine>(
        &mut self,
        machine: &mut M,
        callsite: Callsite,
    ) -> Result<(), Error> {
        while let Some(entry) = self.get_next(machine, EntryKind::SkippedCall, callsite, false)? {
            let EntryPayload::SkippedCall(call) = &entry.payload else {
                unreachable!("get_next returned wrong kind");
            };
            match call {
                SkippedCall::CpuMemRw { addr, data } => machine.apply_cpu_mem_rw(*addr, data),
                SkippedCall::CpuMemUnmap { addr, data } => {
                    machine.apply_cpu_mem_unmap(*addr, data)
                }
                SkippedCall::MemRegionChange {
                    start,
                    size,
                    mtype,
                    name,
                    added,
                } => machine.apply_memory_region_change(*start, *size, *mtype, name, *added),
                SkippedCall::HdTransfer {
                    kind,
                    src,
                    dest,
                    num_bytes,
                } => machine.apply_hd_transfer(*kind, *src, *dest, *num_bytes),
                SkippedCall::NetTransfer {
                    kind,
                    src,
                    dest,
                    num_bytes,
                } => machine.apply_net_transfer(*kind, *src, *dest, *num_bytes),
                SkippedCall::HandlePacket { direction, data } => {
                    machine.deliver_packet(*direction, data)
                }
            }
            self.pool.recycle(entry);
            if callsite == Callsite::MainLoopWait && self.queue.is_empty() {
                self.fill_queue(machine)?;
            }
        }
        Ok(())
    }

    /// Report per-kind statistics and free the queue and the recycle pool.
    pub fn finish(mut self) -> ReplayStats {
        for kind in EntryKind::all() {
            tracing::info!(
                kind = kind.name(),
                count = self.stats.counts[kind.index()],
                bytes = self.stats.bytes[kind.index()],
                "log entry stats"
            );
        }
        tracing::info!(max_queue_len = self.stats.max_queue_len, "queue high-water mark");
        while let Some(entry) = self.queue.pop_front() {
            self.pool.recycle(entry);
        }
        let (count, bytes) = self.pool.drain();
        tracing::info!(count, bytes, "recycle pool drained");
        self.stats
    }
}
