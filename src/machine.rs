//! The emulator side of the record/replay boundary.
//!
//! The log core never touches guest state directly; everything it needs from
//! the emulator (the deterministic clock, the replay-alignment comparator,
//! the appliers for skipped-call effects, snapshot save/load) comes through
//! the [`Machine`] trait. All of these are called on the virtual-CPU thread.

use std::cmp::Ordering;
use std::io;
use std::path::Path;

use crate::record::{EntryKind, HdTransferKind, MemType, NetTransferKind, ProgPoint};

pub trait Machine {
    /// The current program point. Called on every record and replay step.
    fn prog_point(&self) -> ProgPoint;

    /// Kind-aware compare of the current program point against a logged one,
    /// used for replay alignment.
    ///
    /// The default compares the deterministic instruction count, with one
    /// exception: a logged interrupt-request transition is level state, not
    /// an edge pinned to an instant, so a poll later than the logged point
    /// still matches it instead of reporting the machine ahead of the log.
    /// Emulators with other kinds that may fire off-point override this.
    fn compare(&self, current: ProgPoint, logged: ProgPoint, kind: EntryKind) -> Ordering {
        match current.guest_instr_count.cmp(&logged.guest_instr_count) {
            Ordering::Greater if kind == EntryKind::InterruptRequest => Ordering::Equal,
            order => order,
        }
    }

    /// Write `data` into guest physical memory at `addr`.
    fn apply_cpu_mem_rw(&mut self, addr: u64, data: &[u8]);

    /// Map the guest region at `addr`, copy `data` into it, and unmap it.
    fn apply_cpu_mem_unmap(&mut self, addr: u64, data: &[u8]);

    /// Install (`added`) or remove an I/O memory region.
    fn apply_memory_region_change(
        &mut self,
        start: u64,
        size: u64,
        mtype: MemType,
        name: &str,
        added: bool,
    );

    /// Re-apply a recorded block-device transfer.
    fn apply_hd_transfer(&mut self, kind: HdTransferKind, src: u64, dest: u64, num_bytes: u32);

    /// Re-apply a recorded network-device transfer.
    fn apply_net_transfer(&mut self, kind: NetTransferKind, src: u64, dest: u64, num_bytes: u32);

    /// Hand a recorded packet to the guest NIC.
    fn deliver_packet(&mut self, direction: u8, data: &[u8]);

    /// Escape the emulator's inner CPU loop after a fatal replay divergence.
    fn quit_cpu_loop(&mut self);

    /// Save the whole-VM snapshot that anchors a recording.
    fn save_snapshot(&mut self, path: &Path) -> io::Result<()>;

    /// Load a previously saved whole-VM snapshot.
    fn load_snapshot(&mut self, path: &Path) -> io::Result<()>;

    /// Reset the per-CPU deterministic instruction counter.
    fn reset_instr_count(&mut self);
}
