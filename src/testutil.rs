//! Shared mock machine for unit tests.

use std::path::{Path, PathBuf};

use crate::machine::Machine;
use crate::record::{HdTransferKind, MemType, NetTransferKind, ProgPoint};

/// A machine with a hand-cranked clock that records every upcall.
#[derive(Default)]
pub struct TestMachine {
    pub instr: u64,
    pub pc: u64,
    pub mem_writes: Vec<(u64, Vec<u8>)>,
    pub unmaps: Vec<(u64, Vec<u8>)>,
    pub region_changes: Vec<(u64, u64, MemType, String, bool)>,
    pub hd_transfers: Vec<(HdTransferKind, u64, u64, u32)>,
    pub net_transfers: Vec<(NetTransferKind, u64, u64, u32)>,
    pub packets: Vec<Vec<u8>>,
    pub snapshots_saved: Vec<PathBuf>,
    pub snapshots_loaded: Vec<PathBuf>,
    pub quit: bool,
}

impl Machine for TestMachine {
    fn prog_point(&self) -> ProgPoint {
        ProgPoint::new(self.instr, self.pc, 0)
    }

    fn apply_cpu_mem_rw(&mut self, addr: u64, data: &[u8]) {
        self.mem_writes.push((addr, data.to_vec()));
    }

    fn apply_cpu_mem_unmap(&mut self, addr: u64, data: &[u8]) {
        self.unmaps.push((addr, data.to_vec()));
    }

    fn apply_memory_region_change(
        &mut self,
        start: u64,
        size: u64,
        mtype: MemType,
        name: &str,
        added: bool,
    ) {
        self.region_changes
            .push((start, size, mtype, name.to_owned(), added));
    }

    fn apply_hd_transfer(&mut self, kind: HdTransferKind, src: u64, dest: u64, num_bytes: u32) {
        self.hd_transfers.push((kind, src, dest, num_bytes));
    }

    fn apply_net_transfer(&mut self, kind: NetTransferKind, src: u64, dest: u64, num_bytes: u32) {
        self.net_transfers.push((kind, src, dest, num_bytes));
    }

    fn deliver_packet(&mut self, _direction: u8, data: &[u8]) {
        self.packets.push(data.to_vec());
    }

    fn quit_cpu_loop(&mut self) {
        self.quit = true;
    }

    fn save_snapshot(&mut self, path: &Path) -> std::io::Result<()> {
        self.snapshots_saved.push(path.to_owned());
        Ok(())
    }

    fn load_snapshot(&mut self, path: &Path) -> std::io::Result<()> {
        self.snapshots_loaded.push(path.to_owned());
        Ok(())
    }

    fn reset_instr_count(&mut self) {
        self.instr = 0;
    }
}
